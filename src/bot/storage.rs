//! SQLite store shared by the user directory and the domain gateway.

use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

/// A persistence failure. Fatal to the update being processed, never to the
/// polling loop.
#[derive(Debug)]
pub struct StoreError(rusqlite::Error);

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store error: {}", self.0)
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self(e)
    }
}

/// Connection owner. Schema is created idempotently on open.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                created TEXT NOT NULL,
                updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS boards (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created TEXT NOT NULL,
                updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS board_participants (
                id INTEGER PRIMARY KEY,
                board_id INTEGER NOT NULL REFERENCES boards(id),
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                role INTEGER NOT NULL,
                created TEXT NOT NULL,
                updated TEXT NOT NULL,
                UNIQUE(board_id, account_id)
            );

            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                board_id INTEGER NOT NULL REFERENCES boards(id),
                title TEXT NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created TEXT NOT NULL,
                updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS goals (
                id INTEGER PRIMARY KEY,
                category_id INTEGER NOT NULL REFERENCES categories(id),
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                title TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 1,
                created TEXT NOT NULL,
                updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tg_users (
                id INTEGER PRIMARY KEY,
                chat_id INTEGER NOT NULL,
                telegram_user_id INTEGER NOT NULL,
                account_id INTEGER REFERENCES accounts(id),
                verification_code TEXT,
                verification_status INTEGER NOT NULL DEFAULT 1,
                selected_category INTEGER REFERENCES categories(id),
                created TEXT NOT NULL,
                updated TEXT NOT NULL,
                UNIQUE(telegram_user_id, chat_id)
            );

            CREATE INDEX IF NOT EXISTS idx_tg_users_telegram_user_id ON tg_users(telegram_user_id);
            CREATE INDEX IF NOT EXISTS idx_categories_board_id ON categories(board_id);
            CREATE INDEX IF NOT EXISTS idx_goals_category_id ON goals(category_id);
            "#,
        )?;

        Ok(())
    }

    /// Run `f` with the locked connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        Ok(f(&conn)?)
    }
}

/// Row timestamp, stored as text the way every table stamps created/updated.
pub(crate) fn now() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Domain-side fixture helpers. In production these rows are written by the
/// web application; tests seed them directly.
#[cfg(test)]
impl Store {
    pub fn add_account(&self, username: &str) -> i64 {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO accounts (username, created, updated) VALUES (?1, ?2, ?2)",
                rusqlite::params![username, now()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .unwrap()
    }

    pub fn add_board(&self, title: &str) -> i64 {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO boards (title, created, updated) VALUES (?1, ?2, ?2)",
                rusqlite::params![title, now()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .unwrap()
    }

    pub fn add_participant(&self, board_id: i64, account_id: i64, role: i64) {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO board_participants (board_id, account_id, role, created, updated)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![board_id, account_id, role, now()],
            )
        })
        .unwrap();
    }

    pub fn add_category(&self, board_id: i64, title: &str) -> i64 {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO categories (board_id, title, created, updated) VALUES (?1, ?2, ?3, ?3)",
                rusqlite::params![board_id, title, now()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .unwrap()
    }

    pub fn add_goal(&self, category_id: i64, account_id: i64, title: &str, status: i64) -> i64 {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO goals (category_id, account_id, title, status, created, updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![category_id, account_id, title, status, now()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .unwrap()
    }

    pub fn soft_delete_board(&self, board_id: i64) {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE boards SET is_deleted = 1, updated = ?1 WHERE id = ?2",
                rusqlite::params![now(), board_id],
            )
        })
        .unwrap();
    }

    pub fn soft_delete_category(&self, category_id: i64) {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE categories SET is_deleted = 1, updated = ?1 WHERE id = ?2",
                rusqlite::params![now(), category_id],
            )
        })
        .unwrap();
    }

    pub fn count_goals_titled(&self, title: &str) -> i64 {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM goals WHERE title = ?1",
                rusqlite::params![title],
                |row| row.get(0),
            )
        })
        .unwrap()
    }

    pub fn execute_raw(&self, sql: &str) {
        self.with_conn(|conn| conn.execute_batch(sql)).unwrap();
    }
}
