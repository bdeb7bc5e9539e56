//! User directory: the bot's record of each telegram identity and its
//! verification lifecycle.

use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::bot::storage::{now, Store, StoreError};

/// Length of an issued verification code.
const CODE_LEN: usize = 12;

const USER_COLUMNS: &str =
    "id, chat_id, telegram_user_id, account_id, verification_code, verification_status, selected_category";

/// Whether a chat identity has been linked to an application account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    NotVerified,
    Verified,
}

impl VerificationStatus {
    fn from_db(value: i64) -> Self {
        match value {
            2 => Self::Verified,
            _ => Self::NotVerified,
        }
    }

    fn as_db(self) -> i64 {
        match self {
            Self::NotVerified => 1,
            Self::Verified => 2,
        }
    }
}

/// The bot's view of one telegram principal.
#[derive(Debug, Clone)]
pub struct ChatUser {
    pub id: i64,
    pub chat_id: i64,
    pub telegram_user_id: i64,
    /// Linked application account. Set exactly once, by `mark_verified`.
    pub account_id: Option<i64>,
    /// Outstanding code, overwritten on every issuance.
    pub verification_code: Option<String>,
    pub status: VerificationStatus,
    /// Category chosen mid-flow, consumed by goal creation.
    pub selected_category: Option<i64>,
}

impl ChatUser {
    pub fn is_verified(&self) -> bool {
        self.status == VerificationStatus::Verified
    }

    /// Account id when verification has completed, `None` otherwise.
    pub fn verified_account(&self) -> Option<i64> {
        if self.is_verified() { self.account_id } else { None }
    }
}

#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<Store>,
}

impl UserDirectory {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Idempotent upsert keyed by `(telegram_user_id, chat_id)`.
    pub fn get_or_create(
        &self,
        chat_id: i64,
        telegram_user_id: i64,
    ) -> Result<(ChatUser, bool), StoreError> {
        self.store.with_conn(|conn| {
            if let Some(user) = select_pair(conn, chat_id, telegram_user_id)? {
                return Ok((user, false));
            }

            conn.execute(
                "INSERT INTO tg_users (chat_id, telegram_user_id, verification_status, created, updated)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![
                    chat_id,
                    telegram_user_id,
                    VerificationStatus::NotVerified.as_db(),
                    now()
                ],
            )?;

            let user = conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM tg_users WHERE id = ?1"),
                params![conn.last_insert_rowid()],
                row_to_user,
            )?;
            Ok((user, true))
        })
    }

    pub fn find(&self, telegram_user_id: i64) -> Result<Option<ChatUser>, StoreError> {
        self.store.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {USER_COLUMNS} FROM tg_users WHERE telegram_user_id = ?1 ORDER BY id LIMIT 1"
                ),
                params![telegram_user_id],
                row_to_user,
            )
            .optional()
        })
    }

    /// Generate and persist a fresh code, overwriting any prior one, and
    /// return it for display. Uniqueness across users is not required.
    pub fn issue_verification_code(&self, user: &ChatUser) -> Result<String, StoreError> {
        let code: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CODE_LEN)
            .map(char::from)
            .collect();

        self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE tg_users SET verification_code = ?1, updated = ?2 WHERE id = ?3",
                params![code, now(), user.id],
            )
        })?;

        Ok(code)
    }

    /// External trigger only: the web application's verification endpoint
    /// calls this after matching a submitted code. The conversation handlers
    /// never do; they observe the new status on their next lookup.
    pub fn mark_verified(&self, user: &ChatUser, account_id: i64) -> Result<(), StoreError> {
        self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE tg_users SET verification_status = ?1, account_id = ?2, updated = ?3
                 WHERE id = ?4",
                params![VerificationStatus::Verified.as_db(), account_id, now(), user.id],
            )
        })?;
        Ok(())
    }
}

fn select_pair(
    conn: &Connection,
    chat_id: i64,
    telegram_user_id: i64,
) -> rusqlite::Result<Option<ChatUser>> {
    conn.query_row(
        &format!(
            "SELECT {USER_COLUMNS} FROM tg_users WHERE telegram_user_id = ?1 AND chat_id = ?2"
        ),
        params![telegram_user_id, chat_id],
        row_to_user,
    )
    .optional()
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<ChatUser> {
    Ok(ChatUser {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        telegram_user_id: row.get(2)?,
        account_id: row.get(3)?,
        verification_code: row.get(4)?,
        status: VerificationStatus::from_db(row.get(5)?),
        selected_category: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> (Arc<Store>, UserDirectory) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let directory = UserDirectory::new(store.clone());
        (store, directory)
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let (_store, dir) = directory();

        let (first, created) = dir.get_or_create(10, 500).unwrap();
        assert!(created);
        assert_eq!(first.chat_id, 10);
        assert_eq!(first.telegram_user_id, 500);
        assert_eq!(first.status, VerificationStatus::NotVerified);
        assert!(first.verification_code.is_none());
        assert!(first.selected_category.is_none());

        let (second, created) = dir.get_or_create(10, 500).unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
    }

    #[test]
    fn same_user_in_another_chat_is_a_new_record() {
        let (_store, dir) = directory();

        let (a, _) = dir.get_or_create(10, 500).unwrap();
        let (b, created) = dir.get_or_create(11, 500).unwrap();
        assert!(created);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn find_returns_none_for_unseen_user() {
        let (_store, dir) = directory();
        assert!(dir.find(404).unwrap().is_none());
    }

    #[test]
    fn issued_code_is_persisted_and_overwritten() {
        let (_store, dir) = directory();
        let (user, _) = dir.get_or_create(10, 500).unwrap();

        let first = dir.issue_verification_code(&user).unwrap();
        assert_eq!(first.len(), CODE_LEN);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(
            dir.find(500).unwrap().unwrap().verification_code.as_deref(),
            Some(first.as_str())
        );

        let second = dir.issue_verification_code(&user).unwrap();
        assert_ne!(first, second);
        assert_eq!(
            dir.find(500).unwrap().unwrap().verification_code.as_deref(),
            Some(second.as_str())
        );
    }

    #[test]
    fn mark_verified_links_the_account() {
        let (store, dir) = directory();
        let account = store.add_account("alice");
        let (user, _) = dir.get_or_create(10, 500).unwrap();
        assert!(user.verified_account().is_none());

        dir.mark_verified(&user, account).unwrap();

        let user = dir.find(500).unwrap().unwrap();
        assert!(user.is_verified());
        assert_eq!(user.verified_account(), Some(account));
    }
}
