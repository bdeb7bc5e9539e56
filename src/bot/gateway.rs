//! Domain gateway: the narrow facade the conversation handlers use to reach
//! the goal-tracking domain. Authorization lives in the queries here, not in
//! the handlers.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};

use crate::bot::directory::ChatUser;
use crate::bot::storage::{now, Store, StoreError};

pub const ROLE_OWNER: i64 = 1;
pub const ROLE_WRITER: i64 = 2;
#[cfg(test)]
pub const ROLE_READER: i64 = 3;

pub const GOAL_STATUS_TODO: i64 = 1;
pub const GOAL_STATUS_ARCHIVED: i64 = 4;

/// Identifiers of a freshly created goal, used to build the deep link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedGoal {
    pub board_id: i64,
    pub category_id: i64,
    pub goal_id: i64,
}

#[derive(Clone)]
pub struct DomainGateway {
    store: Arc<Store>,
}

impl DomainGateway {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Titles of the goals the account can see: any board it participates
    /// in, board and category not deleted, goal not archived.
    pub fn visible_goals(&self, account_id: i64) -> Result<Vec<String>, StoreError> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.title
                 FROM goals g
                 JOIN categories c ON c.id = g.category_id
                 JOIN boards b ON b.id = c.board_id
                 JOIN board_participants p ON p.board_id = b.id
                 WHERE p.account_id = ?1
                   AND b.is_deleted = 0
                   AND c.is_deleted = 0
                   AND g.status <> ?2
                 ORDER BY g.id",
            )?;
            let rows = stmt.query_map(params![account_id, GOAL_STATUS_ARCHIVED], |row| row.get(0))?;
            rows.collect()
        })
    }

    /// Titles of the categories the account can create goals in: boards
    /// where it holds the owner or writer role, nothing soft-deleted.
    pub fn writable_categories(&self, account_id: i64) -> Result<Vec<String>, StoreError> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.title
                 FROM categories c
                 JOIN boards b ON b.id = c.board_id
                 JOIN board_participants p ON p.board_id = b.id
                 WHERE p.account_id = ?1
                   AND p.role IN (?2, ?3)
                   AND b.is_deleted = 0
                   AND c.is_deleted = 0
                 ORDER BY c.id",
            )?;
            let rows =
                stmt.query_map(params![account_id, ROLE_OWNER, ROLE_WRITER], |row| row.get(0))?;
            rows.collect()
        })
    }

    /// Resolve `title` (exact, case-sensitive) within the account's writable
    /// categories and persist it as the user's selection. Returns the
    /// category id, or `None` when nothing matched - the list may have
    /// changed since it was displayed; last write wins.
    pub fn select_category(
        &self,
        user: &ChatUser,
        title: &str,
    ) -> Result<Option<i64>, StoreError> {
        let Some(account_id) = user.verified_account() else {
            return Ok(None);
        };

        self.store.with_conn(|conn| {
            let category_id: Option<i64> = conn
                .query_row(
                    "SELECT c.id
                     FROM categories c
                     JOIN boards b ON b.id = c.board_id
                     JOIN board_participants p ON p.board_id = b.id
                     WHERE p.account_id = ?1
                       AND p.role IN (?2, ?3)
                       AND b.is_deleted = 0
                       AND c.is_deleted = 0
                       AND c.title = ?4
                     LIMIT 1",
                    params![account_id, ROLE_OWNER, ROLE_WRITER, title],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(category_id) = category_id {
                conn.execute(
                    "UPDATE tg_users SET selected_category = ?1, updated = ?2 WHERE id = ?3",
                    params![category_id, now(), user.id],
                )?;
            }
            Ok(category_id)
        })
    }

    /// Create a goal under `category_id`, owned by `account_id`.
    pub fn create_goal(
        &self,
        account_id: i64,
        category_id: i64,
        title: &str,
    ) -> Result<CreatedGoal, StoreError> {
        self.store.with_conn(|conn| {
            let board_id: i64 = conn.query_row(
                "SELECT board_id FROM categories WHERE id = ?1",
                params![category_id],
                |row| row.get(0),
            )?;

            conn.execute(
                "INSERT INTO goals (category_id, account_id, title, status, created, updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![category_id, account_id, title, GOAL_STATUS_TODO, now()],
            )?;

            Ok(CreatedGoal {
                board_id,
                category_id,
                goal_id: conn.last_insert_rowid(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::directory::UserDirectory;

    struct Fixture {
        store: Arc<Store>,
        gateway: DomainGateway,
        account: i64,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let gateway = DomainGateway::new(store.clone());
        let account = store.add_account("alice");
        Fixture { store, gateway, account }
    }

    fn chat_user(f: &Fixture) -> ChatUser {
        let directory = UserDirectory::new(f.store.clone());
        let (user, _) = directory.get_or_create(10, 500).unwrap();
        directory.mark_verified(&user, f.account).unwrap();
        directory.find(500).unwrap().unwrap()
    }

    #[test]
    fn visible_goals_excludes_archived_and_deleted() {
        let f = fixture();
        let board = f.store.add_board("Work");
        f.store.add_participant(board, f.account, ROLE_READER);
        let category = f.store.add_category(board, "Inbox");
        f.store.add_goal(category, f.account, "Ship it", GOAL_STATUS_TODO);
        f.store.add_goal(category, f.account, "Old one", GOAL_STATUS_ARCHIVED);

        let dead_board = f.store.add_board("Gone");
        f.store.add_participant(dead_board, f.account, ROLE_OWNER);
        let dead_category = f.store.add_category(dead_board, "Trash");
        f.store.add_goal(dead_category, f.account, "Lost", GOAL_STATUS_TODO);
        f.store.soft_delete_board(dead_board);

        // Reader role is enough to *see* goals, just not to create them.
        assert_eq!(f.gateway.visible_goals(f.account).unwrap(), vec!["Ship it"]);
    }

    #[test]
    fn visible_goals_excludes_other_accounts_boards() {
        let f = fixture();
        let stranger = f.store.add_account("mallory");
        let board = f.store.add_board("Private");
        f.store.add_participant(board, stranger, ROLE_OWNER);
        let category = f.store.add_category(board, "Secret");
        f.store.add_goal(category, stranger, "Hidden", GOAL_STATUS_TODO);

        assert!(f.gateway.visible_goals(f.account).unwrap().is_empty());
    }

    #[test]
    fn writable_categories_requires_owner_or_writer() {
        let f = fixture();

        let owned = f.store.add_board("Mine");
        f.store.add_participant(owned, f.account, ROLE_OWNER);
        f.store.add_category(owned, "Plans");

        let shared = f.store.add_board("Shared");
        f.store.add_participant(shared, f.account, ROLE_WRITER);
        f.store.add_category(shared, "Chores");

        let watched = f.store.add_board("Watched");
        f.store.add_participant(watched, f.account, ROLE_READER);
        f.store.add_category(watched, "ReadOnly");

        assert_eq!(
            f.gateway.writable_categories(f.account).unwrap(),
            vec!["Plans", "Chores"]
        );
    }

    #[test]
    fn writable_categories_excludes_soft_deleted() {
        let f = fixture();
        let board = f.store.add_board("Work");
        f.store.add_participant(board, f.account, ROLE_OWNER);
        f.store.add_category(board, "Alive");
        let dead = f.store.add_category(board, "Dead");
        f.store.soft_delete_category(dead);

        assert_eq!(f.gateway.writable_categories(f.account).unwrap(), vec!["Alive"]);
    }

    #[test]
    fn select_category_matches_exact_title_only() {
        let f = fixture();
        let board = f.store.add_board("Work");
        f.store.add_participant(board, f.account, ROLE_OWNER);
        let category = f.store.add_category(board, "Home");
        let user = chat_user(&f);

        assert_eq!(f.gateway.select_category(&user, "home").unwrap(), None);
        assert_eq!(f.gateway.select_category(&user, "Home").unwrap(), Some(category));

        let user = UserDirectory::new(f.store.clone()).find(500).unwrap().unwrap();
        assert_eq!(user.selected_category, Some(category));
    }

    #[test]
    fn select_category_rejects_readonly_boards() {
        let f = fixture();
        let board = f.store.add_board("Watched");
        f.store.add_participant(board, f.account, ROLE_READER);
        f.store.add_category(board, "ReadOnly");
        let user = chat_user(&f);

        assert_eq!(f.gateway.select_category(&user, "ReadOnly").unwrap(), None);
    }

    #[test]
    fn create_goal_returns_the_full_identifier_triple() {
        let f = fixture();
        let board = f.store.add_board("Work");
        f.store.add_participant(board, f.account, ROLE_OWNER);
        let category = f.store.add_category(board, "Home");

        let created = f.gateway.create_goal(f.account, category, "Buy milk").unwrap();
        assert_eq!(created.board_id, board);
        assert_eq!(created.category_id, category);
        assert_eq!(f.store.count_goals_titled("Buy milk"), 1);
        assert_eq!(f.gateway.visible_goals(f.account).unwrap(), vec!["Buy milk"]);
    }
}
