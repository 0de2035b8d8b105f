pub mod migrations;
pub mod models;
pub mod queries;

use anyhow::Result;
use rusqlite::{ErrorCode, TransactionBehavior};

pub use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// The single source of truth for users, friends, chats and messages.
///
/// One SQLite connection guarded by a mutex. Every `with_tx` call runs as an
/// `IMMEDIATE` transaction while holding the lock, so read-then-write
/// sequences (membership checks, idempotent chat lookup, soft-delete
/// transitions) are serialized against each other.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::init(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    /// Run `f` inside one transaction. Commits when `f` returns `Ok`; any
    /// error (or a panic/cancellation unwinding through here) drops the
    /// transaction, which rolls it back.
    pub fn with_tx<F, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> std::result::Result<T, E>,
        E: From<anyhow::Error>,
    {
        self.with_tx_then(f, |_| {})
    }

    /// [`Database::with_tx`], then `committed` on the result after the
    /// commit but before the lock is released. Side effects issued from
    /// `committed` therefore happen in commit order. It must not block or
    /// touch the database.
    pub fn with_tx_then<F, C, T, E>(&self, f: F, committed: C) -> std::result::Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> std::result::Result<T, E>,
        C: FnOnce(&T),
        E: From<anyhow::Error>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| E::from(anyhow::anyhow!("DB lock poisoned: {}", e)))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| E::from(anyhow::Error::from(e)))?;
        let value = f(&tx)?;
        tx.commit().map_err(|e| E::from(anyhow::Error::from(e)))?;
        committed(&value);
        drop(conn);
        Ok(value)
    }
}

/// True when `err` is a SQLite constraint violation (UNIQUE, CHECK, FK...).
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use kumas_types::models::Gender;

    #[test]
    fn test_with_tx_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();

        let result: Result<()> = db.with_tx(|tx| {
            queries::insert_user(tx, "a@kumas.dev", "hash", "a", Gender::M)?;
            anyhow::bail!("abort")
        });
        assert!(result.is_err());

        let found = db
            .with_conn(|conn| queries::find_user_by_email(conn, "a@kumas.dev"))
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_committed_hook_runs_under_lock_only_on_success() {
        let db = Database::open_in_memory().unwrap();
        let mut seen = None;

        let id = db
            .with_tx_then(
                |tx| queries::insert_user(tx, "a@kumas.dev", "hash", "a", Gender::M),
                |id| {
                    assert!(db.conn.try_lock().is_err());
                    seen = Some(*id);
                },
            )
            .unwrap();
        assert_eq!(seen, Some(id));
        assert!(db.conn.try_lock().is_ok());

        let mut called = false;
        let result: Result<()> = db.with_tx_then(|_| anyhow::bail!("abort"), |_| called = true);
        assert!(result.is_err());
        assert!(!called);
    }

    #[test]
    fn test_duplicate_email_is_constraint_violation() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| queries::insert_user(conn, "a@kumas.dev", "h", "a", Gender::M))
            .unwrap();

        let err = db
            .with_conn(|conn| queries::insert_user(conn, "a@kumas.dev", "h", "b", Gender::F))
            .unwrap_err();
        assert!(is_constraint_violation(&err));
    }
}
