//! SQLite-based durable state: the task queue, the canonical company store,
//! aliases, messages, and the append-only event log.
//!
//! The database lives at `~/.jobscout/jobscout.db`. Access follows a split
//! model: the process holds exactly one write handle (behind the context
//! object's mutex) for the duration of each write transaction, while readers
//! open their own short-lived connections so status polling never waits on
//! the research pipeline.

use std::path::PathBuf;

use rusqlite::Connection;

pub mod types;
pub use types::*;

mod aliases;
mod companies;
mod events;
mod messages;
mod tasks;

pub struct ResearchDb {
    conn: Connection,
}

impl ResearchDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(DbError::Sqlite)?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT").map_err(DbError::Sqlite)?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at `~/.jobscout/jobscout.db` and apply
    /// the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.jobscout/jobscout.db`.
    pub fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".jobscout").join("jobscout.db"))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Open a fresh on-disk database inside a tempdir. On-disk (not
    /// in-memory) so read paths can open their own connections against it.
    pub fn temp_db() -> (tempfile::TempDir, ResearchDb) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = ResearchDb::open_at(dir.path().join("test.db")).expect("open test db");
        (dir, db)
    }
}
