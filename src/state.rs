//! Per-process context object.
//!
//! One `AppState` is constructed at startup and injected into the worker
//! loop, pipeline, and handlers — no global singletons. It owns the single
//! write handle to the database; all writes serialize behind `write_db()`
//! for the duration of their transaction, while readers open short-lived
//! connections of their own via `read_db()` (split-lock model).

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::cache::ResearchCache;
use crate::config::Config;
use crate::db::{DbError, ResearchDb};
use crate::sources::Sources;

pub struct AppState {
    pub config: Config,
    pub cache: ResearchCache,
    pub sources: Sources,
    db_path: PathBuf,
    db_write: Mutex<ResearchDb>,
}

impl AppState {
    /// Open the database (applying migrations), wire the cache, and bundle
    /// the injected collaborators.
    pub fn new(config: Config, sources: Sources) -> Result<Self, DbError> {
        let db_path = match &config.db_path {
            Some(path) => path.clone(),
            None => ResearchDb::db_path()?,
        };
        let db_write = ResearchDb::open_at(db_path.clone())?;
        let cache = ResearchCache::new(db_path.clone(), config.cache.clone());
        cache.apply_startup_policy();

        Ok(Self {
            config,
            cache,
            sources,
            db_path,
            db_write: Mutex::new(db_write),
        })
    }

    /// The single serialized write handle. Hold only for the duration of the
    /// write — never across an await.
    pub fn write_db(&self) -> parking_lot::MutexGuard<'_, ResearchDb> {
        self.db_write.lock()
    }

    /// Open a fresh read connection. Readers never contend with the write
    /// lock; each read gets its own connection and transaction scope.
    pub fn read_db(&self) -> Result<ResearchDb, DbError> {
        ResearchDb::open_at(self.db_path.clone())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}
