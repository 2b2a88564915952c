//! Step-ordered research cache.
//!
//! Every external research operation is wrapped in [`ResearchCache::cached`],
//! keyed by the operation's name plus a SHA-256 fingerprint of its arguments'
//! canonical JSON encoding (serde_json emits object keys in sorted order, so
//! logically-equal arguments always produce the same key — there are no
//! volatile substrings to scrub).
//!
//! Steps form a dependency ladder: caching "up to" a step means that step
//! and everything before it. `cacheUntil = "compensation-data"` serves
//! compensation data and earlier from cache while later steps always run
//! fresh.
//!
//! The cache must never fail an operation: storage errors degrade to a miss
//! and a warning, and a cached payload that no longer deserializes into the
//! caller's type (schema drift) is evicted and recomputed silently.

use std::future::Future;
use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::{DbError, ResearchDb};
use crate::error::SourceError;

/// Ordinal position of an operation in the pipeline's dependency ladder.
/// Declaration order is the ladder order; the derived `Ord` is meaningful.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStep {
    FetchNewMessages,
    BuildRetrievalContext,
    BasicFacts,
    ComparableRoleData,
    CompensationData,
    RelationshipData,
    ReplyGeneration,
}

impl CacheStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStep::FetchNewMessages => "fetch-new-messages",
            CacheStep::BuildRetrievalContext => "build-retrieval-context",
            CacheStep::BasicFacts => "basic-facts",
            CacheStep::ComparableRoleData => "comparable-role-data",
            CacheStep::CompensationData => "compensation-data",
            CacheStep::RelationshipData => "relationship-data",
            CacheStep::ReplyGeneration => "reply-generation",
        }
    }
}

/// Cache policy for one process run. Loaded from config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Master switch: disables all caching (reads and writes).
    pub no_cache: bool,
    /// When set, only steps at or before this ordinal are cached.
    pub cache_until: Option<CacheStep>,
    /// Steps whose entries are evicted before running.
    pub clear_cache: Vec<CacheStep>,
    /// Evict everything at process start.
    pub clear_all_cache: bool,
}

impl CacheSettings {
    /// Whether results for `step` may be read from / written to the cache.
    pub fn is_enabled(&self, step: CacheStep) -> bool {
        if self.no_cache {
            return false;
        }
        match self.cache_until {
            Some(until) => step <= until,
            None => true,
        }
    }

    /// Whether `step` was explicitly flagged for eviction this run.
    pub fn should_clear(&self, step: CacheStep) -> bool {
        self.clear_cache.contains(&step)
    }
}

/// Memoizing wrapper around external research operations, backed by the
/// `research_cache` table. Opens short-lived connections per operation so it
/// never contends with the store's write lock.
pub struct ResearchCache {
    db_path: PathBuf,
    settings: CacheSettings,
}

impl ResearchCache {
    pub fn new(db_path: PathBuf, settings: CacheSettings) -> Self {
        Self { db_path, settings }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Apply process-start policy: `clearAllCache` purges the table,
    /// `clearCache` evicts the listed steps.
    pub fn apply_startup_policy(&self) {
        if self.settings.clear_all_cache {
            match self.purge_all() {
                Ok(n) => log::info!("Cache: cleared all {} entries", n),
                Err(e) => log::warn!("Cache: failed to clear all entries: {}", e),
            }
            return;
        }
        for step in &self.settings.clear_cache {
            match self.evict_step(*step) {
                Ok(n) => log::info!("Cache: cleared {} entries for step {}", n, step.as_str()),
                Err(e) => log::warn!("Cache: failed to clear step {}: {}", step.as_str(), e),
            }
        }
    }

    /// Run `op` through the cache.
    ///
    /// On a hit the stored payload is re-validated against the caller's
    /// expected type; drifted payloads are evicted and recomputed. On a miss
    /// the operation runs and its result is stored when caching is enabled
    /// for `step`.
    pub async fn cached<A, T, F, Fut>(
        &self,
        step: CacheStep,
        op: &str,
        args: &A,
        f: F,
    ) -> Result<T, SourceError>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let key = match serde_json::to_string(args) {
            Ok(canonical) => fingerprint(op, &canonical),
            Err(e) => {
                // Unfingerprintable args: run uncached rather than fail.
                log::warn!("Cache: cannot fingerprint args for {}: {}", op, e);
                return f().await;
            }
        };

        if self.settings.should_clear(step) {
            if let Err(e) = self.evict(&key) {
                log::warn!("Cache: eviction failed for {}: {}", op, e);
            }
        }

        let enabled = self.settings.is_enabled(step);
        if enabled {
            match self.lookup(&key) {
                Ok(Some(payload)) => match serde_json::from_str::<T>(&payload) {
                    Ok(value) => {
                        log::debug!("Cache hit: {} [{}]", op, step.as_str());
                        return Ok(value);
                    }
                    Err(e) => {
                        log::debug!("Cache: stale payload for {} ({}), recomputing", op, e);
                        if let Err(e) = self.evict(&key) {
                            log::warn!("Cache: eviction of stale entry failed: {}", e);
                        }
                    }
                },
                Ok(None) => {}
                Err(e) => log::warn!("Cache: lookup failed for {}: {}", op, e),
            }
        }

        let value = f().await?;

        if enabled {
            match serde_json::to_string(&value) {
                Ok(payload) => {
                    if let Err(e) = self.store(&key, step, &payload) {
                        log::warn!("Cache: store failed for {}: {}", op, e);
                    }
                }
                Err(e) => log::warn!("Cache: cannot serialize result of {}: {}", op, e),
            }
        }

        Ok(value)
    }

    fn open(&self) -> Result<ResearchDb, DbError> {
        ResearchDb::open_at(self.db_path.clone())
    }

    fn lookup(&self, key: &str) -> Result<Option<String>, DbError> {
        let db = self.open()?;
        Ok(db
            .conn_ref()
            .query_row(
                "SELECT payload FROM research_cache WHERE cache_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn store(&self, key: &str, step: CacheStep, payload: &str) -> Result<(), DbError> {
        let db = self.open()?;
        db.conn_ref().execute(
            "INSERT INTO research_cache (cache_key, step, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(cache_key) DO UPDATE SET
                step = excluded.step,
                payload = excluded.payload,
                created_at = excluded.created_at",
            params![key, step.as_str(), payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn evict(&self, key: &str) -> Result<usize, DbError> {
        let db = self.open()?;
        Ok(db
            .conn_ref()
            .execute("DELETE FROM research_cache WHERE cache_key = ?1", params![key])?)
    }

    fn evict_step(&self, step: CacheStep) -> Result<usize, DbError> {
        let db = self.open()?;
        Ok(db.conn_ref().execute(
            "DELETE FROM research_cache WHERE step = ?1",
            params![step.as_str()],
        )?)
    }

    fn purge_all(&self) -> Result<usize, DbError> {
        let db = self.open()?;
        Ok(db.conn_ref().execute("DELETE FROM research_cache", [])?)
    }
}

/// Cache key: operation identity + canonical argument encoding, hashed.
fn fingerprint(op: &str, canonical_args: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(op.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(canonical_args.as_bytes());
    format!("{}:{:x}", op, hasher.finalize())
}
