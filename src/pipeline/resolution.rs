//! Name resolution with alias fallback.
//!
//! External research sources index companies by name, and the name we hold
//! is not always the one they know. Resolution builds a candidate list —
//! display name first, then active aliases in trust order (manual > auto >
//! seed) — and tries each against the lookup until one works. When an alias
//! wins, its text is promoted to the company's display name so future
//! lookups lead with it; the company id never changes.

use std::future::Future;

use crate::db::DbCompany;
use crate::error::{SourceError, WorkerError};
use crate::helpers::normalize_name;
use crate::state::AppState;

/// A successful lookup plus how it was reached.
#[derive(Debug)]
pub struct ResolvedLookup<T> {
    pub value: T,
    pub used_name: String,
    /// True when the winning candidate was an alias that got promoted.
    pub promoted: bool,
}

/// Try `lookup` with the company's display name, then each active alias in
/// trust order. Candidates that normalize identically are tried once.
///
/// On total failure no canonical change is made and the error names the
/// company so the caller can record it as a step error.
pub async fn resolve_with_fallback<T, F, Fut>(
    state: &AppState,
    company: &DbCompany,
    lookup: F,
) -> Result<ResolvedLookup<T>, WorkerError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let aliases = state.read_db()?.get_aliases(&company.id, true)?;

    // (candidate name, alias row id when not the canonical name)
    let mut candidates: Vec<(String, Option<i64>)> = vec![(company.name.clone(), None)];
    for alias in &aliases {
        candidates.push((alias.alias.clone(), Some(alias.id)));
    }

    let mut seen = Vec::new();
    let mut last_error: Option<SourceError> = None;
    let mut tried = 0usize;

    for (name, alias_id) in candidates {
        let normalized = normalize_name(&name);
        if normalized.is_empty() || seen.contains(&normalized) {
            continue;
        }
        seen.push(normalized);
        tried += 1;

        match lookup(name.clone()).await {
            Ok(value) => {
                let promoted = match alias_id {
                    Some(id) => {
                        // The alias is the working name — lead with it next time.
                        match state.write_db().set_alias_as_canonical(&company.id, id) {
                            Ok(()) => true,
                            Err(e) => {
                                log::warn!(
                                    "Failed to promote alias '{}' for {}: {}",
                                    name,
                                    company.id,
                                    e
                                );
                                false
                            }
                        }
                    }
                    None => false,
                };
                return Ok(ResolvedLookup {
                    value,
                    used_name: name,
                    promoted,
                });
            }
            Err(err) => {
                log::info!("Lookup under '{}' failed for {}: {}", name, company.id, err);
                last_error = Some(err);
            }
        }
    }

    let detail = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no candidates".to_string());
    Err(WorkerError::Source(SourceError::Failed(format!(
        "no working name for {} after {} candidate(s): {}",
        company.id, tried, detail
    ))))
}

/// Legacy path for companies the store does not know: no alias machinery,
/// just the literal name.
pub async fn resolve_literal<T, F, Fut>(name: &str, lookup: F) -> Result<T, SourceError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    lookup(name.to_string()).await
}
