//! The company research pipeline.
//!
//! One research task moves a company through up to four externally-backed
//! steps: basic facts, comparable-role data, compensation data, and
//! relationship/contact data. Only the first step is fatal to the task —
//! every later step failure is recorded on the company's status and the
//! pipeline keeps going, so one flaky source never throws away the rest of
//! a run. Each step reads through the cache under its own cache step.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::cache::CacheStep;
use crate::db::{AliasSource, CompanyDetails, DbCompany, ResearchStatus};
use crate::error::WorkerError;
use crate::helpers::{
    company_slug, extract_company_name, is_placeholder_name, placeholder_name,
};
use crate::sources::{CompanyFacts, FactsQuery};
use crate::state::AppState;

use super::resolution::resolve_with_fallback;

pub const STEP_COMPANY: &str = "research_company";
pub const STEP_LEVELS: &str = "research_levels";
pub const STEP_COMPENSATION: &str = "research_compensation";
pub const STEP_CONTACTS: &str = "research_contacts";

/// Arguments of a research task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResearchArgs {
    pub entity_id: Option<String>,
    pub display_name: Option<String>,
    pub source_url: Option<String>,
    pub content: Option<String>,
    pub force_levels: bool,
    pub force_contacts: bool,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl ResearchArgs {
    /// Checked before any external call is made.
    pub fn validate(&self) -> Result<(), WorkerError> {
        if non_empty(&self.content).is_some()
            || non_empty(&self.display_name).is_some()
            || non_empty(&self.source_url).is_some()
            || non_empty(&self.entity_id).is_some()
        {
            Ok(())
        } else {
            Err(WorkerError::InvalidArgs(
                "research task needs at least one of content, displayName, sourceUrl, or entityId"
                    .into(),
            ))
        }
    }
}

/// What a completed research task reports back onto its task row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchOutcome {
    pub entity_id: String,
    pub name: String,
    pub error_count: usize,
    pub completed: bool,
}

/// Run the full pipeline for one research task. Returns the task result
/// payload; a basic-facts failure re-raises after persisting a minimal
/// record so the task ends `failed`.
pub async fn run_research(
    state: &AppState,
    args: &ResearchArgs,
) -> Result<serde_json::Value, WorkerError> {
    args.validate()?;

    // Locate a pre-existing company: by id, then by normalized name.
    let read = state.read_db()?;
    let mut existing: Option<DbCompany> = None;
    if let Some(id) = non_empty(&args.entity_id) {
        existing = read.get_company(id)?;
        if existing.is_none()
            && non_empty(&args.content).is_none()
            && non_empty(&args.display_name).is_none()
            && non_empty(&args.source_url).is_none()
        {
            return Err(WorkerError::CompanyNotFound(id.to_string()));
        }
    }
    let hint_name: Option<String> = non_empty(&args.display_name)
        .map(str::to_string)
        .or_else(|| existing.as_ref().map(|c| c.name.clone()))
        .or_else(|| args.content.as_deref().and_then(extract_company_name));
    if existing.is_none() {
        if let Some(ref hint) = hint_name {
            existing = read.get_company_by_normalized_name(hint)?;
        }
    }
    drop(read);

    // ---- Step 1: basic facts (fatal on failure) ----
    let query = FactsQuery {
        content: args.content.clone(),
        name_hint: hint_name.clone(),
        source_url: args.source_url.clone(),
    };
    let facts_query = query.clone();
    let facts_result = state
        .cache
        .cached(CacheStep::BasicFacts, STEP_COMPANY, &query, move || async move {
            state.sources.facts.research(&facts_query).await
        })
        .await;

    let facts = match facts_result {
        Ok(facts) => facts,
        Err(err) => {
            // Persist a minimal record carrying the error, then re-raise so
            // the task ends failed.
            let name = hint_name.unwrap_or_else(|| placeholder_name(Utc::now()));
            if let Err(persist_err) = persist_failed_research(state, existing, &name, args, &err) {
                log::error!(
                    "Failed to persist research failure for '{}': {}",
                    name,
                    persist_err
                );
            }
            return Err(err.into());
        }
    };

    let name = facts
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .or(hint_name)
        .unwrap_or_else(|| placeholder_name(Utc::now()));
    let mut company = upsert_researched_company(state, existing, &name, args, &facts)?;

    // ---- Step 2: comparable-role data (non-fatal) ----
    let placeholder = is_placeholder_name(&company.name);
    if !placeholder || args.force_levels {
        let levels = resolve_with_fallback(state, &company, |candidate: String| async move {
            let lookup_name = candidate.clone();
            state
                .cache
                .cached(
                    CacheStep::ComparableRoleData,
                    STEP_LEVELS,
                    &candidate,
                    move || async move { state.sources.levels.lookup(&lookup_name).await },
                )
                .await
        })
        .await;
        match levels {
            Ok(resolved) => {
                company.details.levels_summary = resolved.value.summary.clone();
                if resolved.promoted {
                    company.name = resolved.used_name;
                }
            }
            Err(err) => {
                log::warn!("Levels research failed for {}: {}", company.id, err);
                company
                    .status
                    .push_step_error(STEP_LEVELS, &err.to_string(), Utc::now().to_rfc3339());
            }
        }
    } else {
        log::info!("Skipping levels research for placeholder {}", company.id);
    }

    // ---- Step 3: compensation data (non-fatal) ----
    if !placeholder || args.force_levels {
        let comp = resolve_with_fallback(state, &company, |candidate: String| async move {
            let lookup_name = candidate.clone();
            state
                .cache
                .cached(
                    CacheStep::CompensationData,
                    STEP_COMPENSATION,
                    &candidate,
                    move || async move { state.sources.compensation.lookup(&lookup_name).await },
                )
                .await
        })
        .await;
        match comp {
            Ok(resolved) => {
                let observations = resolved.value;
                if observations.is_empty() {
                    log::info!("No compensation observations for {}", company.id);
                } else {
                    let mean = observations.iter().map(|o| o.total_comp).sum::<f64>()
                        / observations.len() as f64;
                    company.details.median_total_comp = Some(mean);
                    company.details.comp_observations = observations.len() as u32;
                }
                if resolved.promoted {
                    company.name = resolved.used_name;
                }
            }
            Err(err) => {
                log::warn!("Compensation research failed for {}: {}", company.id, err);
                company.status.push_step_error(
                    STEP_COMPENSATION,
                    &err.to_string(),
                    Utc::now().to_rfc3339(),
                );
            }
        }
    }

    // Fit decision feeds the conditional contacts edge.
    if let Some(assessment) = state.sources.fit.assess(&company) {
        company.status.fit_category = Some(assessment.category);
        company.status.fit_confidence = Some(assessment.confidence);
        company.status.fit_decision_at = Some(Utc::now().to_rfc3339());
    }
    let good_fit = company
        .status
        .fit_category
        .map(|c| c.is_good())
        .unwrap_or(false);

    // ---- Step 4: relationship/contact data (conditional, non-fatal) ----
    if good_fit || args.force_contacts {
        let contacts = resolve_with_fallback(state, &company, |candidate: String| async move {
            let lookup_name = candidate.clone();
            state
                .cache
                .cached(
                    CacheStep::RelationshipData,
                    STEP_CONTACTS,
                    &candidate,
                    move || async move { state.sources.contacts.lookup(&lookup_name).await },
                )
                .await
        })
        .await;
        match contacts {
            Ok(resolved) => {
                company.details.contacts = resolved.value;
                if resolved.promoted {
                    company.name = resolved.used_name;
                }
            }
            Err(err) => {
                log::warn!("Contact research failed for {}: {}", company.id, err);
                company
                    .status
                    .push_step_error(STEP_CONTACTS, &err.to_string(), Utc::now().to_rfc3339());
            }
        }
    }

    // ---- Wrap-up ----
    let completed = company.status.research_errors.is_empty();
    if completed {
        company.status.research_completed_at = Some(Utc::now().to_rfc3339());
    }

    {
        let db = state.write_db();
        db.update_company(&company)?;
        if completed {
            db.record_event(&company.id, "research_completed", None)?;
        }
        // Alternate names discovered in step 1 become auto aliases.
        // Best-effort: individual failures are logged and swallowed.
        for alt in &facts.alternate_names {
            if let Err(e) = db.create_alias(&company.id, alt, AliasSource::Auto) {
                log::warn!("Failed to create alias '{}' for {}: {}", alt, company.id, e);
            }
        }
    }

    let outcome = ResearchOutcome {
        entity_id: company.id.clone(),
        name: company.name.clone(),
        error_count: company.status.research_errors.len(),
        completed,
    };
    Ok(crate::codec::to_result_value(&outcome)?)
}

/// Newest research wins: overwrite detail fields the facts actually carry,
/// leave the rest alone.
fn apply_facts(details: &mut CompanyDetails, facts: &CompanyFacts) {
    if facts.website.is_some() {
        details.website = facts.website.clone();
    }
    if facts.headquarters.is_some() {
        details.headquarters = facts.headquarters.clone();
    }
    if facts.industry.is_some() {
        details.industry = facts.industry.clone();
    }
    if facts.size.is_some() {
        details.size = facts.size.clone();
    }
    if facts.summary.is_some() {
        details.summary = facts.summary.clone();
    }
    for alt in &facts.alternate_names {
        if !details.alternate_names.contains(alt) {
            details.alternate_names.push(alt.clone());
        }
    }
}

/// Locate-or-create the company row for fresh research. Checks by id, then
/// by normalized name, before ever inserting — a normalized-name match is
/// updated in place rather than duplicated.
fn upsert_researched_company(
    state: &AppState,
    existing: Option<DbCompany>,
    name: &str,
    args: &ResearchArgs,
    facts: &CompanyFacts,
) -> Result<DbCompany, WorkerError> {
    let db = state.write_db();
    let mut company = match existing {
        Some(company) => company,
        None => {
            let slug = company_slug(name);
            match db.get_company(&slug)? {
                Some(company) => company,
                None => match db.get_company_by_normalized_name(name)? {
                    Some(company) => company,
                    None => {
                        let now = Utc::now().to_rfc3339();
                        let company = DbCompany {
                            id: slug,
                            name: name.to_string(),
                            details: CompanyDetails::default(),
                            status: ResearchStatus::default(),
                            source_url: args.source_url.clone(),
                            deleted_at: None,
                            created_at: now.clone(),
                            updated_at: now,
                        };
                        db.create_company(&company)?;
                        log::info!("Created company {} ('{}')", company.id, company.name);
                        company
                    }
                },
            }
        }
    };

    // A real name replaces a placeholder; the id stays put either way.
    if is_placeholder_name(&company.name) && !is_placeholder_name(name) {
        company.name = name.to_string();
    }
    if company.source_url.is_none() {
        company.source_url = args.source_url.clone();
    }
    apply_facts(&mut company.details, facts);
    db.update_company(&company)?;
    Ok(company)
}

/// Basic facts failed: persist (or update) a minimal record carrying a
/// single `research_company` step error plus the failure timestamp.
fn persist_failed_research(
    state: &AppState,
    existing: Option<DbCompany>,
    name: &str,
    args: &ResearchArgs,
    err: &crate::error::SourceError,
) -> Result<(), WorkerError> {
    let db = state.write_db();
    let now = Utc::now().to_rfc3339();
    let mut company = match existing {
        Some(company) => company,
        None => {
            let slug = company_slug(name);
            match db.get_company(&slug)? {
                Some(company) => company,
                None => match db.get_company_by_normalized_name(name)? {
                    Some(company) => company,
                    None => {
                        let company = DbCompany {
                            id: slug,
                            name: name.to_string(),
                            details: CompanyDetails::default(),
                            status: ResearchStatus::default(),
                            source_url: args.source_url.clone(),
                            deleted_at: None,
                            created_at: now.clone(),
                            updated_at: now.clone(),
                        };
                        db.create_company(&company)?;
                        company
                    }
                },
            }
        }
    };
    company
        .status
        .push_step_error(STEP_COMPANY, &err.to_string(), now.clone());
    company.status.research_failed_at = Some(now);
    db.update_company(&company)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::Config;
    use crate::db::FitCategory;
    use crate::sources::testing::*;
    use crate::sources::{CompObservation, FitAssessment, LevelsData};

    fn test_state(sources: crate::sources::Sources) -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            db_path: Some(dir.path().join("test.db")),
            ..Default::default()
        };
        let state = AppState::new(config, sources).expect("state");
        (dir, state)
    }

    fn acme_facts() -> CompanyFacts {
        CompanyFacts {
            name: Some("Acme Corp".into()),
            website: Some("https://acme.example".into()),
            industry: Some("Robotics".into()),
            summary: Some("Makes everything".into()),
            alternate_names: vec!["Acme Incorporated".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_happy_path_creates_one_company() {
        let mut sources = unconfigured_sources();
        sources.facts = Arc::new(FixedFacts::ok(acme_facts()));
        sources.levels = Arc::new(FixedLevels::ok(LevelsData {
            summary: Some("L5 ≈ Senior".into()),
            roles: vec![],
        }));
        sources.compensation = Arc::new(FixedComp::ok(vec![
            CompObservation { source: None, total_comp: 300_000.0 },
            CompObservation { source: None, total_comp: 340_000.0 },
        ]));
        let contacts = Arc::new(FixedContacts::ok(vec![]));
        sources.contacts = contacts.clone();
        sources.fit = Arc::new(FixedFit(Some(FitAssessment {
            category: FitCategory::Strong,
            confidence: 0.9,
        })));
        let (_dir, state) = test_state(sources);

        let args = ResearchArgs {
            content: Some("Company name: Acme Corp\n\nWe think you'd be a great match.".into()),
            ..Default::default()
        };
        let result = run_research(&state, &args).await.expect("research should succeed");
        assert_eq!(result["entityId"], serde_json::json!("acme-corp"));
        assert_eq!(result["completed"], serde_json::json!(true));

        let db = state.read_db().unwrap();
        let company = db.get_company("acme-corp").unwrap().expect("company row");
        assert_eq!(company.name, "Acme Corp");
        assert!(company.status.research_errors.is_empty());
        assert!(company.status.research_completed_at.is_some());
        assert_eq!(company.details.levels_summary.as_deref(), Some("L5 ≈ Senior"));
        assert_eq!(company.details.median_total_comp, Some(320_000.0));
        assert_eq!(company.details.comp_observations, 2);

        // Exactly one company exists.
        assert_eq!(db.list_companies().unwrap().len(), 1);

        // Completed event + auto alias for the discovered alternate name.
        let events = db.get_events_for_company("acme-corp").unwrap();
        assert!(events.iter().any(|e| e.event_type == "research_completed"));
        let aliases = db.get_aliases("acme-corp", true).unwrap();
        assert!(aliases.iter().any(|a| a.alias == "Acme Incorporated"
            && a.source == AliasSource::Auto));

        // Good fit → contacts step ran.
        assert_eq!(contacts.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fatal_facts_persists_placeholder_with_error() {
        let mut sources = unconfigured_sources();
        sources.facts = Arc::new(FixedFacts::failing("search backend down"));
        let (_dir, state) = test_state(sources);

        // No name anywhere in the args → placeholder.
        let args = ResearchArgs {
            content: Some("vague outreach with no label".into()),
            ..Default::default()
        };
        let err = run_research(&state, &args).await.unwrap_err();
        assert!(err.to_string().contains("search backend down"));

        let db = state.read_db().unwrap();
        let companies = db.list_companies().unwrap();
        assert_eq!(companies.len(), 1, "a minimal record must still be persisted");
        let company = &companies[0];
        assert!(
            crate::helpers::is_placeholder_name(&company.name),
            "placeholder name expected, got '{}'",
            company.name
        );
        assert_eq!(company.status.research_errors.len(), 1);
        assert_eq!(company.status.research_errors[0].step, STEP_COMPANY);
        assert!(company.status.research_failed_at.is_some());
    }

    #[tokio::test]
    async fn test_step_failure_is_non_fatal_and_contacts_still_run() {
        let mut sources = unconfigured_sources();
        sources.facts = Arc::new(FixedFacts::ok(acme_facts()));
        sources.levels = Arc::new(FixedLevels::failing("scrape blew up"));
        sources.compensation = Arc::new(FixedComp::ok(vec![CompObservation {
            source: None,
            total_comp: 400_000.0,
        }]));
        let contacts = Arc::new(FixedContacts::ok(vec![crate::db::Contact {
            name: "Jordan Reyes".into(),
            title: Some("Hiring Manager".into()),
            profile_url: None,
            email: None,
        }]));
        sources.contacts = contacts.clone();
        sources.fit = Arc::new(FixedFit(Some(FitAssessment {
            category: FitCategory::Strong,
            confidence: 0.95,
        })));
        let (_dir, state) = test_state(sources);

        let args = ResearchArgs {
            display_name: Some("Acme Corp".into()),
            ..Default::default()
        };
        let result = run_research(&state, &args).await.expect("task still completes");
        assert_eq!(result["completed"], serde_json::json!(false));
        assert_eq!(result["errorCount"], serde_json::json!(1));

        let company = state
            .read_db()
            .unwrap()
            .get_company("acme-corp")
            .unwrap()
            .unwrap();
        assert_eq!(company.status.research_errors.len(), 1);
        assert_eq!(company.status.research_errors[0].step, STEP_LEVELS);
        // Contacts still ran despite the earlier failure.
        assert_eq!(contacts.call_count(), 1);
        assert_eq!(company.details.contacts.len(), 1);
        // No completed marker with errors on file.
        assert!(company.status.research_completed_at.is_none());
    }

    #[tokio::test]
    async fn test_placeholder_skips_levels_unless_forced() {
        let mut sources = unconfigured_sources();
        // Facts succeed but carry no name, and the args carry none either.
        sources.facts = Arc::new(FixedFacts::ok(CompanyFacts::default()));
        let levels = Arc::new(FixedLevels::ok(LevelsData::default()));
        sources.levels = levels.clone();
        let (_dir, state) = test_state(sources);

        let args = ResearchArgs {
            content: Some("no label in here".into()),
            ..Default::default()
        };
        run_research(&state, &args).await.expect("research succeeds");
        assert!(
            levels.attempted_names().is_empty(),
            "placeholder company must skip the levels step"
        );

        // Same shape but forced.
        let mut sources = unconfigured_sources();
        sources.facts = Arc::new(FixedFacts::ok(CompanyFacts::default()));
        let levels = Arc::new(FixedLevels::ok(LevelsData::default()));
        sources.levels = levels.clone();
        let (_dir2, state) = test_state(sources);
        let args = ResearchArgs {
            content: Some("no label in here".into()),
            force_levels: true,
            ..Default::default()
        };
        run_research(&state, &args).await.expect("research succeeds");
        assert_eq!(levels.attempted_names().len(), 1, "forceLevels overrides the skip");
    }

    #[tokio::test]
    async fn test_normalized_name_match_updates_existing_row() {
        let mut sources = unconfigured_sources();
        sources.facts = Arc::new(FixedFacts::ok(CompanyFacts {
            name: Some("Acme & Co.".into()),
            website: Some("https://acme.example".into()),
            ..Default::default()
        }));
        let (_dir, state) = test_state(sources);

        // Seed a company whose name normalizes the same way.
        let now = Utc::now().to_rfc3339();
        state
            .write_db()
            .create_company(&DbCompany {
                id: "acme-and-co".into(),
                name: "acme and co".into(),
                details: CompanyDetails::default(),
                status: ResearchStatus::default(),
                source_url: None,
                deleted_at: None,
                created_at: now.clone(),
                updated_at: now,
            })
            .unwrap();

        let args = ResearchArgs {
            display_name: Some("Acme & Co.".into()),
            ..Default::default()
        };
        run_research(&state, &args).await.expect("research succeeds");

        let db = state.read_db().unwrap();
        assert_eq!(
            db.list_companies().unwrap().len(),
            1,
            "normalized-name match must update, not insert"
        );
        let company = db.get_company("acme-and-co").unwrap().unwrap();
        assert_eq!(company.details.website.as_deref(), Some("https://acme.example"));
    }

    #[tokio::test]
    async fn test_validation_rejects_empty_args() {
        let (_dir, state) = test_state(unconfigured_sources());
        let err = run_research(&state, &ResearchArgs::default()).await.unwrap_err();
        assert!(matches!(err, WorkerError::InvalidArgs(_)));
    }
}
