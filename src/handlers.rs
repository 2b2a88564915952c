//! Single-step task handlers.
//!
//! Everything the worker dispatches that isn't the research pipeline lives
//! here: reply drafting, the two archive flavors, spreadsheet bulk import
//! (with incrementally-published counters), company merges, and the mailbox
//! scan that feeds the queue.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::CacheStep;
use crate::codec;
use crate::db::{
    AliasSource, CompanyDetails, DbCompany, DbMessage, MessageDirection, ResearchStatus, TaskType,
};
use crate::error::{SourceError, WorkerError};
use crate::helpers::{company_slug, extract_company_name, normalize_name};
use crate::pipeline::ResearchArgs;
use crate::sources::{ReplyContext, SheetRow};
use crate::state::AppState;

/// Args shape shared by the entity-scoped task types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityArgs {
    pub entity_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeArgs {
    pub canonical_id: String,
    pub duplicate_id: String,
}

fn live_company(state: &AppState, entity_id: &str) -> Result<DbCompany, WorkerError> {
    state
        .read_db()?
        .get_company(entity_id)?
        .filter(|c| !c.is_deleted())
        .ok_or_else(|| WorkerError::CompanyNotFound(entity_id.to_string()))
}

// ---------------------------------------------------------------------------
// Reply generation
// ---------------------------------------------------------------------------

/// Draft a reply to the company's latest inbound message and store it as an
/// outbound message. The draft is not sent here — that is send-and-archive.
pub async fn generate_reply(
    state: &AppState,
    args: &EntityArgs,
) -> Result<serde_json::Value, WorkerError> {
    let company = live_company(state, &args.entity_id)?;
    let inbound = state
        .read_db()?
        .latest_message(&company.id, MessageDirection::Inbound)?
        .ok_or_else(|| WorkerError::NoInboundMessage(company.id.clone()))?;

    let assembled = ReplyContext {
        company_name: company.name.clone(),
        subject: inbound.subject.clone(),
        inbound_body: inbound.body.clone(),
        company_summary: company.details.summary.clone(),
    };
    let context = state
        .cache
        .cached(
            CacheStep::BuildRetrievalContext,
            "build_reply_context",
            &company.id,
            move || async move { Ok::<_, SourceError>(assembled) },
        )
        .await?;

    let compose_context = context.clone();
    let body = state
        .cache
        .cached(
            CacheStep::ReplyGeneration,
            "compose_reply",
            &context,
            move || async move { state.sources.reply.compose(&compose_context).await },
        )
        .await?;

    let message = DbMessage {
        id: Uuid::new_v4().to_string(),
        company_id: company.id.clone(),
        direction: MessageDirection::Outbound,
        subject: format!("Re: {}", inbound.subject),
        body,
        created_at: Utc::now().to_rfc3339(),
    };
    {
        let db = state.write_db();
        db.insert_message(&message)?;
        db.record_event(&company.id, "reply_drafted", None)?;
    }
    log::info!("Drafted reply {} for {}", message.id, company.id);

    Ok(serde_json::json!({
        "entityId": company.id,
        "messageId": message.id,
        "subject": message.subject,
    }))
}

// ---------------------------------------------------------------------------
// Archive
// ---------------------------------------------------------------------------

/// Send the drafted reply through the mail transport, then archive.
pub async fn send_and_archive(
    state: &AppState,
    args: &EntityArgs,
) -> Result<serde_json::Value, WorkerError> {
    let mut company = live_company(state, &args.entity_id)?;
    let draft = state
        .read_db()?
        .latest_message(&company.id, MessageDirection::Outbound)?
        .ok_or_else(|| WorkerError::NoDraftedReply(company.id.clone()))?;

    state.sources.mail.send(&draft.subject, &draft.body).await?;

    let now = Utc::now().to_rfc3339();
    company.status.reply_sent_at = Some(now.clone());
    company.status.archived_at = Some(now.clone());
    {
        let db = state.write_db();
        db.update_company(&company)?;
        db.record_event(&company.id, "reply_sent", None)?;
        db.record_event(&company.id, "archived", None)?;
    }

    Ok(serde_json::json!({"entityId": company.id, "archivedAt": now}))
}

/// Archive without replying.
pub async fn ignore_and_archive(
    state: &AppState,
    args: &EntityArgs,
) -> Result<serde_json::Value, WorkerError> {
    let mut company = live_company(state, &args.entity_id)?;
    let now = Utc::now().to_rfc3339();
    company.status.archived_at = Some(now.clone());
    {
        let db = state.write_db();
        db.update_company(&company)?;
        db.record_event(&company.id, "archived", None)?;
    }
    Ok(serde_json::json!({"entityId": company.id, "archivedAt": now}))
}

// ---------------------------------------------------------------------------
// Bulk import
// ---------------------------------------------------------------------------

/// Running counters published onto the task row after every processed row
/// so a polling client can render progress.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCounters {
    pub found: usize,
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub errors: usize,
    pub skipped: usize,
}

/// Import every row of the external sheet, creating or updating companies.
pub async fn bulk_import(state: &AppState, task_id: &str) -> Result<serde_json::Value, WorkerError> {
    let rows = state.sources.sheet.rows().await?;

    let mut counters = ImportCounters {
        found: rows.len(),
        ..Default::default()
    };

    for row in rows {
        if normalize_name(&row.name).is_empty() {
            counters.skipped += 1;
        } else {
            match import_row(state, &row) {
                Ok(true) => counters.created += 1,
                Ok(false) => counters.updated += 1,
                Err(e) => {
                    counters.errors += 1;
                    log::warn!("Import failed for '{}': {}", row.name, e);
                }
            }
        }
        counters.processed += 1;

        // Progress only — a failed publish never fails the import.
        match codec::to_result_value(&counters) {
            Ok(value) => {
                if let Err(e) = state.write_db().update_task_result(task_id, &value) {
                    log::warn!("Failed to publish import progress: {}", e);
                }
            }
            Err(e) => log::warn!("Failed to encode import progress: {}", e),
        }
    }

    log::info!(
        "Bulk import done: {} found, {} created, {} updated, {} errors, {} skipped",
        counters.found,
        counters.created,
        counters.updated,
        counters.errors,
        counters.skipped,
    );
    Ok(codec::to_result_value(&counters)?)
}

/// Returns true when a new company was created, false when an existing row
/// was updated. Sheet data only fills gaps — it never overwrites research.
fn import_row(state: &AppState, row: &SheetRow) -> Result<bool, WorkerError> {
    let db = state.write_db();
    let slug = company_slug(&row.name);

    let existing = match db.get_company(&slug)? {
        Some(company) => Some(company),
        None => db.get_company_by_normalized_name(&row.name)?,
    };

    let (mut company, created) = match existing {
        Some(company) => (company, false),
        None => {
            let now = Utc::now().to_rfc3339();
            let company = DbCompany {
                id: slug,
                name: row.name.clone(),
                details: CompanyDetails::default(),
                status: ResearchStatus::default(),
                source_url: None,
                deleted_at: None,
                created_at: now.clone(),
                updated_at: now,
            };
            db.create_company(&company)?;
            (company, true)
        }
    };

    if company.details.website.is_none() {
        company.details.website = row.website.clone();
    }
    if company.details.summary.is_none() {
        company.details.summary = row.notes.clone();
    }
    db.update_company(&company)?;

    // Seed aliases; duplicate inserts are skipped, individual failures logged.
    for alias in &row.aliases {
        if let Err(e) = db.create_alias(&company.id, alias, AliasSource::Seed) {
            log::warn!("Failed to seed alias '{}' for {}: {}", alias, company.id, e);
        }
    }

    Ok(created)
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

pub async fn merge_companies(
    state: &AppState,
    args: &MergeArgs,
) -> Result<serde_json::Value, WorkerError> {
    let merged = {
        let db = state.write_db();
        let merged = db.merge_companies(&args.canonical_id, &args.duplicate_id)?;
        if merged.is_some() {
            db.record_event(
                &args.canonical_id,
                "merged",
                Some(&serde_json::json!({"duplicateId": args.duplicate_id})),
            )?;
        }
        merged
    };
    match merged {
        Some(result) => Ok(codec::to_result_value(&result)?),
        None => Err(WorkerError::CompanyNotFound(format!(
            "{} or {}",
            args.canonical_id, args.duplicate_id
        ))),
    }
}

// ---------------------------------------------------------------------------
// Mailbox scan
// ---------------------------------------------------------------------------

/// Pull new inbound messages and enqueue a research task for each. When a
/// company name can be extracted, the message is stored under the slug that
/// name will resolve to — the research task creates the row with the same
/// deterministic slug, so the linkage holds even for brand-new companies.
pub async fn scan_messages(state: &AppState) -> Result<serde_json::Value, WorkerError> {
    let messages = state
        .cache
        .cached(
            CacheStep::FetchNewMessages,
            "fetch_new_messages",
            &(),
            move || async move { state.sources.mailbox.fetch_new_messages().await },
        )
        .await?;

    let found = messages.len();
    let mut enqueued = 0usize;
    let mut linked = 0usize;

    for inbound in messages {
        let content = format!("{}\n\n{}", inbound.subject, inbound.body);
        let name = extract_company_name(&content);

        if let Some(ref name) = name {
            let record = DbMessage {
                id: Uuid::new_v4().to_string(),
                company_id: company_slug(name),
                direction: MessageDirection::Inbound,
                subject: inbound.subject.clone(),
                body: inbound.body.clone(),
                created_at: inbound
                    .received_at
                    .clone()
                    .unwrap_or_else(|| Utc::now().to_rfc3339()),
            };
            state.write_db().insert_message(&record)?;
            linked += 1;
        } else {
            log::warn!(
                "No company name extracted from message '{}', enqueuing research anyway",
                inbound.subject
            );
        }

        let args = ResearchArgs {
            content: Some(content),
            display_name: name,
            ..Default::default()
        };
        state
            .write_db()
            .create_task(TaskType::Research, &serde_json::to_value(&args)?)?;
        enqueued += 1;
    }

    Ok(serde_json::json!({
        "found": found,
        "enqueued": enqueued,
        "linked": linked,
    }))
}
