//! Shared type definitions for the database layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Row already exists: {0}")]
    AlreadyExists(String),

    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("JSON encode/decode error: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// The closed set of work-item kinds the worker knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Research,
    GenerateReply,
    ScanMessages,
    SendAndArchive,
    IgnoreAndArchive,
    BulkImport,
    MergeCompanies,
}

impl TaskType {
    /// String label for SQL storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Research => "research",
            TaskType::GenerateReply => "generate_reply",
            TaskType::ScanMessages => "scan_messages",
            TaskType::SendAndArchive => "send_and_archive",
            TaskType::IgnoreAndArchive => "ignore_and_archive",
            TaskType::BulkImport => "bulk_import",
            TaskType::MergeCompanies => "merge_companies",
        }
    }

    /// Parse from SQL string. Unknown strings are surfaced to the caller so
    /// a bad row fails its task instead of being silently dropped.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "research" => Some(TaskType::Research),
            "generate_reply" => Some(TaskType::GenerateReply),
            "scan_messages" => Some(TaskType::ScanMessages),
            "send_and_archive" => Some(TaskType::SendAndArchive),
            "ignore_and_archive" => Some(TaskType::IgnoreAndArchive),
            "bulk_import" => Some(TaskType::BulkImport),
            "merge_companies" => Some(TaskType::MergeCompanies),
            _ => None,
        }
    }
}

/// Task lifecycle. Transitions only move forward:
/// `pending → running → {completed | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "running" => TaskStatus::Running,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Pending,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A row from the `tasks` table. Rows are never deleted; the table doubles
/// as an audit trail of everything the worker was ever asked to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbTask {
    pub id: String,
    pub task_type: TaskType,
    pub args: serde_json::Value,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: String,
    pub created_at: String,
    pub updated_at: String,
}

// ---------------------------------------------------------------------------
// Companies
// ---------------------------------------------------------------------------

/// Fit classification produced by the fit-evaluation collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitCategory {
    Strong,
    Promising,
    Weak,
}

impl FitCategory {
    /// Good fits unlock the relationship/contact research step.
    pub fn is_good(&self) -> bool {
        matches!(self, FitCategory::Strong | FitCategory::Promising)
    }
}

/// One recorded failure of a non-fatal pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchStepError {
    pub step: String,
    pub error: String,
    pub occurred_at: String,
}

/// A contact discovered by relationship research.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Research facts gathered for a company. Stored as a versioned JSON blob in
/// the `details` column; forward migration happens in [`CompanyDetails::from_json`]
/// keyed on `schemaVersion`, never by ad-hoc key sniffing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompanyDetails {
    pub schema_version: u32,
    pub website: Option<String>,
    pub headquarters: Option<String>,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub summary: Option<String>,
    pub levels_summary: Option<String>,
    pub median_total_comp: Option<f64>,
    pub comp_observations: u32,
    pub contacts: Vec<Contact>,
    pub alternate_names: Vec<String>,
}

impl Default for CompanyDetails {
    fn default() -> Self {
        Self {
            schema_version: Self::SCHEMA_VERSION,
            website: None,
            headquarters: None,
            industry: None,
            size: None,
            summary: None,
            levels_summary: None,
            median_total_comp: None,
            comp_observations: 0,
            contacts: Vec::new(),
            alternate_names: Vec::new(),
        }
    }
}

impl CompanyDetails {
    pub const SCHEMA_VERSION: u32 = 1;

    /// Deserialize a stored blob, migrating older schema versions forward.
    pub fn from_json(mut value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let version = value
            .get("schemaVersion")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        if version == 0 {
            // v0 blobs predate the versioned struct: alternate names lived
            // under "altNames" and there was no observation counter.
            if let Some(obj) = value.as_object_mut() {
                if let Some(alts) = obj.remove("altNames") {
                    obj.insert("alternateNames".to_string(), alts);
                }
                obj.insert(
                    "schemaVersion".to_string(),
                    serde_json::json!(Self::SCHEMA_VERSION),
                );
            }
        }
        serde_json::from_value(value)
    }

    /// Fill any empty field from `other`. Used by the merge operation:
    /// canonical values always win, duplicate values only fill gaps.
    /// Returns the number of fields filled.
    pub fn fill_missing_from(&mut self, other: &CompanyDetails) -> usize {
        let mut filled = 0;
        macro_rules! fill_opt {
            ($field:ident) => {
                if self.$field.is_none() && other.$field.is_some() {
                    self.$field = other.$field.clone();
                    filled += 1;
                }
            };
        }
        fill_opt!(website);
        fill_opt!(headquarters);
        fill_opt!(industry);
        fill_opt!(size);
        fill_opt!(summary);
        fill_opt!(levels_summary);
        if self.median_total_comp.is_none() && other.median_total_comp.is_some() {
            self.median_total_comp = other.median_total_comp;
            self.comp_observations = other.comp_observations;
            filled += 1;
        }
        if self.contacts.is_empty() && !other.contacts.is_empty() {
            self.contacts = other.contacts.clone();
            filled += 1;
        }
        for name in &other.alternate_names {
            if !self.alternate_names.contains(name) {
                self.alternate_names.push(name.clone());
            }
        }
        filled
    }
}

/// Research lifecycle state for a company. Stored as a JSON blob in the
/// `status` column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResearchStatus {
    pub research_errors: Vec<ResearchStepError>,
    pub research_failed_at: Option<String>,
    pub research_completed_at: Option<String>,
    pub archived_at: Option<String>,
    pub reply_sent_at: Option<String>,
    pub fit_category: Option<FitCategory>,
    pub fit_confidence: Option<f64>,
    pub fit_decision_at: Option<String>,
}

impl ResearchStatus {
    pub fn push_step_error(&mut self, step: &str, error: &str, occurred_at: String) {
        self.research_errors.push(ResearchStepError {
            step: step.to_string(),
            error: error.to_string(),
            occurred_at,
        });
    }
}

/// A row from the `companies` table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbCompany {
    /// Canonical id: stable slug derived from the name at creation time.
    pub id: String,
    pub name: String,
    pub details: CompanyDetails,
    pub status: ResearchStatus,
    pub source_url: Option<String>,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl DbCompany {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// ---------------------------------------------------------------------------
// Aliases
// ---------------------------------------------------------------------------

/// Where an alias came from. The ordering is a trust ranking used during
/// name resolution fallback: manual beats auto beats seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasSource {
    Manual,
    Auto,
    Seed,
}

impl AliasSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AliasSource::Manual => "manual",
            AliasSource::Auto => "auto",
            AliasSource::Seed => "seed",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "manual" => AliasSource::Manual,
            "auto" => AliasSource::Auto,
            _ => AliasSource::Seed,
        }
    }

    /// Lower ranks first in candidate ordering.
    pub fn rank(&self) -> u8 {
        match self {
            AliasSource::Manual => 0,
            AliasSource::Auto => 1,
            AliasSource::Seed => 2,
        }
    }
}

/// A row from the `aliases` table. At most one *active* alias per
/// `(company_id, normalized_alias)` pair.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbAlias {
    pub id: i64,
    pub company_id: String,
    pub alias: String,
    pub normalized_alias: String,
    pub source: AliasSource,
    pub active: bool,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Events and messages
// ---------------------------------------------------------------------------

/// A row from the append-only `events` table. Never mutated or deleted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbEvent {
    pub id: i64,
    pub company_id: String,
    pub event_type: String,
    pub occurred_at: String,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::Inbound => "inbound",
            MessageDirection::Outbound => "outbound",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "outbound" => MessageDirection::Outbound,
            _ => MessageDirection::Inbound,
        }
    }
}

/// A row from the `messages` table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbMessage {
    pub id: String,
    pub company_id: String,
    pub direction: MessageDirection,
    pub subject: String,
    pub body: String,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Result of merging a duplicate company into a canonical one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    pub aliases_moved: usize,
    pub aliases_dropped: usize,
    pub messages_moved: usize,
    pub events_moved: usize,
    pub fields_filled: usize,
}
