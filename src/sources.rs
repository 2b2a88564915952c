//! External collaborator boundaries.
//!
//! The concrete content of each research step — web search, language-model
//! prompting, browser scraping, spreadsheet I/O, mail transport — lives
//! outside this crate. Each concern is a trait here; the shipped
//! implementations speak JSON to configured helper processes through the
//! isolation layer, and the fit evaluator ships with a small comp-threshold
//! default. Tests substitute in-process fakes at the same seams.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::db::{Contact, DbCompany, FitCategory};
use crate::error::SourceError;
use crate::isolation::{run_isolated, HelperCommand};

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

/// Input to the basic-facts step. Serializable: it is both the helper
/// request and the cache fingerprint for the step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FactsQuery {
    pub content: Option<String>,
    pub name_hint: Option<String>,
    pub source_url: Option<String>,
}

/// Output of the basic-facts step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompanyFacts {
    pub name: Option<String>,
    pub website: Option<String>,
    pub headquarters: Option<String>,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub summary: Option<String>,
    pub alternate_names: Vec<String>,
}

/// Output of the comparable-role-data step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LevelsData {
    pub summary: Option<String>,
    pub roles: Vec<String>,
}

/// One compensation data point from an external source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompObservation {
    #[serde(default)]
    pub source: Option<String>,
    pub total_comp: f64,
}

/// A new inbound message found by the mailbox scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEmail {
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub received_at: Option<String>,
}

/// One row from the external spreadsheet used for bulk import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetRow {
    pub name: String,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Everything the reply composer gets to work with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyContext {
    pub company_name: String,
    pub subject: String,
    pub inbound_body: String,
    #[serde(default)]
    pub company_summary: Option<String>,
}

/// Verdict from the fit evaluator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitAssessment {
    pub category: FitCategory,
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CompanyFactsSource: Send + Sync {
    async fn research(&self, query: &FactsQuery) -> Result<CompanyFacts, SourceError>;
}

#[async_trait]
pub trait LevelsSource: Send + Sync {
    async fn lookup(&self, company_name: &str) -> Result<LevelsData, SourceError>;
}

#[async_trait]
pub trait CompensationSource: Send + Sync {
    async fn lookup(&self, company_name: &str) -> Result<Vec<CompObservation>, SourceError>;
}

#[async_trait]
pub trait ContactsSource: Send + Sync {
    async fn lookup(&self, company_name: &str) -> Result<Vec<Contact>, SourceError>;
}

/// Decides whether a researched company is worth pursuing. Pure and
/// synchronous — the interesting heuristics live outside this crate.
pub trait FitEvaluator: Send + Sync {
    fn assess(&self, company: &DbCompany) -> Option<FitAssessment>;
}

#[async_trait]
pub trait ReplyComposer: Send + Sync {
    async fn compose(&self, context: &ReplyContext) -> Result<String, SourceError>;
}

#[async_trait]
pub trait MailboxScanner: Send + Sync {
    async fn fetch_new_messages(&self) -> Result<Vec<InboundEmail>, SourceError>;
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<(), SourceError>;
}

#[async_trait]
pub trait SheetSource: Send + Sync {
    async fn rows(&self) -> Result<Vec<SheetRow>, SourceError>;
}

// ---------------------------------------------------------------------------
// Helper-process-backed implementations
// ---------------------------------------------------------------------------

/// A collaborator backed by a configured helper process. Requests look like
/// `{"op": "...", "params": {...}}`; responses carry either `data`, an
/// `error` string, or `notFound: true`.
pub struct HelperSource {
    command: HelperCommand,
}

impl HelperSource {
    pub fn new(command: HelperCommand) -> Self {
        Self { command }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        op: &str,
        params: serde_json::Value,
    ) -> Result<T, SourceError> {
        let request = serde_json::json!({"op": op, "params": params});
        let response = run_isolated(&self.command, &request).await?;

        if let Some(err) = response.get("error").and_then(|e| e.as_str()) {
            return Err(SourceError::Failed(err.to_string()));
        }
        if response
            .get("notFound")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            return Err(SourceError::NotFound(op.to_string()));
        }

        let data = response.get("data").cloned().unwrap_or(response);
        serde_json::from_value(data).map_err(|e| SourceError::Payload(e.to_string()))
    }
}

#[async_trait]
impl CompanyFactsSource for HelperSource {
    async fn research(&self, query: &FactsQuery) -> Result<CompanyFacts, SourceError> {
        self.call("research_company", serde_json::to_value(query)?)
            .await
    }
}

#[async_trait]
impl LevelsSource for HelperSource {
    async fn lookup(&self, company_name: &str) -> Result<LevelsData, SourceError> {
        self.call("fetch_levels", serde_json::json!({"companyName": company_name}))
            .await
    }
}

#[async_trait]
impl CompensationSource for HelperSource {
    async fn lookup(&self, company_name: &str) -> Result<Vec<CompObservation>, SourceError> {
        self.call(
            "fetch_compensation",
            serde_json::json!({"companyName": company_name}),
        )
        .await
    }
}

#[async_trait]
impl ContactsSource for HelperSource {
    async fn lookup(&self, company_name: &str) -> Result<Vec<Contact>, SourceError> {
        self.call(
            "fetch_contacts",
            serde_json::json!({"companyName": company_name}),
        )
        .await
    }
}

#[async_trait]
impl ReplyComposer for HelperSource {
    async fn compose(&self, context: &ReplyContext) -> Result<String, SourceError> {
        self.call("compose_reply", serde_json::to_value(context)?)
            .await
    }
}

#[async_trait]
impl MailboxScanner for HelperSource {
    async fn fetch_new_messages(&self) -> Result<Vec<InboundEmail>, SourceError> {
        self.call("fetch_new_messages", serde_json::json!({})).await
    }
}

#[async_trait]
impl MailSender for HelperSource {
    async fn send(&self, subject: &str, body: &str) -> Result<(), SourceError> {
        let _: serde_json::Value = self
            .call(
                "send_mail",
                serde_json::json!({"subject": subject, "body": body}),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SheetSource for HelperSource {
    async fn rows(&self) -> Result<Vec<SheetRow>, SourceError> {
        self.call("sheet_rows", serde_json::json!({})).await
    }
}

// ---------------------------------------------------------------------------
// Fallback implementations
// ---------------------------------------------------------------------------

/// Stand-in for a concern with no helper configured. Every call fails with
/// a clear message; the pipeline's non-fatal steps record it and move on.
pub struct Unconfigured(pub &'static str);

impl Unconfigured {
    fn err<T>(&self) -> Result<T, SourceError> {
        Err(SourceError::Failed(format!(
            "no helper command configured for {}",
            self.0
        )))
    }
}

#[async_trait]
impl CompanyFactsSource for Unconfigured {
    async fn research(&self, _query: &FactsQuery) -> Result<CompanyFacts, SourceError> {
        self.err()
    }
}

#[async_trait]
impl LevelsSource for Unconfigured {
    async fn lookup(&self, _company_name: &str) -> Result<LevelsData, SourceError> {
        self.err()
    }
}

#[async_trait]
impl CompensationSource for Unconfigured {
    async fn lookup(&self, _company_name: &str) -> Result<Vec<CompObservation>, SourceError> {
        self.err()
    }
}

#[async_trait]
impl ContactsSource for Unconfigured {
    async fn lookup(&self, _company_name: &str) -> Result<Vec<Contact>, SourceError> {
        self.err()
    }
}

#[async_trait]
impl ReplyComposer for Unconfigured {
    async fn compose(&self, _context: &ReplyContext) -> Result<String, SourceError> {
        self.err()
    }
}

#[async_trait]
impl MailboxScanner for Unconfigured {
    async fn fetch_new_messages(&self) -> Result<Vec<InboundEmail>, SourceError> {
        self.err()
    }
}

#[async_trait]
impl MailSender for Unconfigured {
    async fn send(&self, _subject: &str, _body: &str) -> Result<(), SourceError> {
        self.err()
    }
}

#[async_trait]
impl SheetSource for Unconfigured {
    async fn rows(&self) -> Result<Vec<SheetRow>, SourceError> {
        self.err()
    }
}

/// Default fit heuristic: median total comp against a configured floor.
/// Anything smarter plugs in behind the trait.
pub struct CompFitEvaluator {
    pub min_total_comp: f64,
}

impl FitEvaluator for CompFitEvaluator {
    fn assess(&self, company: &DbCompany) -> Option<FitAssessment> {
        let comp = company.details.median_total_comp?;
        let (category, confidence) = if comp >= self.min_total_comp * 1.2 {
            (FitCategory::Strong, 0.9)
        } else if comp >= self.min_total_comp {
            (FitCategory::Promising, 0.7)
        } else {
            (FitCategory::Weak, 0.6)
        };
        Some(FitAssessment {
            category,
            confidence,
        })
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// All collaborators, bundled for injection into the context object.
pub struct Sources {
    pub facts: Arc<dyn CompanyFactsSource>,
    pub levels: Arc<dyn LevelsSource>,
    pub compensation: Arc<dyn CompensationSource>,
    pub contacts: Arc<dyn ContactsSource>,
    pub fit: Arc<dyn FitEvaluator>,
    pub reply: Arc<dyn ReplyComposer>,
    pub mailbox: Arc<dyn MailboxScanner>,
    pub mail: Arc<dyn MailSender>,
    pub sheet: Arc<dyn SheetSource>,
}

impl Sources {
    /// Build the production bundle from config: helper-process impls where a
    /// command is configured, `Unconfigured` placeholders elsewhere.
    pub fn from_config(config: &Config) -> Self {
        let helpers = &config.helpers;
        Sources {
            facts: match &helpers.facts {
                Some(cmd) => Arc::new(HelperSource::new(cmd.clone())),
                None => Arc::new(Unconfigured("basic-facts")),
            },
            levels: match &helpers.levels {
                Some(cmd) => Arc::new(HelperSource::new(cmd.clone())),
                None => Arc::new(Unconfigured("comparable-role-data")),
            },
            compensation: match &helpers.compensation {
                Some(cmd) => Arc::new(HelperSource::new(cmd.clone())),
                None => Arc::new(Unconfigured("compensation-data")),
            },
            contacts: match &helpers.contacts {
                Some(cmd) => Arc::new(HelperSource::new(cmd.clone())),
                None => Arc::new(Unconfigured("relationship-data")),
            },
            fit: Arc::new(CompFitEvaluator {
                min_total_comp: config.fit_min_total_comp,
            }),
            reply: match &helpers.reply {
                Some(cmd) => Arc::new(HelperSource::new(cmd.clone())),
                None => Arc::new(Unconfigured("reply-generation")),
            },
            mailbox: match &helpers.mailbox {
                Some(cmd) => Arc::new(HelperSource::new(cmd.clone())),
                None => Arc::new(Unconfigured("fetch-new-messages")),
            },
            mail: match &helpers.mail {
                Some(cmd) => Arc::new(HelperSource::new(cmd.clone())),
                None => Arc::new(Unconfigured("mail-transport")),
            },
            sheet: match &helpers.sheet {
                Some(cmd) => Arc::new(HelperSource::new(cmd.clone())),
                None => Arc::new(Unconfigured("bulk-import")),
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process fakes substituted at the collaborator seams by tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    pub struct NoFit;

    impl FitEvaluator for NoFit {
        fn assess(&self, _company: &DbCompany) -> Option<FitAssessment> {
            None
        }
    }

    /// A bundle with every concern unconfigured and no fit opinion.
    pub fn unconfigured_sources() -> Sources {
        Sources {
            facts: Arc::new(Unconfigured("basic-facts")),
            levels: Arc::new(Unconfigured("comparable-role-data")),
            compensation: Arc::new(Unconfigured("compensation-data")),
            contacts: Arc::new(Unconfigured("relationship-data")),
            fit: Arc::new(NoFit),
            reply: Arc::new(Unconfigured("reply-generation")),
            mailbox: Arc::new(Unconfigured("fetch-new-messages")),
            mail: Arc::new(Unconfigured("mail-transport")),
            sheet: Arc::new(Unconfigured("bulk-import")),
        }
    }

    fn to_source_err(msg: &str) -> SourceError {
        SourceError::Failed(msg.to_string())
    }

    pub struct FixedFacts {
        pub response: Result<CompanyFacts, String>,
        pub calls: AtomicUsize,
    }

    impl FixedFacts {
        pub fn ok(facts: CompanyFacts) -> Self {
            Self {
                response: Ok(facts),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(msg: &str) -> Self {
            Self {
                response: Err(msg.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompanyFactsSource for FixedFacts {
        async fn research(&self, _query: &FactsQuery) -> Result<CompanyFacts, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone().map_err(|m| to_source_err(&m))
        }
    }

    pub struct FixedLevels {
        pub response: Result<LevelsData, String>,
        pub attempts: Mutex<Vec<String>>,
    }

    impl FixedLevels {
        pub fn ok(data: LevelsData) -> Self {
            Self {
                response: Ok(data),
                attempts: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(msg: &str) -> Self {
            Self {
                response: Err(msg.to_string()),
                attempts: Mutex::new(Vec::new()),
            }
        }

        pub fn attempted_names(&self) -> Vec<String> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LevelsSource for FixedLevels {
        async fn lookup(&self, company_name: &str) -> Result<LevelsData, SourceError> {
            self.attempts.lock().unwrap().push(company_name.to_string());
            self.response.clone().map_err(|m| to_source_err(&m))
        }
    }

    pub struct FixedComp {
        pub response: Result<Vec<CompObservation>, String>,
        pub calls: AtomicUsize,
    }

    impl FixedComp {
        pub fn ok(observations: Vec<CompObservation>) -> Self {
            Self {
                response: Ok(observations),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(msg: &str) -> Self {
            Self {
                response: Err(msg.to_string()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompensationSource for FixedComp {
        async fn lookup(&self, _company_name: &str) -> Result<Vec<CompObservation>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone().map_err(|m| to_source_err(&m))
        }
    }

    pub struct FixedContacts {
        pub response: Result<Vec<Contact>, String>,
        pub calls: AtomicUsize,
    }

    impl FixedContacts {
        pub fn ok(contacts: Vec<Contact>) -> Self {
            Self {
                response: Ok(contacts),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContactsSource for FixedContacts {
        async fn lookup(&self, _company_name: &str) -> Result<Vec<Contact>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone().map_err(|m| to_source_err(&m))
        }
    }

    pub struct FixedFit(pub Option<FitAssessment>);

    impl FitEvaluator for FixedFit {
        fn assess(&self, _company: &DbCompany) -> Option<FitAssessment> {
            self.0
        }
    }

    pub struct FixedReply(pub String);

    #[async_trait]
    impl ReplyComposer for FixedReply {
        async fn compose(&self, _context: &ReplyContext) -> Result<String, SourceError> {
            Ok(self.0.clone())
        }
    }

    pub struct FixedMailbox(pub Vec<InboundEmail>);

    #[async_trait]
    impl MailboxScanner for FixedMailbox {
        async fn fetch_new_messages(&self) -> Result<Vec<InboundEmail>, SourceError> {
            Ok(self.0.clone())
        }
    }

    pub struct FixedSheet(pub Vec<SheetRow>);

    #[async_trait]
    impl SheetSource for FixedSheet {
        async fn rows(&self) -> Result<Vec<SheetRow>, SourceError> {
            Ok(self.0.clone())
        }
    }

    pub struct RecordingMail {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingMail {
        pub fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MailSender for RecordingMail {
        async fn send(&self, subject: &str, body: &str) -> Result<(), SourceError> {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CompanyDetails, ResearchStatus};

    fn company_with_comp(comp: Option<f64>) -> DbCompany {
        DbCompany {
            id: "acme-corp".into(),
            name: "Acme Corp".into(),
            details: CompanyDetails {
                median_total_comp: comp,
                ..Default::default()
            },
            status: ResearchStatus::default(),
            source_url: None,
            deleted_at: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_fit_thresholds() {
        let eval = CompFitEvaluator {
            min_total_comp: 200_000.0,
        };

        let strong = eval.assess(&company_with_comp(Some(260_000.0))).unwrap();
        assert_eq!(strong.category, FitCategory::Strong);
        assert!(strong.category.is_good());

        let promising = eval.assess(&company_with_comp(Some(210_000.0))).unwrap();
        assert_eq!(promising.category, FitCategory::Promising);

        let weak = eval.assess(&company_with_comp(Some(120_000.0))).unwrap();
        assert_eq!(weak.category, FitCategory::Weak);
        assert!(!weak.category.is_good());
    }

    #[test]
    fn test_fit_without_comp_data_is_undecided() {
        let eval = CompFitEvaluator {
            min_total_comp: 200_000.0,
        };
        assert!(eval.assess(&company_with_comp(None)).is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_source_names_the_concern() {
        let source = Unconfigured("comparable-role-data");
        let err = LevelsSource::lookup(&source, "Acme Corp").await.unwrap_err();
        assert!(err.to_string().contains("comparable-role-data"));
    }
}
