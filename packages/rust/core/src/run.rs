//! The run aggregate: request, status and append-only history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use contentforge_shared::{
    ContentBrief, ContentForgeError, FeedbackRecord, GeneratedContent, GenerationErrorKind,
    KnowledgeEntry, PromptContext, Result, RunId, Stage,
};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// What the caller asks a run to produce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentRequest {
    /// Preferred topic; wins over trend signals when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_hint: Option<String>,
    /// Requested format; the configured default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_format: Option<String>,
    /// Overrides the brief's word ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Replaces the brief's required CTAs when non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_cta: Vec<String>,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    KnowledgeUnavailable,
    InsufficientKnowledge,
    TemplateNotFound,
    MissingVariable,
    UnknownVariable,
    RateLimited,
    Timeout,
    InvalidResponse,
    AuthFailure,
    BriefGenerationFailed,
    QualityThresholdNotMet,
    RunTimeout,
    /// Configuration, I/O and other ambient failures.
    Environment,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KnowledgeUnavailable => "knowledge_unavailable",
            Self::InsufficientKnowledge => "insufficient_knowledge",
            Self::TemplateNotFound => "template_not_found",
            Self::MissingVariable => "missing_variable",
            Self::UnknownVariable => "unknown_variable",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::InvalidResponse => "invalid_response",
            Self::AuthFailure => "auth_failure",
            Self::BriefGenerationFailed => "brief_generation_failed",
            Self::QualityThresholdNotMet => "quality_threshold_not_met",
            Self::RunTimeout => "run_timeout",
            Self::Environment => "environment",
        }
    }
}

/// Cloneable, serializable record of a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&ContentForgeError> for FailureReason {
    fn from(err: &ContentForgeError) -> Self {
        let kind = match err {
            ContentForgeError::KnowledgeUnavailable { .. } => FailureKind::KnowledgeUnavailable,
            ContentForgeError::InsufficientKnowledge => FailureKind::InsufficientKnowledge,
            ContentForgeError::TemplateNotFound(_) => FailureKind::TemplateNotFound,
            ContentForgeError::MissingVariable(_) => FailureKind::MissingVariable,
            ContentForgeError::UnknownVariable(_) => FailureKind::UnknownVariable,
            ContentForgeError::Generation(g) => match g.kind {
                GenerationErrorKind::RateLimited { .. } => FailureKind::RateLimited,
                GenerationErrorKind::Timeout => FailureKind::Timeout,
                GenerationErrorKind::InvalidResponse => FailureKind::InvalidResponse,
                GenerationErrorKind::AuthFailure => FailureKind::AuthFailure,
            },
            ContentForgeError::BriefGenerationFailed(_) => FailureKind::BriefGenerationFailed,
            ContentForgeError::QualityThresholdNotMet { .. } => FailureKind::QualityThresholdNotMet,
            ContentForgeError::RunTimeout(_) => FailureKind::RunTimeout,
            ContentForgeError::Config { .. }
            | ContentForgeError::Parse { .. }
            | ContentForgeError::Io { .. }
            | ContentForgeError::Validation { .. } => FailureKind::Environment,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// Lifecycle of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunStatus {
    Running,
    Done,
    Failed(FailureReason),
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

// ---------------------------------------------------------------------------
// Monitor report
// ---------------------------------------------------------------------------

/// Where the run's topic came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicSource {
    Hint,
    Trend,
    Fallback,
}

/// Outcome of the Monitor stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorReport {
    pub topic: String,
    pub source: TopicSource,
    /// Ids of trend-tagged secondary entries, newest first.
    pub opportunities: Vec<String>,
}

// ---------------------------------------------------------------------------
// PipelineRun
// ---------------------------------------------------------------------------

/// One content request carried through the stage machine.
///
/// History only grows: contexts, contents and feedback records are appended
/// whole and never modified, so a run cut short by a timeout still holds
/// every record completed before the cut.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    id: RunId,
    request: ContentRequest,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    stage: Stage,
    attempt: u32,
    status: RunStatus,
    knowledge_pool: Vec<Arc<KnowledgeEntry>>,
    monitor: Option<MonitorReport>,
    brief: Option<ContentBrief>,
    contexts: Vec<Arc<PromptContext>>,
    contents: Vec<Arc<GeneratedContent>>,
    feedback: Vec<FeedbackRecord>,
}

impl PipelineRun {
    pub fn new(request: ContentRequest) -> Self {
        Self {
            id: RunId::new(),
            request,
            started_at: Utc::now(),
            finished_at: None,
            stage: Stage::Document,
            attempt: 0,
            status: RunStatus::Running,
            knowledge_pool: Vec::new(),
            monitor: None,
            brief: None,
            contexts: Vec::new(),
            contents: Vec::new(),
            feedback: Vec::new(),
        }
    }

    pub fn id(&self) -> &RunId {
        &self.id
    }

    pub fn request(&self) -> &ContentRequest {
        &self.request
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Stage most recently entered.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Publish attempts made so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn knowledge_pool(&self) -> &[Arc<KnowledgeEntry>] {
        &self.knowledge_pool
    }

    pub fn monitor_report(&self) -> Option<&MonitorReport> {
        self.monitor.as_ref()
    }

    pub fn brief(&self) -> Option<&ContentBrief> {
        self.brief.as_ref()
    }

    pub fn contexts(&self) -> &[Arc<PromptContext>] {
        &self.contexts
    }

    pub fn contents(&self) -> &[Arc<GeneratedContent>] {
        &self.contents
    }

    pub fn feedback(&self) -> &[FeedbackRecord] {
        &self.feedback
    }

    /// Highest-scoring evaluated attempt; the earliest wins ties.
    pub fn best_attempt(&self) -> Option<&FeedbackRecord> {
        self.feedback.iter().fold(None, |best, record| match best {
            Some(b) if record.score <= b.score => Some(b),
            _ => Some(record),
        })
    }

    /// Content to hand back: the passing draft when done, otherwise the best
    /// evaluated draft if any.
    pub fn output(&self) -> Option<&Arc<GeneratedContent>> {
        match self.status {
            RunStatus::Done => self.feedback.last().map(|r| &r.content),
            _ => self.best_attempt().map(|r| &r.content),
        }
    }

    // -- mutation, crate-internal --------------------------------------------

    pub(crate) fn enter(&mut self, stage: Stage) {
        self.stage = stage;
    }

    pub(crate) fn set_knowledge_pool(&mut self, pool: Vec<Arc<KnowledgeEntry>>) {
        self.knowledge_pool = pool;
    }

    pub(crate) fn set_monitor_report(&mut self, report: MonitorReport) {
        self.monitor = Some(report);
    }

    pub(crate) fn set_brief(&mut self, brief: ContentBrief) -> Result<()> {
        if self.brief.is_some() {
            return Err(ContentForgeError::validation(format!(
                "run {} already has a brief",
                self.id
            )));
        }
        self.brief = Some(brief);
        Ok(())
    }

    pub(crate) fn push_context(&mut self, context: Arc<PromptContext>) {
        self.contexts.push(context);
    }

    pub(crate) fn push_content(&mut self, content: Arc<GeneratedContent>) -> Result<()> {
        let previous = self
            .contents
            .iter()
            .rev()
            .find(|c| c.stage == content.stage)
            .map(|c| c.attempt_number);
        if previous.is_some_and(|p| content.attempt_number <= p) {
            return Err(ContentForgeError::validation(format!(
                "{} attempt {} does not follow attempt {}",
                content.stage,
                content.attempt_number,
                previous.unwrap_or_default()
            )));
        }
        if content.stage == Stage::Publish {
            self.attempt = content.attempt_number;
        }
        self.contents.push(content);
        Ok(())
    }

    pub(crate) fn push_feedback(&mut self, record: FeedbackRecord) -> Result<()> {
        if !self.contents.iter().any(|c| Arc::ptr_eq(c, &record.content)) {
            return Err(ContentForgeError::validation(format!(
                "feedback for attempt {} references content outside run {}",
                record.content.attempt_number, self.id
            )));
        }
        self.feedback.push(record);
        Ok(())
    }

    pub(crate) fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}
