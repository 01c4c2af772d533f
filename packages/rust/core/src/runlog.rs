//! Serializable snapshot of a finished run.
//!
//! Shared `Arc` references in [`PipelineRun`] are flattened: prompts are
//! referenced by fingerprint and drafts by attempt number.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use contentforge_shared::{
    ContentBrief, ContentForgeError, FeedbackCheck, GenerationUsage, Result, RunId, Stage,
};

use crate::run::{ContentRequest, MonitorReport, PipelineRun, RunStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub request: ContentRequest,
    pub knowledge_pool: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<ContentBrief>,
    pub prompts: Vec<PromptLog>,
    pub contents: Vec<ContentLog>,
    pub feedback: Vec<FeedbackLog>,
    /// Attempt number of the draft handed back, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_attempt: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptLog {
    pub stage: Stage,
    pub template_id: String,
    pub fingerprint: String,
    pub excerpt_ids: Vec<String>,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentLog {
    pub stage: Stage,
    pub attempt: u32,
    pub prompt_fingerprint: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<GenerationUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackLog {
    pub attempt: u32,
    pub passed: bool,
    pub score: f64,
    pub failed_checks: BTreeSet<FeedbackCheck>,
}

impl From<&PipelineRun> for RunLog {
    fn from(run: &PipelineRun) -> Self {
        Self {
            run_id: run.id().clone(),
            started_at: run.started_at(),
            finished_at: run.finished_at(),
            status: run.status().clone(),
            request: run.request().clone(),
            knowledge_pool: run.knowledge_pool().iter().map(|e| e.id.clone()).collect(),
            monitor: run.monitor_report().cloned(),
            brief: run.brief().cloned(),
            prompts: run
                .contexts()
                .iter()
                .map(|c| PromptLog {
                    stage: c.stage,
                    template_id: c.template_id.to_string(),
                    fingerprint: c.fingerprint.clone(),
                    excerpt_ids: c.knowledge_excerpts.iter().map(|e| e.id.clone()).collect(),
                    prompt: c.prompt.clone(),
                })
                .collect(),
            contents: run
                .contents()
                .iter()
                .map(|c| ContentLog {
                    stage: c.stage,
                    attempt: c.attempt_number,
                    prompt_fingerprint: c.source_prompt.fingerprint.clone(),
                    text: c.text.clone(),
                    usage: c.usage.clone(),
                })
                .collect(),
            feedback: run
                .feedback()
                .iter()
                .map(|r| FeedbackLog {
                    attempt: r.content.attempt_number,
                    passed: r.passed,
                    score: r.score,
                    failed_checks: r.failed_checks.clone(),
                })
                .collect(),
            output_attempt: run.output().map(|c| c.attempt_number),
        }
    }
}

impl RunLog {
    /// File name used by [`RunLog::write_to`].
    pub fn file_name(&self) -> String {
        format!("{}.json", self.run_id)
    }

    /// Write `<dir>/<run_id>.json` atomically (temp file, then rename).
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|e| ContentForgeError::io(dir, e))?;

        let target = dir.join(self.file_name());
        let temp = dir.join(format!(".{}.tmp", self.file_name()));

        let json = serde_json::to_string_pretty(self).map_err(|e| {
            ContentForgeError::validation(format!("run log serialization failed: {e}"))
        })?;
        std::fs::write(&temp, json).map_err(|e| ContentForgeError::io(&temp, e))?;
        std::fs::rename(&temp, &target).map_err(|e| ContentForgeError::io(&target, e))?;

        debug!(path = %target.display(), "wrote run log");
        Ok(target)
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ContentForgeError::io(path, e))?;
        serde_json::from_str(&raw).map_err(|e| {
            ContentForgeError::parse(format!("invalid run log {}: {e}", path.display()))
        })
    }
}
