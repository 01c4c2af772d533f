//! Core domain types for ContentForge runs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ContentForgeError;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Knowledge
// ---------------------------------------------------------------------------

/// The two retrieval pools. Declaration order is precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// Company-specific facts: brand voice, products, past content.
    Primary,
    /// Market research: trends, competitors, customer feedback.
    Secondary,
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::Primary, Partition::Secondary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = ContentForgeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(ContentForgeError::validation(format!(
                "unknown partition '{other}': expected 'primary' or 'secondary'"
            ))),
        }
    }
}

/// A single document of the knowledge corpus. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Stable identifier, `<partition>/<file stem>`.
    pub id: String,
    pub partition: Partition,
    /// Tag such as `brand_voice` or `market_trend`.
    pub category: String,
    /// Display title (front matter, first heading, or file stem).
    pub title: String,
    pub body: String,
    pub last_updated: DateTime<Utc>,
    /// Where the entry was loaded from, if it came from disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Stages & templates
// ---------------------------------------------------------------------------

/// The five fixed pipeline phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Document,
    Monitor,
    Brief,
    Publish,
    Iterate,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Document,
        Stage::Monitor,
        Stage::Brief,
        Stage::Publish,
        Stage::Iterate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Monitor => "monitor",
            Self::Brief => "brief",
            Self::Publish => "publish",
            Self::Iterate => "iterate",
        }
    }

    /// The one template associated with this stage.
    pub fn template_id(&self) -> TemplateId {
        TemplateId::new(self.as_str())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ContentForgeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| ContentForgeError::validation(format!("unknown stage '{s}'")))
    }
}

/// Identifier of a prompt template.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(pub String);

impl TemplateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// PromptContext
// ---------------------------------------------------------------------------

/// A fully assembled prompt and the inputs that produced it.
///
/// Never mutated after assembly; every stage and attempt builds a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptContext {
    pub template_id: TemplateId,
    pub stage: Stage,
    pub variables: BTreeMap<String, String>,
    /// Deduplicated by id; primary entries precede secondary entries.
    pub knowledge_excerpts: Vec<Arc<KnowledgeEntry>>,
    /// The finished prompt string.
    pub prompt: String,
    /// SHA-256 of `prompt`, hex encoded.
    pub fingerprint: String,
}

// ---------------------------------------------------------------------------
// ContentBrief
// ---------------------------------------------------------------------------

/// Constraints the final content must satisfy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BriefConstraints {
    /// Maximum length in words.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Call-to-action substrings that must all appear.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub required_cta: Vec<String>,
    /// Any further constraints the model proposed, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Models sometimes answer a single CTA as a bare string.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Structured intermediate artifact anchoring final content generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBrief {
    pub topic: String,
    pub target_format: String,
    pub key_points: Vec<String>,
    #[serde(default)]
    pub constraints: BriefConstraints,
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Options passed through opaquely to the generation provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// Provider-reported usage for one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationUsage {
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub latency_ms: u64,
}

/// Text produced by one generation call within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedContent {
    pub text: String,
    pub source_prompt: Arc<PromptContext>,
    pub stage: Stage,
    pub attempt_number: u32,
    pub usage: Option<GenerationUsage>,
}

// ---------------------------------------------------------------------------
// Feedback
// ---------------------------------------------------------------------------

/// One deterministic heuristic rule used to score generated content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackCheck {
    Length,
    RequiredCta,
    BannedPhrases,
    NonEmpty,
}

impl FeedbackCheck {
    pub const ALL: [FeedbackCheck; 4] = [
        FeedbackCheck::Length,
        FeedbackCheck::RequiredCta,
        FeedbackCheck::BannedPhrases,
        FeedbackCheck::NonEmpty,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Length => "length",
            Self::RequiredCta => "required_cta",
            Self::BannedPhrases => "banned_phrases",
            Self::NonEmpty => "non_empty",
        }
    }
}

impl fmt::Display for FeedbackCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one piece of generated content. Terminal once created.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackRecord {
    pub content: Arc<GeneratedContent>,
    pub passed: bool,
    pub failed_checks: BTreeSet<FeedbackCheck>,
    /// Fraction of checks passed, 0.0 to 1.0.
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn partition_ordering_puts_primary_first() {
        let mut parts = vec![Partition::Secondary, Partition::Primary];
        parts.sort();
        assert_eq!(parts, Partition::ALL);
        assert_eq!("secondary".parse::<Partition>().unwrap(), Partition::Secondary);
        assert!("tertiary".parse::<Partition>().is_err());
    }

    #[test]
    fn every_stage_maps_to_its_own_template() {
        for stage in Stage::ALL {
            assert_eq!(stage.template_id().as_str(), stage.as_str());
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
    }

    #[test]
    fn brief_deserializes_with_extra_constraints() {
        let json = r#"{
            "topic": "Travel fitness",
            "target_format": "blog_post",
            "key_points": ["a", "b"],
            "constraints": {"max_length": 900, "required_cta": ["Join the network"], "tone": "warm"}
        }"#;
        let brief: ContentBrief = serde_json::from_str(json).expect("deserialize");
        assert_eq!(brief.constraints.max_length, Some(900));
        assert_eq!(brief.constraints.required_cta, vec!["Join the network"]);
        assert_eq!(brief.constraints.extra["tone"], "warm");
    }

    #[test]
    fn single_cta_string_is_accepted() {
        let json = r#"{"required_cta": "Join the network"}"#;
        let constraints: BriefConstraints = serde_json::from_str(json).expect("deserialize");
        assert_eq!(constraints.required_cta, vec!["Join the network"]);
    }

    #[test]
    fn feedback_check_names() {
        let names: Vec<_> = FeedbackCheck::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(names, ["length", "required_cta", "banned_phrases", "non_empty"]);
    }
}
