//! Deterministic content evaluation.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use contentforge_shared::{
    ContentBrief, FeedbackCheck, FeedbackConfig, FeedbackRecord, GeneratedContent,
};

/// Scores generated content against a brief.
///
/// Implementations must be pure: the same content and brief always yield the
/// same record.
pub trait ContentEvaluator: Send + Sync {
    fn evaluate(&self, content: Arc<GeneratedContent>, brief: &ContentBrief) -> FeedbackRecord;
}

/// The fixed battery of [`FeedbackCheck`]s.
///
/// Score is the fraction of checks passed. Length is measured in words.
#[derive(Debug, Clone, Default)]
pub struct HeuristicEvaluator {
    /// Stored lowercased.
    banned_phrases: Vec<String>,
    extra_cta: Vec<String>,
    default_max_length: Option<usize>,
}

impl HeuristicEvaluator {
    pub fn new(banned_phrases: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            banned_phrases: banned_phrases
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .filter(|p| !p.trim().is_empty())
                .collect(),
            ..Self::default()
        }
    }

    /// CTAs required in addition to the brief's own.
    pub fn with_required_cta(mut self, cta: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_cta = cta.into_iter().map(Into::into).collect();
        self
    }

    /// Word ceiling used when the brief sets none.
    pub fn with_default_max_length(mut self, max_length: Option<usize>) -> Self {
        self.default_max_length = max_length;
        self
    }

    fn failed_checks(&self, text: &str, brief: &ContentBrief) -> BTreeSet<FeedbackCheck> {
        let lowered = text.to_lowercase();
        let mut failed = BTreeSet::new();

        if let Some(max) = brief.constraints.max_length.or(self.default_max_length) {
            if word_count(text) > max {
                failed.insert(FeedbackCheck::Length);
            }
        }

        let missing_cta = brief
            .constraints
            .required_cta
            .iter()
            .chain(&self.extra_cta)
            .filter(|cta| !cta.trim().is_empty())
            .any(|cta| !lowered.contains(&cta.to_lowercase()));
        if missing_cta {
            failed.insert(FeedbackCheck::RequiredCta);
        }

        if self.banned_phrases.iter().any(|p| lowered.contains(p.as_str())) {
            failed.insert(FeedbackCheck::BannedPhrases);
        }

        if text.trim().is_empty() {
            failed.insert(FeedbackCheck::NonEmpty);
        }

        failed
    }

    /// Banned phrases present in `text`, for diagnostics.
    pub fn banned_phrases_in(&self, text: &str) -> Vec<&str> {
        let lowered = text.to_lowercase();
        self.banned_phrases
            .iter()
            .filter(|p| lowered.contains(p.as_str()))
            .map(String::as_str)
            .collect()
    }
}

impl From<&FeedbackConfig> for HeuristicEvaluator {
    fn from(config: &FeedbackConfig) -> Self {
        Self::new(config.banned_phrases.iter().cloned())
            .with_required_cta(config.required_cta.iter().cloned())
            .with_default_max_length(config.max_length)
    }
}

impl ContentEvaluator for HeuristicEvaluator {
    fn evaluate(&self, content: Arc<GeneratedContent>, brief: &ContentBrief) -> FeedbackRecord {
        let failed_checks = self.failed_checks(&content.text, brief);
        let total = FeedbackCheck::ALL.len();
        let score = (total - failed_checks.len()) as f64 / total as f64;

        debug!(
            attempt = content.attempt_number,
            score,
            failed = ?failed_checks,
            "content evaluated"
        );

        FeedbackRecord {
            passed: failed_checks.is_empty(),
            failed_checks,
            score,
            content,
        }
    }
}

/// Whitespace-separated word count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use contentforge_shared::{BriefConstraints, PromptContext, Stage, TemplateId};

    use super::*;

    fn content(text: &str) -> Arc<GeneratedContent> {
        Arc::new(GeneratedContent {
            text: text.into(),
            source_prompt: Arc::new(PromptContext {
                template_id: TemplateId::new("publish"),
                stage: Stage::Publish,
                variables: BTreeMap::new(),
                knowledge_excerpts: Vec::new(),
                prompt: String::new(),
                fingerprint: String::new(),
            }),
            stage: Stage::Publish,
            attempt_number: 1,
            usage: None,
        })
    }

    fn brief(max_length: Option<usize>, cta: &[&str]) -> ContentBrief {
        ContentBrief {
            topic: "Travel fitness".into(),
            target_format: "blog_post".into(),
            key_points: vec!["One pass, 400 gyms".into()],
            constraints: BriefConstraints {
                max_length,
                required_cta: cta.iter().map(|s| s.to_string()).collect(),
                extra: BTreeMap::new(),
            },
        }
    }

    fn evaluator() -> HeuristicEvaluator {
        HeuristicEvaluator::from(&FeedbackConfig::default())
    }

    #[test]
    fn clean_content_passes_every_check() {
        let record = evaluator().evaluate(
            content("Your gym follows you to Lisbon. Join the network."),
            &brief(Some(20), &["join the network"]),
        );
        assert!(record.passed);
        assert!(record.failed_checks.is_empty());
        assert_eq!(record.score, 1.0);
    }

    #[test]
    fn over_length_without_cta_scores_half() {
        let long = "word ".repeat(120);
        let record = evaluator().evaluate(content(&long), &brief(Some(100), &["Join the network"]));
        assert!(!record.passed);
        assert_eq!(
            record.failed_checks,
            BTreeSet::from([FeedbackCheck::Length, FeedbackCheck::RequiredCta])
        );
        assert_eq!(record.score, 0.5);
    }

    #[test]
    fn banned_phrases_match_case_insensitively() {
        let record = evaluator().evaluate(
            content("In Today's Fast-Paced World, gyms matter."),
            &brief(None, &[]),
        );
        assert_eq!(record.failed_checks, BTreeSet::from([FeedbackCheck::BannedPhrases]));
        assert_eq!(record.score, 0.75);
        assert_eq!(
            evaluator().banned_phrases_in("A Game-Changing, REVOLUTIONARY pass"),
            ["game-changing", "revolutionary"]
        );
    }

    #[test]
    fn whitespace_only_content_is_empty() {
        let record = evaluator().evaluate(content("  \n\t "), &brief(Some(10), &[]));
        assert_eq!(record.failed_checks, BTreeSet::from([FeedbackCheck::NonEmpty]));
    }

    #[test]
    fn config_defaults_apply_when_brief_is_silent() {
        let config = FeedbackConfig {
            banned_phrases: Vec::new(),
            required_cta: vec!["Start free".into()],
            max_length: Some(3),
        };
        let evaluator = HeuristicEvaluator::from(&config);

        let record = evaluator.evaluate(content("one two three four"), &brief(None, &[]));
        assert_eq!(
            record.failed_checks,
            BTreeSet::from([FeedbackCheck::Length, FeedbackCheck::RequiredCta])
        );

        // The brief's own ceiling takes precedence.
        let record = evaluator.evaluate(
            content("one two three four. Start free"),
            &brief(Some(10), &[]),
        );
        assert!(record.passed);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let c = content("It goes without saying. Join now.");
        let b = brief(Some(3), &["Join now", "Book a class"]);
        let first = evaluator().evaluate(c.clone(), &b);
        let second = evaluator().evaluate(c, &b);
        assert_eq!(first, second);
    }

    #[test]
    fn word_count_splits_on_any_whitespace() {
        assert_eq!(word_count("one  two\nthree\tfour "), 4);
        assert_eq!(word_count(""), 0);
    }
}
