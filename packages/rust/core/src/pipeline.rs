//! The content stage machine: Document → Monitor → Brief → Publish ⇄ Iterate.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use contentforge_generation::GenerationGateway;
use contentforge_knowledge::{KnowledgeStore, RetrieveQuery};
use contentforge_prompts::{KNOWLEDGE_PLACEHOLDER, PromptAssembler};
use contentforge_shared::{
    ContentBrief, ContentForgeError, FeedbackRecord, GeneratedContent, GenerationError,
    GenerationOptions, KnowledgeEntry, Partition, PipelineConfig, PromptContext, Result, RunId,
    Stage,
};

use crate::brief::{self, FORMAT_REMINDER, STRICT_FORMAT_REMINDER};
use crate::feedback::ContentEvaluator;
use crate::retry::{RetryPolicy, retry_generation};
use crate::run::{
    ContentRequest, FailureReason, MonitorReport, PipelineRun, RunStatus, TopicSource,
};

/// Sampling temperature for brief generation.
const BRIEF_TEMPERATURE: f32 = 0.3;

/// Each revision lowers the temperature by this much...
const TEMPERATURE_STEP: f32 = 0.1;

/// ...but never below this.
const TEMPERATURE_FLOOR: f32 = 0.15;

/// Fills a category placeholder that no pooled entry can bind.
const UNBOUND_CATEGORY: &str = "(no dedicated documents; rely on the knowledge provided)";

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Progress callback for reporting run status.
pub trait PipelineObserver: Send + Sync {
    /// Called when the run enters a stage.
    fn stage_entered(&self, run_id: &RunId, stage: Stage);
    /// Called before a failed generation call is retried.
    fn generation_retry(&self, stage: Stage, error: &GenerationError, delay: Duration);
    /// Called after each Publish attempt is scored.
    fn attempt_evaluated(&self, record: &FeedbackRecord);
    /// Called once the run reaches a terminal status.
    fn finished(&self, run: &PipelineRun);
}

/// No-op observer for headless/test usage.
pub struct SilentObserver;

impl PipelineObserver for SilentObserver {
    fn stage_entered(&self, _run_id: &RunId, _stage: Stage) {}
    fn generation_retry(&self, _stage: Stage, _error: &GenerationError, _delay: Duration) {}
    fn attempt_evaluated(&self, _record: &FeedbackRecord) {}
    fn finished(&self, _run: &PipelineRun) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Drives content requests through the stage machine.
///
/// Holds only shared, read-only collaborators, so one pipeline can serve
/// concurrent runs.
pub struct ContentPipeline {
    store: Arc<KnowledgeStore>,
    assembler: PromptAssembler,
    gateway: GenerationGateway,
    evaluator: Arc<dyn ContentEvaluator>,
    config: PipelineConfig,
    retry: RetryPolicy,
}

impl ContentPipeline {
    pub fn new(
        store: Arc<KnowledgeStore>,
        assembler: PromptAssembler,
        gateway: GenerationGateway,
        evaluator: Arc<dyn ContentEvaluator>,
        config: PipelineConfig,
    ) -> Self {
        let retry = RetryPolicy::from(&config);
        Self {
            store,
            assembler,
            gateway,
            evaluator,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run a request to a terminal status without progress reporting.
    pub async fn run(&self, request: ContentRequest) -> Result<PipelineRun> {
        self.run_with_observer(request, &SilentObserver).await
    }

    /// Run a request to a terminal status.
    ///
    /// Expected failures end up in [`PipelineRun::status`]; `Err` is returned
    /// only when the run's own bookkeeping is violated.
    #[instrument(skip_all, fields(topic_hint = ?request.topic_hint))]
    pub async fn run_with_observer(
        &self,
        request: ContentRequest,
        observer: &dyn PipelineObserver,
    ) -> Result<PipelineRun> {
        let start = Instant::now();
        let mut run = PipelineRun::new(request);
        info!(run_id = %run.id(), "starting content run");

        let outcome =
            tokio::time::timeout(self.config.run_timeout, self.drive(&mut run, observer)).await;

        let status = match outcome {
            Ok(Ok(())) => RunStatus::Done,
            Ok(Err(e @ ContentForgeError::Validation { .. })) => {
                warn!(run_id = %run.id(), error = %e, "run bookkeeping violated");
                return Err(e);
            }
            Ok(Err(e)) => RunStatus::Failed(FailureReason::from(&e)),
            Err(_) => RunStatus::Failed(FailureReason::from(&ContentForgeError::RunTimeout(
                self.config.run_timeout,
            ))),
        };
        run.finish(status);

        match run.status() {
            RunStatus::Failed(reason) => warn!(
                run_id = %run.id(),
                stage = %run.stage(),
                kind = reason.kind.as_str(),
                reason = %reason.message,
                attempts = run.attempt(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "content run failed"
            ),
            _ => info!(
                run_id = %run.id(),
                attempts = run.attempt(),
                score = run.best_attempt().map(|r| r.score),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "content run complete"
            ),
        }

        observer.finished(&run);
        Ok(run)
    }

    async fn drive(&self, run: &mut PipelineRun, observer: &dyn PipelineObserver) -> Result<()> {
        // --- Document ---
        self.enter(run, observer, Stage::Document);
        let pool = self.document(run)?;

        // --- Monitor ---
        self.enter(run, observer, Stage::Monitor);
        let topic = self.monitor(run, &pool)?;

        // --- Brief ---
        self.enter(run, observer, Stage::Brief);
        let brief = self.brief(run, observer, &topic, &pool).await?;
        run.set_brief(brief.clone())?;

        // --- Publish / Iterate ---
        self.publish_loop(run, observer, &brief, &pool).await
    }

    fn enter(&self, run: &mut PipelineRun, observer: &dyn PipelineObserver, stage: Stage) {
        run.enter(stage);
        observer.stage_entered(run.id(), stage);
    }

    /// Build the knowledge pool and record the digest prompt.
    fn document(&self, run: &mut PipelineRun) -> Result<Vec<Arc<KnowledgeEntry>>> {
        let required = &self.config.required_partitions;
        if !required.is_empty() && self.store.is_empty() {
            return Err(ContentForgeError::InsufficientKnowledge);
        }

        let query = RetrieveQuery::all(usize::MAX).require(required.iter().copied());
        let pool = balance_pool(
            self.store.retrieve(&query)?,
            self.config.knowledge_pool_limit,
            self.config.secondary_reserve,
        );

        let context = self.assemble(Stage::Document, BTreeMap::new(), &pool)?;
        run.push_context(Arc::new(context));
        run.set_knowledge_pool(pool.clone());

        info!(
            entries = pool.len(),
            primary = pool.iter().filter(|e| e.partition == Partition::Primary).count(),
            "knowledge pool built"
        );
        Ok(pool)
    }

    /// Pick the topic. Never fails on missing signals.
    fn monitor(&self, run: &mut PipelineRun, pool: &[Arc<KnowledgeEntry>]) -> Result<String> {
        let opportunities: Vec<Arc<KnowledgeEntry>> = pool
            .iter()
            .filter(|e| {
                e.partition == Partition::Secondary
                    && self.config.trend_categories.iter().any(|c| *c == e.category)
            })
            .cloned()
            .collect();

        let hint = run
            .request()
            .topic_hint
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty());

        let (topic, source) = match (hint, opportunities.first()) {
            (Some(hint), _) => (hint.to_string(), TopicSource::Hint),
            (None, Some(newest)) => (newest.title.clone(), TopicSource::Trend),
            (None, None) => (self.config.fallback_topic.clone(), TopicSource::Fallback),
        };

        let variables = BTreeMap::from([("topic_seed".to_string(), topic.clone())]);
        let context = self.assemble(Stage::Monitor, variables, &opportunities)?;
        run.push_context(Arc::new(context));

        info!(%topic, source = ?source, opportunities = opportunities.len(), "topic selected");
        run.set_monitor_report(MonitorReport {
            topic: topic.clone(),
            source,
            opportunities: opportunities.iter().map(|e| e.id.clone()).collect(),
        });
        Ok(topic)
    }

    /// Generate and parse the brief, with one stricter retry on parse failure.
    async fn brief(
        &self,
        run: &mut PipelineRun,
        observer: &dyn PipelineObserver,
        topic: &str,
        pool: &[Arc<KnowledgeEntry>],
    ) -> Result<ContentBrief> {
        let target_format = self.target_format(run.request());
        let options = GenerationOptions {
            temperature: BRIEF_TEMPERATURE,
            ..self.config.generation
        };

        let mut last_error = String::new();
        for (attempt, reminder) in [(1, FORMAT_REMINDER), (2, STRICT_FORMAT_REMINDER)] {
            let variables = BTreeMap::from([
                ("topic".to_string(), topic.to_string()),
                ("target_format".to_string(), target_format.clone()),
                ("format_reminder".to_string(), reminder.to_string()),
            ]);
            let context = Arc::new(self.assemble(Stage::Brief, variables, pool)?);
            run.push_context(context.clone());

            let content = self
                .generate(observer, context, Stage::Brief, attempt, &options)
                .await?;
            run.push_content(content.clone())?;

            match brief::parse_brief(&content.text) {
                Ok(parsed) => {
                    let brief = brief::apply_overrides(
                        parsed,
                        &target_format,
                        run.request(),
                        &self.config,
                    );
                    info!(
                        topic = %brief.topic,
                        key_points = brief.key_points.len(),
                        max_length = ?brief.constraints.max_length,
                        "brief ready"
                    );
                    return Ok(brief);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "brief response unparseable");
                    last_error = e.to_string();
                }
            }
        }

        Err(ContentForgeError::BriefGenerationFailed(last_error))
    }

    /// Publish, evaluate, and revise until a draft passes or attempts run out.
    async fn publish_loop(
        &self,
        run: &mut PipelineRun,
        observer: &dyn PipelineObserver,
        brief: &ContentBrief,
        pool: &[Arc<KnowledgeEntry>],
    ) -> Result<()> {
        let key_points = brief::render_key_points(brief);
        let constraints = brief::render_constraints(brief);
        let max_attempts = self.config.max_attempts.max(1);

        let variables = BTreeMap::from([
            ("target_format".to_string(), brief.target_format.clone()),
            ("topic".to_string(), brief.topic.clone()),
            ("key_points".to_string(), key_points.clone()),
            ("constraints".to_string(), constraints.clone()),
        ]);
        let mut context = Arc::new(self.assemble(Stage::Publish, variables, pool)?);
        run.push_context(context.clone());
        let mut options = self.config.generation;

        for attempt in 1..=max_attempts {
            self.enter(run, observer, Stage::Publish);
            let content = self
                .generate(observer, context.clone(), Stage::Publish, attempt, &options)
                .await?;
            run.push_content(content.clone())?;

            let record = self.evaluator.evaluate(content.clone(), brief);
            observer.attempt_evaluated(&record);
            info!(
                attempt,
                score = record.score,
                passed = record.passed,
                failed = ?record.failed_checks,
                "attempt evaluated"
            );
            let passed = record.passed;
            let failed_checks = record
                .failed_checks
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            run.push_feedback(record)?;

            self.enter(run, observer, Stage::Iterate);
            if passed {
                return Ok(());
            }
            if attempt == max_attempts {
                break;
            }

            options.temperature = lowered_temperature(options.temperature);
            let variables = BTreeMap::from([
                ("target_format".to_string(), brief.target_format.clone()),
                ("topic".to_string(), brief.topic.clone()),
                ("failed_checks".to_string(), failed_checks),
                ("key_points".to_string(), key_points.clone()),
                ("constraints".to_string(), constraints.clone()),
                ("previous_draft".to_string(), content.text.clone()),
            ]);
            context = Arc::new(self.assemble(Stage::Iterate, variables, pool)?);
            run.push_context(context.clone());
        }

        let best_score = run.best_attempt().map_or(0.0, |r| r.score);
        Err(ContentForgeError::QualityThresholdNotMet {
            attempts: max_attempts,
            best_score,
        })
    }

    /// One generation call under the retry policy.
    async fn generate(
        &self,
        observer: &dyn PipelineObserver,
        context: Arc<PromptContext>,
        stage: Stage,
        attempt: u32,
        options: &GenerationOptions,
    ) -> Result<Arc<GeneratedContent>> {
        let gateway = &self.gateway;
        let context = &context;
        let content = retry_generation(
            &self.retry,
            move || gateway.generate(context.clone(), stage, attempt, options),
            |err, delay| observer.generation_retry(stage, err, delay),
        )
        .await?;
        Ok(Arc::new(content))
    }

    /// Assemble the stage's template, standing in for category placeholders
    /// the excerpts cannot bind.
    fn assemble(
        &self,
        stage: Stage,
        mut variables: BTreeMap<String, String>,
        excerpts: &[Arc<KnowledgeEntry>],
    ) -> Result<PromptContext> {
        let template = self.assembler.registry().for_stage(stage);
        for name in template.placeholders() {
            let bound = name == KNOWLEDGE_PLACEHOLDER
                || variables.contains_key(name)
                || excerpts.iter().any(|e| e.category == *name);
            if !bound {
                debug!(%stage, placeholder = %name, "no entries for category placeholder");
                variables.insert(name.clone(), UNBOUND_CATEGORY.to_string());
            }
        }
        self.assembler.assemble_for_stage(stage, variables, excerpts)
    }

    fn target_format(&self, request: &ContentRequest) -> String {
        request
            .target_format
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(&self.config.default_target_format)
            .to_string()
    }
}

/// Cut `entries` (canonical order) to `limit`, keeping up to `reserve` slots
/// for secondary entries so a large primary partition cannot crowd them out.
/// Primary entries still come first.
fn balance_pool(
    entries: Vec<Arc<KnowledgeEntry>>,
    limit: usize,
    reserve: usize,
) -> Vec<Arc<KnowledgeEntry>> {
    let (primary, secondary): (Vec<_>, Vec<_>) = entries
        .into_iter()
        .partition(|e| e.partition == Partition::Primary);

    let reserved = reserve.min(limit).min(secondary.len());
    let primary_take = primary.len().min(limit - reserved);
    let secondary_take = secondary.len().min(limit - primary_take);

    primary
        .into_iter()
        .take(primary_take)
        .chain(secondary.into_iter().take(secondary_take))
        .collect()
}

/// Next revision temperature. Never raises a temperature already under the floor.
fn lowered_temperature(current: f32) -> f32 {
    (current - TEMPERATURE_STEP).max(TEMPERATURE_FLOOR).min(current)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, VecDeque};
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use contentforge_generation::{GenerationProvider, ProviderReply};
    use contentforge_prompts::TemplateRegistry;
    use contentforge_shared::{FeedbackCheck, GenerationErrorKind};

    use super::*;
    use crate::feedback::HeuristicEvaluator;
    use crate::run::FailureKind;

    type Reply = std::result::Result<String, GenerationError>;

    /// Replays a fixed script of replies and records every call.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Reply>>,
        calls: Mutex<Vec<(String, GenerationOptions)>>,
        delay: Duration,
    }

    impl ScriptedProvider {
        fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            })
        }

        fn slow(replies: impl IntoIterator<Item = Reply>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
                delay,
            })
        }

        fn calls(&self) -> Vec<(String, GenerationOptions)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerationProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            prompt: &str,
            options: &GenerationOptions,
        ) -> std::result::Result<ProviderReply, GenerationError> {
            self.calls.lock().unwrap().push((prompt.to_string(), *options));
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GenerationError::invalid_response("script exhausted")));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            next.map(ProviderReply::text)
        }
    }

    const BRIEF: &str = r#"```json
{"topic": "Your gym should travel with you", "target_format": "blog_post",
 "key_points": ["400 partner gyms", "One pass"],
 "constraints": {"max_length": 12, "required_cta": ["Join the network"]}}
```"#;

    const GOOD: &str = "Landing in Lisbon, your pass already works. Join the network.";
    const LONG_NO_CTA: &str =
        "Landing in Lisbon at dawn, your pass already works at four hundred partner gyms across twelve cities.";

    fn ok(text: &str) -> Reply {
        Ok(text.to_string())
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
            ..PipelineConfig::default()
        }
    }

    async fn fixture_store(dir: &str) -> Arc<KnowledgeStore> {
        Arc::new(
            KnowledgeStore::load_dir(Path::new(dir))
                .await
                .expect("load fixtures"),
        )
    }

    fn pipeline_with(
        store: Arc<KnowledgeStore>,
        provider: Arc<ScriptedProvider>,
        config: PipelineConfig,
    ) -> ContentPipeline {
        ContentPipeline::new(
            store,
            PromptAssembler::new(Arc::new(TemplateRegistry::builtin())),
            GenerationGateway::new(provider),
            Arc::new(HeuristicEvaluator::new(["game-changing"])),
            config,
        )
    }

    async fn pipeline(provider: Arc<ScriptedProvider>) -> ContentPipeline {
        pipeline_with(fixture_store("../../../fixtures/knowledge").await, provider, config())
    }

    fn entry(id: &str, partition: Partition, category: &str, days_old: i64) -> KnowledgeEntry {
        KnowledgeEntry {
            id: id.to_string(),
            partition,
            category: category.to_string(),
            title: format!("Title of {id}"),
            body: format!("Body of {id}."),
            last_updated: chrono::Utc::now() - chrono::Duration::days(days_old),
            source_path: None,
        }
    }

    fn stages(run: &PipelineRun) -> Vec<Stage> {
        run.contexts().iter().map(|c| c.stage).collect()
    }

    #[tokio::test]
    async fn passing_first_draft_completes_run() {
        let provider = ScriptedProvider::new([ok(BRIEF), ok(GOOD)]);
        let run = pipeline(provider.clone())
            .await
            .run(ContentRequest::default())
            .await
            .expect("run");

        assert_eq!(run.status(), &RunStatus::Done);
        assert_eq!(run.attempt(), 1);
        assert_eq!(
            stages(&run),
            [Stage::Document, Stage::Monitor, Stage::Brief, Stage::Publish]
        );
        assert_eq!(run.output().unwrap().text, GOOD);

        let brief = run.brief().expect("brief");
        assert_eq!(brief.constraints.max_length, Some(12));

        // Newest trend entry supplies the topic when no hint is given.
        let report = run.monitor_report().expect("monitor report");
        assert_eq!(report.source, TopicSource::Trend);
        assert_eq!(report.topic, "Hybrid Fitness Is the New Baseline");

        let calls = provider.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1.temperature, BRIEF_TEMPERATURE);
        assert!(calls[0].0.contains("Topic: Hybrid Fitness Is the New Baseline"));
    }

    #[tokio::test]
    async fn topic_hint_and_request_overrides_win() {
        let provider = ScriptedProvider::new([ok(BRIEF), ok("Short. Start free.")]);
        let request = ContentRequest {
            topic_hint: Some("  Corporate wellness  ".into()),
            target_format: Some("linkedin_post".into()),
            max_length: Some(5),
            required_cta: vec!["Start free".into()],
        };
        let run = pipeline(provider).await.run(request).await.expect("run");

        assert_eq!(run.status(), &RunStatus::Done);
        let report = run.monitor_report().unwrap();
        assert_eq!(report.source, TopicSource::Hint);
        assert_eq!(report.topic, "Corporate wellness");

        let brief = run.brief().unwrap();
        assert_eq!(brief.target_format, "linkedin_post");
        assert_eq!(brief.constraints.max_length, Some(5));
        assert_eq!(brief.constraints.required_cta, ["Start free"]);
    }

    #[tokio::test]
    async fn failed_draft_is_revised_with_lower_temperature() {
        let provider = ScriptedProvider::new([ok(BRIEF), ok(LONG_NO_CTA), ok(GOOD)]);
        let run = pipeline(provider.clone())
            .await
            .run(ContentRequest::default())
            .await
            .expect("run");

        assert_eq!(run.status(), &RunStatus::Done);
        assert_eq!(run.attempt(), 2);
        assert_eq!(
            stages(&run),
            [
                Stage::Document,
                Stage::Monitor,
                Stage::Brief,
                Stage::Publish,
                Stage::Iterate
            ]
        );
        assert_eq!(
            run.feedback()[0].failed_checks,
            BTreeSet::from([FeedbackCheck::Length, FeedbackCheck::RequiredCta])
        );
        assert!(run.feedback()[1].passed);

        let calls = provider.calls();
        let revision_prompt = &calls[2].0;
        assert!(revision_prompt.contains("failed these quality checks: length, required_cta"));
        assert!(revision_prompt.contains(LONG_NO_CTA));
        assert!((calls[2].1.temperature - (calls[1].1.temperature - 0.1)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn exhausted_attempts_return_best_content() {
        let provider = ScriptedProvider::new([
            ok(BRIEF),
            ok(LONG_NO_CTA),
            ok("Landing in Lisbon? Join the network. It is game-changing."),
            ok("Join the network, game-changing, four hundred gyms in twelve cities today."),
        ]);
        let run = pipeline(provider)
            .await
            .run(ContentRequest::default())
            .await
            .expect("run");

        let RunStatus::Failed(reason) = run.status() else {
            panic!("expected failure, got {:?}", run.status());
        };
        assert_eq!(reason.kind, FailureKind::QualityThresholdNotMet);
        assert_eq!(run.attempt(), 3);
        assert_eq!(run.feedback().len(), 3);

        let scores: Vec<f64> = run.feedback().iter().map(|r| r.score).collect();
        assert_eq!(scores, [0.5, 0.75, 0.75]);

        // Attempts 2 and 3 tie; the earlier one wins.
        let best = run.best_attempt().unwrap();
        assert_eq!(best.content.attempt_number, 2);
        assert_eq!(best.score, 0.75);
        assert_eq!(run.output().unwrap().attempt_number, 2);
    }

    #[tokio::test]
    async fn rate_limits_within_ceiling_still_yield_first_attempt() {
        let provider = ScriptedProvider::new([
            ok(BRIEF),
            Err(GenerationError::rate_limited(None, "429")),
            Err(GenerationError::rate_limited(None, "429")),
            ok(GOOD),
        ]);
        let run = pipeline(provider.clone())
            .await
            .run(ContentRequest::default())
            .await
            .expect("run");

        assert_eq!(run.status(), &RunStatus::Done);
        let publish: Vec<_> = run
            .contents()
            .iter()
            .filter(|c| c.stage == Stage::Publish)
            .collect();
        assert_eq!(publish.len(), 1);
        assert_eq!(publish[0].attempt_number, 1);
        assert_eq!(provider.calls().len(), 4);
    }

    #[tokio::test]
    async fn auth_failure_aborts_immediately() {
        let provider = ScriptedProvider::new([
            Err(GenerationError::auth_failure("401")),
            ok(BRIEF),
        ]);
        let run = pipeline(provider.clone())
            .await
            .run(ContentRequest::default())
            .await
            .expect("run");

        let RunStatus::Failed(reason) = run.status() else {
            panic!("expected failure");
        };
        assert_eq!(reason.kind, FailureKind::AuthFailure);
        assert_eq!(run.stage(), Stage::Brief);
        assert!(run.brief().is_none());
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn unparseable_brief_gets_one_strict_retry() {
        let provider = ScriptedProvider::new([ok("Sure! Here's a plan."), ok(BRIEF), ok(GOOD)]);
        let run = pipeline(provider.clone())
            .await
            .run(ContentRequest::default())
            .await
            .expect("run");
        assert_eq!(run.status(), &RunStatus::Done);
        assert!(provider.calls()[1].0.contains("could not be parsed"));

        let provider = ScriptedProvider::new([ok("no"), ok("still no"), ok(GOOD)]);
        let run = pipeline(provider.clone())
            .await
            .run(ContentRequest::default())
            .await
            .expect("run");
        let RunStatus::Failed(reason) = run.status() else {
            panic!("expected failure");
        };
        assert_eq!(reason.kind, FailureKind::BriefGenerationFailed);
        assert_eq!(provider.calls().len(), 2);
        assert_eq!(run.contents().len(), 2);
    }

    #[tokio::test]
    async fn missing_required_partition_fails_run() {
        let store = fixture_store("../../../fixtures/knowledge-primary-only").await;
        let config = PipelineConfig {
            required_partitions: vec![Partition::Primary, Partition::Secondary],
            ..config()
        };
        let provider = ScriptedProvider::new([]);
        let run = pipeline_with(store, provider.clone(), config)
            .run(ContentRequest::default())
            .await
            .expect("run");

        let RunStatus::Failed(reason) = run.status() else {
            panic!("expected failure");
        };
        assert_eq!(reason.kind, FailureKind::KnowledgeUnavailable);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_store_is_insufficient_knowledge() {
        let store = Arc::new(KnowledgeStore::new(Vec::<KnowledgeEntry>::new()));
        let run = pipeline_with(store, ScriptedProvider::new([]), config())
            .run(ContentRequest::default())
            .await
            .expect("run");
        let RunStatus::Failed(reason) = run.status() else {
            panic!("expected failure");
        };
        assert_eq!(reason.kind, FailureKind::InsufficientKnowledge);
    }

    #[tokio::test]
    async fn no_trend_signal_falls_back() {
        let store = fixture_store("../../../fixtures/knowledge-primary-only").await;
        let provider = ScriptedProvider::new([ok(BRIEF), ok(GOOD)]);
        let run = pipeline_with(store, provider, config())
            .run(ContentRequest::default())
            .await
            .expect("run");
        let report = run.monitor_report().unwrap();
        assert_eq!(report.source, TopicSource::Fallback);
        assert_eq!(report.topic, PipelineConfig::default().fallback_topic);
    }

    #[tokio::test]
    async fn timeout_keeps_completed_history() {
        let provider = ScriptedProvider::slow([ok(BRIEF), ok(GOOD)], Duration::from_millis(200));
        let config = PipelineConfig {
            run_timeout: Duration::from_millis(300),
            ..config()
        };
        let store = fixture_store("../../../fixtures/knowledge").await;
        let run = pipeline_with(store, provider, config)
            .run(ContentRequest::default())
            .await
            .expect("run");

        let RunStatus::Failed(reason) = run.status() else {
            panic!("expected timeout");
        };
        assert_eq!(reason.kind, FailureKind::RunTimeout);
        // The brief call finished before the deadline; the publish call did not.
        assert!(run.brief().is_some());
        assert_eq!(run.contents().len(), 1);
        assert!(run.feedback().is_empty());
    }

    #[tokio::test]
    async fn generation_errors_surface_kind() {
        let provider = ScriptedProvider::new([
            ok(BRIEF),
            Err(GenerationError::invalid_response("empty")),
            Err(GenerationError::invalid_response("empty")),
        ]);
        let run = pipeline(provider)
            .await
            .run(ContentRequest::default())
            .await
            .expect("run");
        let RunStatus::Failed(reason) = run.status() else {
            panic!("expected failure");
        };
        assert_eq!(reason.kind, FailureKind::InvalidResponse);
        assert_eq!(
            GenerationErrorKind::InvalidResponse.as_str(),
            reason.kind.as_str()
        );
    }

    #[tokio::test]
    async fn configured_cta_reaches_publish_prompt() {
        let draft = "Landing in Lisbon, your pass already works. Join the network. Start free.";
        let provider = ScriptedProvider::new([ok(BRIEF), ok(draft)]);
        let config = PipelineConfig {
            required_cta: vec!["Start free".into()],
            ..config()
        };
        let run = pipeline_with(
            fixture_store("../../../fixtures/knowledge").await,
            provider.clone(),
            config,
        )
        .run(ContentRequest::default())
        .await
        .expect("run");

        assert_eq!(run.status(), &RunStatus::Done);
        let brief = run.brief().unwrap();
        assert_eq!(brief.constraints.required_cta, ["Join the network", "Start free"]);

        let publish_prompt = &provider.calls()[1].0;
        assert!(publish_prompt.contains("(verbatim): \"Start free\""));
    }

    #[tokio::test]
    async fn corpus_without_brand_voice_still_publishes() {
        let store = Arc::new(KnowledgeStore::new([
            entry("primary/product_specs", Partition::Primary, "product_info", 3),
            entry("secondary/market_trends", Partition::Secondary, "market_trend", 1),
        ]));
        let provider = ScriptedProvider::new([ok(BRIEF), ok(GOOD)]);
        let run = pipeline_with(store, provider.clone(), config())
            .run(ContentRequest::default())
            .await
            .expect("run");

        assert_eq!(run.status(), &RunStatus::Done);
        let calls = provider.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].0.contains(UNBOUND_CATEGORY));
        assert!(calls[1].0.contains("Body of primary/product_specs."));
    }

    #[test]
    fn pool_keeps_room_for_secondary_entries() {
        let primary = (0..30).map(|i| {
            let id = format!("primary/doc{i:02}");
            Arc::new(entry(&id, Partition::Primary, "product_info", i))
        });
        let secondary = (0..2).map(|i| {
            let id = format!("secondary/t{i}");
            Arc::new(entry(&id, Partition::Secondary, "market_trend", i))
        });
        let entries: Vec<Arc<KnowledgeEntry>> = primary.chain(secondary).collect();

        let pool = balance_pool(entries.clone(), 24, 6);
        assert_eq!(pool.len(), 24);
        let secondary_in_pool = pool
            .iter()
            .filter(|e| e.partition == Partition::Secondary)
            .count();
        assert_eq!(secondary_in_pool, 2);
        assert_eq!(pool[0].id, "primary/doc00");
        assert_eq!(pool[21].id, "primary/doc21");
        assert_eq!(pool[22].id, "secondary/t0");

        // Without a reserve primary fills the pool.
        let no_reserve = balance_pool(entries.clone(), 24, 0);
        assert!(no_reserve.iter().all(|e| e.partition == Partition::Primary));

        let tiny = balance_pool(entries, 3, 6);
        let ids: Vec<&str> = tiny.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["primary/doc00", "secondary/t0", "secondary/t1"]);
    }

    #[test]
    fn temperature_steps_down_to_floor() {
        assert!((lowered_temperature(0.4) - 0.3).abs() < 1e-6);
        assert_eq!(lowered_temperature(0.2), TEMPERATURE_FLOOR);
        assert_eq!(lowered_temperature(0.1), 0.1);
    }
}
