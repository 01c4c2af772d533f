//! CLI command definitions, routing, and tracing setup.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use contentforge_core::{
    ContentPipeline, ContentRequest, HeuristicEvaluator, PipelineObserver, PipelineRun, RunLog,
    RunStatus,
};
use contentforge_generation::{GenerationGateway, OpenRouterProvider};
use contentforge_knowledge::KnowledgeStore;
use contentforge_prompts::{PromptAssembler, TemplateRegistry};
use contentforge_shared::{
    AppConfig, FeedbackRecord, GenerationError, Partition, PipelineConfig, RunId, Stage,
    init_config, load_config, load_config_from, validate_api_key,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ContentForge: brand-grounded content from your own knowledge base.
#[derive(Parser)]
#[command(
    name = "contentforge",
    version,
    about = "Generate brand-aligned content grounded in a local knowledge base.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.contentforge/contentforge.toml.
    #[arg(long, global = true, env = "CONTENTFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the full pipeline and print the final content.
    Generate {
        /// Topic to write about (defaults to the newest market trend).
        #[arg(short, long)]
        topic: Option<String>,

        /// Content format, e.g. blog_post, linkedin_post, email.
        #[arg(short, long)]
        format: Option<String>,

        /// Knowledge base root holding primary/ and secondary/.
        #[arg(long)]
        kb: Option<PathBuf>,

        /// Publish/evaluate cycles before giving up.
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Word ceiling for the final content.
        #[arg(long)]
        max_length: Option<usize>,

        /// Required call to action (repeatable).
        #[arg(long = "cta")]
        cta: Vec<String>,

        /// Directory for the run log (defaults to var/runs).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Inspect the knowledge base.
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },

    /// List the stage templates in use.
    Templates,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Knowledge subcommands.
#[derive(Subcommand)]
pub(crate) enum KnowledgeAction {
    /// Document and word counts per partition.
    Summary {
        /// Knowledge base root.
        #[arg(long)]
        kb: Option<PathBuf>,
    },
    /// Case-insensitive search across documents.
    Search {
        /// Text to look for.
        query: String,

        /// Restrict to one partition: primary or secondary.
        #[arg(long)]
        partition: Option<Partition>,

        /// Knowledge base root.
        #[arg(long)]
        kb: Option<PathBuf>,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "contentforge=info",
        1 => "contentforge=debug",
        _ => "contentforge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Generate {
            topic,
            format,
            kb,
            max_attempts,
            max_length,
            cta,
            out,
        } => {
            let config = resolve_config(config_path.as_deref())?;
            let request = ContentRequest {
                topic_hint: topic,
                target_format: format,
                max_length,
                required_cta: cta,
            };
            cmd_generate(&config, request, kb, max_attempts, out).await
        }
        Command::Knowledge { action } => {
            let config = resolve_config(config_path.as_deref())?;
            match action {
                KnowledgeAction::Summary { kb } => cmd_knowledge_summary(&config, kb).await,
                KnowledgeAction::Search {
                    query,
                    partition,
                    kb,
                } => cmd_knowledge_search(&config, &query, partition, kb).await,
            }
        }
        Command::Templates => cmd_templates(&resolve_config(config_path.as_deref())?),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&resolve_config(config_path.as_deref())?),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

fn knowledge_root(config: &AppConfig, kb: Option<PathBuf>) -> PathBuf {
    kb.unwrap_or_else(|| PathBuf::from(&config.defaults.knowledge_dir))
}

fn template_registry(config: &AppConfig) -> Result<TemplateRegistry> {
    Ok(match &config.defaults.templates_file {
        Some(path) => TemplateRegistry::load_file(Path::new(path))?,
        None => TemplateRegistry::builtin(),
    })
}

// ---------------------------------------------------------------------------
// generate
// ---------------------------------------------------------------------------

async fn cmd_generate(
    config: &AppConfig,
    request: ContentRequest,
    kb: Option<PathBuf>,
    max_attempts: Option<u32>,
    out: Option<PathBuf>,
) -> Result<()> {
    // Validate API key before doing anything
    validate_api_key(config)?;

    let root = knowledge_root(config, kb);
    let store = Arc::new(KnowledgeStore::load_dir(&root).await?);
    let assembler = PromptAssembler::new(Arc::new(template_registry(config)?));
    let gateway = GenerationGateway::new(Arc::new(OpenRouterProvider::from_config(config)?));
    let evaluator = Arc::new(HeuristicEvaluator::from(&config.feedback));

    let mut pipeline_config = PipelineConfig::from(config);
    if let Some(n) = max_attempts {
        pipeline_config.max_attempts = n.max(1);
    }

    info!(
        kb = %root.display(),
        entries = store.entries().len(),
        model = %config.provider.model,
        max_attempts = pipeline_config.max_attempts,
        "generating content"
    );

    let pipeline = ContentPipeline::new(store, assembler, gateway, evaluator, pipeline_config);
    let observer = CliObserver::new();
    let run = pipeline.run_with_observer(request, &observer).await?;

    let out_dir = out.unwrap_or_else(|| PathBuf::from(&config.defaults.output_dir));
    let logged = report_run(&run, &out_dir, &mut std::io::stdout().lock());

    if let RunStatus::Failed(reason) = run.status() {
        if let Err(e) = &logged {
            warn!(error = %e, "run log not written");
        }
        return Err(eyre!(
            "run failed ({}): {}",
            reason.kind.as_str(),
            reason.message
        ));
    }
    logged.map(|_| ())
}

/// Print the content and run summary, then write the run log.
///
/// The content is always printed before the log write is attempted.
fn report_run(run: &PipelineRun, out_dir: &Path, stdout: &mut impl Write) -> Result<PathBuf> {
    if let Some(content) = run.output() {
        writeln!(stdout, "{}", content.text.trim())?;
        writeln!(stdout)?;
        stdout.flush()?;
    }
    print_summary(run);

    let log_path = RunLog::from(run).write_to(out_dir)?;
    eprintln!("  Log:      {}", log_path.display());
    Ok(log_path)
}

fn print_summary(run: &PipelineRun) {
    eprintln!("  Run:      {}", run.id());
    if let Some(brief) = run.brief() {
        eprintln!("  Topic:    {}", brief.topic);
        eprintln!("  Format:   {}", brief.target_format);
    }
    eprintln!("  Attempts: {}", run.attempt());
    if let Some(best) = run.best_attempt() {
        eprintln!("  Score:    {:.2}", best.score);
    }
    match run.status() {
        RunStatus::Done => eprintln!("  Status:   done"),
        RunStatus::Failed(reason) => eprintln!("  Status:   failed ({})", reason.kind.as_str()),
        RunStatus::Running => eprintln!("  Status:   running"),
    }
}

// ---------------------------------------------------------------------------
// CLI progress observer
// ---------------------------------------------------------------------------

/// Pipeline observer rendering an indicatif spinner.
struct CliObserver {
    spinner: ProgressBar,
}

impl CliObserver {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl PipelineObserver for CliObserver {
    fn stage_entered(&self, _run_id: &RunId, stage: Stage) {
        let label = match stage {
            Stage::Document => "Gathering knowledge",
            Stage::Monitor => "Scanning trends",
            Stage::Brief => "Drafting brief",
            Stage::Publish => "Writing",
            Stage::Iterate => "Reviewing",
        };
        self.spinner.set_message(label);
    }

    fn generation_retry(&self, stage: Stage, error: &GenerationError, delay: Duration) {
        self.spinner.set_message(format!(
            "{stage}: {}, retrying in {:.1}s",
            error.kind.as_str(),
            delay.as_secs_f64()
        ));
    }

    fn attempt_evaluated(&self, record: &FeedbackRecord) {
        let failed: Vec<&str> = record.failed_checks.iter().map(|c| c.as_str()).collect();
        self.spinner.println(format!(
            "  attempt {}: score {:.2}{}",
            record.content.attempt_number,
            record.score,
            if failed.is_empty() {
                String::new()
            } else {
                format!(" (failed: {})", failed.join(", "))
            }
        ));
    }

    fn finished(&self, _run: &PipelineRun) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// knowledge / templates / config
// ---------------------------------------------------------------------------

async fn cmd_knowledge_summary(config: &AppConfig, kb: Option<PathBuf>) -> Result<()> {
    let root = knowledge_root(config, kb);
    let store = KnowledgeStore::load_dir(&root).await?;
    let summary = store.summary();

    println!("Knowledge base: {}", root.display());
    for p in &summary.partitions {
        println!(
            "  {:<10} {:>3} documents  {:>6} words",
            p.partition.as_str(),
            p.document_count,
            p.total_words
        );
        for doc in &p.documents {
            println!("    - {doc}");
        }
    }
    println!(
        "  total      {:>3} documents  {:>6} words",
        summary.total_documents, summary.total_words
    );
    Ok(())
}

async fn cmd_knowledge_search(
    config: &AppConfig,
    query: &str,
    partition: Option<Partition>,
    kb: Option<PathBuf>,
) -> Result<()> {
    let store = KnowledgeStore::load_dir(&knowledge_root(config, kb)).await?;
    let hits = store.search(query, partition);

    if hits.is_empty() {
        println!("No matches for '{query}'.");
        return Ok(());
    }

    for hit in &hits {
        println!("{} ({}): {}", hit.entry_id, hit.partition, hit.title);
        for line in &hit.matches {
            println!("    {line}");
        }
    }
    Ok(())
}

fn cmd_templates(config: &AppConfig) -> Result<()> {
    let registry = template_registry(config)?;
    for stage in Stage::ALL {
        let t = registry.for_stage(stage);
        println!(
            "{:<9} id={:<9} budget={:>5}  placeholders: {}",
            stage.as_str(),
            t.id().as_str(),
            t.knowledge_budget(),
            t.placeholders().join(", ")
        );
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}
