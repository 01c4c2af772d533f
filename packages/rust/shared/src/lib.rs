//! Shared types, error model, and configuration for ContentForge.
//!
//! This crate is the foundation depended on by all other ContentForge crates.
//! It provides:
//! - [`ContentForgeError`]: the unified error type, including [`GenerationError`]
//! - Domain types ([`KnowledgeEntry`], [`PromptContext`], [`GeneratedContent`], ...)
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, FeedbackConfig, PipelineConfig, PipelineSection, ProviderConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, resolve_api_key,
    validate_api_key,
};
pub use error::{ContentForgeError, GenerationError, GenerationErrorKind, Result};
pub use types::{
    BriefConstraints, ContentBrief, FeedbackCheck, FeedbackRecord, GeneratedContent,
    GenerationOptions, GenerationUsage, KnowledgeEntry, Partition, PromptContext, RunId, Stage,
    TemplateId,
};
