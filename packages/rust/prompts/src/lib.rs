//! Prompt templates and deterministic prompt assembly.
//!
//! A [`TemplateRegistry`] maps every pipeline stage to its template; the
//! [`PromptAssembler`] merges a template with caller variables and knowledge
//! excerpts into a [`PromptContext`](contentforge_shared::PromptContext)
//! carrying the final prompt text and its SHA-256 fingerprint.

mod assembler;
mod builtin;
mod template;

pub use assembler::{PromptAssembler, prompt_fingerprint};
pub use template::{KNOWLEDGE_PLACEHOLDER, Template, TemplateRegistry};
