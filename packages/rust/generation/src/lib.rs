//! Generation boundary for ContentForge.
//!
//! [`GenerationProvider`] is the single seam to a text-generation backend.
//! [`GenerationGateway`] wraps a provider, turns raw text into
//! [`GeneratedContent`](contentforge_shared::GeneratedContent) records and
//! absorbs one transient timeout per call. Backoff across rate limits is the
//! pipeline's job, not the gateway's.

mod gateway;
mod openrouter;

use async_trait::async_trait;

use contentforge_shared::{GenerationError, GenerationOptions, GenerationUsage};

pub use gateway::GenerationGateway;
pub use openrouter::{OpenRouterProvider, SYSTEM_PROMPT};

/// Raw output of one provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    pub text: String,
    pub usage: Option<GenerationUsage>,
}

impl ProviderReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

/// A text-generation backend.
///
/// Implementations classify every failure into a
/// [`GenerationErrorKind`](contentforge_shared::GenerationErrorKind); they
/// never retry on their own.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> std::result::Result<ProviderReply, GenerationError>;
}
