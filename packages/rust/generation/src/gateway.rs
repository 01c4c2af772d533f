use std::sync::Arc;

use tracing::{debug, instrument, warn};

use contentforge_shared::{
    GeneratedContent, GenerationError, GenerationErrorKind, GenerationOptions, PromptContext,
    Stage,
};

use crate::GenerationProvider;

/// Wraps a [`GenerationProvider`] and produces [`GeneratedContent`] records.
#[derive(Clone)]
pub struct GenerationGateway {
    provider: Arc<dyn GenerationProvider>,
}

impl std::fmt::Debug for GenerationGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationGateway")
            .field("provider", &self.provider.name())
            .finish()
    }
}

impl GenerationGateway {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Generate text for `context`.
    ///
    /// A `Timeout` is retried once, immediately. Every other error kind is
    /// returned to the caller unchanged.
    #[instrument(
        skip_all,
        fields(stage = %stage, attempt = attempt, fingerprint = %context.fingerprint)
    )]
    pub async fn generate(
        &self,
        context: Arc<PromptContext>,
        stage: Stage,
        attempt: u32,
        options: &GenerationOptions,
    ) -> std::result::Result<GeneratedContent, GenerationError> {
        let reply = match self.provider.generate(&context.prompt, options).await {
            Err(e) if e.kind == GenerationErrorKind::Timeout => {
                warn!(
                    provider = self.provider.name(),
                    error = %e,
                    "generation timed out, retrying once"
                );
                self.provider.generate(&context.prompt, options).await?
            }
            other => other?,
        };

        debug!(
            provider = self.provider.name(),
            chars = reply.text.chars().count(),
            tokens_out = reply.usage.as_ref().map_or(0, |u| u.tokens_out),
            "generation complete"
        );

        Ok(GeneratedContent {
            text: reply.text,
            source_prompt: context,
            stage,
            attempt_number: attempt,
            usage: reply.usage,
        })
    }
}
