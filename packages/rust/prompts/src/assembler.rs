//! Prompt assembly: template + variables + knowledge excerpts → [`PromptContext`].

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use contentforge_shared::{
    ContentForgeError, KnowledgeEntry, Partition, PromptContext, Result, Stage, TemplateId,
};

use crate::template::{KNOWLEDGE_PLACEHOLDER, PLACEHOLDER_RE, TemplateRegistry};

/// Merges templates, variables and knowledge into finished prompts.
///
/// Assembly is a pure function of its inputs: the same template, variables
/// and excerpts always yield a byte-identical prompt.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    registry: Arc<TemplateRegistry>,
}

impl PromptAssembler {
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Build a [`PromptContext`] or fail without producing a partial prompt.
    ///
    /// Each declared placeholder resolves, in order, from `variables`, then the
    /// reserved `{knowledge}` block, then excerpts whose category equals the
    /// placeholder name. Knowledge-derived values share the template's
    /// `knowledge_budget`, consumed in placeholder order.
    #[instrument(skip_all, fields(template = %template_id, stage = %stage))]
    pub fn assemble(
        &self,
        template_id: &TemplateId,
        stage: Stage,
        variables: BTreeMap<String, String>,
        knowledge_excerpts: &[Arc<KnowledgeEntry>],
    ) -> Result<PromptContext> {
        let template = self.registry.get(template_id)?;

        if template.stage() != stage {
            return Err(ContentForgeError::validation(format!(
                "template '{template_id}' belongs to stage '{}', not '{stage}'",
                template.stage()
            )));
        }

        if let Some(unknown) = variables.keys().find(|k| !template.declares(k)) {
            return Err(ContentForgeError::UnknownVariable(unknown.clone()));
        }

        let excerpts = normalize_excerpts(knowledge_excerpts);
        let mut remaining = template.knowledge_budget();

        let prompt = {
            let mut resolved: BTreeMap<&str, Cow<'_, str>> = BTreeMap::new();
            for name in template.placeholders() {
                let value = if let Some(v) = variables.get(name) {
                    Cow::Borrowed(v.as_str())
                } else if name == KNOWLEDGE_PLACEHOLDER {
                    Cow::Owned(spend_budget(&format_knowledge_block(&excerpts), &mut remaining))
                } else if let Some(bound) = knowledge_binding(&excerpts, name) {
                    Cow::Owned(spend_budget(&bound, &mut remaining))
                } else {
                    return Err(ContentForgeError::MissingVariable(name.clone()));
                };
                resolved.insert(name.as_str(), value);
            }

            // Single pass: substituted values are never re-scanned.
            PLACEHOLDER_RE
                .replace_all(template.body(), |caps: &regex::Captures<'_>| {
                    resolved[&caps[1]].to_string()
                })
                .into_owned()
        };

        let fingerprint = prompt_fingerprint(&prompt);

        debug!(
            prompt_chars = prompt.chars().count(),
            excerpts = excerpts.len(),
            %fingerprint,
            "prompt assembled"
        );

        Ok(PromptContext {
            template_id: template_id.clone(),
            stage,
            variables,
            knowledge_excerpts: excerpts,
            prompt,
            fingerprint,
        })
    }

    /// Assemble the stage's own template.
    pub fn assemble_for_stage(
        &self,
        stage: Stage,
        variables: BTreeMap<String, String>,
        knowledge_excerpts: &[Arc<KnowledgeEntry>],
    ) -> Result<PromptContext> {
        self.assemble(&stage.template_id(), stage, variables, knowledge_excerpts)
    }
}

/// SHA-256 of the prompt text, hex encoded.
pub fn prompt_fingerprint(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deduplicate by id (first wins) and move primary entries ahead of secondary
/// ones. Relative order within a partition is preserved.
fn normalize_excerpts(excerpts: &[Arc<KnowledgeEntry>]) -> Vec<Arc<KnowledgeEntry>> {
    let mut seen = HashSet::new();
    let unique: Vec<_> = excerpts
        .iter()
        .filter(|e| seen.insert(e.id.as_str()))
        .cloned()
        .collect();

    let (mut primary, secondary): (Vec<_>, Vec<_>) = unique
        .into_iter()
        .partition(|e| e.partition == Partition::Primary);
    primary.extend(secondary);
    primary
}

/// Render excerpts as Markdown sections, in the given order.
fn format_knowledge_block(excerpts: &[Arc<KnowledgeEntry>]) -> String {
    let mut block = String::new();
    for entry in excerpts {
        block.push_str(&format!(
            "### {} [{}/{}]\n{}\n\n",
            entry.title, entry.partition, entry.category, entry.body
        ));
    }
    block.trim_end().to_string()
}

fn knowledge_binding(excerpts: &[Arc<KnowledgeEntry>], category: &str) -> Option<String> {
    let bodies: Vec<&str> = excerpts
        .iter()
        .filter(|e| e.category == category)
        .map(|e| e.body.as_str())
        .collect();
    (!bodies.is_empty()).then(|| bodies.join("\n\n"))
}

/// Take as much of `text` as `remaining` allows and charge it.
fn spend_budget(text: &str, remaining: &mut usize) -> String {
    let kept = truncate_chars(text, *remaining);
    *remaining -= kept.chars().count();
    kept.to_string()
}

/// Cut to at most `max_chars` characters, on a char boundary.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
