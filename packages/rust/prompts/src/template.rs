//! Prompt templates and the stage → template registry.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use contentforge_shared::{ContentForgeError, Result, Stage, TemplateId};

use crate::builtin;

/// `{name}` where name is a lowercase identifier. JSON braces in template
/// text (`{"topic": ...}`) never match.
pub(crate) static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z][a-z0-9_]*)\}").unwrap());

/// Placeholder reserved for the formatted knowledge block.
pub const KNOWLEDGE_PLACEHOLDER: &str = "knowledge";

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// A named prompt body with declared placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    id: TemplateId,
    stage: Stage,
    knowledge_budget: usize,
    body: String,
    placeholders: Vec<String>,
}

impl Template {
    pub fn new(
        id: impl Into<String>,
        stage: Stage,
        knowledge_budget: usize,
        body: impl Into<String>,
    ) -> Self {
        let body = body.into();
        let mut placeholders: Vec<String> = Vec::new();
        for caps in PLACEHOLDER_RE.captures_iter(&body) {
            let name = &caps[1];
            if !placeholders.iter().any(|p| p == name) {
                placeholders.push(name.to_string());
            }
        }

        Self {
            id: TemplateId::new(id),
            stage,
            knowledge_budget,
            body,
            placeholders,
        }
    }

    pub fn id(&self) -> &TemplateId {
        &self.id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Character budget for interpolated knowledge.
    pub fn knowledge_budget(&self) -> usize {
        self.knowledge_budget
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Declared placeholders in order of first appearance.
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    pub fn declares(&self, name: &str) -> bool {
        self.placeholders.iter().any(|p| p == name)
    }
}

// ---------------------------------------------------------------------------
// TOML override file
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    templates: Vec<TemplateSpec>,
}

#[derive(Debug, Deserialize)]
struct TemplateSpec {
    id: String,
    stage: Stage,
    #[serde(default = "default_budget")]
    knowledge_budget: usize,
    body: String,
}

fn default_budget() -> usize {
    4_000
}

// ---------------------------------------------------------------------------
// TemplateRegistry
// ---------------------------------------------------------------------------

/// Every template known to the assembler, keyed by id.
///
/// Construction fails unless each [`Stage`] has exactly its own template
/// registered under [`Stage::template_id`].
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: BTreeMap<TemplateId, Template>,
}

impl TemplateRegistry {
    /// Build and validate a registry. Later templates replace earlier ones with the same id.
    pub fn new(templates: impl IntoIterator<Item = Template>) -> Result<Self> {
        let templates: BTreeMap<_, _> = templates
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();

        for stage in Stage::ALL {
            let id = stage.template_id();
            match templates.get(&id) {
                None => {
                    return Err(ContentForgeError::config(format!(
                        "no template registered for stage '{stage}' (expected id '{id}')"
                    )));
                }
                Some(t) if t.stage != stage => {
                    return Err(ContentForgeError::config(format!(
                        "template '{id}' is declared for stage '{}', expected '{stage}'",
                        t.stage
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(Self { templates })
    }

    /// The templates shipped with ContentForge.
    pub fn builtin() -> Self {
        Self::new(builtin::templates()).expect("built-in templates cover every stage")
    }

    /// Built-ins overridden by the `[[templates]]` entries of a TOML document.
    pub fn builtin_with_overrides(toml_src: &str) -> Result<Self> {
        let file: TemplateFile = toml::from_str(toml_src)
            .map_err(|e| ContentForgeError::config(format!("invalid templates file: {e}")))?;

        debug!(overrides = file.templates.len(), "applying template overrides");

        let overrides = file
            .templates
            .into_iter()
            .map(|s| Template::new(s.id, s.stage, s.knowledge_budget, s.body));

        Self::new(builtin::templates().into_iter().chain(overrides))
    }

    /// Load overrides from a TOML file on disk.
    pub fn load_file(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path).map_err(|e| ContentForgeError::io(path, e))?;
        let registry = Self::builtin_with_overrides(&src)?;
        info!(path = %path.display(), templates = registry.templates.len(), "templates loaded");
        Ok(registry)
    }

    /// Resolve a template id.
    pub fn get(&self, id: &TemplateId) -> Result<&Template> {
        self.templates
            .get(id)
            .ok_or_else(|| ContentForgeError::TemplateNotFound(id.to_string()))
    }

    /// The template associated with a stage. Always present after validation.
    pub fn for_stage(&self, stage: Stage) -> &Template {
        &self.templates[&stage.template_id()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
