//! Brief parsing and the renderings later stages interpolate.

use serde::Deserialize;

use contentforge_shared::{
    BriefConstraints, ContentBrief, ContentForgeError, PipelineConfig, Result,
};

use crate::run::ContentRequest;

/// Appended to the first brief prompt.
pub const FORMAT_REMINDER: &str = "\
Respond with a single JSON object and nothing else:
{\"topic\": \"...\", \"target_format\": \"...\", \"key_points\": [\"...\"], \"constraints\": {\"max_length\": 800, \"required_cta\": [\"...\"]}}";

/// Used for the one retry after an unparseable brief.
pub const STRICT_FORMAT_REMINDER: &str = "\
Your previous answer could not be parsed. Output ONLY a JSON object: no prose before or after it, no code fences, no comments.
It must contain \"topic\" (non-empty string), \"key_points\" (non-empty array of strings) and \"constraints\" (object with optional integer \"max_length\" and array \"required_cta\").
{\"topic\": \"...\", \"target_format\": \"...\", \"key_points\": [\"...\"], \"constraints\": {\"max_length\": 800, \"required_cta\": [\"...\"]}}";

#[derive(Debug, Deserialize)]
struct RawBrief {
    topic: String,
    #[serde(default)]
    target_format: Option<String>,
    key_points: Vec<String>,
    #[serde(default)]
    constraints: BriefConstraints,
}

/// Parse model output into a [`ContentBrief`].
///
/// Markdown code fences and prose around the outermost JSON object are
/// ignored. A missing `target_format` is left empty for
/// [`apply_overrides`] to fill.
pub fn parse_brief(raw: &str) -> Result<ContentBrief> {
    let body = strip_code_fences(raw.trim());
    let json = outer_object(body)
        .ok_or_else(|| ContentForgeError::parse("brief response contains no JSON object"))?;

    let parsed: RawBrief = serde_json::from_str(json)
        .map_err(|e| ContentForgeError::parse(format!("brief JSON is invalid: {e}")))?;

    if parsed.topic.trim().is_empty() {
        return Err(ContentForgeError::parse("brief has an empty topic"));
    }

    let key_points: Vec<String> = parsed
        .key_points
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if key_points.is_empty() {
        return Err(ContentForgeError::parse("brief has no key points"));
    }

    Ok(ContentBrief {
        topic: parsed.topic.trim().to_string(),
        target_format: parsed.target_format.unwrap_or_default(),
        key_points,
        constraints: parsed.constraints,
    })
}

/// Pin the requested format and merge constraints into the brief.
///
/// Request values replace the model's. Configured CTAs are appended when
/// missing, and the configured length applies only when nothing else set one.
/// The merged brief is what prompts render and what evaluation checks.
pub fn apply_overrides(
    mut brief: ContentBrief,
    target_format: &str,
    request: &ContentRequest,
    config: &PipelineConfig,
) -> ContentBrief {
    brief.target_format = target_format.to_string();

    let c = &mut brief.constraints;
    if let Some(max) = request.max_length {
        c.max_length = Some(max);
    }
    c.max_length = c.max_length.or(config.default_max_length);

    if !request.required_cta.is_empty() {
        c.required_cta = request.required_cta.clone();
    }
    for cta in &config.required_cta {
        let present = c
            .required_cta
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(cta));
        if !cta.trim().is_empty() && !present {
            c.required_cta.push(cta.clone());
        }
    }
    brief
}

/// Key points as a Markdown list.
pub fn render_key_points(brief: &ContentBrief) -> String {
    brief
        .key_points
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{}. {p}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Constraints as a Markdown list, one line per constraint.
pub fn render_constraints(brief: &ContentBrief) -> String {
    let c = &brief.constraints;
    let mut lines = Vec::new();

    if let Some(max) = c.max_length {
        lines.push(format!("- Length: at most {max} words"));
    }
    for cta in &c.required_cta {
        lines.push(format!("- Required call to action (verbatim): \"{cta}\""));
    }
    for (key, value) in &c.extra {
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        lines.push(format!("- {key}: {value}"));
    }

    if lines.is_empty() {
        "- No additional constraints".to_string()
    } else {
        lines.join("\n")
    }
}

fn strip_code_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (```json).
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
