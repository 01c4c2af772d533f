//! Markdown corpus loading.
//!
//! Layout: `<root>/primary/**/*.md` and `<root>/secondary/**/*.md`.
//! Each file may open with a small front-matter block:
//!
//! ```text
//! ---
//! category: brand_voice
//! updated: 2026-02-01
//! title: Brand Guidelines
//! ---
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use tracing::{debug, warn};

use contentforge_shared::{ContentForgeError, KnowledgeEntry, Partition, Result};

static FRONT_MATTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\A---\r?\n(.*?)\r?\n---[ \t]*(?:\r?\n|\z)").unwrap());

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6}[ \t]+(.+?)[ \t]*#*[ \t]*$").unwrap());

/// Load every Markdown file under `<root>/<partition>`.
///
/// Files are visited in path order so entry ids and tie-breaks are stable.
pub async fn load_partition(root: &Path, partition: Partition) -> Result<Vec<KnowledgeEntry>> {
    let dir = root.join(partition.as_str());
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "partition directory missing, treating as empty");
        return Ok(Vec::new());
    }

    let files = collect_markdown_files(&dir).await?;
    let mut entries = Vec::with_capacity(files.len());

    for path in files {
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ContentForgeError::io(&path, e))?;

        if raw.trim().is_empty() {
            debug!(path = %path.display(), "skipping empty document");
            continue;
        }

        let modified = tokio::fs::metadata(&path)
            .await
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .map_err(|e| ContentForgeError::io(&path, e))?;

        let relative = path
            .strip_prefix(&dir)
            .unwrap_or(&path)
            .with_extension("");
        let stem = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let mut entry = parse_document(partition, &stem, &raw, modified)?;
        entry.source_path = Some(path);
        entries.push(entry);
    }

    debug!(partition = %partition, count = entries.len(), "partition loaded");
    Ok(entries)
}

/// Recursively list `*.md` files, sorted by path.
async fn collect_markdown_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pending = vec![dir.to_path_buf()];
    let mut files = Vec::new();

    while let Some(current) = pending.pop() {
        let mut read_dir = tokio::fs::read_dir(&current)
            .await
            .map_err(|e| ContentForgeError::io(&current, e))?;

        while let Some(item) = read_dir
            .next_entry()
            .await
            .map_err(|e| ContentForgeError::io(&current, e))?
        {
            let path = item.path();
            let file_type = item
                .file_type()
                .await
                .map_err(|e| ContentForgeError::io(&path, e))?;

            if file_type.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "md") {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Build an entry from raw document text.
///
/// `stem` is the path relative to the partition directory, without extension.
/// `fallback_updated` is used when the front matter carries no `updated` key.
pub fn parse_document(
    partition: Partition,
    stem: &str,
    raw: &str,
    fallback_updated: DateTime<Utc>,
) -> Result<KnowledgeEntry> {
    let (front, body) = split_front_matter(raw);

    let mut category = None;
    let mut title = None;
    let mut updated = None;

    for line in front.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "category" => category = Some(value.to_string()),
            "title" => title = Some(value.to_string()),
            "updated" => {
                let parsed = parse_timestamp(value).ok_or_else(|| {
                    ContentForgeError::parse(format!(
                        "{partition}/{stem}: unrecognised 'updated' value '{value}'"
                    ))
                })?;
                updated = Some(parsed);
            }
            _ => {}
        }
    }

    let file_name = stem.rsplit('/').next().unwrap_or(stem);
    let title = title
        .or_else(|| HEADING_RE.captures(body).map(|c| c[1].to_string()))
        .unwrap_or_else(|| file_name.replace(['_', '-'], " "));

    Ok(KnowledgeEntry {
        id: format!("{partition}/{stem}"),
        partition,
        category: category.unwrap_or_else(|| infer_category(partition, file_name)),
        title,
        body: body.trim().to_string(),
        last_updated: updated.unwrap_or(fallback_updated),
        source_path: None,
    })
}

/// Derive a category tag from a file name when front matter gives none.
pub fn infer_category(partition: Partition, file_name: &str) -> String {
    let name = file_name.to_lowercase();
    let tag = match partition {
        Partition::Primary => {
            if name.contains("brand") {
                "brand_voice"
            } else if name.contains("product") {
                "product_info"
            } else if name.contains("past") || name.contains("content") {
                "past_content"
            } else if name.contains("strategy") || name.contains("planning") {
                "strategy"
            } else {
                return name;
            }
        }
        Partition::Secondary => {
            if name.contains("market") || name.contains("trend") {
                "market_trend"
            } else if name.contains("competitor") {
                "competitor_analysis"
            } else if name.contains("industry") {
                "industry_insight"
            } else if name.contains("customer") || name.contains("feedback") {
                "customer_feedback"
            } else {
                return name;
            }
        }
    };
    tag.to_string()
}

fn split_front_matter(raw: &str) -> (&str, &str) {
    match FRONT_MATTER_RE.captures(raw) {
        Some(caps) => {
            let whole = caps.get(0).map_or(0, |m| m.end());
            let front = caps.get(1).map_or("", |m| m.as_str());
            (front, &raw[whole..])
        }
        None => ("", raw),
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn front_matter_overrides_inference() {
        let raw = "---\ncategory: brand_voice\nupdated: 2026-02-01\ntitle: \"Voice\"\n---\n\
                   # Ignored\nWarm and direct.";
        let entry = parse_document(Partition::Primary, "guide", raw, epoch()).unwrap();
        assert_eq!(entry.id, "primary/guide");
        assert_eq!(entry.category, "brand_voice");
        assert_eq!(entry.title, "Voice");
        assert_eq!(entry.body, "# Ignored\nWarm and direct.");
        assert_eq!(
            entry.last_updated,
            Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn missing_front_matter_uses_heading_and_fallback_time() {
        let raw = "Intro line\n\n## Competitor Landscape\nClassPass, Urban Sports Club.";
        let entry =
            parse_document(Partition::Secondary, "competitor_analysis", raw, epoch()).unwrap();
        assert_eq!(entry.title, "Competitor Landscape");
        assert_eq!(entry.category, "competitor_analysis");
        assert_eq!(entry.last_updated, epoch());
    }

    #[test]
    fn rfc3339_timestamps_are_accepted() {
        let raw = "---\nupdated: 2026-01-15T09:30:00+01:00\n---\nBody";
        let entry = parse_document(Partition::Primary, "notes", raw, epoch()).unwrap();
        assert_eq!(
            entry.last_updated,
            Utc.with_ymd_and_hms(2026, 1, 15, 8, 30, 0).unwrap()
        );
    }

    #[test]
    fn bad_timestamp_is_a_parse_error() {
        let raw = "---\nupdated: last tuesday\n---\nBody";
        let err = parse_document(Partition::Primary, "notes", raw, epoch()).unwrap_err();
        assert!(err.to_string().contains("last tuesday"));
    }

    #[test]
    fn category_inference_by_partition() {
        assert_eq!(infer_category(Partition::Primary, "brand_guidelines"), "brand_voice");
        assert_eq!(infer_category(Partition::Primary, "product_specs"), "product_info");
        assert_eq!(infer_category(Partition::Primary, "past_content_wins"), "past_content");
        assert_eq!(infer_category(Partition::Primary, "q3_planning"), "strategy");
        assert_eq!(infer_category(Partition::Secondary, "market_trends"), "market_trend");
        assert_eq!(infer_category(Partition::Secondary, "industry_report"), "industry_insight");
        assert_eq!(infer_category(Partition::Secondary, "customer_feedback"), "customer_feedback");
        assert_eq!(infer_category(Partition::Secondary, "Misc"), "misc");
    }

    #[test]
    fn nested_stem_uses_last_segment_for_title() {
        let entry =
            parse_document(Partition::Primary, "archive/past_wins", "plain text", epoch())
                .unwrap();
        assert_eq!(entry.id, "primary/archive/past_wins");
        assert_eq!(entry.title, "past wins");
        assert_eq!(entry.category, "past_content");
    }

    #[tokio::test]
    async fn loads_fixture_corpus() {
        let root = Path::new("../../../fixtures/knowledge");
        let primary = load_partition(root, Partition::Primary).await.expect("load primary");
        let secondary = load_partition(root, Partition::Secondary).await.expect("load secondary");

        assert_eq!(primary.len(), 3);
        assert_eq!(secondary.len(), 3);
        assert!(primary.iter().all(|e| e.id.starts_with("primary/")));
        assert!(primary.iter().all(|e| e.source_path.is_some()));
        assert!(secondary.iter().any(|e| e.category == "market_trend"));
    }

    #[tokio::test]
    async fn missing_partition_is_empty() {
        let root = Path::new("../../../fixtures/knowledge-primary-only");
        let secondary = load_partition(root, Partition::Secondary).await.expect("load");
        assert!(secondary.is_empty());
    }
}
