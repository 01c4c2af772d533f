//! Read-only access to the two-partition knowledge corpus.
//!
//! Entries are loaded once (see [`KnowledgeStore::load_dir`]) and then shared
//! as `Arc<KnowledgeEntry>` across runs. The store holds no interior
//! mutability, so a single instance can serve concurrent pipeline runs
//! without locking.
//!
//! Retrieval order is part of the contract: primary before secondary, then
//! most recently updated first. Prompt assembly truncates by position, so the
//! most relevant entries must come first.

mod loader;

use std::cmp::Reverse;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument};

use contentforge_shared::{ContentForgeError, KnowledgeEntry, Partition, Result};

pub use loader::{infer_category, load_partition, parse_document};

// ---------------------------------------------------------------------------
// Retrieval query
// ---------------------------------------------------------------------------

/// Filters for [`KnowledgeStore::retrieve`]. Empty filters mean "all".
#[derive(Debug, Clone, Default)]
pub struct RetrieveQuery {
    /// Only entries with one of these categories.
    pub categories: Vec<String>,
    /// Only entries from these partitions.
    pub partitions: Vec<Partition>,
    /// Upper bound on returned entries. Zero yields an empty result.
    pub max_entries: usize,
    /// Partitions that must hold at least one entry.
    pub required: Vec<Partition>,
}

impl RetrieveQuery {
    /// Everything, up to `max_entries`.
    pub fn all(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Default::default()
        }
    }

    pub fn with_partitions(mut self, partitions: impl IntoIterator<Item = Partition>) -> Self {
        self.partitions = partitions.into_iter().collect();
        self
    }

    pub fn with_categories<S: Into<String>>(
        mut self,
        categories: impl IntoIterator<Item = S>,
    ) -> Self {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn require(mut self, partitions: impl IntoIterator<Item = Partition>) -> Self {
        self.required = partitions.into_iter().collect();
        self
    }

    fn wants_partition(&self, partition: Partition) -> bool {
        self.partitions.is_empty() || self.partitions.contains(&partition)
    }

    fn wants_category(&self, category: &str) -> bool {
        self.categories.is_empty() || self.categories.iter().any(|c| c == category)
    }
}

// ---------------------------------------------------------------------------
// Search & summary results
// ---------------------------------------------------------------------------

/// Lines of one document matching a search query.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub entry_id: String,
    pub partition: Partition,
    pub title: String,
    pub matches: Vec<String>,
}

/// Overview of one partition.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionSummary {
    pub partition: Partition,
    pub document_count: usize,
    pub total_words: usize,
    pub documents: Vec<String>,
}

/// Overview of the whole corpus.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeSummary {
    pub partitions: Vec<PartitionSummary>,
    pub total_documents: usize,
    pub total_words: usize,
}

// ---------------------------------------------------------------------------
// KnowledgeStore
// ---------------------------------------------------------------------------

/// Immutable, canonically ordered set of knowledge entries.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeStore {
    entries: Vec<Arc<KnowledgeEntry>>,
}

impl KnowledgeStore {
    /// Build a store from entries. Duplicate ids keep the first occurrence.
    pub fn new(entries: impl IntoIterator<Item = KnowledgeEntry>) -> Self {
        let mut seen = HashSet::new();
        let mut entries: Vec<Arc<KnowledgeEntry>> = entries
            .into_iter()
            .filter(|e| seen.insert(e.id.clone()))
            .map(Arc::new)
            .collect();

        entries.sort_by(|a, b| {
            (a.partition, Reverse(a.last_updated), &a.id)
                .cmp(&(b.partition, Reverse(b.last_updated), &b.id))
        });

        Self { entries }
    }

    /// Load `<root>/primary` and `<root>/secondary` concurrently.
    ///
    /// A missing partition directory contributes zero entries; whether that
    /// is acceptable is decided at retrieval time via `required`.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub async fn load_dir(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(ContentForgeError::config(format!(
                "knowledge directory '{}' does not exist",
                root.display()
            )));
        }

        let (primary, secondary) = tokio::join!(
            load_partition(root, Partition::Primary),
            load_partition(root, Partition::Secondary),
        );

        let store = Self::new(primary?.into_iter().chain(secondary?));

        info!(
            primary = store.count(Partition::Primary),
            secondary = store.count(Partition::Secondary),
            "knowledge base loaded"
        );

        Ok(store)
    }

    /// All entries in canonical order.
    pub fn entries(&self) -> &[Arc<KnowledgeEntry>] {
        &self.entries
    }

    /// Number of entries in a partition.
    pub fn count(&self, partition: Partition) -> usize {
        self.entries
            .iter()
            .filter(|e| e.partition == partition)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look an entry up by id.
    pub fn get(&self, id: &str) -> Option<&Arc<KnowledgeEntry>> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Return matching entries, primary first, newest first within a partition.
    pub fn retrieve(&self, query: &RetrieveQuery) -> Result<Vec<Arc<KnowledgeEntry>>> {
        for partition in Partition::ALL {
            if query.required.contains(&partition)
                && query.wants_partition(partition)
                && self.count(partition) == 0
            {
                return Err(ContentForgeError::KnowledgeUnavailable { partition });
            }
        }

        // `entries` is already in canonical order; filtering preserves it.
        let results: Vec<_> = self
            .entries
            .iter()
            .filter(|e| query.wants_partition(e.partition) && query.wants_category(&e.category))
            .take(query.max_entries)
            .cloned()
            .collect();

        debug!(
            categories = ?query.categories,
            partitions = ?query.partitions,
            max_entries = query.max_entries,
            returned = results.len(),
            "knowledge retrieved"
        );

        Ok(results)
    }

    /// Case-insensitive line search, most matches first.
    pub fn search(&self, query: &str, partition: Option<Partition>) -> Vec<SearchHit> {
        let needle = query.to_lowercase();
        if needle.trim().is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .filter(|e| partition.is_none_or(|p| p == e.partition))
            .filter_map(|e| {
                let matches: Vec<String> = e
                    .body
                    .lines()
                    .filter(|line| line.to_lowercase().contains(&needle))
                    .map(|line| line.trim().to_string())
                    .collect();
                (!matches.is_empty()).then(|| SearchHit {
                    entry_id: e.id.clone(),
                    partition: e.partition,
                    title: e.title.clone(),
                    matches,
                })
            })
            .collect();

        // Stable sort keeps canonical order among equal counts.
        hits.sort_by_key(|h| Reverse(h.matches.len()));
        hits
    }

    /// Document counts and word totals per partition.
    pub fn summary(&self) -> KnowledgeSummary {
        let partitions: Vec<PartitionSummary> = Partition::ALL
            .into_iter()
            .map(|partition| {
                let docs: Vec<_> = self
                    .entries
                    .iter()
                    .filter(|e| e.partition == partition)
                    .collect();
                PartitionSummary {
                    partition,
                    document_count: docs.len(),
                    total_words: docs.iter().map(|e| e.body.split_whitespace().count()).sum(),
                    documents: docs.iter().map(|e| e.id.clone()).collect(),
                }
            })
            .collect();

        KnowledgeSummary {
            total_documents: partitions.iter().map(|p| p.document_count).sum(),
            total_words: partitions.iter().map(|p| p.total_words).sum(),
            partitions,
        }
    }
}
