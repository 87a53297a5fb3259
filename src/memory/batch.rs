//! Batch staging with a single deferred index rebuild
//!
//! Each item goes through the normal coordinator path with `deferred`
//! replication, up to `concurrency` at a time, and results keep input order.
//! Once every item has finished, the secondary index is rebuilt exactly once
//! if the batch was non-empty. Per-item failures never abort the batch.

use super::coordinator::{MemoryCoordinator, StoreOutcome, StoreRequest};
use super::record::Provenance;
use crate::error::{Error, Result};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;

/// One fact in a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub content: String,
    pub explicit_topics: Option<Vec<String>>,
    pub source_context: Option<String>,
}

impl BatchItem {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            explicit_topics: None,
            source_context: None,
        }
    }

    /// Use these topics instead of classifying
    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.explicit_topics = Some(topics.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_source_context(mut self, context: impl Into<String>) -> Self {
        self.source_context = Some(context.into());
        self
    }
}

impl From<&str> for BatchItem {
    fn from(content: &str) -> Self {
        Self::new(content)
    }
}

impl From<String> for BatchItem {
    fn from(content: String) -> Self {
        Self::new(content)
    }
}

/// A set of facts staged together for one identity
#[derive(Debug, Clone)]
pub struct IngestionBatch {
    pub identity: String,
    pub provenance: Provenance,
    pub items: Vec<BatchItem>,
    /// Defer remote rebuilds until the end of the batch
    pub deferred: bool,
}

impl IngestionBatch {
    /// A deferred batch
    pub fn new(identity: impl Into<String>, provenance: Provenance, items: Vec<BatchItem>) -> Self {
        Self {
            identity: identity.into(),
            provenance,
            items,
            deferred: true,
        }
    }
}

/// Result for one batch item
#[derive(Debug)]
pub struct BatchItemReport {
    /// Position in the input
    pub index: usize,
    pub content: String,
    pub outcome: std::result::Result<StoreOutcome, Error>,
}

/// Result of the trailing index rebuild
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// Empty batch, or a non-deferred one
    NotNeeded,
    Rebuilt,
    /// Items are persisted but the index is stale
    Failed { reason: String },
}

/// Per-item results plus the rebuild outcome
#[derive(Debug)]
pub struct BatchReport {
    pub items: Vec<BatchItemReport>,
    pub rebuild: RebuildOutcome,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&BatchItemReport) -> bool) -> usize {
        self.items.iter().filter(|item| pred(item)).count()
    }

    /// Items persisted and replicated
    pub fn stored_count(&self) -> usize {
        self.count(|i| matches!(i.outcome, Ok(StoreOutcome::Stored(_))))
    }

    /// Items persisted but not replicated
    pub fn local_only_count(&self) -> usize {
        self.count(|i| matches!(i.outcome, Ok(StoreOutcome::StoredLocalOnly { .. })))
    }

    /// Items rejected as duplicates
    pub fn duplicate_count(&self) -> usize {
        self.count(|i| matches!(i.outcome, Ok(StoreOutcome::RejectedDuplicate { .. })))
    }

    /// Items that failed validation or persistence
    pub fn failed_count(&self) -> usize {
        self.count(|i| i.outcome.is_err())
    }

    /// Every item settled and the index, if needed, rebuilt
    pub fn is_complete(&self) -> bool {
        self.failed_count() == 0
            && self.local_only_count() == 0
            && !matches!(self.rebuild, RebuildOutcome::Failed { .. })
    }
}

/// Stages batches through a shared coordinator
pub struct BatchStager {
    coordinator: Arc<MemoryCoordinator>,
    concurrency: usize,
}

impl BatchStager {
    /// `concurrency` is clamped to at least 1
    pub fn new(coordinator: Arc<MemoryCoordinator>, concurrency: usize) -> Self {
        Self {
            coordinator,
            concurrency: concurrency.max(1),
        }
    }

    /// Stage `items` for `identity` with deferred replication
    pub async fn stage<I>(&self, identity: &str, provenance: Provenance, items: I) -> BatchReport
    where
        I: IntoIterator,
        I::Item: Into<BatchItem>,
    {
        let items = items.into_iter().map(Into::into).collect();
        self.stage_batch(IngestionBatch::new(identity, provenance, items))
            .await
    }

    /// Stage a prepared batch
    pub async fn stage_batch(&self, batch: IngestionBatch) -> BatchReport {
        let IngestionBatch {
            identity,
            provenance,
            items,
            deferred,
        } = batch;
        let total = items.len();
        let coordinator = &self.coordinator;

        tracing::info!(identity = %identity, items = total, deferred, "Staging batch");

        let reports: Vec<BatchItemReport> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| {
                let content = item.content;
                let request = StoreRequest {
                    identity: identity.clone(),
                    content: content.clone(),
                    explicit_topics: item.explicit_topics,
                    provenance: provenance.clone(),
                    source_context: item.source_context,
                    confidence: None,
                };
                async move {
                    let outcome = coordinator.store_with(request, deferred).await;
                    if let Err(e) = &outcome {
                        tracing::warn!(index, "Batch item failed: {}", e);
                    }
                    BatchItemReport {
                        index,
                        content,
                        outcome,
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let rebuild = if total == 0 || !deferred {
            RebuildOutcome::NotNeeded
        } else {
            match coordinator.rebuild_index().await {
                Ok(()) => RebuildOutcome::Rebuilt,
                Err(e) => {
                    tracing::warn!(identity = %identity, "Index rebuild after batch failed: {}", e);
                    RebuildOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        };

        let report = BatchReport {
            items: reports,
            rebuild,
        };
        tracing::info!(
            identity = %identity,
            stored = report.stored_count(),
            local_only = report.local_only_count(),
            duplicates = report.duplicate_count(),
            failed = report.failed_count(),
            rebuild = ?report.rebuild,
            "Batch finished"
        );
        report
    }

    /// Stage every non-empty line of the `.txt` and `.md` files in `dir`
    ///
    /// Files are read in name order. Markdown headings are skipped and list
    /// markers stripped. Items are tagged with provenance `imported` and the
    /// file name as source context.
    pub async fn stage_directory(&self, identity: &str, dir: impl AsRef<Path>) -> Result<BatchReport> {
        let dir = dir.as_ref();
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let importable = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("txt") || e.eq_ignore_ascii_case("md"))
                .unwrap_or(false);
            if importable && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }
        files.sort();

        let mut items = Vec::new();
        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let text = tokio::fs::read_to_string(&path).await?;
            items.extend(
                text.lines()
                    .filter_map(import_line)
                    .map(|line| BatchItem::new(line).with_source_context(name.clone())),
            );
        }

        tracing::debug!(dir = %dir.display(), items = items.len(), "Read import directory");
        Ok(self
            .stage_batch(IngestionBatch::new(identity, Provenance::imported(), items))
            .await)
    }
}

fn import_line(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .unwrap_or(line)
        .trim();
    (!line.is_empty()).then_some(line)
}
