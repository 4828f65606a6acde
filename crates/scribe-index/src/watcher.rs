use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::{DebouncedEventKind, new_debouncer};
use scribe_llm::LlmProvider;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::indexer::Indexer;

const DEBOUNCE: Duration = Duration::from_secs(1);

/// Reindexes corpus files as they change. Dropping the watcher stops it.
pub struct IndexWatcher {
    handle: tokio::task::JoinHandle<()>,
}

impl IndexWatcher {
    /// Watch `root` recursively and feed changed indexable paths to
    /// [`Indexer::index_file`].
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem watcher cannot be initialized.
    pub fn start<P: LlmProvider + Send + Sync + 'static>(
        root: &Path,
        indexer: Arc<Indexer<P>>,
    ) -> Result<Self> {
        let (notify_tx, mut notify_rx) = mpsc::channel::<PathBuf>(64);
        let filter = indexer.corpus().clone();

        let mut debouncer = new_debouncer(
            DEBOUNCE,
            move |events: std::result::Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!("index watcher error: {e}");
                        return;
                    }
                };

                let paths: HashSet<PathBuf> = events
                    .into_iter()
                    .filter(|e| e.kind == DebouncedEventKind::Any && filter.is_indexable(&e.path))
                    .map(|e| e.path)
                    .collect();

                for path in paths {
                    if notify_tx.blocking_send(path).is_err() {
                        return;
                    }
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(root, notify::RecursiveMode::Recursive)?;
        tracing::info!(root = %root.display(), "watching corpus");

        let handle = tokio::spawn(async move {
            let _debouncer = debouncer;
            while let Some(path) = notify_rx.recv().await {
                match indexer.index_file(&path, false).await {
                    Ok(report) => {
                        for err in &report.errors {
                            tracing::warn!(file = %err.file_path, stage = %err.stage, "reindex failed: {}", err.message);
                        }
                    }
                    Err(e) => tracing::warn!(path = %path.display(), "reindex failed: {e}"),
                }
            }
        });

        Ok(Self { handle })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for IndexWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
