//! Debounced mutation watching.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::core::session::{Session, TimerHandle};
use crate::dom::{DomHost, MutationRecord};

const WATCHED_ATTRIBUTES: [&str; 3] = ["href", "src", "value"];

/// Decides which mutation records count as a relevant page change.
#[derive(Debug, Clone)]
pub struct MutationFilter {
    self_class: String,
}

impl MutationFilter {
    /// `self_class` marks nodes this tool injected into the page.
    pub fn new(self_class: impl Into<String>) -> Self {
        Self {
            self_class: self_class.into(),
        }
    }

    pub fn is_relevant(&self, record: &MutationRecord) -> bool {
        if record.target().has_class(&self.self_class) {
            return false;
        }
        match record {
            // Highlight inserts arrive together with the split text around them.
            MutationRecord::ChildList { added, .. } => {
                !added.is_empty() && !added.iter().any(|node| node.has_class(&self.self_class))
            }
            MutationRecord::Attributes { name, .. } => {
                WATCHED_ATTRIBUTES.contains(&name.to_ascii_lowercase().as_str())
            }
            MutationRecord::CharacterData { .. } => false,
        }
    }

    pub fn batch_is_relevant(&self, batch: &[MutationRecord]) -> bool {
        batch.iter().any(|r| self.is_relevant(r))
    }
}

/// Turns bursts of relevant mutations into single change signals.
///
/// Every relevant batch pushes one quiet deadline forward. When the deadline
/// passes untouched, `on_change` runs once. Callbacks are awaited inline on the
/// watcher task, so they run in the order their windows closed and never
/// overlap.
#[derive(Debug)]
pub struct MutationWatcher {
    task: TimerHandle,
}

impl MutationWatcher {
    pub fn observe<F, Fut>(
        session: &Session,
        dom: Arc<dyn DomHost>,
        filter: MutationFilter,
        quiet: Duration,
        mut on_change: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut batches = dom.subscribe();
        let task = session.spawn(async move {
            let mut deadline: Option<Instant> = None;
            loop {
                tokio::select! {
                    batch = batches.recv() => match batch {
                        Some(batch) => {
                            if !filter.batch_is_relevant(&batch) {
                                continue;
                            }
                            if dom.focused_is_text_input().await {
                                debug!("ignoring {} mutation(s) while a text input has focus", batch.len());
                                continue;
                            }
                            deadline = Some(Instant::now() + quiet);
                        }
                        None => {
                            if let Some(at) = deadline.take() {
                                sleep_until(at).await;
                                on_change().await;
                            }
                            debug!("mutation stream closed");
                            break;
                        }
                    },
                    _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        deadline = None;
                        on_change().await;
                    }
                }
            }
        });
        Self { task }
    }

    /// Stop watching. A pending burst is discarded.
    pub fn stop(&self) {
        self.task.cancel();
    }
}
