//! Folds extraction passes into a running fact set and signals when the set is
//! complete and has stopped changing.

use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::core::session::{Session, TimerHandle};
use crate::core::types::{Completeness, Fact, FactSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityPhase {
    Empty,
    Accumulating,
    CompleteUnstable,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub added: usize,
    pub phase: StabilityPhase,
}

struct AggregatorState {
    facts: FactSet,
    phase: StabilityPhase,
    last_changed_at: Option<Instant>,
    timer: Option<TimerHandle>,
    /// Bumped on every restart of the quiet window; a timer from an older
    /// episode finds a different value and does nothing.
    episode: u64,
}

struct Shared {
    session: Session,
    quiet: Duration,
    completeness: Completeness,
    state: Mutex<AggregatorState>,
    stable_tx: mpsc::UnboundedSender<FactSet>,
    stable_rx: Mutex<Option<mpsc::UnboundedReceiver<FactSet>>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Running fact set with the `Empty → Accumulating → CompleteUnstable → Stable`
/// state machine.
///
/// Stable snapshots are delivered either to a callback registered with
/// [`on_stable`](Self::on_stable) or through the receiver returned by
/// [`stable_events`](Self::stable_events), one per stabilization episode.
#[derive(Clone)]
pub struct StabilityAggregator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for StabilityAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("StabilityAggregator")
            .field("phase", &state.phase)
            .field("facts", &state.facts.len())
            .field("episode", &state.episode)
            .finish()
    }
}

impl StabilityAggregator {
    pub fn new(session: Session, quiet: Duration, completeness: Completeness) -> Self {
        let (stable_tx, stable_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                session,
                quiet,
                completeness,
                state: Mutex::new(AggregatorState {
                    facts: FactSet::new(),
                    phase: StabilityPhase::Empty,
                    last_changed_at: None,
                    timer: None,
                    episode: 0,
                }),
                stable_tx,
                stable_rx: Mutex::new(Some(stable_rx)),
            }),
        }
    }

    /// Fold one pass worth of facts in. Only facts with a new identity change
    /// the phase or restart the quiet window.
    pub fn merge(&self, facts: impl IntoIterator<Item = Fact>) -> MergeReport {
        let shared = &self.shared;
        let mut state = shared.lock();
        let added = state.facts.merge_all(facts);
        if added == 0 || shared.session.is_ended() {
            return MergeReport {
                added,
                phase: state.phase,
            };
        }

        state.last_changed_at = Some(Instant::now());
        state.episode += 1;
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }

        if !shared.completeness.is_satisfied(&state.facts) {
            state.phase = StabilityPhase::Accumulating;
            return MergeReport {
                added,
                phase: state.phase,
            };
        }

        state.phase = StabilityPhase::CompleteUnstable;
        let episode = state.episode;
        let weak = Arc::downgrade(shared);
        let quiet = shared.quiet;
        state.timer = Some(shared.session.spawn(async move {
            tokio::time::sleep(quiet).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let snapshot = {
                let mut state = shared.lock();
                if state.episode != episode || state.phase != StabilityPhase::CompleteUnstable {
                    return;
                }
                if !shared.completeness.is_satisfied(&state.facts) {
                    return;
                }
                state.phase = StabilityPhase::Stable;
                state.timer = None;
                state.facts.clone()
            };
            debug!("fact set stable ({} facts, episode {})", snapshot.len(), episode);
            let _ = shared.stable_tx.send(snapshot);
        }));

        MergeReport {
            added,
            phase: StabilityPhase::CompleteUnstable,
        }
    }

    /// Clear the fact set and go back to `Empty`, dropping any pending window.
    pub fn reset(&self) {
        let mut state = self.shared.lock();
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        state.facts.clear();
        state.phase = StabilityPhase::Empty;
        state.last_changed_at = None;
        state.episode += 1;
    }

    /// Run `callback` for every stable snapshot, in order, on a session task.
    ///
    /// Takes over the event stream: only the first registration (or
    /// [`stable_events`](Self::stable_events) call) receives events.
    pub fn on_stable<F, Fut>(&self, mut callback: F) -> bool
    where
        F: FnMut(FactSet) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(mut events) = self.stable_events() else {
            return false;
        };
        // Detached; the session token stops it.
        let _task = self.shared.session.spawn(async move {
            while let Some(snapshot) = events.recv().await {
                callback(snapshot).await;
            }
        });
        true
    }

    pub fn stable_events(&self) -> Option<mpsc::UnboundedReceiver<FactSet>> {
        self.shared
            .stable_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub fn phase(&self) -> StabilityPhase {
        self.shared.lock().phase
    }

    pub fn snapshot(&self) -> FactSet {
        self.shared.lock().facts.clone()
    }

    pub fn last_changed_at(&self) -> Option<Instant> {
        self.shared.lock().last_changed_at
    }
}
