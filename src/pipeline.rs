//! Wiring of one watched page: mutations trigger extraction passes, passes feed
//! the stability aggregator, stable fact sets become notifications.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::config::ScanSettings;
use crate::core::session::Session;
use crate::core::types::FactSet;
use crate::dom::DomHost;
use crate::extract::ExtractorSet;
use crate::notify::{ClipboardHost, NotificationHost, NotificationScheduler, Notice, SchedulerSettings};
use crate::watch::{MergeReport, MutationFilter, MutationWatcher, StabilityAggregator, StabilityPhase};

/// Lifecycle events of the watched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSignal {
    LoadingStarted,
    LoadingComplete,
    /// Same tab, different page: facts start over.
    Navigated,
    /// Tab closed.
    Ended,
}

pub struct ScanSession {
    session: Session,
    settings: ScanSettings,
    dom: Arc<dyn DomHost>,
    extractors: Arc<ExtractorSet>,
    aggregator: StabilityAggregator,
    scheduler: NotificationScheduler,
    watcher: MutationWatcher,
    /// Held from reading the page until the merge, so passes merge one at a time.
    pass_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("id", &self.session.id())
            .field("ended", &self.session.is_ended())
            .field("aggregator", &self.aggregator)
            .finish()
    }
}

async fn run_pass(
    lock: &Mutex<()>,
    dom: &dyn DomHost,
    extractors: &ExtractorSet,
    aggregator: &StabilityAggregator,
) -> MergeReport {
    let _pass = lock.lock().await;
    let anchors = dom.anchors().await;
    let facts = extractors.scan(&anchors);
    let report = aggregator.merge(facts);
    debug!(
        "extraction pass: {} anchors, {} new facts, phase {:?}",
        anchors.len(),
        report.added,
        report.phase
    );
    report
}

impl ScanSession {
    /// Start watching `dom`. Runs one extraction pass right away.
    pub async fn start(
        dom: Arc<dyn DomHost>,
        host: Arc<dyn NotificationHost>,
        clipboard: Arc<dyn ClipboardHost>,
        settings: ScanSettings,
    ) -> Self {
        let session = Session::new();
        info!("scan session {} started", session.id());

        let extractors = Arc::new(ExtractorSet::standard(&settings.ticket_link_base));
        let aggregator = StabilityAggregator::new(
            session.clone(),
            settings.timings.stability_quiet,
            settings.snapshot.completeness(),
        );
        let scheduler = NotificationScheduler::new(
            session.clone(),
            host,
            clipboard,
            SchedulerSettings::from_scan(&settings),
        );
        scheduler.set_blocked(settings.snapshot.blocked).await;

        let timeout = settings.snapshot.notification_timeout();
        let icons = settings.icons.clone();
        let notifier = scheduler.clone();
        aggregator.on_stable(move |facts| {
            let notifier = notifier.clone();
            let notice = Notice::for_ticket(&facts, &icons);
            async move {
                if let Some(notice) = notice {
                    notifier.notify(notice, timeout).await;
                }
            }
        });

        let pass_lock = Arc::new(Mutex::new(()));
        let watcher = {
            let lock = pass_lock.clone();
            let dom = dom.clone();
            let extractors = extractors.clone();
            let aggregator = aggregator.clone();
            MutationWatcher::observe(
                &session,
                dom.clone(),
                MutationFilter::new(settings.self_injection_class.clone()),
                settings.timings.mutation_quiet,
                move || {
                    let lock = lock.clone();
                    let dom = dom.clone();
                    let extractors = extractors.clone();
                    let aggregator = aggregator.clone();
                    async move {
                        run_pass(&lock, dom.as_ref(), &extractors, &aggregator).await;
                    }
                },
            )
        };

        let scan = Self {
            session,
            settings,
            dom,
            extractors,
            aggregator,
            scheduler,
            watcher,
            pass_lock,
        };
        scan.rescan().await;
        scan
    }

    pub fn id(&self) -> Uuid {
        self.session.id()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn dom(&self) -> &Arc<dyn DomHost> {
        &self.dom
    }

    pub fn scheduler(&self) -> &NotificationScheduler {
        &self.scheduler
    }

    pub fn facts(&self) -> FactSet {
        self.aggregator.snapshot()
    }

    pub fn phase(&self) -> StabilityPhase {
        self.aggregator.phase()
    }

    /// Run an extraction pass outside the mutation cycle.
    ///
    /// Waits for a pass already in flight and merges after it.
    pub async fn rescan(&self) -> MergeReport {
        run_pass(&self.pass_lock, self.dom.as_ref(), &self.extractors, &self.aggregator).await
    }

    pub async fn signal(&self, signal: SessionSignal) {
        if self.session.is_ended() {
            return;
        }
        debug!("session {}: {:?}", self.session.id(), signal);
        match signal {
            SessionSignal::LoadingStarted => self.scheduler.set_loading_state(true).await,
            SessionSignal::LoadingComplete => self.scheduler.set_loading_state(false).await,
            SessionSignal::Navigated => {
                {
                    // An in-flight pass read the old page; let it land before the reset.
                    let _pass = self.pass_lock.lock().await;
                    self.aggregator.reset();
                }
                self.rescan().await;
            }
            SessionSignal::Ended => self.end().await,
        }
    }

    /// Clear this session's notifications and cancel every outstanding timer.
    pub async fn end(&self) {
        if self.session.is_ended() {
            return;
        }
        let cleared = self.scheduler.clear_all().await;
        self.watcher.stop();
        self.session.end();
        info!(
            "scan session {} finished ({} notification(s) cleared)",
            self.session.id(),
            cleared
        );
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.session.end();
    }
}
