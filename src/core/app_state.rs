use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::browser::{BrowserPool, CdpTab, CdpTabHost};
use crate::core::config::{ScanSettings, SentinelConfig};
use crate::dom::HtmlSnapshotDom;
use crate::notify::{ClickOutcome, ClipboardHost, HostEvent, NotificationHost};
use crate::pipeline::ScanSession;
use crate::search::{BackgroundTab, ButtonSearch, SearchSettings, TabError, TabHost, TestingSearch};

/// The page a scan session watches.
#[derive(Debug, Clone)]
pub enum SessionPage {
    /// Fed with snapshots and mutation batches over HTTP.
    Snapshot(Arc<HtmlSnapshotDom>),
    /// A browser tab observed directly.
    Live(Arc<CdpTab>),
}

impl SessionPage {
    pub fn snapshot(&self) -> Option<&Arc<HtmlSnapshotDom>> {
        match self {
            SessionPage::Snapshot(dom) => Some(dom),
            SessionPage::Live(_) => None,
        }
    }

    pub async fn close(&self) {
        match self {
            SessionPage::Snapshot(dom) => dom.close(),
            SessionPage::Live(tab) => {
                if let Err(e) = tab.close().await {
                    warn!("failed to close watched tab: {}", e);
                }
            }
        }
    }
}

/// A live scan session together with the page it watches.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub scan: Arc<ScanSession>,
    pub page: SessionPage,
}

#[derive(Clone)]
pub struct AppState {
    /// File-based config loaded from `dom-sentinel.json` (env-var fallback for all fields).
    pub config: Arc<SentinelConfig>,
    pub settings: ScanSettings,
    pub search_settings: SearchSettings,
    pub notifications: Arc<dyn NotificationHost>,
    pub clipboard: Arc<dyn ClipboardHost>,
    // Background tabs for the search flows; absent without a browser.
    pub tabs: Option<Arc<dyn TabHost>>,
    pub browser_pool: Option<Arc<BrowserPool>>,
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("tabs_enabled", &self.tabs.is_some())
            .field("browser_pool_enabled", &self.browser_pool.is_some())
            .finish()
    }
}

impl AppState {
    pub fn new(
        config: SentinelConfig,
        notifications: Arc<dyn NotificationHost>,
        clipboard: Arc<dyn ClipboardHost>,
    ) -> Self {
        Self {
            settings: ScanSettings::from_config(&config),
            search_settings: SearchSettings::from_config(&config.search),
            config: Arc::new(config),
            notifications,
            clipboard,
            tabs: None,
            browser_pool: None,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_tabs(mut self, tabs: Arc<dyn TabHost>) -> Self {
        self.tabs = Some(tabs);
        self
    }

    /// Open a browser tab on `url` to be watched by a scan session. `None`
    /// without a browser.
    pub async fn open_live_tab(&self, url: &str) -> Option<Result<CdpTab, TabError>> {
        let pool = self.browser_pool.clone()?;
        Some(CdpTabHost::new(pool).open_page(url).await)
    }

    /// Use `pool` for background tabs.
    pub fn with_browser_pool(mut self, pool: Arc<BrowserPool>) -> Self {
        self.tabs = Some(Arc::new(CdpTabHost::new(pool.clone())));
        self.browser_pool = Some(pool);
        self
    }

    pub fn button_search(&self) -> Option<ButtonSearch> {
        self.tabs.as_ref().map(|tabs| {
            ButtonSearch::new(tabs.clone(), self.search_settings.clone(), self.settings.icons.clone())
        })
    }

    pub fn testing_search(&self) -> Option<TestingSearch> {
        self.tabs.as_ref().map(|tabs| {
            TestingSearch::new(tabs.clone(), self.search_settings.clone(), self.settings.icons.clone())
        })
    }

    pub async fn insert_session(&self, entry: SessionEntry) {
        self.sessions.write().await.insert(entry.scan.id(), entry);
    }

    pub async fn session(&self, id: Uuid) -> Option<SessionEntry> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn remove_session(&self, id: Uuid) -> Option<SessionEntry> {
        self.sessions.write().await.remove(&id)
    }

    pub async fn session_ids(&self) -> Vec<Uuid> {
        self.sessions.read().await.keys().copied().collect()
    }

    /// Forward host events to the sessions owning the notifications.
    pub fn spawn_host_events(&self) -> JoinHandle<()> {
        let mut events = self.notifications.subscribe();
        let state = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !state.route_host_event(&event).await {
                    debug!("no session owns {:?}", event);
                }
            }
            debug!("notification host event stream closed");
        })
    }

    /// Hand `event` to the session whose scheduler owns the notification.
    pub async fn route_host_event(&self, event: &HostEvent) -> bool {
        let scans: Vec<Arc<ScanSession>> = self
            .sessions
            .read()
            .await
            .values()
            .map(|e| e.scan.clone())
            .collect();
        for scan in scans {
            let scheduler = scan.scheduler();
            match event {
                HostEvent::ButtonClicked { id, index } => {
                    match scheduler.handle_button_click(id, *index).await {
                        ClickOutcome::UnknownNotification => continue,
                        outcome => {
                            debug!("session {}: button {} of {}: {:?}", scan.id(), index, id, outcome);
                            return true;
                        }
                    }
                }
                HostEvent::Closed { id } => {
                    if scheduler.handle_closed(id).await {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// End and forget every session. Returns how many there were.
    pub async fn end_all(&self) -> usize {
        let entries: Vec<SessionEntry> = self.sessions.write().await.drain().map(|(_, e)| e).collect();
        for entry in &entries {
            entry.scan.end().await;
            entry.page.close().await;
        }
        entries.len()
    }
}
