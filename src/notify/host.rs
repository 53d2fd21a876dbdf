//! Contracts for the external notification and clipboard hosts, plus in-memory
//! hosts that record every call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub type NotificationId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationItem {
    pub title: String,
    pub message: String,
}

impl NotificationItem {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationButton {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSpec {
    pub icon: String,
    pub title: String,
    pub items: Vec<NotificationItem>,
    pub buttons: Vec<NotificationButton>,
    #[serde(default)]
    pub require_interaction: bool,
}

impl NotificationSpec {
    /// Single-line body used by hosts that cannot render item lists.
    pub fn body(&self) -> String {
        self.items
            .iter()
            .map(|i| {
                if i.title.is_empty() {
                    i.message.clone()
                } else {
                    format!("{} {}", i.title, i.message)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotificationHostError {
    #[error("notification host rejected the request: {0}")]
    Rejected(String),
    #[error("notification host unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("no clipboard-capable target: {0}")]
    Unsupported(String),
    #[error("clipboard write was refused")]
    Refused,
    #[error("clipboard i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// User interaction reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    ButtonClicked { id: NotificationId, index: usize },
    Closed { id: NotificationId },
}

/// Fan-out of host events to every live subscriber.
#[derive(Debug, Default)]
pub struct HostEvents {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<HostEvent>>>,
}

impl HostEvents {
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<HostEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    pub fn emit(&self, event: HostEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        if subscribers.is_empty() {
            debug!("host event {:?} had no subscriber", event);
        }
    }
}

#[async_trait]
pub trait NotificationHost: Send + Sync {
    async fn create(&self, spec: &NotificationSpec) -> Result<NotificationId, NotificationHostError>;

    /// `Ok(false)` when the host no longer knows `id`.
    async fn update(&self, id: &str, spec: &NotificationSpec) -> Result<bool, NotificationHostError>;

    async fn clear(&self, id: &str) -> Result<bool, NotificationHostError>;

    /// New subscription to button clicks and user dismissals.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<HostEvent>;
}

#[async_trait]
pub trait ClipboardHost: Send + Sync {
    async fn write(&self, text: &str) -> Result<bool, ClipboardError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Create { id: NotificationId, spec: NotificationSpec },
    Update { id: NotificationId, spec: NotificationSpec },
    Clear { id: NotificationId },
}

#[derive(Default)]
struct MemoryState {
    calls: Vec<HostCall>,
    live: HashMap<NotificationId, NotificationSpec>,
}

/// Notification host kept in memory. Used headless and in tests.
#[derive(Default)]
pub struct MemoryHost {
    state: Mutex<MemoryState>,
    next_id: AtomicU64,
    failures: AtomicU32,
    events: HostEvents,
}

impl std::fmt::Debug for MemoryHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryHost")
            .field("calls", &state.calls.len())
            .field("live", &state.live.len())
            .finish()
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `n` host calls fail.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn injected_failure(&self) -> Result<(), NotificationHostError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(());
        }
        self.failures.store(remaining - 1, Ordering::SeqCst);
        Err(NotificationHostError::Unavailable("injected failure".into()))
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.lock().calls.clone()
    }

    pub fn creates(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, HostCall::Create { .. }))
            .count()
    }

    pub fn updates(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, HostCall::Update { .. }))
            .count()
    }

    pub fn live(&self) -> HashMap<NotificationId, NotificationSpec> {
        self.lock().live.clone()
    }

    pub fn spec(&self, id: &str) -> Option<NotificationSpec> {
        self.lock().live.get(id).cloned()
    }

    /// Forget a notification as if the user dismissed it outside our control.
    pub fn dismiss(&self, id: &str) -> bool {
        self.lock().live.remove(id).is_some()
    }

    /// Simulate the user pressing button `index` of `id`.
    pub fn press(&self, id: &str, index: usize) {
        self.events.emit(HostEvent::ButtonClicked {
            id: id.to_string(),
            index,
        });
    }

    /// Simulate the user closing `id`.
    pub fn close(&self, id: &str) -> bool {
        let removed = self.dismiss(id);
        self.events.emit(HostEvent::Closed { id: id.to_string() });
        removed
    }
}

#[async_trait]
impl NotificationHost for MemoryHost {
    async fn create(&self, spec: &NotificationSpec) -> Result<NotificationId, NotificationHostError> {
        self.injected_failure()?;
        let id = format!("n{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut state = self.lock();
        state.live.insert(id.clone(), spec.clone());
        state.calls.push(HostCall::Create {
            id: id.clone(),
            spec: spec.clone(),
        });
        info!("notification {} shown: {}", id, spec.title);
        Ok(id)
    }

    async fn update(&self, id: &str, spec: &NotificationSpec) -> Result<bool, NotificationHostError> {
        self.injected_failure()?;
        let mut state = self.lock();
        let Some(slot) = state.live.get_mut(id) else {
            return Ok(false);
        };
        *slot = spec.clone();
        state.calls.push(HostCall::Update {
            id: id.to_string(),
            spec: spec.clone(),
        });
        Ok(true)
    }

    async fn clear(&self, id: &str) -> Result<bool, NotificationHostError> {
        self.injected_failure()?;
        let mut state = self.lock();
        let removed = state.live.remove(id).is_some();
        state.calls.push(HostCall::Clear { id: id.to_string() });
        Ok(removed)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<HostEvent> {
        self.events.subscribe()
    }
}

/// Clipboard kept in memory.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    writes: Mutex<Vec<String>>,
    unsupported: std::sync::atomic::AtomicBool,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a focused tab that cannot take clipboard writes.
    pub fn set_unsupported(&self, unsupported: bool) {
        self.unsupported.store(unsupported, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last(&self) -> Option<String> {
        self.writes().pop()
    }
}

#[async_trait]
impl ClipboardHost for MemoryClipboard {
    async fn write(&self, text: &str) -> Result<bool, ClipboardError> {
        if self.unsupported.load(Ordering::SeqCst) {
            return Err(ClipboardError::Unsupported("focused tab has no clipboard access".into()));
        }
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(title: &str) -> NotificationSpec {
        NotificationSpec {
            icon: "img/128.png".into(),
            title: title.into(),
            items: vec![NotificationItem::new("Страна:", "Россия")],
            buttons: vec![],
            require_interaction: false,
        }
    }

    #[tokio::test]
    async fn memory_host_tracks_live_notifications() {
        let host = MemoryHost::new();
        let id = host.create(&spec("a")).await.unwrap();
        assert!(host.update(&id, &spec("b")).await.unwrap());
        assert_eq!(host.spec(&id).unwrap().title, "b");

        assert!(host.dismiss(&id));
        assert!(!host.update(&id, &spec("c")).await.unwrap());
        assert!(!host.clear(&id).await.unwrap());
        assert_eq!(host.creates(), 1);
        assert_eq!(host.updates(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let host = MemoryHost::new();
        host.fail_next(2);
        assert!(host.create(&spec("a")).await.is_err());
        assert!(host.create(&spec("a")).await.is_err());
        assert!(host.create(&spec("a")).await.is_ok());
    }

    #[tokio::test]
    async fn user_actions_reach_every_subscriber() {
        let host = MemoryHost::new();
        let mut first = host.subscribe();
        let mut second = host.subscribe();
        let id = host.create(&spec("a")).await.unwrap();

        host.press(&id, 1);
        assert!(host.close(&id));
        for rx in [&mut first, &mut second] {
            assert_eq!(
                rx.recv().await,
                Some(HostEvent::ButtonClicked {
                    id: id.clone(),
                    index: 1
                })
            );
            assert_eq!(rx.recv().await, Some(HostEvent::Closed { id: id.clone() }));
        }
        assert!(host.live().is_empty());

        drop(second);
        host.press(&id, 0);
        assert!(first.recv().await.is_some());
    }

    #[test]
    fn body_joins_items() {
        assert_eq!(spec("x").body(), "Страна: Россия");
    }
}
