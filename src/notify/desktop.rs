//! Notification host backed by the desktop notification daemon.

use async_trait::async_trait;
use notify_rust::{Notification, NotificationHandle, Timeout};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

use super::host::{HostEvent, HostEvents, NotificationHost, NotificationHostError, NotificationId, NotificationSpec};

const CLOSED_ACTION: &str = "__closed";

/// Shows notifications through `notify-rust`. Expiry is left to the scheduler,
/// so every notification is shown without a daemon-side timeout.
///
/// Each notification gets a blocking listener that forwards the daemon's
/// action and close signals as [`HostEvent`]s.
#[derive(Clone, Default)]
pub struct DesktopHost {
    app_name: String,
    handles: Arc<Mutex<HashMap<NotificationId, NotificationHandle>>>,
    next_id: Arc<AtomicU64>,
    events: Arc<HostEvents>,
}

impl std::fmt::Debug for DesktopHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DesktopHost")
            .field("app_name", &self.app_name)
            .finish()
    }
}

impl DesktopHost {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    fn fill(&self, n: &mut Notification, spec: &NotificationSpec) {
        n.appname(&self.app_name)
            .summary(&spec.title)
            .body(&spec.body())
            .icon(&spec.icon)
            .timeout(Timeout::Never);
        for (index, button) in spec.buttons.iter().enumerate() {
            n.action(&index.to_string(), &button.title);
        }
    }

    fn take(&self, id: &str) -> Option<NotificationHandle> {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }

    fn put(&self, id: NotificationId, handle: NotificationHandle) {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, handle);
    }
}

/// Map a daemon action key to an event. `default` (body click) is ignored.
fn action_event(id: &str, action: &str) -> Option<HostEvent> {
    if action == CLOSED_ACTION {
        return Some(HostEvent::Closed { id: id.to_string() });
    }
    action.parse().ok().map(|index| HostEvent::ButtonClicked {
        id: id.to_string(),
        index,
    })
}

fn join_error(e: tokio::task::JoinError) -> NotificationHostError {
    NotificationHostError::Unavailable(format!("notification worker failed: {e}"))
}

#[async_trait]
impl NotificationHost for DesktopHost {
    async fn create(&self, spec: &NotificationSpec) -> Result<NotificationId, NotificationHostError> {
        let mut n = Notification::new();
        self.fill(&mut n, spec);
        // The listener consumes its handle, so it gets a second one for the same
        // daemon id and the first stays here for update and close.
        let (handle, listener) = tokio::task::spawn_blocking(move || {
            let handle = n.show()?;
            let mut twin = n.clone();
            twin.id(handle.id());
            let listener = twin.show()?;
            Ok::<_, notify_rust::error::Error>((handle, listener))
        })
        .await
        .map_err(join_error)?
        .map_err(|e| NotificationHostError::Rejected(e.to_string()))?;

        let id = format!("d{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        debug!("desktop notification {} (daemon id {})", id, handle.id());
        self.put(id.clone(), handle);

        let events = self.events.clone();
        let listened = id.clone();
        tokio::task::spawn_blocking(move || {
            listener.wait_for_action(|action| match action_event(&listened, action) {
                Some(event) => events.emit(event),
                None => debug!("ignoring action {:?} on {}", action, listened),
            });
        });
        Ok(id)
    }

    async fn update(&self, id: &str, spec: &NotificationSpec) -> Result<bool, NotificationHostError> {
        let Some(mut handle) = self.take(id) else {
            return Ok(false);
        };
        self.fill(&mut handle, spec);
        let handle = tokio::task::spawn_blocking(move || {
            handle.update();
            handle
        })
        .await
        .map_err(join_error)?;
        self.put(id.to_string(), handle);
        Ok(true)
    }

    async fn clear(&self, id: &str) -> Result<bool, NotificationHostError> {
        let Some(handle) = self.take(id) else {
            return Ok(false);
        };
        tokio::task::spawn_blocking(move || handle.close())
            .await
            .map_err(join_error)?;
        Ok(true)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<HostEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_actions_map_to_events() {
        assert_eq!(
            action_event("d1", "1"),
            Some(HostEvent::ButtonClicked {
                id: "d1".into(),
                index: 1
            })
        );
        assert_eq!(
            action_event("d1", "__closed"),
            Some(HostEvent::Closed { id: "d1".into() })
        );
        assert_eq!(action_event("d1", "default"), None);
    }
}
