//! Notification scheduling for one scan session.
//!
//! Owns the table of live notifications (at most one per business key), the
//! loading/blocked queue, the coalescing guard and the auto-clear timers. Host
//! failures are retried with backoff and then logged; they never reach the
//! caller.

use backoff::ExponentialBackoffBuilder;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::host::{ClipboardError, ClipboardHost, NotificationHost, NotificationHostError, NotificationId};
use super::render::{Category, Notice};
use crate::core::config::{IconSettings, ScanSettings};
use crate::core::session::{Session, TimerHandle};

const COPY_ERROR_DISPLAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Minimum spacing between two dispatches in one session.
    pub guard: Duration,
    pub retry_attempts: u32,
    pub retry_initial: Duration,
    /// Categories exempt from auto-clear and clear-all.
    pub persistent: Vec<Category>,
    pub icons: IconSettings,
}

impl SchedulerSettings {
    pub fn from_scan(settings: &ScanSettings) -> Self {
        Self {
            guard: settings.timings.notify_guard,
            retry_attempts: settings.host_retry_attempts,
            retry_initial: settings.timings.host_retry_initial,
            persistent: settings.persistent_categories.clone(),
            icons: settings.icons.clone(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_scan(&ScanSettings::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "id", rename_all = "snake_case")]
pub enum NotifyOutcome {
    Created(NotificationId),
    Updated(NotificationId),
    /// Held until the loading/blocked gates open.
    Queued,
    /// Folded into a dispatch due when the guard interval ends.
    Coalesced,
    /// The host kept failing; logged.
    Failed,
    /// The session already ended.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClickOutcome {
    Copied { value: String },
    CopyFailed { reason: String },
    UnknownNotification,
    NoSuchButton,
}

/// Read-only view of a live notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordView {
    pub id: NotificationId,
    pub business_key: String,
    pub category: Category,
    pub title: String,
    pub timeout_ms: u64,
    pub persistent: bool,
    pub shown_ms: u64,
    pub since_update_ms: u64,
    pub notice: Notice,
}

struct NotificationRecord {
    id: NotificationId,
    notice: Notice,
    timeout: Duration,
    created_at: Instant,
    updated_at: Instant,
    timer: Option<TimerHandle>,
    generation: u64,
}

struct QueueEntry {
    notice: Notice,
    timeout: Duration,
    enqueued_at: Instant,
}

struct PendingDispatch {
    notice: Notice,
    timeout: Duration,
    requested_at: Instant,
}

#[derive(Default)]
struct SchedulerState {
    records: HashMap<String, NotificationRecord>,
    by_id: HashMap<NotificationId, String>,
    queue: VecDeque<QueueEntry>,
    /// Requests held back by the guard, one per business key, in arrival order.
    pending: Vec<PendingDispatch>,
    flush_timer: Option<TimerHandle>,
    last_dispatch: Option<Instant>,
    loading: bool,
    blocked: bool,
    generation: u64,
}

struct SchedulerInner {
    session: Session,
    host: Arc<dyn NotificationHost>,
    clipboard: Arc<dyn ClipboardHost>,
    settings: SchedulerSettings,
    state: Mutex<SchedulerState>,
}

#[derive(Clone)]
pub struct NotificationScheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for NotificationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationScheduler")
            .field("session", &self.inner.session.id())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

impl NotificationScheduler {
    pub fn new(
        session: Session,
        host: Arc<dyn NotificationHost>,
        clipboard: Arc<dyn ClipboardHost>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                session,
                host,
                clipboard,
                settings,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Show `notice`, or update the live notification with the same business key.
    ///
    /// A zero `timeout` keeps the notification until the user dismisses it.
    pub async fn notify(&self, notice: Notice, timeout: Duration) -> NotifyOutcome {
        let inner = &self.inner;
        if inner.session.is_ended() {
            return NotifyOutcome::Ignored;
        }
        let mut st = inner.state.lock().await;
        if st.loading || st.blocked {
            debug!(
                "queueing notice {} (loading={}, blocked={})",
                notice.business_key, st.loading, st.blocked
            );
            // A held-back request for the same key is older than this one.
            st.pending.retain(|p| p.notice.business_key != notice.business_key);
            st.queue.push_back(QueueEntry {
                notice,
                timeout,
                enqueued_at: Instant::now(),
            });
            return NotifyOutcome::Queued;
        }
        inner.admit(&mut st, notice, timeout).await
    }

    pub async fn set_loading_state(&self, is_loading: bool) {
        let mut st = self.inner.state.lock().await;
        st.loading = is_loading;
        if !st.loading && !st.blocked {
            self.inner.flush_queue(&mut st).await;
        }
    }

    pub async fn set_blocked(&self, blocked: bool) {
        let mut st = self.inner.state.lock().await;
        st.blocked = blocked;
        if !st.loading && !st.blocked {
            self.inner.flush_queue(&mut st).await;
        }
    }

    /// Clear every non-persistent notification and drop queued and pending
    /// requests. Returns how many notifications were cleared.
    pub async fn clear_all(&self) -> usize {
        let inner = &self.inner;
        let ids = {
            let mut st = inner.state.lock().await;
            if let Some(timer) = st.flush_timer.take() {
                timer.cancel();
            }
            st.pending.clear();
            st.queue.clear();

            let keys: Vec<String> = st
                .records
                .iter()
                .filter(|(_, r)| !inner.is_persistent(r.notice.category))
                .map(|(k, _)| k.clone())
                .collect();
            let mut ids = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(rec) = st.records.remove(&key) {
                    if let Some(timer) = &rec.timer {
                        timer.cancel();
                    }
                    st.by_id.remove(&rec.id);
                    ids.push(rec.id);
                }
            }
            ids
        };

        for id in &ids {
            if let Err(e) = inner.retrying("clear", || inner.host.clear(id)).await {
                error!("failed to clear notification {}: {}", id, e);
            }
        }
        ids.len()
    }

    /// The user dismissed `id`. Returns whether it was ours.
    pub async fn handle_closed(&self, id: &str) -> bool {
        let mut st = self.inner.state.lock().await;
        let Some(key) = st.by_id.remove(id) else {
            return false;
        };
        if let Some(rec) = st.records.remove(&key) {
            if let Some(timer) = &rec.timer {
                timer.cancel();
            }
        }
        debug!("notification {} closed by user", id);
        true
    }

    /// Copy the value behind button `index` of notification `id`.
    pub async fn handle_button_click(&self, id: &str, index: usize) -> ClickOutcome {
        let inner = &self.inner;
        let action = {
            let st = inner.state.lock().await;
            let Some(rec) = st.by_id.get(id).and_then(|k| st.records.get(k)) else {
                return ClickOutcome::UnknownNotification;
            };
            match rec.notice.actions.get(index) {
                Some(action) => action.clone(),
                None => return ClickOutcome::NoSuchButton,
            }
        };

        let failure = match inner.clipboard.write(&action.value).await {
            Ok(true) => {
                info!("copied {} to clipboard", action.label);
                return ClickOutcome::Copied {
                    value: action.value,
                };
            }
            Ok(false) => ClipboardError::Refused,
            Err(e) => e,
        };

        let reason = failure.to_string();
        warn!("copy of {} failed: {}", action.label, reason);
        inner.show_copy_error(&action.label, &reason).await;
        ClickOutcome::CopyFailed { reason }
    }

    pub async fn records(&self) -> Vec<RecordView> {
        let st = self.inner.state.lock().await;
        let mut views: Vec<RecordView> = st.records.values().map(|r| self.inner.view(r)).collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    pub async fn record_for(&self, business_key: &str) -> Option<RecordView> {
        let st = self.inner.state.lock().await;
        st.records.get(business_key).map(|r| self.inner.view(r))
    }

    pub async fn queued(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.state.lock().await.loading
    }

    pub async fn is_blocked(&self) -> bool {
        self.inner.state.lock().await.blocked
    }
}

/// Move guard-held requests to the front of the queue, keeping their arrival
/// order and time. A queued entry for the same key is newer and wins.
fn absorb_pending(st: &mut SchedulerState) {
    let pending = std::mem::take(&mut st.pending);
    for p in pending.into_iter().rev() {
        if st.queue.iter().any(|q| q.notice.business_key == p.notice.business_key) {
            continue;
        }
        st.queue.push_front(QueueEntry {
            notice: p.notice,
            timeout: p.timeout,
            enqueued_at: p.requested_at,
        });
    }
}

impl SchedulerInner {
    fn is_persistent(&self, category: Category) -> bool {
        self.settings.persistent.contains(&category)
    }

    fn view(&self, rec: &NotificationRecord) -> RecordView {
        RecordView {
            id: rec.id.clone(),
            business_key: rec.notice.business_key.clone(),
            category: rec.notice.category,
            title: rec.notice.title.clone(),
            timeout_ms: rec.timeout.as_millis() as u64,
            persistent: self.is_persistent(rec.notice.category),
            shown_ms: rec.created_at.elapsed().as_millis() as u64,
            since_update_ms: rec.updated_at.elapsed().as_millis() as u64,
            notice: rec.notice.clone(),
        }
    }

    /// Dispatch now, or hold the request until the guard interval has passed.
    async fn admit(self: &Arc<Self>, st: &mut SchedulerState, notice: Notice, timeout: Duration) -> NotifyOutcome {
        let now = Instant::now();
        let guard_until = st.last_dispatch.map(|t| t + self.settings.guard);
        let guarded = guard_until.is_some_and(|g| now < g);

        if !guarded && st.pending.is_empty() {
            return self.dispatch(st, notice, timeout).await;
        }

        match st
            .pending
            .iter_mut()
            .find(|p| p.notice.business_key == notice.business_key)
        {
            Some(slot) => {
                slot.notice = notice;
                slot.timeout = timeout;
            }
            None => st.pending.push(PendingDispatch {
                notice,
                timeout,
                requested_at: now,
            }),
        }

        if st.flush_timer.is_none() {
            let at = guard_until.unwrap_or(now);
            let inner = Arc::clone(self);
            st.flush_timer = Some(self.session.spawn(async move {
                if inner.session.sleep_until(at).await.is_err() {
                    return;
                }
                let mut st = inner.state.lock().await;
                st.flush_timer = None;
                if st.loading || st.blocked {
                    absorb_pending(&mut st);
                    return;
                }
                let pending = std::mem::take(&mut st.pending);
                for p in pending {
                    inner.dispatch(&mut st, p.notice, p.timeout).await;
                }
            }));
        }
        NotifyOutcome::Coalesced
    }

    /// Deliver queued entries in enqueue order, skipping those whose display
    /// time already ran out.
    async fn flush_queue(self: &Arc<Self>, st: &mut SchedulerState) {
        if st.queue.is_empty() {
            return;
        }
        if let Some(timer) = st.flush_timer.take() {
            timer.cancel();
        }
        absorb_pending(st);
        let now = Instant::now();
        let entries: Vec<QueueEntry> = st.queue.drain(..).collect();
        info!("flushing {} queued notice(s)", entries.len());
        for entry in entries {
            let timeout = if entry.timeout.is_zero() {
                Duration::ZERO
            } else {
                let waited = now.saturating_duration_since(entry.enqueued_at);
                if waited >= entry.timeout {
                    debug!(
                        "dropping stale notice {} (queued {:?} ago)",
                        entry.notice.business_key, waited
                    );
                    continue;
                }
                entry.timeout - waited
            };
            self.dispatch(st, entry.notice, timeout).await;
        }
    }

    async fn dispatch(self: &Arc<Self>, st: &mut SchedulerState, notice: Notice, timeout: Duration) -> NotifyOutcome {
        let now = Instant::now();
        st.last_dispatch = Some(now);
        let key = notice.business_key.clone();
        let spec = notice.spec(timeout.is_zero());

        if let Some(id) = st.records.get(&key).map(|r| r.id.clone()) {
            match self.retrying("update", || self.host.update(&id, &spec)).await {
                Ok(true) => {
                    if let Some(rec) = st.records.get_mut(&key) {
                        rec.notice = notice;
                        rec.timeout = timeout;
                        rec.updated_at = now;
                    }
                    self.arm(st, &key);
                    debug!("notification {} updated for {}", id, key);
                    return NotifyOutcome::Updated(id);
                }
                Ok(false) => {
                    debug!("host no longer shows {}; creating a fresh one", id);
                    if let Some(rec) = st.records.remove(&key) {
                        if let Some(timer) = &rec.timer {
                            timer.cancel();
                        }
                    }
                    st.by_id.remove(&id);
                }
                Err(e) => {
                    error!("giving up on updating notification {}: {}", id, e);
                    return NotifyOutcome::Failed;
                }
            }
        }

        match self.retrying("create", || self.host.create(&spec)).await {
            Ok(id) => {
                st.by_id.insert(id.clone(), key.clone());
                st.records.insert(
                    key.clone(),
                    NotificationRecord {
                        id: id.clone(),
                        notice,
                        timeout,
                        created_at: now,
                        updated_at: now,
                        timer: None,
                        generation: 0,
                    },
                );
                self.arm(st, &key);
                NotifyOutcome::Created(id)
            }
            Err(e) => {
                error!("giving up on showing notice {}: {}", key, e);
                NotifyOutcome::Failed
            }
        }
    }

    /// (Re)start the auto-clear timer of the record under `key`.
    fn arm(self: &Arc<Self>, st: &mut SchedulerState, key: &str) {
        st.generation += 1;
        let generation = st.generation;
        let Some(rec) = st.records.get_mut(key) else {
            return;
        };
        if let Some(timer) = rec.timer.take() {
            timer.cancel();
        }
        rec.generation = generation;
        if rec.timeout.is_zero() || self.is_persistent(rec.notice.category) {
            return;
        }

        let inner = Arc::clone(self);
        let key = key.to_string();
        let timeout = rec.timeout;
        rec.timer = Some(self.session.spawn(async move {
            if inner.session.sleep(timeout).await.is_err() {
                return;
            }
            let id = {
                let mut st = inner.state.lock().await;
                let current = st.records.get(&key).map(|r| r.generation);
                if current != Some(generation) {
                    return;
                }
                let Some(rec) = st.records.remove(&key) else {
                    return;
                };
                st.by_id.remove(&rec.id);
                rec.id
            };
            debug!("auto-clearing notification {} ({})", id, key);
            if let Err(e) = inner.retrying("clear", || inner.host.clear(&id)).await {
                error!("failed to auto-clear notification {}: {}", id, e);
            }
        }));
    }

    async fn show_copy_error(self: &Arc<Self>, label: &str, reason: &str) {
        let notice = Notice::copy_failed(label, reason, &self.settings.icons);
        let spec = notice.spec(false);
        let id = match self.retrying("create", || self.host.create(&spec)).await {
            Ok(id) => id,
            Err(e) => {
                error!("could not report clipboard failure: {}", e);
                return;
            }
        };
        let inner = Arc::clone(self);
        let _timer = self.session.spawn(async move {
            if inner.session.sleep(COPY_ERROR_DISPLAY).await.is_err() {
                return;
            }
            if let Err(e) = inner.retrying("clear", || inner.host.clear(&id)).await {
                error!("failed to clear clipboard failure notice {}: {}", id, e);
            }
        });
    }

    /// Run a host call, retrying transient failures with exponential backoff
    /// for at most `retry_attempts` attempts.
    async fn retrying<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, NotificationHostError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, NotificationHostError>>,
    {
        let max = self.settings.retry_attempts.max(1);
        let mut attempt = 0u32;
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.settings.retry_initial)
            .with_max_interval(Duration::from_secs(2))
            .with_max_elapsed_time(Some(Duration::from_secs(10)))
            .build();

        backoff::future::retry(policy, || {
            attempt += 1;
            let current = attempt;
            let fut = call();
            async move {
                fut.await.map_err(|e| {
                    if current >= max {
                        backoff::Error::permanent(e)
                    } else {
                        warn!("notification host {} failed (attempt {}/{}): {}", op, current, max, e);
                        backoff::Error::transient(e)
                    }
                })
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Fact, FactSet};
    use crate::notify::host::{MemoryClipboard, MemoryHost};
    use crate::notify::render::CopyAction;

    fn notice(key: &str, title: &str, category: Category) -> Notice {
        Notice {
            category,
            business_key: key.into(),
            facts: FactSet::new(),
            title: title.into(),
            icon: "img/128.png".into(),
            items: vec![],
            actions: vec![],
        }
    }

    fn scheduler(host: Arc<MemoryHost>) -> NotificationScheduler {
        NotificationScheduler::new(
            Session::new(),
            host,
            Arc::new(MemoryClipboard::new()),
            SchedulerSettings {
                retry_initial: Duration::from_millis(10),
                ..SchedulerSettings::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn auto_clear_removes_record_and_notification() {
        let host = Arc::new(MemoryHost::new());
        let sched = scheduler(host.clone());

        let outcome = sched
            .notify(notice("k", "t", Category::Ticket), Duration::from_secs(2))
            .await;
        assert!(matches!(outcome, NotifyOutcome::Created(_)));

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(sched.records().await.is_empty());
        assert!(host.live().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_category_survives_timeout_and_clear_all() {
        let host = Arc::new(MemoryHost::new());
        let sched = scheduler(host.clone());

        sched
            .notify(notice("testing:1", "t", Category::Testing), Duration::from_secs(1))
            .await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        sched
            .notify(notice("k", "t", Category::Ticket), Duration::from_secs(60))
            .await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sched.records().await.len(), 2);

        assert_eq!(sched.clear_all().await, 1);
        let left = sched.records().await;
        assert_eq!(left.len(), 1);
        assert!(left[0].persistent);
        assert_eq!(host.live().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn host_failures_are_retried_then_swallowed() {
        let host = Arc::new(MemoryHost::new());
        let sched = scheduler(host.clone());

        host.fail_next(2);
        let outcome = sched
            .notify(notice("k", "t", Category::Ticket), Duration::from_secs(5))
            .await;
        assert!(matches!(outcome, NotifyOutcome::Created(_)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        host.fail_next(3);
        let outcome = sched
            .notify(notice("other", "t", Category::Ticket), Duration::from_secs(5))
            .await;
        assert_eq!(outcome, NotifyOutcome::Failed);
        assert_eq!(sched.records().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn user_dismissal_forgets_record() {
        let host = Arc::new(MemoryHost::new());
        let sched = scheduler(host.clone());
        let NotifyOutcome::Created(id) = sched
            .notify(notice("k", "t", Category::Ticket), Duration::ZERO)
            .await
        else {
            panic!("expected a create");
        };
        assert!(host.spec(&id).unwrap().require_interaction);

        assert!(sched.handle_closed(&id).await);
        assert!(!sched.handle_closed(&id).await);
        assert!(sched.record_for("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn update_of_vanished_notification_recreates_it() {
        let host = Arc::new(MemoryHost::new());
        let sched = scheduler(host.clone());
        let NotifyOutcome::Created(first) = sched
            .notify(notice("k", "a", Category::Ticket), Duration::from_secs(30))
            .await
        else {
            panic!("expected a create");
        };
        host.dismiss(&first);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let outcome = sched
            .notify(notice("k", "b", Category::Ticket), Duration::from_secs(30))
            .await;
        let NotifyOutcome::Created(second) = outcome else {
            panic!("expected a fresh create, got {outcome:?}");
        };
        assert_ne!(first, second);
        assert_eq!(sched.records().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn copy_button_writes_value() {
        let host = Arc::new(MemoryHost::new());
        let clipboard = Arc::new(MemoryClipboard::new());
        let sched = NotificationScheduler::new(
            Session::new(),
            host.clone(),
            clipboard.clone(),
            SchedulerSettings::default(),
        );
        let mut n = notice("k", "t", Category::Ticket);
        n.facts = std::iter::once(Fact::DriverLicense { number: "AB1".into() }).collect();
        n.actions = vec![CopyAction {
            label: "Номер ВУ".into(),
            value: "AB1".into(),
        }];
        let NotifyOutcome::Created(id) = sched.notify(n, Duration::from_secs(30)).await else {
            panic!("expected a create");
        };

        assert_eq!(
            sched.handle_button_click(&id, 0).await,
            ClickOutcome::Copied { value: "AB1".into() }
        );
        assert_eq!(sched.handle_button_click(&id, 1).await, ClickOutcome::NoSuchButton);
        assert_eq!(
            sched.handle_button_click("missing", 0).await,
            ClickOutcome::UnknownNotification
        );
        assert_eq!(clipboard.last().as_deref(), Some("AB1"));

        clipboard.set_unsupported(true);
        let outcome = sched.handle_button_click(&id, 0).await;
        assert!(matches!(outcome, ClickOutcome::CopyFailed { .. }));
        // the error notice is separate from the tracked record
        assert_eq!(host.creates(), 2);
        assert_eq!(sched.records().await.len(), 1);

        // it clears itself, retrying a failing host
        host.fail_next(1);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(host.live().len(), 1);
        assert_eq!(sched.records().await.len(), 1);
    }
}
