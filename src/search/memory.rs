//! In-process tab host serving pre-registered HTML snapshots.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::{BackgroundTab, TabError, TabHost};
use crate::dom::{Anchor, DomHost, HtmlSnapshotDom, MutationRecord};

#[derive(Clone)]
struct Page {
    dom: Arc<HtmlSnapshotDom>,
    after_submit: Option<String>,
}

#[derive(Debug, Default)]
struct TabLog {
    opened: Vec<String>,
    closed: usize,
    submissions: Vec<(String, String)>,
}

/// Opens tabs onto registered [`HtmlSnapshotDom`] pages. Every tab opened on a
/// URL shares that URL's document, so a caller holding the `Arc` can keep
/// changing it while a search is running.
#[derive(Default)]
pub struct SnapshotTabHost {
    pages: Mutex<HashMap<String, Page>>,
    log: Arc<Mutex<TabLog>>,
}

impl std::fmt::Debug for SnapshotTabHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotTabHost")
            .field("pages", &self.lock_pages().len())
            .finish()
    }
}

impl SnapshotTabHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_pages(&self) -> std::sync::MutexGuard<'_, HashMap<String, Page>> {
        self.pages.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_log(&self) -> std::sync::MutexGuard<'_, TabLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register (or replace) the document served for `url`.
    pub fn insert(&self, url: impl Into<String>, dom: Arc<HtmlSnapshotDom>) {
        self.lock_pages().insert(
            url.into(),
            Page {
                dom,
                after_submit: None,
            },
        );
    }

    /// Document shown on `url` once its form is submitted.
    pub fn on_submit(&self, url: &str, html: impl Into<String>) {
        if let Some(page) = self.lock_pages().get_mut(url) {
            page.after_submit = Some(html.into());
        }
    }

    pub fn opened(&self) -> Vec<String> {
        self.lock_log().opened.clone()
    }

    pub fn closed(&self) -> usize {
        self.lock_log().closed
    }

    /// `(input selector, value)` of every successful submit.
    pub fn submissions(&self) -> Vec<(String, String)> {
        self.lock_log().submissions.clone()
    }
}

#[async_trait]
impl TabHost for SnapshotTabHost {
    async fn open(&self, url: &str) -> Result<Box<dyn BackgroundTab>, TabError> {
        let page = self.lock_pages().get(url).cloned();
        let Some(page) = page else {
            return Err(TabError::Navigation {
                url: url.to_string(),
                reason: "no such page".to_string(),
            });
        };
        self.lock_log().opened.push(url.to_string());
        Ok(Box::new(SnapshotTab {
            dom: page.dom,
            after_submit: page.after_submit,
            log: self.log.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct SnapshotTab {
    dom: Arc<HtmlSnapshotDom>,
    after_submit: Option<String>,
    log: Arc<Mutex<TabLog>>,
    closed: AtomicBool,
}

#[async_trait]
impl DomHost for SnapshotTab {
    async fn anchors(&self) -> Vec<Anchor> {
        self.dom.anchors().await
    }

    async fn texts(&self, selector: &str) -> Vec<String> {
        self.dom.texts(selector).await
    }

    async fn table(&self, row_selector: &str, cell_selector: &str) -> Vec<Vec<String>> {
        self.dom.table(row_selector, cell_selector).await
    }

    async fn count(&self, selector: &str) -> usize {
        self.dom.count(selector).await
    }

    async fn body_text(&self) -> String {
        self.dom.body_text().await
    }

    async fn focused_is_text_input(&self) -> bool {
        self.dom.focused_is_text_input().await
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Vec<MutationRecord>> {
        self.dom.subscribe()
    }
}

#[async_trait]
impl BackgroundTab for SnapshotTab {
    async fn submit(&self, input_selector: &str, value: &str, button_selector: &str) -> Result<bool, TabError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TabError::Script("tab is closed".to_string()));
        }
        if self.dom.count(input_selector).await == 0 || self.dom.count(button_selector).await == 0 {
            return Ok(false);
        }
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .submissions
            .push((input_selector.to_string(), value.to_string()));
        if let Some(html) = &self.after_submit {
            self.dom.replace(html.clone());
        }
        Ok(true)
    }

    async fn close(&self) -> Result<(), TabError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.log.lock().unwrap_or_else(|e| e.into_inner()).closed += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_url_fails_to_open() {
        let host = SnapshotTabHost::new();
        let err = host.open("https://example.test/missing").await.err().unwrap();
        assert!(matches!(err, TabError::Navigation { .. }));
        assert!(host.opened().is_empty());
    }

    #[tokio::test]
    async fn submit_swaps_document_and_close_counts_once() {
        let host = SnapshotTabHost::new();
        let url = "https://example.test/form";
        host.insert(
            url,
            Arc::new(HtmlSnapshotDom::new(
                r#"<body><input class="q"><button class="go">go</button></body>"#,
            )),
        );
        host.on_submit(url, "<body><p class='done'>ok</p></body>");

        let tab = host.open(url).await.unwrap();
        assert!(!tab.submit("input.missing", "x", "button.go").await.unwrap());
        assert!(tab.submit("input.q", "AB12", "button.go").await.unwrap());
        assert_eq!(tab.count(".done").await, 1);

        tab.close().await.unwrap();
        tab.close().await.unwrap();
        assert_eq!(host.closed(), 1);
        assert_eq!(host.submissions(), vec![("input.q".to_string(), "AB12".to_string())]);
    }
}
