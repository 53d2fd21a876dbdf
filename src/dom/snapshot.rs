use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::warn;
use url::Url;

use super::{Anchor, DomHost, MutationRecord, NodeInfo};

/// DOM host backed by an HTML string that is replaced wholesale.
///
/// Each [`replace`](Self::replace) parses the new document and emits one
/// child-list mutation describing the top-level body elements, which is what a
/// single-page app re-render looks like to an observer.
pub struct HtmlSnapshotDom {
    base: Option<Url>,
    state: Mutex<SnapshotState>,
}

struct SnapshotState {
    html: String,
    focused_text_input: bool,
    subscribers: Vec<mpsc::UnboundedSender<Vec<MutationRecord>>>,
}

impl std::fmt::Debug for HtmlSnapshotDom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("HtmlSnapshotDom")
            .field("base", &self.base.as_ref().map(Url::as_str))
            .field("html_len", &state.html.len())
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

fn parse_selector(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("invalid selector {:?}: {}", selector, e);
            None
        }
    }
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

impl HtmlSnapshotDom {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            base: None,
            state: Mutex::new(SnapshotState {
                html: html.into(),
                focused_text_input: false,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Resolve relative hrefs against `base`, like `HTMLAnchorElement.href` does.
    pub fn with_base_url(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SnapshotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn document(&self) -> Html {
        Html::parse_document(&self.lock().html)
    }

    /// Swap in a new document and notify subscribers.
    pub fn replace(&self, html: impl Into<String>) {
        let html = html.into();
        let added = body_children(&Html::parse_document(&html));
        let batch = vec![MutationRecord::ChildList {
            target: NodeInfo::element(Vec::<String>::new()),
            added,
        }];
        let mut state = self.lock();
        state.html = html;
        state.subscribers.retain(|tx| tx.send(batch.clone()).is_ok());
    }

    /// Deliver an explicit mutation batch without touching the document.
    pub fn push_mutations(&self, batch: Vec<MutationRecord>) {
        if batch.is_empty() {
            return;
        }
        self.lock()
            .subscribers
            .retain(|tx| tx.send(batch.clone()).is_ok());
    }

    pub fn set_focused_text_input(&self, focused: bool) {
        self.lock().focused_text_input = focused;
    }

    /// Drop all subscriptions, ending their streams.
    pub fn close(&self) {
        self.lock().subscribers.clear();
    }

    fn collect_anchors(&self) -> Vec<Anchor> {
        let doc = self.document();
        let Some(sel) = parse_selector("a") else {
            return Vec::new();
        };
        doc.select(&sel)
            .map(|el| {
                let href = el.value().attr("href").map(|raw| self.resolve(raw));
                Anchor {
                    href,
                    text: element_text(&el),
                }
            })
            .collect()
    }

    fn resolve(&self, raw: &str) -> String {
        match &self.base {
            Some(base) => base
                .join(raw)
                .map(String::from)
                .unwrap_or_else(|_| raw.to_string()),
            None => raw.to_string(),
        }
    }

    fn collect_texts(&self, selector: &str) -> Vec<String> {
        let Some(sel) = parse_selector(selector) else {
            return Vec::new();
        };
        let doc = self.document();
        doc.select(&sel).map(|el| element_text(&el)).collect()
    }

    fn collect_table(&self, row_selector: &str, cell_selector: &str) -> Vec<Vec<String>> {
        let (Some(rows), Some(cells)) = (parse_selector(row_selector), parse_selector(cell_selector))
        else {
            return Vec::new();
        };
        let doc = self.document();
        doc.select(&rows)
            .map(|row| row.select(&cells).map(|c| element_text(&c)).collect())
            .collect()
    }
}

fn body_children(doc: &Html) -> Vec<NodeInfo> {
    let Some(sel) = parse_selector("body > *") else {
        return Vec::new();
    };
    doc.select(&sel)
        .map(|el| NodeInfo::element(el.value().classes()))
        .collect()
}

#[async_trait]
impl DomHost for HtmlSnapshotDom {
    async fn anchors(&self) -> Vec<Anchor> {
        self.collect_anchors()
    }

    async fn texts(&self, selector: &str) -> Vec<String> {
        self.collect_texts(selector)
    }

    async fn table(&self, row_selector: &str, cell_selector: &str) -> Vec<Vec<String>> {
        self.collect_table(row_selector, cell_selector)
    }

    async fn count(&self, selector: &str) -> usize {
        let Some(sel) = parse_selector(selector) else {
            return 0;
        };
        self.document().select(&sel).count()
    }

    async fn body_text(&self) -> String {
        self.collect_texts("body").join(" ")
    }

    async fn focused_is_text_input(&self) -> bool {
        self.lock().focused_text_input
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Vec<MutationRecord>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="card">
            <a href="/chat?ticket_id=abcdef0123456789abcdef01">open</a>
            <a href="https://example.test/ru/">Россия</a>
            <span>no link</span>
          </div>
          <div class="row"><div class="row__col">Тип партнерства</div><div class="row__col">самозанятый</div></div>
        </body></html>"#;

    #[tokio::test]
    async fn anchors_resolve_against_base() {
        let dom = HtmlSnapshotDom::new(PAGE)
            .with_base_url(Url::parse("https://admin.example.test/tickets/").unwrap());
        let anchors = dom.anchors().await;

        assert_eq!(anchors.len(), 2);
        assert_eq!(
            anchors[0].href.as_deref(),
            Some("https://admin.example.test/chat?ticket_id=abcdef0123456789abcdef01")
        );
        assert_eq!(anchors[1].text, "Россия");
    }

    #[tokio::test]
    async fn table_groups_cells_per_row() {
        let dom = HtmlSnapshotDom::new(PAGE);
        let rows = dom.table(".row", ".row__col").await;
        assert_eq!(rows, vec![vec!["Тип партнерства".to_string(), "самозанятый".to_string()]]);
    }

    #[tokio::test]
    async fn invalid_selector_matches_nothing() {
        let dom = HtmlSnapshotDom::new(PAGE);
        assert_eq!(dom.count("div[").await, 0);
        assert!(dom.texts("::::").await.is_empty());
    }

    #[tokio::test]
    async fn replace_emits_child_list_with_body_elements() {
        let dom = HtmlSnapshotDom::new("<html><body></body></html>");
        let mut rx = dom.subscribe();

        dom.replace(r#"<html><body><p class="marker-highlight">x</p><div>y</div></body></html>"#);

        let batch = rx.recv().await.unwrap();
        match &batch[0] {
            MutationRecord::ChildList { added, .. } => {
                assert_eq!(added.len(), 2);
                assert!(added[0].has_class("marker-highlight"));
                assert!(!added[1].has_class("marker-highlight"));
            }
            other => panic!("unexpected record {other:?}"),
        }
        assert!(dom.body_text().await.contains('y'));
    }
}
