use async_trait::async_trait;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::BrowserPool;
use crate::dom::{Anchor, DomHost, MutationRecord};
use crate::search::{BackgroundTab, TabError, TabHost};

/// How often buffered mutation summaries are pulled out of the page.
const MUTATION_DRAIN_INTERVAL: Duration = Duration::from_millis(100);

/// Installs a `MutationObserver` that buffers record summaries in
/// `window.__domSentinel`. Idempotent per document.
const OBSERVER_JS: &str = r#"(() => {
  if (window.__domSentinel) return true;
  const buf = [];
  window.__domSentinel = buf;
  const info = (n) => ({
    element: n.nodeType === 1,
    classes: n.nodeType === 1 ? Array.from(n.classList) : [],
  });
  new MutationObserver((records) => {
    for (const r of records) {
      if (r.type === 'childList') {
        buf.push({ type: 'child_list', target: info(r.target), added: Array.from(r.addedNodes).map(info) });
      } else if (r.type === 'attributes') {
        buf.push({ type: 'attributes', target: info(r.target), name: r.attributeName || '' });
      } else {
        buf.push({ type: 'character_data', target: info(r.target) });
      }
    }
  }).observe(document, { childList: true, subtree: true, attributes: true, characterData: true });
  return true;
})()"#;

/// `null` when the observer is gone (the document was replaced).
const DRAIN_JS: &str = r#"(() => {
  const b = window.__domSentinel;
  return b ? b.splice(0, b.length) : null;
})()"#;

const FOCUS_JS: &str = r#"(() => {
  const el = document.activeElement;
  if (!el) return false;
  if (el.isContentEditable) return true;
  const tag = el.tagName;
  if (tag === 'TEXTAREA') return true;
  if (tag !== 'INPUT') return false;
  return ['text', 'search', 'email', 'url', 'tel', 'password', 'number'].includes((el.type || 'text').toLowerCase());
})()"#;

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// A pooled browser tab acting as a DOM host.
pub struct CdpTab {
    page: Page,
    cancel: CancellationToken,
}

impl std::fmt::Debug for CdpTab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpTab")
            .field("closed", &self.cancel.is_cancelled())
            .finish()
    }
}

impl CdpTab {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            cancel: CancellationToken::new(),
        }
    }

    /// Evaluate `expr` in the page and decode its JSON-serialized result.
    async fn eval<T: DeserializeOwned>(&self, expr: &str) -> Result<T, TabError> {
        eval_on(&self.page, expr).await
    }

    /// Like [`eval`](Self::eval) for read-only queries: failures are logged and
    /// read as "nothing there".
    async fn query<T: DeserializeOwned + Default>(&self, what: &str, expr: &str) -> T {
        match self.eval(expr).await {
            Ok(v) => v,
            Err(e) => {
                debug!("tab query {} failed: {}", what, e);
                T::default()
            }
        }
    }
}

async fn eval_on<T: DeserializeOwned>(page: &Page, expr: &str) -> Result<T, TabError> {
    let json: String = page
        .evaluate(format!("JSON.stringify({expr})"))
        .await
        .map_err(|e| TabError::Script(e.to_string()))?
        .into_value()
        .map_err(|e| TabError::Script(e.to_string()))?;
    serde_json::from_str(&json).map_err(|e| TabError::Script(e.to_string()))
}

#[async_trait]
impl DomHost for CdpTab {
    async fn anchors(&self) -> Vec<Anchor> {
        self.query(
            "anchors",
            "Array.from(document.querySelectorAll('a')).map(a => ({ \
               href: a.hasAttribute('href') ? a.href : null, \
               text: (a.textContent || '').trim() }))",
        )
        .await
    }

    async fn texts(&self, selector: &str) -> Vec<String> {
        let expr = format!(
            "Array.from(document.querySelectorAll({})).map(e => (e.textContent || '').trim())",
            js_string(selector)
        );
        self.query("texts", &expr).await
    }

    async fn table(&self, row_selector: &str, cell_selector: &str) -> Vec<Vec<String>> {
        let expr = format!(
            "Array.from(document.querySelectorAll({})).map(r => \
               Array.from(r.querySelectorAll({})).map(c => (c.textContent || '').trim()))",
            js_string(row_selector),
            js_string(cell_selector)
        );
        self.query("table", &expr).await
    }

    async fn count(&self, selector: &str) -> usize {
        let expr = format!("document.querySelectorAll({}).length", js_string(selector));
        self.query("count", &expr).await
    }

    async fn body_text(&self) -> String {
        self.query("body text", "document.body ? document.body.textContent : ''")
            .await
    }

    async fn focused_is_text_input(&self) -> bool {
        self.query("focus", FOCUS_JS).await
    }

    /// Installs the page observer and polls its buffer until the tab closes or
    /// the receiver is dropped.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Vec<MutationRecord>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let page = self.page.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = eval_on::<bool>(&page, OBSERVER_JS).await {
                warn!("failed to install mutation observer: {}", e);
                return;
            }
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(MUTATION_DRAIN_INTERVAL) => {}
                }
                if tx.is_closed() {
                    break;
                }
                match eval_on::<Option<Vec<MutationRecord>>>(&page, DRAIN_JS).await {
                    Ok(Some(batch)) if !batch.is_empty() => {
                        if tx.send(batch).is_err() {
                            break;
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        debug!("mutation observer lost, reinstalling");
                        if let Err(e) = eval_on::<bool>(&page, OBSERVER_JS).await {
                            debug!("observer reinstall failed: {}", e);
                        }
                    }
                    Err(e) => {
                        debug!("mutation drain failed, stopping: {}", e);
                        break;
                    }
                }
            }
        });
        rx
    }
}

#[async_trait]
impl BackgroundTab for CdpTab {
    async fn submit(&self, input_selector: &str, value: &str, button_selector: &str) -> Result<bool, TabError> {
        let expr = format!(
            "(() => {{ \
               const input = document.querySelector({input}); \
               const button = document.querySelector({button}); \
               if (!input || !button) return false; \
               input.click(); \
               input.value = {value}; \
               input.dispatchEvent(new Event('input', {{ bubbles: true }})); \
               button.click(); \
               return true; }})()",
            input = js_string(input_selector),
            button = js_string(button_selector),
            value = js_string(value),
        );
        self.eval(&expr).await
    }

    async fn close(&self) -> Result<(), TabError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.cancel.cancel();
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| TabError::Script(format!("close failed: {e}")))
    }
}

/// Opens background tabs in the shared [`BrowserPool`].
#[derive(Debug, Clone)]
pub struct CdpTabHost {
    pool: Arc<BrowserPool>,
}

impl CdpTabHost {
    pub fn new(pool: Arc<BrowserPool>) -> Self {
        Self { pool }
    }

    /// Open a pooled tab on `url`.
    pub async fn open_page(&self, url: &str) -> Result<CdpTab, TabError> {
        let page = self
            .pool
            .acquire()
            .await
            .map_err(|e| TabError::Unavailable(e.to_string()))?;
        let navigated = page.goto(url).await.map(|_| ());
        if let Err(e) = navigated {
            let _ = page.close().await;
            return Err(TabError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            });
        }
        debug!("tab opened on {}", url);
        Ok(CdpTab::new(page))
    }
}

#[async_trait]
impl TabHost for CdpTabHost {
    async fn open(&self, url: &str) -> Result<Box<dyn BackgroundTab>, TabError> {
        Ok(Box::new(self.open_page(url).await?))
    }
}
