//! The live page as seen by the watchers: anchors, selector queries and a
//! mutation subscription.

pub mod snapshot;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use snapshot::HtmlSnapshotDom;

/// A link element (or a bare piece of text) handed to the extractors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    /// Absolute URL, as the browser resolves `a.href`.
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub text: String,
}

impl Anchor {
    pub fn link(href: impl Into<String>) -> Self {
        Self {
            href: Some(href.into()),
            text: String::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            href: None,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// `false` for text and comment nodes.
    #[serde(default = "default_element")]
    pub element: bool,
    #[serde(default)]
    pub classes: Vec<String>,
}

fn default_element() -> bool {
    true
}

impl NodeInfo {
    pub fn element<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            element: true,
            classes: classes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn text() -> Self {
        Self {
            element: false,
            classes: Vec::new(),
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }
}

/// Summary of one DOM mutation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MutationRecord {
    ChildList {
        target: NodeInfo,
        #[serde(default)]
        added: Vec<NodeInfo>,
    },
    Attributes {
        target: NodeInfo,
        name: String,
    },
    CharacterData {
        target: NodeInfo,
    },
}

impl MutationRecord {
    pub fn target(&self) -> &NodeInfo {
        match self {
            MutationRecord::ChildList { target, .. }
            | MutationRecord::Attributes { target, .. }
            | MutationRecord::CharacterData { target } => target,
        }
    }
}

/// Narrow view of a live, mutable page.
#[async_trait]
pub trait DomHost: Send + Sync {
    /// Every `<a>` element with its resolved href and trimmed text.
    async fn anchors(&self) -> Vec<Anchor>;

    /// Trimmed text content of every element matching `selector`.
    async fn texts(&self, selector: &str) -> Vec<String>;

    /// For each element matching `row_selector`, the texts of its descendants
    /// matching `cell_selector`.
    async fn table(&self, row_selector: &str, cell_selector: &str) -> Vec<Vec<String>>;

    async fn count(&self, selector: &str) -> usize;

    async fn body_text(&self) -> String;

    /// Whether the focused element is a text-input control.
    async fn focused_is_text_input(&self) -> bool;

    /// New subscription to mutation batches. The stream ends when the page goes away.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Vec<MutationRecord>>;
}
