//! Fact extraction from anchors and page text.

pub mod country;
pub mod profile;
pub mod rules;

use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

use crate::core::types::{Fact, FactId, FactKind};
use crate::dom::Anchor;

pub use rules::{CountryExtractor, LicenseExtractor, TicketExtractor};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("anchor carries no href")]
    MissingHref,
    #[error("unparsable url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("malformed {field}: {value:?}")]
    Malformed { field: &'static str, value: String },
}

/// Keys already reported during the current pass.
///
/// One context lives for exactly one pass over the page; it is never carried
/// into the next one.
#[derive(Debug, Default)]
pub struct DedupContext {
    seen: HashSet<FactId>,
}

impl DedupContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass the fact through on its first sighting, swallow repeats.
    pub fn admit(&mut self, fact: Fact) -> Option<Fact> {
        self.seen.insert(fact.id()).then_some(fact)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

pub trait FactExtractor: Send + Sync {
    fn kind(&self) -> FactKind;

    /// Parse one anchor. `Ok(None)` means the anchor carries no fact of this kind.
    fn try_extract(
        &self,
        anchor: &Anchor,
        ctx: &mut DedupContext,
    ) -> Result<Option<Fact>, ExtractionError>;

    /// Same as [`try_extract`](Self::try_extract) but never fails: a malformed
    /// anchor yields no fact.
    fn extract(&self, anchor: &Anchor, ctx: &mut DedupContext) -> Option<Fact> {
        match self.try_extract(anchor, ctx) {
            Ok(fact) => fact,
            Err(e) => {
                debug!("{} extractor skipped anchor: {}", self.kind(), e);
                None
            }
        }
    }
}

/// Ordered set of extractors run over every anchor of a pass.
pub struct ExtractorSet {
    rules: Vec<Box<dyn FactExtractor>>,
}

impl std::fmt::Debug for ExtractorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| r.kind()))
            .finish()
    }
}

impl ExtractorSet {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Ticket, country and license rules.
    pub fn standard(ticket_link_base: &str) -> Self {
        Self::empty()
            .with_rule(TicketExtractor::new(ticket_link_base))
            .with_rule(CountryExtractor)
            .with_rule(LicenseExtractor)
    }

    pub fn with_rule(mut self, rule: impl FactExtractor + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// One extraction pass with a fresh dedup context.
    pub fn scan<'a>(&self, anchors: impl IntoIterator<Item = &'a Anchor>) -> Vec<Fact> {
        let mut ctx = DedupContext::new();
        let mut facts = Vec::new();
        for anchor in anchors {
            for rule in &self.rules {
                if let Some(fact) = rule.extract(anchor, &mut ctx) {
                    facts.push(fact);
                }
            }
        }
        facts
    }
}
