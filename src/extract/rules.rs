use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;
use url::Url;

use super::country;
use super::{DedupContext, ExtractionError, FactExtractor};
use crate::core::types::{Fact, FactKind};
use crate::dom::Anchor;

static TICKET_RE: OnceLock<Regex> = OnceLock::new();
static LICENSE_RE: OnceLock<Regex> = OnceLock::new();
static LICENSE_PATH_RE: OnceLock<Regex> = OnceLock::new();
static LICENSE_TEXT_RE: OnceLock<Regex> = OnceLock::new();
static COUNTRY_PATH_RES: OnceLock<Vec<Regex>> = OnceLock::new();

fn ticket_re() -> &'static Regex {
    TICKET_RE.get_or_init(|| Regex::new(r"^[0-9a-fA-F]{24}$").expect("valid ticket regex"))
}

fn license_re() -> &'static Regex {
    LICENSE_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9]+$").expect("valid license regex"))
}

fn license_path_re() -> &'static Regex {
    LICENSE_PATH_RE
        .get_or_init(|| Regex::new(r"/driver_license/([A-Za-z0-9]+)").expect("valid license path regex"))
}

fn license_text_re() -> &'static Regex {
    LICENSE_TEXT_RE
        .get_or_init(|| Regex::new(r"driver_license:\s*([A-Z0-9]+)").expect("valid license text regex"))
}

/// Path patterns, most specific first. Applied to the URL path only.
fn country_path_res() -> &'static [Regex] {
    COUNTRY_PATH_RES.get_or_init(|| {
        [
            r"intl_([a-zA-Z]{2,3})(?:[^a-zA-Z]|$)",
            r"csi_([a-zA-Z]{2,3})(?:[^a-zA-Z]|$)",
            r"/([a-zA-Z]{2,3})/",
            r"/([a-zA-Z]{2,3})$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid country regex"))
        .collect()
    })
}

fn parse_href(anchor: &Anchor) -> Result<Url, ExtractionError> {
    let href = anchor.href.as_deref().ok_or(ExtractionError::MissingHref)?;
    Url::parse(href).map_err(|source| ExtractionError::InvalidUrl {
        url: href.to_string(),
        source,
    })
}

/// Query pairs of the URL, followed by pairs from a query embedded in the
/// fragment (`#/route?key=value`), which hash-routed admin pages use.
fn query_pairs(url: &Url) -> Vec<(Cow<'_, str>, Cow<'_, str>)> {
    let mut pairs: Vec<_> = url.query_pairs().collect();
    if let Some((_, query)) = url.fragment().and_then(|f| f.split_once('?')) {
        pairs.extend(url::form_urlencoded::parse(query.as_bytes()));
    }
    pairs
}

fn param<'a>(pairs: &'a [(Cow<'a, str>, Cow<'a, str>)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_ref())
}

/// Support-ticket identifier from one of several query-parameter spellings.
#[derive(Debug, Clone)]
pub struct TicketExtractor {
    params: Vec<String>,
    link_base: String,
}

impl TicketExtractor {
    pub const DEFAULT_PARAMS: [&'static str; 3] = ["ticket_id", "chatterbox_ticket_id", "zendesk_ticket"];

    pub fn new(link_base: impl Into<String>) -> Self {
        Self {
            params: Self::DEFAULT_PARAMS.iter().map(|p| p.to_string()).collect(),
            link_base: link_base.into(),
        }
    }

    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    fn link_for(&self, id: &str) -> Option<String> {
        if self.link_base.is_empty() {
            return None;
        }
        Some(format!("{}{}", self.link_base, id))
    }
}

impl FactExtractor for TicketExtractor {
    fn kind(&self) -> FactKind {
        FactKind::Ticket
    }

    fn try_extract(
        &self,
        anchor: &Anchor,
        ctx: &mut DedupContext,
    ) -> Result<Option<Fact>, ExtractionError> {
        if anchor.href.is_none() {
            return Ok(None);
        }
        let url = parse_href(anchor)?;
        let pairs = query_pairs(&url);

        for name in &self.params {
            let Some(value) = param(&pairs, name) else {
                continue;
            };
            if !ticket_re().is_match(value) {
                continue;
            }
            let id = value.to_ascii_lowercase();
            let link = self.link_for(&id);
            return Ok(ctx.admit(Fact::Ticket { id, link }));
        }
        Ok(None)
    }
}

/// Country from a `country` parameter or a short locale-like path segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountryExtractor;

impl CountryExtractor {
    const SKIPPED_PATH_MARKERS: [&'static str; 3] = ["sms", "iframe", "tariff"];
}

impl FactExtractor for CountryExtractor {
    fn kind(&self) -> FactKind {
        FactKind::Country
    }

    fn try_extract(
        &self,
        anchor: &Anchor,
        ctx: &mut DedupContext,
    ) -> Result<Option<Fact>, ExtractionError> {
        if anchor.href.is_none() {
            return Ok(None);
        }
        let url = parse_href(anchor)?;
        let path = url.path().trim_end_matches('/');
        if Self::SKIPPED_PATH_MARKERS.iter().any(|m| path.contains(m)) {
            return Ok(None);
        }

        let pairs = query_pairs(&url);
        let raw = match param(&pairs, "country") {
            Some(v) => Some(v.to_string()),
            None => country_path_res()
                .iter()
                .find_map(|re| re.captures(path))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
        };

        let Some(raw) = raw else {
            return Ok(None);
        };
        if !(2..=3).contains(&raw.len()) || !raw.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ExtractionError::Malformed {
                field: "country",
                value: raw,
            });
        }
        Ok(ctx.admit(country::normalize(&raw)))
    }
}

/// Driver-license number from a parameter, a path segment or anchor text.
#[derive(Debug, Clone, Copy, Default)]
pub struct LicenseExtractor;

impl LicenseExtractor {
    fn from_url(url: &Url) -> Option<String> {
        let pairs = query_pairs(url);
        if let Some(v) = param(&pairs, "driver_license") {
            if license_re().is_match(v) {
                return Some(v.to_string());
            }
        }
        license_path_re()
            .captures(url.path())
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn from_text(text: &str) -> Option<String> {
        license_text_re()
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

impl FactExtractor for LicenseExtractor {
    fn kind(&self) -> FactKind {
        FactKind::DriverLicense
    }

    fn try_extract(
        &self,
        anchor: &Anchor,
        ctx: &mut DedupContext,
    ) -> Result<Option<Fact>, ExtractionError> {
        let from_url = match anchor.href {
            Some(_) => Self::from_url(&parse_href(anchor)?),
            None => None,
        };
        let number = from_url.or_else(|| Self::from_text(&anchor.text));
        Ok(number.and_then(|n| {
            ctx.admit(Fact::DriverLicense {
                number: n.to_ascii_uppercase(),
            })
        }))
    }
}
