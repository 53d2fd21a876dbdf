use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;

/// Display name used for country codes that have no translation.
pub const UNKNOWN_COUNTRY: &str = "skull";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Ticket,
    Country,
    DriverLicense,
    Profession,
    Tag,
}

impl FactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactKind::Ticket => "ticket",
            FactKind::Country => "country",
            FactKind::DriverLicense => "driver_license",
            FactKind::Profession => "profession",
            FactKind::Tag => "tag",
        }
    }
}

impl std::fmt::Display for FactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single typed piece of information pulled out of a page.
///
/// Facts are immutable once produced. Their identity is `(kind, key)`, see [`Fact::id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fact {
    Ticket {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        link: Option<String>,
    },
    Country {
        /// Upper-cased alpha-3 code when known, otherwise the raw code upper-cased.
        code: String,
        /// Russian display name, or [`UNKNOWN_COUNTRY`].
        name: String,
    },
    DriverLicense {
        number: String,
    },
    Profession {
        code: String,
        label: String,
    },
    Tag {
        name: String,
    },
}

impl Fact {
    pub fn kind(&self) -> FactKind {
        match self {
            Fact::Ticket { .. } => FactKind::Ticket,
            Fact::Country { .. } => FactKind::Country,
            Fact::DriverLicense { .. } => FactKind::DriverLicense,
            Fact::Profession { .. } => FactKind::Profession,
            Fact::Tag { .. } => FactKind::Tag,
        }
    }

    /// Business-identity string used for dedup.
    pub fn key(&self) -> &str {
        match self {
            Fact::Ticket { id, .. } => id,
            Fact::Country { code, .. } => code,
            Fact::DriverLicense { number } => number,
            Fact::Profession { code, .. } => code,
            Fact::Tag { name } => name,
        }
    }

    pub fn id(&self) -> FactId {
        FactId {
            kind: self.kind(),
            key: self.key().to_string(),
        }
    }

    /// Human readable value, used for notification bodies and clipboard copies.
    pub fn display(&self) -> &str {
        match self {
            Fact::Ticket { id, .. } => id,
            Fact::Country { code, name } => {
                if name == UNKNOWN_COUNTRY {
                    code
                } else {
                    name
                }
            }
            Fact::DriverLicense { number } => number,
            Fact::Profession { label, .. } => label,
            Fact::Tag { name } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactId {
    pub kind: FactKind,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    fact: Fact,
    introduced: u64,
}

/// Running set of facts for one scan session, keyed by `(kind, key)`.
///
/// Merging is idempotent: a fact whose identity is already present replaces the
/// stored payload but does not count as new.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactSet {
    entries: HashMap<FactId, Entry>,
    next_seq: u64,
}

impl FactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fact. Returns `true` when its identity was not present before.
    pub fn merge(&mut self, fact: Fact) -> bool {
        let id = fact.id();
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.fact = fact;
            return false;
        }
        let introduced = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(id, Entry { fact, introduced });
        true
    }

    /// Merge many facts, returning how many identities were new.
    pub fn merge_all(&mut self, facts: impl IntoIterator<Item = Fact>) -> usize {
        facts
            .into_iter()
            .map(|f| self.merge(f))
            .filter(|new| *new)
            .count()
    }

    pub fn contains(&self, id: &FactId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn has_kind(&self, kind: FactKind) -> bool {
        self.entries.keys().any(|id| id.kind == kind)
    }

    /// Most recently introduced fact of `kind`.
    pub fn latest(&self, kind: FactKind) -> Option<&Fact> {
        self.entries
            .values()
            .filter(|e| e.fact.kind() == kind)
            .max_by_key(|e| e.introduced)
            .map(|e| &e.fact)
    }

    /// Facts of `kind` in the order they were first seen.
    pub fn of_kind(&self, kind: FactKind) -> Vec<&Fact> {
        let mut found: Vec<&Entry> = self
            .entries
            .values()
            .filter(|e| e.fact.kind() == kind)
            .collect();
        found.sort_by_key(|e| e.introduced);
        found.into_iter().map(|e| &e.fact).collect()
    }

    /// All facts in the order they were first seen.
    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        let mut all: Vec<&Entry> = self.entries.values().collect();
        all.sort_by_key(|e| e.introduced);
        all.into_iter().map(|e| &e.fact)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.next_seq = 0;
    }
}

impl FromIterator<Fact> for FactSet {
    fn from_iter<T: IntoIterator<Item = Fact>>(iter: T) -> Self {
        let mut set = FactSet::new();
        set.merge_all(iter);
        set
    }
}

impl Serialize for FactSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// Minimum-fields predicate: every `required` kind present, and at least one
/// of `any_of` present when that list is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completeness {
    pub required: Vec<FactKind>,
    #[serde(default)]
    pub any_of: Vec<FactKind>,
}

impl Default for Completeness {
    fn default() -> Self {
        Self {
            required: vec![FactKind::Ticket],
            any_of: vec![FactKind::Country, FactKind::DriverLicense],
        }
    }
}

impl Completeness {
    pub fn is_satisfied(&self, facts: &FactSet) -> bool {
        self.required.iter().all(|k| facts.has_kind(*k))
            && (self.any_of.is_empty() || self.any_of.iter().any(|k| facts.has_kind(*k)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(id: &str) -> Fact {
        Fact::Ticket {
            id: id.to_string(),
            link: None,
        }
    }

    fn license(n: &str) -> Fact {
        Fact::DriverLicense {
            number: n.to_string(),
        }
    }

    #[test]
    fn merging_twice_equals_merging_once() {
        let mut once = FactSet::new();
        once.merge(ticket("abcdef0123456789abcdef01"));

        let mut twice = once.clone();
        assert!(!twice.merge(ticket("abcdef0123456789abcdef01")));
        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
    }

    #[test]
    fn latest_tracks_most_recent_identity() {
        let mut set = FactSet::new();
        set.merge(ticket("aaaaaaaaaaaaaaaaaaaaaaaa"));
        set.merge(ticket("bbbbbbbbbbbbbbbbbbbbbbbb"));
        set.merge(ticket("aaaaaaaaaaaaaaaaaaaaaaaa"));

        assert_eq!(
            set.latest(FactKind::Ticket).map(|f| f.key()),
            Some("bbbbbbbbbbbbbbbbbbbbbbbb")
        );
        assert_eq!(set.of_kind(FactKind::Ticket).len(), 2);
    }

    #[test]
    fn default_completeness_needs_ticket_and_one_detail() {
        let rule = Completeness::default();
        let mut set = FactSet::new();
        assert!(!rule.is_satisfied(&set));

        set.merge(ticket("abcdef0123456789abcdef01"));
        assert!(!rule.is_satisfied(&set));

        set.merge(license("AB123"));
        assert!(rule.is_satisfied(&set));
    }

    #[test]
    fn unknown_country_displays_its_code() {
        let fact = Fact::Country {
            code: "XX".into(),
            name: UNKNOWN_COUNTRY.into(),
        };
        assert_eq!(fact.display(), "XX");
    }

    #[test]
    fn fact_set_serializes_in_insertion_order() {
        let set: FactSet = vec![license("X1"), ticket("abcdef0123456789abcdef01")]
            .into_iter()
            .collect();
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json[0]["kind"], "driver_license");
        assert_eq!(json[1]["kind"], "ticket");
    }
}
