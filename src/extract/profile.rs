//! Profession and tag detection over profile-page texts.

use serde::Serialize;

use crate::core::types::Fact;

/// Known professions: internal code and the label shown to operators.
pub const PROFESSIONS: &[(&str, &str)] = &[
    ("cargo/courier/on-foot", "пеший курьер"),
    ("cargo/courier/on-motorcycle", "мотокурьер"),
    ("cargo/courier/on-car", "курьер на машине"),
    ("cargo/courier/on-truck", "Грузовой"),
    ("taxi/driver", "таксист"),
];

pub const AUTO_COURIER: &str = "auto_courier";
pub const WALKING_COURIER: &str = "walking_courier";

const AUTO_COURIER_SYNONYMS: &[&str] = &[AUTO_COURIER, "авто курьер", "курьер на машине"];
const WALKING_COURIER_SYNONYMS: &[&str] = &[WALKING_COURIER, "пеший курьер", "пешком"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfessionProbe {
    pub profession: Option<Fact>,
    /// Some non-empty text was inspected, even if nothing matched.
    pub any_text: bool,
}

fn match_profession(text: &str) -> Option<Fact> {
    PROFESSIONS
        .iter()
        .find(|(code, label)| text.contains(code) || text.contains(&label.to_lowercase()))
        .map(|(code, label)| Fact::Profession {
            code: code.to_string(),
            label: label.to_string(),
        })
}

/// Look for a profession in the dedicated value blocks first, then in the
/// whole page text. Only the first non-empty block is inspected.
pub fn detect_profession(blocks: &[String], page_text: &str) -> ProfessionProbe {
    if let Some(text) = blocks
        .iter()
        .map(|t| t.trim().to_lowercase())
        .find(|t| !t.is_empty())
    {
        return ProfessionProbe {
            profession: match_profession(&text),
            any_text: true,
        };
    }

    let page = page_text.trim().to_lowercase();
    ProfessionProbe {
        profession: if page.is_empty() { None } else { match_profession(&page) },
        any_text: !page.is_empty(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StandardTags {
    pub auto_courier: bool,
    pub walking_courier: bool,
}

impl StandardTags {
    pub fn facts(&self) -> Vec<Fact> {
        let mut out = Vec::new();
        if self.auto_courier {
            out.push(Fact::Tag {
                name: AUTO_COURIER.to_string(),
            });
        }
        if self.walking_courier {
            out.push(Fact::Tag {
                name: WALKING_COURIER.to_string(),
            });
        }
        out
    }
}

/// Presence of the standard courier tags in any of `texts`.
pub fn detect_standard_tags(texts: &[String]) -> StandardTags {
    let mut tags = StandardTags::default();
    for text in texts.iter().map(|t| t.to_lowercase()) {
        tags.auto_courier |= AUTO_COURIER_SYNONYMS.iter().any(|s| text.contains(s));
        tags.walking_courier |= WALKING_COURIER_SYNONYMS.iter().any(|s| text.contains(s));
    }
    tags
}

/// For each configured tag name (empty names are never found), whether any
/// text mentions it, case-insensitively.
pub fn detect_custom_tags(texts: &[String], names: &[String]) -> Vec<bool> {
    let lowered: Vec<String> = texts.iter().map(|t| t.to_lowercase()).collect();
    names
        .iter()
        .map(|name| {
            let needle = name.trim().to_lowercase();
            !needle.is_empty() && lowered.iter().any(|t| t.contains(&needle))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profession_from_block_by_code_or_label() {
        let probe = detect_profession(&["  Cargo/Courier/On-Car ".to_string()], "");
        assert_eq!(
            probe.profession,
            Some(Fact::Profession {
                code: "cargo/courier/on-car".into(),
                label: "курьер на машине".into()
            })
        );

        let probe = detect_profession(&["Мотокурьер".to_string()], "");
        assert_eq!(probe.profession.map(|f| f.key().to_string()).as_deref(), Some("cargo/courier/on-motorcycle"));
    }

    #[test]
    fn unknown_block_text_does_not_fall_back_to_page() {
        let probe = detect_profession(&["стажёр".to_string()], "taxi/driver");
        assert!(probe.any_text);
        assert!(probe.profession.is_none());
    }

    #[test]
    fn page_text_used_when_blocks_empty() {
        let probe = detect_profession(&[String::new()], "Профессия: таксист");
        assert_eq!(probe.profession.map(|f| f.key().to_string()).as_deref(), Some("taxi/driver"));

        let nothing = detect_profession(&[], "   ");
        assert_eq!(nothing, ProfessionProbe::default());
    }

    #[test]
    fn standard_tags_match_synonyms() {
        let tags = detect_standard_tags(&["Пеший курьер".into(), "badge".into()]);
        assert!(tags.walking_courier);
        assert!(!tags.auto_courier);
        assert_eq!(tags.facts(), vec![Fact::Tag { name: WALKING_COURIER.into() }]);
    }

    #[test]
    fn custom_tags_ignore_blank_names() {
        let found = detect_custom_tags(
            &["VIP Partner".into(), "night_shift".into()],
            &["vip".into(), "".into(), "Night_Shift".into(), "absent".into()],
        );
        assert_eq!(found, vec![true, false, true, false]);
    }
}
