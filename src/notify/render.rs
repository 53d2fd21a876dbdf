//! Turns fact sets and search results into notification contents.

use serde::{Deserialize, Serialize};

use super::host::{NotificationButton, NotificationItem, NotificationSpec};
use crate::core::config::IconSettings;
use crate::core::types::{Fact, FactKind, FactSet, UNKNOWN_COUNTRY};
use crate::extract::profile::{ProfessionProbe, StandardTags};

pub const NOT_FOUND: &str = "Данные не найдены!";

/// Notice category. Persistence (exemption from auto-clear) is configured per
/// category, not derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Ticket,
    Profile,
    StandardTags,
    CustomTags,
    Testing,
}

/// One clipboard button: label shown, value copied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyAction {
    pub label: String,
    pub value: String,
}

/// Everything the scheduler needs to show one notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub category: Category,
    /// Identity used to update instead of duplicate.
    pub business_key: String,
    pub facts: FactSet,
    pub title: String,
    pub icon: String,
    pub items: Vec<NotificationItem>,
    pub actions: Vec<CopyAction>,
}

impl Notice {
    /// Host spec; buttons mirror `actions` one to one.
    pub fn spec(&self, require_interaction: bool) -> NotificationSpec {
        NotificationSpec {
            icon: self.icon.clone(),
            title: self.title.clone(),
            items: self.items.clone(),
            buttons: self
                .actions
                .iter()
                .map(|a| NotificationButton {
                    title: a.label.clone(),
                })
                .collect(),
            require_interaction,
        }
    }

    /// Ticket notice for a stable fact set. `None` without a ticket fact.
    pub fn for_ticket(facts: &FactSet, icons: &IconSettings) -> Option<Notice> {
        let ticket = facts.latest(FactKind::Ticket)?;
        let country = facts.latest(FactKind::Country);
        let license = facts.latest(FactKind::DriverLicense);

        let items = vec![
            NotificationItem::new("Страна:", country.map_or(NOT_FOUND, Fact::display)),
            NotificationItem::new("Номер ВУ:", license.map_or(NOT_FOUND, Fact::display)),
        ];

        let mut actions = Vec::new();
        if let Some(license) = license {
            actions.push(CopyAction {
                label: "Номер ВУ".into(),
                value: license.display().to_string(),
            });
        }
        if let Some(country) = country {
            actions.push(CopyAction {
                label: "Страна".into(),
                value: country.display().to_string(),
            });
        }

        Some(Notice {
            category: Category::Ticket,
            business_key: format!("ticket:{}", ticket.key()),
            facts: facts.clone(),
            title: format!("Тикет #{}", ticket.key()),
            icon: country_icon(country, icons),
            items,
            actions,
        })
    }

    pub fn profile(
        preset: usize,
        probe: Option<&ProfessionProbe>,
        driver: &DriverInfo,
        icons: &IconSettings,
    ) -> Notice {
        let profession = match probe {
            Some(ProfessionProbe {
                profession: Some(fact),
                ..
            }) => fact.display().to_string(),
            Some(ProfessionProbe { any_text: true, .. }) => "[Профессия неизвестна]".to_string(),
            _ => "[Поиск не удался]".to_string(),
        };
        let mut items = vec![NotificationItem::new("Профессия:", profession)];
        if let Some(ip) = &driver.is_individual_entrepreneur {
            items.push(NotificationItem::new("ИП:", ip.clone()));
        }
        if let Some(kind) = &driver.partnership_type {
            items.push(NotificationItem::new("Тип партнерства:", kind.clone()));
        }

        Notice {
            category: Category::Profile,
            business_key: format!("profile:{preset}"),
            facts: probe
                .and_then(|p| p.profession.clone())
                .into_iter()
                .collect(),
            title: format!("Карточка (Пресет {preset})"),
            icon: icons.default_icon.clone(),
            items,
            actions: Vec::new(),
        }
    }

    pub fn standard_tags(preset: usize, tags: &StandardTags, icons: &IconSettings) -> Notice {
        Notice {
            category: Category::StandardTags,
            business_key: format!("standard_tags:{preset}"),
            facts: tags.facts().into_iter().collect(),
            title: format!("Стандартные теги (Пресет {preset})"),
            icon: icons.default_icon.clone(),
            items: vec![
                NotificationItem::new("auto_courier:", presence(tags.auto_courier)),
                NotificationItem::new("walking_courier:", presence(tags.walking_courier)),
            ],
            actions: Vec::new(),
        }
    }

    /// `tags` pairs each configured name (possibly blank) with its presence.
    pub fn custom_tags(
        preset: usize,
        set_number: usize,
        tags: &[(String, bool)],
        icons: &IconSettings,
    ) -> Notice {
        let items = tags
            .iter()
            .enumerate()
            .map(|(i, (name, found))| {
                if name.trim().is_empty() {
                    NotificationItem::new(format!("Тег {}:", i + 1), "[Не указано]")
                } else {
                    NotificationItem::new(format!("{name}:"), presence(*found))
                }
            })
            .collect();
        let facts = tags
            .iter()
            .filter(|(name, found)| *found && !name.trim().is_empty())
            .map(|(name, _)| Fact::Tag { name: name.clone() })
            .collect();

        Notice {
            category: Category::CustomTags,
            business_key: format!("custom_tags:{preset}:{set_number}"),
            facts,
            title: format!("Пользовательские теги #{set_number} (Пресет {preset})"),
            icon: icons.default_icon.clone(),
            items,
            actions: Vec::new(),
        }
    }

    /// Two-column list of `course: score` lines.
    pub fn testing(license: &str, results: &[(String, String)], icons: &IconSettings) -> Notice {
        let cells: Vec<String> = results
            .iter()
            .map(|(course, score)| format!("{course}: {score}"))
            .collect();
        let items = if cells.is_empty() {
            vec![NotificationItem::new("", NOT_FOUND)]
        } else {
            cells
                .chunks(2)
                .map(|pair| NotificationItem::new("", pair.join("    |    ")))
                .collect()
        };

        Notice {
            category: Category::Testing,
            business_key: format!("testing:{license}"),
            facts: std::iter::once(Fact::DriverLicense {
                number: license.to_string(),
            })
            .collect(),
            title: format!("Тестирование ВУ {license}"),
            icon: icons.default_icon.clone(),
            items,
            actions: Vec::new(),
        }
    }

    /// Untracked notice reporting a failed copy.
    pub fn copy_failed(label: &str, reason: &str, icons: &IconSettings) -> Notice {
        Notice {
            category: Category::Ticket,
            business_key: String::new(),
            facts: FactSet::new(),
            title: "Не удалось скопировать".to_string(),
            icon: icons.default_icon.clone(),
            items: vec![NotificationItem::new(format!("{label}:"), reason)],
            actions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriverInfo {
    pub is_individual_entrepreneur: Option<String>,
    pub partnership_type: Option<String>,
}

fn presence(found: bool) -> &'static str {
    if found {
        "✅ Есть"
    } else {
        "❌ Отсутствует"
    }
}

fn country_icon(country: Option<&Fact>, icons: &IconSettings) -> String {
    match country {
        Some(Fact::Country { name, .. }) if name == UNKNOWN_COUNTRY => icons.flag(UNKNOWN_COUNTRY),
        Some(Fact::Country { name, .. }) => icons.flag(name),
        _ => icons.default_icon.clone(),
    }
}
