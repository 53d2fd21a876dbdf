use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{BackgroundTab, Preset, SearchError, SearchSettings, TabHost};
use crate::core::config::IconSettings;
use crate::core::session::{Session, SessionTornDown};
use crate::extract::profile::{detect_custom_tags, detect_profession, detect_standard_tags, ProfessionProbe};
use crate::notify::{DriverInfo, NotificationScheduler, Notice, NotifyOutcome};
use crate::watch::{ContainerWaiter, PollOptions, PollOutcome, Probe};

const TAG_CONTAINER: &str = ".DriversShowDriverDiagnosticsTags";
const TAG_CONTAINER_CONTENT: &str = ".DriversShowDriverDiagnosticsTags__content";
const TAG_ELEMENTS: &str = ".DiagnosticsTagWithTopics__tagTitle, .DriversDiagnosticLabel__title";
const TAG_CONTAINER_CHILDREN: &[&str] = &[
    ".DiagnosticsTagWithTopics__tagTitle",
    ".DriversDiagnosticLabel__title",
    "div",
];

/// Everything that may carry a tag name on the driver card.
const TAG_TEXT_SELECTORS: &[&str] = &[
    ".driver-profile__tag",
    ".tag",
    ".badge",
    ".label",
    ".Restrictions__available-tariffs-list",
    ".Spoiler__content",
    ".Restrictions__available-tariffs-text",
    ".row__col",
    ".DiagnosticsTagWithTopics__tagTitle",
    ".DriversDiagnosticLabel__title",
    ".DriversShowDriverDiagnosticsTags__headerText",
    ".DriversShowDriverDiagnosticsTags .DiagnosticsTagWithTopics__tagTitle div",
    ".DriversShowDriverDiagnosticsTags div",
    ".DriversShowDriverDiagnosticsTags__content div",
];

/// More matches than this counts as a loaded card even without tag titles.
const ENOUGH_TAG_ELEMENTS: usize = 10;

const PROFESSION_CONTAINERS: &str = ".ShowDrivers_DriverProfession__value-text, .DriverProfession__value-text";
const PROFESSION_BLOCKS: &[&str] = &[
    ".ShowDrivers_DriverProfession__value-text",
    ".DriverProfession__value-text",
    ".DriverCardRow__value",
];

const DRIVER_INFO_ROWS: &str = ".row.row_theme_amber.row_gap_m.row_gutter_m.row_mode_flex";
const DRIVER_INFO_CELLS: &str = ".row__col";
const IP_TITLE: &str = "Водитель является ИП";
const PARTNERSHIP_TITLE: &str = "Тип партнерства";

const CUSTOM_TAGS_PER_SET: usize = 4;

/// What to look up on one driver card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPlan {
    pub url: String,
    pub presets: Vec<Preset>,
    #[serde(default)]
    pub custom_tags: BTreeMap<usize, Vec<String>>,
}

impl SearchPlan {
    /// Plan for `url` using the configured presets and tag sets.
    pub fn from_settings(url: impl Into<String>, settings: &SearchSettings) -> Self {
        Self {
            url: url.into(),
            presets: settings.presets.clone(),
            custom_tags: settings.custom_tags.clone(),
        }
    }

    fn needs_profession(&self) -> bool {
        self.presets.contains(&Preset::Profession)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub url: String,
    /// Tag containers were populated before the wait ran out.
    pub tags_loaded: bool,
    pub tag_texts: Vec<String>,
    pub profession: Option<ProfessionProbe>,
    pub driver: DriverInfo,
    /// One notice per preset, in plan order.
    pub notices: Vec<Notice>,
}

impl SearchReport {
    /// Hand every notice to `scheduler`.
    pub async fn deliver(&self, scheduler: &NotificationScheduler, timeout: Duration) -> Vec<NotifyOutcome> {
        let mut outcomes = Vec::with_capacity(self.notices.len());
        for notice in &self.notices {
            outcomes.push(scheduler.notify(notice.clone(), timeout).await);
        }
        outcomes
    }
}

/// Opens a driver card in a background tab and reports tags, profession and
/// partnership details.
#[derive(Clone)]
pub struct ButtonSearch {
    tabs: Arc<dyn TabHost>,
    settings: SearchSettings,
    icons: IconSettings,
}

impl std::fmt::Debug for ButtonSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ButtonSearch")
            .field("settings", &self.settings)
            .finish()
    }
}

impl ButtonSearch {
    pub fn new(tabs: Arc<dyn TabHost>, settings: SearchSettings, icons: IconSettings) -> Self {
        Self {
            tabs,
            settings,
            icons,
        }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Run `plan`. The tab is closed after the close delay whether or not the
    /// search succeeded.
    pub async fn run(&self, session: &Session, plan: &SearchPlan) -> Result<SearchReport, SearchError> {
        info!("button search: {}", plan.url);
        let tab = self.tabs.open(&plan.url).await?;
        let result = self.collect(session, tab.as_ref(), plan).await;

        if session.sleep(self.settings.close_delay).await.is_err() {
            debug!("button search: session ended before close delay");
        }
        if let Err(e) = tab.close().await {
            warn!("button search: failed to close tab for {}: {}", plan.url, e);
        }
        result
    }

    async fn collect(
        &self,
        session: &Session,
        tab: &dyn BackgroundTab,
        plan: &SearchPlan,
    ) -> Result<SearchReport, SearchError> {
        let waiter = ContainerWaiter::new(session.clone());
        let poll = self.settings.poll_interval;

        let tags = waiter
            .wait_for(
                "tag containers",
                PollOptions::bounded(poll, self.settings.tag_attempts),
                || probe_tag_containers(tab),
            )
            .await;
        let tags_loaded = match tags {
            PollOutcome::Cancelled => return Err(ended(session)),
            outcome => outcome.is_found(),
        };
        if tags_loaded {
            session.sleep(self.settings.settle).await?;
        }

        let profession = if plan.needs_profession() {
            let outcome = waiter
                .wait_for(
                    "profession block",
                    PollOptions::bounded(poll, self.settings.profession_attempts),
                    || async move { Probe::from((tab.count(PROFESSION_CONTAINERS).await > 0).then_some(())) },
                )
                .await;
            if matches!(outcome, PollOutcome::Cancelled) {
                return Err(ended(session));
            }
            let probe = read_profession(tab).await;
            // A missing block with nothing matched in the page counts as a failed lookup.
            if outcome.is_found() || probe.profession.is_some() {
                Some(probe)
            } else {
                None
            }
        } else {
            None
        };

        let driver = if self.settings.search_driver_info {
            let outcome = waiter
                .wait_for(
                    "driver info rows",
                    PollOptions::bounded(poll, self.settings.profession_attempts),
                    || probe_driver_info(tab),
                )
                .await;
            match outcome {
                PollOutcome::Cancelled => return Err(ended(session)),
                outcome => outcome.value().unwrap_or_default(),
            }
        } else {
            DriverInfo::default()
        };

        let tag_texts: Vec<String> = tab
            .texts(&TAG_TEXT_SELECTORS.join(", "))
            .await
            .into_iter()
            .filter(|t| !t.is_empty())
            .collect();

        let notices = plan
            .presets
            .iter()
            .enumerate()
            .map(|(i, preset)| self.render(i + 1, *preset, plan, &tag_texts, profession.as_ref(), &driver))
            .collect();

        Ok(SearchReport {
            url: plan.url.clone(),
            tags_loaded,
            tag_texts,
            profession,
            driver,
            notices,
        })
    }

    fn render(
        &self,
        number: usize,
        preset: Preset,
        plan: &SearchPlan,
        tag_texts: &[String],
        profession: Option<&ProfessionProbe>,
        driver: &DriverInfo,
    ) -> Notice {
        match preset {
            Preset::Tags => Notice::standard_tags(number, &detect_standard_tags(tag_texts), &self.icons),
            Preset::Profession => Notice::profile(number, profession, driver, &self.icons),
            Preset::CustomTags(set) => {
                let mut names = plan.custom_tags.get(&set).cloned().unwrap_or_default();
                names.resize(CUSTOM_TAGS_PER_SET, String::new());
                let found = detect_custom_tags(tag_texts, &names);
                let pairs: Vec<(String, bool)> = names.into_iter().zip(found).collect();
                Notice::custom_tags(number, set, &pairs, &self.icons)
            }
        }
    }
}

fn ended(session: &Session) -> SearchError {
    SearchError::Cancelled(SessionTornDown(session.id()))
}

async fn probe_tag_containers(tab: &dyn BackgroundTab) -> Probe<()> {
    let populated = |container: &str| {
        TAG_CONTAINER_CHILDREN
            .iter()
            .map(|child| format!("{container} {child}"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let first = tab.count(&populated(TAG_CONTAINER)).await > 0;
    let second = tab.count(&populated(TAG_CONTAINER_CONTENT)).await > 0;
    if !first && !second {
        return Probe::Pending;
    }

    if tab.count(TAG_ELEMENTS).await > 0 {
        return Probe::Ready(());
    }
    let mut total = 0;
    for selector in TAG_TEXT_SELECTORS {
        total += tab.count(selector).await;
    }
    if total > ENOUGH_TAG_ELEMENTS {
        Probe::Ready(())
    } else {
        Probe::Pending
    }
}

async fn read_profession(tab: &dyn BackgroundTab) -> ProfessionProbe {
    let mut blocks = Vec::new();
    for selector in PROFESSION_BLOCKS {
        blocks.extend(tab.texts(selector).await);
    }
    let page = tab.body_text().await;
    detect_profession(&blocks, &page)
}

/// Ready once both rows are present; a single row is kept as partial data.
async fn probe_driver_info(tab: &dyn BackgroundTab) -> Probe<DriverInfo> {
    let rows = tab.table(DRIVER_INFO_ROWS, DRIVER_INFO_CELLS).await;
    let info = driver_info_from_rows(&rows);
    match (&info.is_individual_entrepreneur, &info.partnership_type) {
        (Some(_), Some(_)) => Probe::Ready(info),
        (None, None) => Probe::Pending,
        _ => Probe::Partial(info),
    }
}

/// First cell is the row title, second the value.
pub fn driver_info_from_rows(rows: &[Vec<String>]) -> DriverInfo {
    let mut info = DriverInfo::default();
    for row in rows {
        let (Some(title), Some(value)) = (row.first(), row.get(1)) else {
            continue;
        };
        match title.trim() {
            IP_TITLE => info.is_individual_entrepreneur = Some(value.trim().to_string()),
            PARTNERSHIP_TITLE => info.partnership_type = Some(value.trim().to_string()),
            _ => {}
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(title: &str, value: &str) -> Vec<String> {
        vec![title.to_string(), value.to_string()]
    }

    #[test]
    fn driver_info_rows_are_matched_by_title() {
        let info = driver_info_from_rows(&[
            row("Город", "Москва"),
            row(" Водитель является ИП ", " Да "),
            vec!["Тип партнерства".to_string()],
            row("Тип партнерства", "Самозанятый"),
        ]);
        assert_eq!(info.is_individual_entrepreneur.as_deref(), Some("Да"));
        assert_eq!(info.partnership_type.as_deref(), Some("Самозанятый"));
    }

    #[test]
    fn plan_from_settings_copies_presets() {
        let settings = SearchSettings::default();
        let plan = SearchPlan::from_settings("https://example.test/card", &settings);
        assert_eq!(plan.presets, settings.presets);
        assert!(plan.needs_profession());
    }
}
