use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{BackgroundTab, SearchError, SearchSettings, TabError, TabHost};
use crate::core::config::IconSettings;
use crate::core::session::{Session, SessionTornDown};
use crate::notify::Notice;
use crate::watch::{ContainerWaiter, PollOptions, PollOutcome, Probe};

const SEARCH_INPUT: &str = "input.form-control";
const SEARCH_BUTTON: &str = "button.btn.btn-default-fr";
const RESULT_ROWS: &str = "table.list-table tbody tr.list-table-item";
const RESULT_CELLS: &str = "td.list-table-item__col";

/// Form fields get this many polls before the search gives up on them.
const FORM_ATTEMPTS: u32 = 50;

/// Courses listed first, matched as case-insensitive substrings.
pub const PRIORITY_COURSES: &[&str] = &[
    "delivery",
    "weight_surcharge",
    "delivery_slot",
    "cargo",
    "cargo_expeditor",
];

#[derive(Debug, Clone, Serialize)]
pub struct TestingReport {
    pub license: String,
    /// `(course, score)` pairs, priority courses first.
    pub results: Vec<(String, String)>,
    pub notice: Notice,
}

/// Turn result rows into `(course, score)` pairs. Rows with fewer than two
/// cells are skipped; priority courses move to the front, keeping page order
/// within each group.
pub fn order_results(rows: &[Vec<String>]) -> Vec<(String, String)> {
    let (priority, other): (Vec<_>, Vec<_>) = rows
        .iter()
        .filter_map(|row| match row.as_slice() {
            [course, score, ..] => Some((course.trim().to_string(), score.trim().to_string())),
            _ => None,
        })
        .partition(|(course, _)| {
            let course = course.to_lowercase();
            PRIORITY_COURSES.iter().any(|p| course.contains(p))
        });
    priority.into_iter().chain(other).collect()
}

/// Looks up a driver's test results on the education export page.
#[derive(Clone)]
pub struct TestingSearch {
    tabs: Arc<dyn TabHost>,
    settings: SearchSettings,
    icons: IconSettings,
}

impl std::fmt::Debug for TestingSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestingSearch")
            .field("url", &self.settings.testing_url)
            .finish()
    }
}

impl TestingSearch {
    pub fn new(tabs: Arc<dyn TabHost>, settings: SearchSettings, icons: IconSettings) -> Self {
        Self {
            tabs,
            settings,
            icons,
        }
    }

    pub async fn run(&self, session: &Session, license: &str) -> Result<TestingReport, SearchError> {
        let license = license.trim().to_uppercase();
        if license.is_empty() {
            return Err(SearchError::EmptyLicense);
        }

        info!("testing search for {}", license);
        let tab = self.tabs.open(&self.settings.testing_url).await?;
        let result = self.collect(session, tab.as_ref(), &license).await;
        if let Err(e) = tab.close().await {
            warn!("testing search: failed to close tab: {}", e);
        }

        let results = result?;
        let notice = Notice::testing(&license, &results, &self.icons);
        Ok(TestingReport {
            license,
            results,
            notice,
        })
    }

    async fn collect(
        &self,
        session: &Session,
        tab: &dyn BackgroundTab,
        license: &str,
    ) -> Result<Vec<(String, String)>, SearchError> {
        let waiter = ContainerWaiter::new(session.clone());

        let form = waiter
            .wait_for(
                "testing search form",
                PollOptions::bounded(self.settings.poll_interval, FORM_ATTEMPTS),
                || async move {
                    let ready = tab.count(SEARCH_INPUT).await > 0 && tab.count(SEARCH_BUTTON).await > 0;
                    Probe::from(ready.then_some(()))
                },
            )
            .await;
        match form {
            PollOutcome::Found { .. } => {}
            PollOutcome::Cancelled => return Err(SessionTornDown(session.id()).into()),
            PollOutcome::Exhausted { timeout, .. } => {
                return Err(TabError::Script(timeout.to_string()).into());
            }
        }

        if !tab.submit(SEARCH_INPUT, license, SEARCH_BUTTON).await? {
            return Err(TabError::Script("search form disappeared before submit".to_string()).into());
        }
        debug!("testing search submitted for {}", license);

        let rows = waiter
            .wait_for(
                "testing results table",
                PollOptions::bounded(self.settings.testing_poll, self.settings.testing_attempts),
                || async move {
                    let rows = tab.table(RESULT_ROWS, RESULT_CELLS).await;
                    Probe::from((!rows.is_empty()).then_some(rows))
                },
            )
            .await;
        match rows {
            PollOutcome::Cancelled => Err(SessionTornDown(session.id()).into()),
            // An empty table still yields a notice saying nothing was found.
            outcome => Ok(order_results(&outcome.value().unwrap_or_default())),
        }
    }
}
