use dom_sentinel::core::config::IconSettings;
use dom_sentinel::core::session::Session;
use dom_sentinel::dom::HtmlSnapshotDom;
use dom_sentinel::notify::{MemoryClipboard, MemoryHost, NotificationScheduler, SchedulerSettings};
use dom_sentinel::search::{
    ButtonSearch, Preset, SearchError, SearchPlan, SearchSettings, SnapshotTabHost, TabError, TestingSearch,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

const CARD_URL: &str = "https://admin.test/drivers/42";
const TESTING_URL: &str = "https://edu.test/export-results";

const DRIVER_CARD: &str = r#"<html><body>
  <div class="DriversShowDriverDiagnosticsTags">
    <div class="DiagnosticsTagWithTopics__tagTitle"><div>auto_courier</div></div>
    <div class="DiagnosticsTagWithTopics__tagTitle"><div>vip_driver</div></div>
  </div>
  <div class="DriverProfession__value-text">Курьер на машине</div>
  <div class="row row_theme_amber row_gap_m row_gutter_m row_mode_flex">
    <div class="row__col">Водитель является ИП</div><div class="row__col">Нет</div>
  </div>
  <div class="row row_theme_amber row_gap_m row_gutter_m row_mode_flex">
    <div class="row__col">Тип партнерства</div><div class="row__col">Самозанятый</div>
  </div>
</body></html>"#;

const TESTING_FORM: &str = r#"<html><body>
  <form><input class="form-control"><button class="btn btn-default-fr">Найти</button></form>
</body></html>"#;

const TESTING_RESULTS: &str = r#"<html><body>
  <table class="list-table"><tbody>
    <tr class="list-table-item"><td class="list-table-item__col">taxi_basic</td><td class="list-table-item__col">90</td></tr>
    <tr class="list-table-item"><td class="list-table-item__col">Delivery</td><td class="list-table-item__col">100</td></tr>
    <tr class="list-table-item"><td class="list-table-item__col">broken row</td></tr>
  </tbody></table>
</body></html>"#;

fn settings() -> SearchSettings {
    SearchSettings {
        testing_url: TESTING_URL.to_string(),
        ..SearchSettings::default()
    }
}

fn button_search(tabs: Arc<SnapshotTabHost>) -> ButtonSearch {
    ButtonSearch::new(tabs, settings(), IconSettings::default())
}

fn plan(presets: Vec<Preset>) -> SearchPlan {
    let mut custom_tags = BTreeMap::new();
    custom_tags.insert(1, vec!["VIP".to_string(), "auto_courier".to_string()]);
    SearchPlan {
        url: CARD_URL.to_string(),
        presets,
        custom_tags,
    }
}

fn messages(items: &[dom_sentinel::notify::host::NotificationItem]) -> Vec<String> {
    items.iter().map(|i| format!("{} {}", i.title, i.message)).collect()
}

#[tokio::test(start_paused = true)]
async fn driver_card_yields_one_notice_per_preset() {
    init_logger();
    let tabs = Arc::new(SnapshotTabHost::new());
    tabs.insert(CARD_URL, Arc::new(HtmlSnapshotDom::new(DRIVER_CARD)));
    let session = Session::new();

    let report = button_search(tabs.clone())
        .run(
            &session,
            &plan(vec![Preset::Tags, Preset::Profession, Preset::CustomTags(1)]),
        )
        .await
        .unwrap();

    assert!(report.tags_loaded);
    assert_eq!(report.driver.is_individual_entrepreneur.as_deref(), Some("Нет"));
    assert_eq!(report.driver.partnership_type.as_deref(), Some("Самозанятый"));
    assert_eq!(report.notices.len(), 3);

    let tags = &report.notices[0];
    assert_eq!(tags.title, "Стандартные теги (Пресет 1)");
    assert_eq!(
        messages(&tags.items),
        vec!["auto_courier: ✅ Есть", "walking_courier: ❌ Отсутствует"]
    );

    let profile = &report.notices[1];
    assert_eq!(profile.title, "Карточка (Пресет 2)");
    assert_eq!(
        messages(&profile.items),
        vec![
            "Профессия: курьер на машине",
            "ИП: Нет",
            "Тип партнерства: Самозанятый"
        ]
    );

    let custom = &report.notices[2];
    assert_eq!(custom.title, "Пользовательские теги #1 (Пресет 3)");
    assert_eq!(
        messages(&custom.items),
        vec![
            "VIP: ✅ Есть",
            "auto_courier: ✅ Есть",
            "Тег 3: [Не указано]",
            "Тег 4: [Не указано]"
        ]
    );

    assert_eq!(tabs.opened(), vec![CARD_URL.to_string()]);
    assert_eq!(tabs.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn delivered_notices_are_spaced_by_the_guard() {
    init_logger();
    let tabs = Arc::new(SnapshotTabHost::new());
    tabs.insert(CARD_URL, Arc::new(HtmlSnapshotDom::new(DRIVER_CARD)));
    let session = Session::new();
    let host = Arc::new(MemoryHost::new());
    let scheduler = NotificationScheduler::new(
        session.clone(),
        host.clone(),
        Arc::new(MemoryClipboard::new()),
        SchedulerSettings::default(),
    );

    let report = button_search(tabs)
        .run(&session, &plan(vec![Preset::Tags, Preset::CustomTags(1)]))
        .await
        .unwrap();
    let outcomes = report.deliver(&scheduler, Duration::from_secs(54)).await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(host.creates(), 1);

    sleep(Duration::from_millis(350)).await;
    assert_eq!(host.creates(), 2);
    assert_eq!(scheduler.records().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn containers_rendered_late_are_waited_for() {
    init_logger();
    let dom = Arc::new(HtmlSnapshotDom::new("<html><body><p>Загрузка</p></body></html>"));
    let tabs = Arc::new(SnapshotTabHost::new());
    tabs.insert(CARD_URL, dom.clone());
    let session = Session::new();

    let late = dom.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(500)).await;
        late.replace(DRIVER_CARD);
    });

    let report = button_search(tabs.clone())
        .run(&session, &plan(vec![Preset::Profession]))
        .await
        .unwrap();
    assert!(report.tags_loaded);
    let profession = report.profession.unwrap().profession.unwrap();
    assert_eq!(profession.key(), "cargo/courier/on-car");
    assert_eq!(tabs.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_card_exhausts_waits_and_reports_failed_lookup() {
    init_logger();
    let tabs = Arc::new(SnapshotTabHost::new());
    tabs.insert(
        CARD_URL,
        Arc::new(HtmlSnapshotDom::new("<html><body><p>пусто</p></body></html>")),
    );
    let session = Session::new();

    let started = tokio::time::Instant::now();
    let report = button_search(tabs.clone())
        .run(&session, &plan(vec![Preset::Profession]))
        .await
        .unwrap();

    assert!(!report.tags_loaded);
    assert!(report.profession.is_none());
    assert_eq!(report.driver, Default::default());
    assert_eq!(report.notices[0].items[0].message, "[Поиск не удался]");
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(tabs.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn ending_the_session_cancels_the_search_and_closes_the_tab() {
    init_logger();
    let tabs = Arc::new(SnapshotTabHost::new());
    tabs.insert(
        CARD_URL,
        Arc::new(HtmlSnapshotDom::new("<html><body></body></html>")),
    );
    let session = Session::new();

    let ender = session.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(300)).await;
        ender.end();
    });

    let err = button_search(tabs.clone())
        .run(&session, &plan(vec![Preset::Tags]))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::Cancelled(_)));
    assert_eq!(tabs.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_card_url_is_a_navigation_error() {
    init_logger();
    let tabs = Arc::new(SnapshotTabHost::new());
    let err = button_search(tabs.clone())
        .run(&Session::new(), &plan(vec![Preset::Tags]))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::Tab(TabError::Navigation { .. })));
    assert!(tabs.opened().is_empty());
}

fn testing_search(tabs: Arc<SnapshotTabHost>) -> TestingSearch {
    TestingSearch::new(tabs, settings(), IconSettings::default())
}

#[tokio::test(start_paused = true)]
async fn testing_search_submits_license_and_orders_results() {
    init_logger();
    let tabs = Arc::new(SnapshotTabHost::new());
    tabs.insert(TESTING_URL, Arc::new(HtmlSnapshotDom::new(TESTING_FORM)));
    tabs.on_submit(TESTING_URL, TESTING_RESULTS);

    let report = testing_search(tabs.clone())
        .run(&Session::new(), " 7700ab1234 ")
        .await
        .unwrap();

    assert_eq!(report.license, "7700AB1234");
    assert_eq!(
        tabs.submissions(),
        vec![("input.form-control".to_string(), "7700AB1234".to_string())]
    );
    assert_eq!(
        report.results,
        vec![
            ("Delivery".to_string(), "100".to_string()),
            ("taxi_basic".to_string(), "90".to_string()),
        ]
    );
    assert_eq!(report.notice.title, "Тестирование ВУ 7700AB1234");
    assert_eq!(report.notice.items.len(), 1);
    assert_eq!(report.notice.items[0].message, "Delivery: 100    |    taxi_basic: 90");
    assert_eq!(tabs.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn testing_search_without_results_reports_nothing_found() {
    init_logger();
    let tabs = Arc::new(SnapshotTabHost::new());
    tabs.insert(TESTING_URL, Arc::new(HtmlSnapshotDom::new(TESTING_FORM)));

    let report = tokio_test::assert_ok!(testing_search(tabs.clone()).run(&Session::new(), "7700AB1234").await);
    assert!(report.results.is_empty());
    assert_eq!(report.notice.items[0].message, "Данные не найдены!");
    assert_eq!(tabs.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn testing_search_gives_up_when_the_form_never_appears() {
    init_logger();
    let tabs = Arc::new(SnapshotTabHost::new());
    tabs.insert(
        TESTING_URL,
        Arc::new(HtmlSnapshotDom::new("<html><body><p>503</p></body></html>")),
    );

    let err = testing_search(tabs.clone())
        .run(&Session::new(), "7700AB1234")
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::Tab(TabError::Script(_))));
    assert!(tabs.submissions().is_empty());
    assert_eq!(tabs.closed(), 1);
}

#[tokio::test]
async fn blank_license_is_rejected_before_opening_a_tab() {
    init_logger();
    let tabs = Arc::new(SnapshotTabHost::new());
    let err = tokio_test::assert_err!(testing_search(tabs.clone()).run(&Session::new(), "   ").await);
    assert!(matches!(err, SearchError::EmptyLicense));
    assert!(tabs.opened().is_empty());
}
