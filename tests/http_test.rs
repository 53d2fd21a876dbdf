use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use dom_sentinel::core::config::SentinelConfig;
use dom_sentinel::dom::HtmlSnapshotDom;
use dom_sentinel::notify::{MemoryClipboard, MemoryHost};
use dom_sentinel::search::SnapshotTabHost;
use dom_sentinel::{http, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

const TESTING_URL: &str = "https://edu.test/export-results";

const TICKET_PAGE: &str = r#"<html><body>
  <a href="/chat?ticket_id=ABCDEF0123456789ABCDEF01">ticket</a>
  <a href="https://admin.test/ru/">country</a>
</body></html>"#;

struct TestApp {
    router: Router,
    host: Arc<MemoryHost>,
    clipboard: Arc<MemoryClipboard>,
    tabs: Arc<SnapshotTabHost>,
}

fn app(with_tabs: bool) -> TestApp {
    let host = Arc::new(MemoryHost::new());
    let clipboard = Arc::new(MemoryClipboard::new());
    let tabs = Arc::new(SnapshotTabHost::new());

    let mut state = AppState::new(SentinelConfig::default(), host.clone(), clipboard.clone());
    state.search_settings.testing_url = TESTING_URL.to_string();
    if with_tabs {
        state = state.with_tabs(tabs.clone());
    }
    TestApp {
        router: http::router(Arc::new(state)),
        host,
        clipboard,
        tabs,
    }
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_ticket_session(router: &Router) -> String {
    let (status, body) = call(
        router,
        Method::POST,
        "/sessions",
        Some(json!({ "html": TICKET_PAGE, "url": "https://support.test/tickets/" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_search_availability() {
    init_logger();
    let app = app(false);
    let (status, body) = call(&app.router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["sessions"], 0);
    assert_eq!(body["search_enabled"], false);
}

#[tokio::test(start_paused = true)]
async fn created_session_scans_the_submitted_page() {
    init_logger();
    let app = app(false);
    let id = create_ticket_session(&app.router).await;

    let (status, body) = call(&app.router, Method::GET, &format!("/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "complete_unstable");
    let facts = body["facts"].as_array().unwrap();
    assert_eq!(facts.len(), 2);
    assert_eq!(facts[0]["kind"], "ticket");
    assert_eq!(facts[0]["id"], "abcdef0123456789abcdef01");
    assert_eq!(facts[1]["kind"], "country");
    assert_eq!(facts[1]["name"], "Россия");

    let (_, listed) = call(&app.router, Method::GET, "/sessions", None).await;
    assert_eq!(listed, json!([id]));
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    init_logger();
    let app = app(false);
    let missing = uuid::Uuid::new_v4();

    let (status, body) = call(&app.router, Method::GET, &format!("/sessions/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("no session"));

    let (status, _) = call(
        &app.router,
        Method::PUT,
        &format!("/sessions/{missing}/dom"),
        Some(json!({ "html": "<html></html>" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_page_url_is_rejected() {
    init_logger();
    let app = app(false);
    let (status, _) = call(
        &app.router,
        Method::POST,
        "/sessions",
        Some(json!({ "html": TICKET_PAGE, "url": "not a url" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn button_click_copies_the_value_behind_it() {
    init_logger();
    let app = app(false);
    let id = create_ticket_session(&app.router).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    let (_, body) = call(&app.router, Method::GET, &format!("/sessions/{id}"), None).await;
    assert_eq!(body["phase"], "stable");
    let notifications = body["notifications"].as_array().unwrap();
    assert_eq!(notifications.len(), 1);
    let nid = notifications[0]["id"].as_str().unwrap().to_string();

    let (status, clicked) = call(
        &app.router,
        Method::POST,
        &format!("/sessions/{id}/notifications/{nid}/buttons/0"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(clicked, json!({ "outcome": "copied", "value": "Россия" }));
    assert_eq!(app.clipboard.last().as_deref(), Some("Россия"));

    let (_, missing) = call(
        &app.router,
        Method::POST,
        &format!("/sessions/{id}/notifications/{nid}/buttons/5"),
        None,
    )
    .await;
    assert_eq!(missing["outcome"], "no_such_button");
}

#[tokio::test(start_paused = true)]
async fn dom_updates_flow_into_the_running_session() {
    init_logger();
    let app = app(false);
    let id = create_ticket_session(&app.router).await;

    let updated = TICKET_PAGE.replace(
        "</body>",
        r#"<a href="https://admin.test/driver_license/7700ab1234">license</a></body>"#,
    );
    let (status, _) = call(
        &app.router,
        Method::PUT,
        &format!("/sessions/{id}/dom"),
        Some(json!({ "html": updated })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    let (_, body) = call(&app.router, Method::GET, &format!("/sessions/{id}"), None).await;
    assert_eq!(body["facts"].as_array().unwrap().len(), 3);
    assert_eq!(app.host.creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn loading_signal_holds_notices_until_complete() {
    init_logger();
    let app = app(false);
    let id = create_ticket_session(&app.router).await;

    let (_, body) = call(
        &app.router,
        Method::POST,
        &format!("/sessions/{id}/signal"),
        Some(json!({ "signal": "loading_started" })),
    )
    .await;
    assert_eq!(body["loading"], true);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(app.host.creates(), 0);

    let (_, body) = call(
        &app.router,
        Method::POST,
        &format!("/sessions/{id}/signal"),
        Some(json!({ "signal": "loading_complete" })),
    )
    .await;
    assert_eq!(body["queued"], 0);
    assert_eq!(app.host.creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn deleting_a_session_clears_its_notifications() {
    init_logger();
    let app = app(false);
    let id = create_ticket_session(&app.router).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(app.host.live().len(), 1);

    let (status, body) = call(&app.router, Method::DELETE, &format!("/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ended"], id);
    assert!(app.host.live().is_empty());

    let (status, _) = call(&app.router, Method::GET, &format!("/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn searches_need_a_tab_host() {
    init_logger();
    let app = app(false);
    let id = create_ticket_session(&app.router).await;

    let (status, _) = call(
        &app.router,
        Method::POST,
        &format!("/sessions/{id}/testing"),
        Some(json!({ "license": "7700AB1234" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test(start_paused = true)]
async fn testing_search_notifies_through_the_session() {
    init_logger();
    let app = app(true);
    app.tabs.insert(
        TESTING_URL,
        Arc::new(HtmlSnapshotDom::new(
            r#"<html><body><input class="form-control"><button class="btn btn-default-fr">go</button></body></html>"#,
        )),
    );
    app.tabs.on_submit(
        TESTING_URL,
        r#"<html><body><table class="list-table"><tbody>
          <tr class="list-table-item"><td class="list-table-item__col">cargo</td><td class="list-table-item__col">88</td></tr>
        </tbody></table></body></html>"#,
    );
    let id = create_ticket_session(&app.router).await;

    let (status, body) = call(
        &app.router,
        Method::POST,
        &format!("/sessions/{id}/testing"),
        Some(json!({ "license": "7700ab1234" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["report"]["license"], "7700AB1234");
    assert_eq!(body["report"]["results"], json!([["cargo", "88"]]));
    assert_eq!(body["outcome"]["outcome"], "created");
    assert_eq!(app.tabs.closed(), 1);

    let (status, _) = call(
        &app.router,
        Method::POST,
        &format!("/sessions/{id}/testing"),
        Some(json!({ "license": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn button_search_on_unknown_card_is_a_bad_gateway() {
    init_logger();
    let app = app(true);
    let id = create_ticket_session(&app.router).await;

    let (status, body) = call(
        &app.router,
        Method::POST,
        &format!("/sessions/{id}/search"),
        Some(json!({ "url": "https://admin.test/drivers/404", "presets": ["tags"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().is_some());
}

#[tokio::test(start_paused = true)]
async fn host_button_press_and_dismissal_reach_the_owning_session() {
    init_logger();
    let host = Arc::new(MemoryHost::new());
    let clipboard = Arc::new(MemoryClipboard::new());
    let state = Arc::new(AppState::new(SentinelConfig::default(), host.clone(), clipboard.clone()));
    let _events = state.spawn_host_events();
    let router = http::router(state.clone());

    let other = create_ticket_session(&router).await;
    let (_, created) = call(
        &router,
        Method::POST,
        "/sessions",
        Some(json!({
            "html": TICKET_PAGE.replace("ABCDEF", "FEDCBA"),
            "url": "https://support.test/tickets/"
        })),
    )
    .await;
    let owner = created["id"].as_str().unwrap().to_string();
    tokio::time::sleep(Duration::from_millis(600)).await;

    let (_, body) = call(&router, Method::GET, &format!("/sessions/{owner}"), None).await;
    let nid = body["notifications"][0]["id"].as_str().unwrap().to_string();

    host.press(&nid, 0);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(clipboard.last().as_deref(), Some("Россия"));

    assert!(host.close(&nid));
    tokio::time::sleep(Duration::from_millis(10)).await;
    let (_, body) = call(&router, Method::GET, &format!("/sessions/{owner}"), None).await;
    assert_eq!(body["notifications"], json!([]));
    let (_, body) = call(&router, Method::GET, &format!("/sessions/{other}"), None).await;
    assert_eq!(body["notifications"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn watching_a_live_page_needs_a_browser() {
    init_logger();
    let app = app(true);
    let (status, body) = call(
        &app.router,
        Method::POST,
        "/watch",
        Some(json!({ "url": "https://support.test/tickets/1" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("no browser"));

    let (status, _) = call(&app.router, Method::POST, "/watch", Some(json!({ "url": "nope" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
