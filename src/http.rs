//! HTTP control surface: one scan session per watched page, fed with DOM
//! snapshots and lifecycle events by whatever drives the browser.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

use crate::core::config::ConfigSnapshot;
use crate::core::types::FactSet;
use crate::core::config::ScanSettings;
use crate::core::{AppState, SessionEntry, SessionPage};
use crate::dom::{HtmlSnapshotDom, MutationRecord};
use crate::notify::scheduler::RecordView;
use crate::notify::{ClickOutcome, NotifyOutcome};
use crate::pipeline::{ScanSession, SessionSignal};
use crate::search::{Preset, SearchError, SearchPlan, SearchReport, TestingReport};
use crate::watch::{MergeReport, StabilityPhase};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn api_error(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: error.into() }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub html: String,
    /// Page URL; relative links resolve against it.
    pub url: Option<String>,
    pub config: Option<ConfigSnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct WatchRequest {
    /// Page to open in a browser tab and watch.
    pub url: String,
    pub config: Option<ConfigSnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct DomUpdate {
    pub html: String,
    pub focused_text_input: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SignalRequest {
    pub signal: SessionSignal,
}

#[derive(Debug, Deserialize)]
pub struct BlockedRequest {
    pub blocked: bool,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub url: String,
    pub presets: Option<Vec<Preset>>,
    pub custom_tags: Option<BTreeMap<usize, Vec<String>>>,
}

#[derive(Debug, Deserialize)]
pub struct TestingRequest {
    pub license: String,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub phase: StabilityPhase,
    pub facts: FactSet,
    pub notifications: Vec<RecordView>,
    pub queued: usize,
    pub loading: bool,
    pub blocked: bool,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub report: SearchReport,
    pub outcomes: Vec<NotifyOutcome>,
}

#[derive(Debug, Serialize)]
pub struct TestingResponse {
    pub report: TestingReport,
    pub outcome: NotifyOutcome,
}

async fn view(scan: &ScanSession) -> SessionView {
    let scheduler = scan.scheduler();
    SessionView {
        id: scan.id(),
        phase: scan.phase(),
        facts: scan.facts(),
        notifications: scheduler.records().await,
        queued: scheduler.queued().await,
        loading: scheduler.is_loading().await,
        blocked: scheduler.is_blocked().await,
    }
}

async fn lookup(state: &AppState, id: Uuid) -> Result<SessionEntry, (StatusCode, Json<ErrorResponse>)> {
    state
        .session(id)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("no session {id}")))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/{id}", get(get_session).delete(end_session))
        .route("/watch", post(watch_page))
        .route("/sessions/{id}/dom", put(replace_dom))
        .route("/sessions/{id}/mutations", post(push_mutations))
        .route("/sessions/{id}/signal", post(signal))
        .route("/sessions/{id}/blocked", post(set_blocked))
        .route("/sessions/{id}/rescan", post(rescan))
        .route("/sessions/{id}/clear", post(clear_all))
        .route(
            "/sessions/{id}/notifications/{nid}/buttons/{index}",
            post(button_clicked),
        )
        .route("/sessions/{id}/notifications/{nid}/closed", post(notification_closed))
        .route("/sessions/{id}/search", post(button_search))
        .route("/sessions/{id}/testing", post(testing_search))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "dom-sentinel",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.session_ids().await.len(),
        "search_enabled": state.tabs.is_some(),
    }))
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<Uuid>> {
    Json(state.session_ids().await)
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<SessionView> {
    let mut dom = HtmlSnapshotDom::new(request.html);
    if let Some(raw) = request.url.as_deref() {
        let base = Url::parse(raw)
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("invalid url {raw}: {e}")))?;
        dom = dom.with_base_url(base);
    }
    let dom = Arc::new(dom);

    let scan = Arc::new(
        ScanSession::start(
            dom.clone(),
            state.notifications.clone(),
            state.clipboard.clone(),
            session_settings(&state, request.config),
        )
        .await,
    );
    let created = view(&scan).await;
    state
        .insert_session(SessionEntry {
            scan,
            page: SessionPage::Snapshot(dom),
        })
        .await;
    Ok(Json(created))
}

fn session_settings(state: &AppState, config: Option<ConfigSnapshot>) -> ScanSettings {
    match config {
        Some(snapshot) => state.settings.clone().with_snapshot(snapshot),
        None => state.settings.clone(),
    }
}

/// Open `url` in a browser tab and scan it with the tab's own mutation feed.
async fn watch_page(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WatchRequest>,
) -> ApiResult<SessionView> {
    Url::parse(&request.url)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("invalid url {}: {e}", request.url)))?;
    let tab = state
        .open_live_tab(&request.url)
        .await
        .ok_or_else(|| api_error(StatusCode::SERVICE_UNAVAILABLE, "no browser available to watch pages"))?
        .map_err(|e| api_error(StatusCode::BAD_GATEWAY, e.to_string()))?;
    let tab = Arc::new(tab);

    let scan = Arc::new(
        ScanSession::start(
            tab.clone(),
            state.notifications.clone(),
            state.clipboard.clone(),
            session_settings(&state, request.config),
        )
        .await,
    );
    info!("watching {} in session {}", request.url, scan.id());
    let created = view(&scan).await;
    state
        .insert_session(SessionEntry {
            scan,
            page: SessionPage::Live(tab),
        })
        .await;
    Ok(Json(created))
}

async fn get_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<SessionView> {
    let entry = lookup(&state, id).await?;
    Ok(Json(view(&entry.scan).await))
}

async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<serde_json::Value> {
    let entry = state
        .remove_session(id)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("no session {id}")))?;
    entry.scan.end().await;
    entry.page.close().await;
    Ok(Json(serde_json::json!({ "ended": id })))
}

async fn replace_dom(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(update): Json<DomUpdate>,
) -> StatusCode {
    let Some(entry) = state.session(id).await else {
        return StatusCode::NOT_FOUND;
    };
    let Some(dom) = entry.page.snapshot() else {
        return StatusCode::CONFLICT;
    };
    if let Some(focused) = update.focused_text_input {
        dom.set_focused_text_input(focused);
    }
    dom.replace(update.html);
    StatusCode::ACCEPTED
}

async fn push_mutations(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(batch): Json<Vec<MutationRecord>>,
) -> StatusCode {
    let Some(entry) = state.session(id).await else {
        return StatusCode::NOT_FOUND;
    };
    let Some(dom) = entry.page.snapshot() else {
        return StatusCode::CONFLICT;
    };
    dom.push_mutations(batch);
    StatusCode::ACCEPTED
}

async fn signal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<SignalRequest>,
) -> ApiResult<SessionView> {
    let entry = lookup(&state, id).await?;
    entry.scan.signal(request.signal).await;
    if request.signal == SessionSignal::Ended {
        state.remove_session(id).await;
        entry.page.close().await;
    }
    Ok(Json(view(&entry.scan).await))
}

async fn set_blocked(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<BlockedRequest>,
) -> ApiResult<SessionView> {
    let entry = lookup(&state, id).await?;
    entry.scan.scheduler().set_blocked(request.blocked).await;
    Ok(Json(view(&entry.scan).await))
}

async fn rescan(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<MergeReport> {
    let entry = lookup(&state, id).await?;
    Ok(Json(entry.scan.rescan().await))
}

async fn clear_all(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<serde_json::Value> {
    let entry = lookup(&state, id).await?;
    let cleared = entry.scan.scheduler().clear_all().await;
    Ok(Json(serde_json::json!({ "cleared": cleared })))
}

async fn button_clicked(
    State(state): State<Arc<AppState>>,
    Path((id, nid, index)): Path<(Uuid, String, usize)>,
) -> ApiResult<ClickOutcome> {
    let entry = lookup(&state, id).await?;
    Ok(Json(entry.scan.scheduler().handle_button_click(&nid, index).await))
}

async fn notification_closed(
    State(state): State<Arc<AppState>>,
    Path((id, nid)): Path<(Uuid, String)>,
) -> ApiResult<serde_json::Value> {
    let entry = lookup(&state, id).await?;
    let known = entry.scan.scheduler().handle_closed(&nid).await;
    Ok(Json(serde_json::json!({ "closed": known })))
}

fn search_failed(e: SearchError) -> (StatusCode, Json<ErrorResponse>) {
    error!("search error: {}", e);
    let status = match e {
        SearchError::EmptyLicense => StatusCode::BAD_REQUEST,
        SearchError::Cancelled(_) => StatusCode::GONE,
        SearchError::Tab(_) => StatusCode::BAD_GATEWAY,
    };
    api_error(status, e.to_string())
}

async fn button_search(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<SearchResponse> {
    let entry = lookup(&state, id).await?;
    let search = state
        .button_search()
        .ok_or_else(|| api_error(StatusCode::SERVICE_UNAVAILABLE, "no browser available for searches"))?;

    let mut plan = SearchPlan::from_settings(request.url, search.settings());
    if let Some(presets) = request.presets {
        plan.presets = presets;
    }
    if let Some(custom_tags) = request.custom_tags {
        plan.custom_tags = custom_tags;
    }

    let report = search
        .run(entry.scan.session(), &plan)
        .await
        .map_err(search_failed)?;
    let timeout = entry.scan.settings().snapshot.notification_timeout();
    let outcomes = report.deliver(entry.scan.scheduler(), timeout).await;
    info!("button search for {} produced {} notice(s)", plan.url, outcomes.len());
    Ok(Json(SearchResponse { report, outcomes }))
}

async fn testing_search(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<TestingRequest>,
) -> ApiResult<TestingResponse> {
    let entry = lookup(&state, id).await?;
    let search = state
        .testing_search()
        .ok_or_else(|| api_error(StatusCode::SERVICE_UNAVAILABLE, "no browser available for searches"))?;

    let report = search
        .run(entry.scan.session(), &request.license)
        .await
        .map_err(search_failed)?;
    let timeout = entry.scan.settings().snapshot.notification_timeout();
    let outcome = entry
        .scan
        .scheduler()
        .notify(report.notice.clone(), timeout)
        .await;
    Ok(Json(TestingResponse { report, outcome }))
}
