use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{Query, Request, State, rejection::QueryRejection},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::{
    apps::{AppRegistry, Application},
    config::Config,
    events::{EVENT_DETECTED_ATTACK, EventStore, event_kind},
    faults::{Admission, FaultController, token_preview},
    lists::{ListStore, ListUpdate, ListUpdateError},
    runtime_config::ConfigStore,
};

mod helpers;

use helpers::{parse_json_body, raw_token};

pub const ROUTE_HEALTHZ: &str = "/healthz";
pub const ROUTE_APPS: &str = "/api/runtime/apps";
pub const ROUTE_APPS_DOWN: &str = "/api/runtime/apps/down";
pub const ROUTE_APPS_TIMEOUT: &str = "/api/runtime/apps/timeout";
pub const ROUTE_APPS_UP: &str = "/api/runtime/apps/up";
pub const ROUTE_CONFIG: &str = "/api/runtime/config";
pub const ROUTE_CONFIG_UPDATE: &str = "/api/runtime/config/update";
pub const ROUTE_EVENTS: &str = "/api/runtime/events";
pub const ROUTE_FIREWALL_LISTS: &str = "/api/runtime/firewall/lists";
pub const ROUTE_REALTIME_CONFIG: &str = "/config";

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    apps: Arc<AppRegistry>,
    faults: Arc<FaultController>,
    configs: Arc<ConfigStore>,
    lists: Arc<ListStore>,
    events: Arc<EventStore>,
    started_at: DateTime<Utc>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let configs = Arc::new(ConfigStore::new(config.heartbeat_interval_ms));
        Self {
            apps: Arc::new(AppRegistry::new(config.token_prefix.clone())),
            faults: Arc::new(FaultController::new(config.timeout_delay())),
            lists: Arc::new(ListStore::new(configs.clone())),
            configs,
            events: Arc::new(EventStore::new()),
            config: Arc::new(config),
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("Token is required")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Service is down")]
    ServiceDown,
    #[error("Service timed out")]
    TimedOut,
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken | Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::ServiceDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::TimedOut => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<ListUpdateError> for ApiError {
    fn from(error: ListUpdateError) -> Self {
        Self::BadRequest(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "message": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    service: String,
    uptime_seconds: i64,
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route(ROUTE_CONFIG, get(get_config).post(update_config))
        .route(ROUTE_CONFIG_UPDATE, put(update_config))
        .route(ROUTE_REALTIME_CONFIG, get(realtime_config))
        .route(ROUTE_EVENTS, get(list_events).post(capture_event))
        .route(ROUTE_FIREWALL_LISTS, get(get_lists).post(update_lists))
        .route(ROUTE_APPS_DOWN, post(mark_down))
        .route(ROUTE_APPS_TIMEOUT, post(mark_timeout))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            runtime_token_gate,
        ));

    Router::new()
        .route(ROUTE_HEALTHZ, get(health))
        .route(ROUTE_APPS, post(create_app))
        .route(ROUTE_APPS_UP, post(clear_faults))
        .merge(protected)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
}

/// Entry gate for every protected route: fault state first (down, then
/// timeout), then token presence, then token resolution.
async fn runtime_token_gate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = raw_token(request.headers());
    let admission = state.faults.admit(&token).await;
    tracing::info!(
        token = %token_preview(&token),
        method = %request.method(),
        path = %request.uri().path(),
        fault = admission.state().as_str(),
        "runtime request"
    );

    match admission {
        Admission::Pass => {}
        Admission::Down => return ApiError::ServiceDown.into_response(),
        Admission::Deferred(failure) => {
            if failure.wait().await {
                tracing::warn!(token = %token_preview(&token), "deferred failure fired");
                return ApiError::TimedOut.into_response();
            }
            // Cancelled by a clear: keep the request open until the client
            // gives up, as a hung upstream would.
            return std::future::pending::<Response>().await;
        }
    }

    if token.is_empty() {
        return ApiError::MissingToken.into_response();
    }
    let Some(app) = state.apps.lookup(&token).await else {
        return ApiError::InvalidToken.into_response();
    };

    request.extensions_mut().insert(app);
    next.run(request).await
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: state.config.service_name.clone(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
    })
}

async fn create_app(State(state): State<AppState>) -> Response {
    let app = state.apps.register().await;
    tracing::info!(service_id = app.id, token = %app.token, "created app");
    Json(json!({ "token": app.token })).into_response()
}

async fn get_config(
    State(state): State<AppState>,
    Extension(app): Extension<Application>,
) -> Response {
    Json(state.configs.get(&app).await).into_response()
}

async fn update_config(
    State(state): State<AppState>,
    Extension(app): Extension<Application>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let partial = parse_json_body(&body)?;
    let updated = state.configs.update(&app, &partial).await;
    Ok(Json(updated).into_response())
}

async fn realtime_config(
    State(state): State<AppState>,
    Extension(app): Extension<Application>,
) -> Response {
    let config = state.configs.get(&app).await;
    Json(json!({
        "serviceId": app.id,
        "configUpdatedAt": config.config_updated_at(),
    }))
    .into_response()
}

async fn list_events(
    State(state): State<AppState>,
    Extension(app): Extension<Application>,
    query: Result<Query<EventsQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let events = match query.kind.as_deref() {
        Some(kind) => state.events.list_of_kind(&app, kind).await,
        None => state.events.list(&app).await,
    };
    Ok(Json(events).into_response())
}

async fn capture_event(
    State(state): State<AppState>,
    Extension(app): Extension<Application>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let event = parse_json_body(&body)?;
    let attack = event_kind(&event) == Some(EVENT_DETECTED_ATTACK);
    state.events.append(&app, event).await;

    if attack {
        return Ok(Json(json!({ "success": true })).into_response());
    }
    Ok(Json(state.configs.get(&app).await).into_response())
}

async fn get_lists(
    State(state): State<AppState>,
    Extension(app): Extension<Application>,
) -> Response {
    Json(state.lists.snapshot(&app).await).into_response()
}

async fn update_lists(
    State(state): State<AppState>,
    Extension(app): Extension<Application>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload = parse_json_body(&body).map_err(|_| ListUpdateError::InvalidBody)?;
    let update = ListUpdate::from_json(&payload).inspect_err(|error| {
        tracing::warn!(service_id = app.id, reason = %error, "rejected list update");
    })?;
    state.lists.apply(&app, update).await;
    Ok(Json(json!({ "success": true })).into_response())
}

async fn mark_down(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.faults.mark_down(&raw_token(&headers)).await;
    Json(json!({ "message": "Service is down" })).into_response()
}

async fn mark_timeout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.faults.mark_timeout(&raw_token(&headers)).await;
    Json(json!({ "message": "Service is timeout" })).into_response()
}

async fn clear_faults(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.faults.clear(&raw_token(&headers)).await;
    Json(json!({ "message": "Service is up" })).into_response()
}
