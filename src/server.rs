//! HTTP surface over [`Dashboard`].
//!
//! Every failure is translated into a small JSON payload here. Raw store
//! errors are logged but never sent to the client.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::model::ProjectType;
use crate::query::filter::{ProjectTypeFilter, StatusFilter};
use crate::query::period::TimePeriod;
use crate::Dashboard;

const REFRESH_ACTION: &str = "refresh-cache";

/// Build the router with the dashboard as shared state.
pub fn router(dashboard: Arc<Dashboard>) -> Router {
    Router::new()
        .route("/api/dashboard", get(dashboard_get).post(dashboard_post))
        .route(
            "/api/background-refresh",
            get(background_refresh).post(health_probe),
        )
        .with_state(dashboard)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, dashboard: Arc<Dashboard>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("Failed to bind to {addr}: {e}")))?;
    let bound = listener
        .local_addr()
        .map_err(|e| Error::Config(format!("Failed to get local addr: {e}")))?;
    log::info!("Listening on http://{bound}");

    axum::serve(listener, router(dashboard))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Shutting down");
        })
        .await
        .map_err(|e| Error::Other(format!("server error: {e}")))
}

/// Query parameters of `GET /api/dashboard`, named as the frontend sends them.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub project: Option<String>,
    pub time_period: Option<String>,
    pub type_filter: Option<String>,
    pub status_filter: Option<String>,
    pub company: Option<String>,
    pub project_type: Option<String>,
    pub team_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionQuery {
    pub action: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SecretQuery {
    pub secret: Option<String>,
}

#[derive(Serialize)]
struct DataResponse<T: Serialize> {
    data: T,
}

/// Failures a handler can report.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    /// The store failed; `empty` is the payload shape the caller expected.
    Unavailable { empty: Value },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response(),
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response()
            }
            ApiError::Unavailable { empty } => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "data": empty, "error": "upstream unavailable" })),
            )
                .into_response(),
        }
    }
}

impl ApiError {
    fn from_error(e: Error, empty: Value) -> Self {
        match e {
            Error::InvalidPeriod(_) | Error::InvalidFilter(_) => ApiError::BadRequest(e.to_string()),
            other => {
                log::error!("Dashboard request failed: {other}");
                ApiError::Unavailable { empty }
            }
        }
    }
}

fn required<'a>(value: &'a Option<String>, message: &str) -> std::result::Result<&'a str, ApiError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(message.to_string()))
}

fn bad_request(e: Error) -> ApiError {
    ApiError::BadRequest(e.to_string())
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ── Handlers ───────────────────────────────────────────────────────

pub async fn dashboard_get(
    State(dashboard): State<Arc<Dashboard>>,
    Query(q): Query<DashboardQuery>,
) -> std::result::Result<Response, ApiError> {
    let kind = required(&q.kind, "Invalid type parameter")?;
    // Team views take neither parameter, so they are only parsed where used.
    let period = || TimePeriod::parse(q.time_period.as_deref().unwrap_or("")).map_err(bad_request);
    let status_filter = || StatusFilter::parse(q.status_filter.as_deref().unwrap_or("")).map_err(bad_request);
    log::debug!("Dashboard request: type={kind}");

    let response = match kind {
        "project-analytics" => {
            let project = required(&q.project, "Project name required")?;
            let data = dashboard
                .get_project_analytics(project, period()?)
                .await
                .map_err(|e| ApiError::from_error(e, Value::Null))?;
            Json(DataResponse { data: data.as_deref() }).into_response()
        }
        "all-projects" => {
            let type_filter =
                ProjectTypeFilter::parse(q.type_filter.as_deref().unwrap_or("")).map_err(bad_request)?;
            let data = dashboard
                .get_aggregated_analytics(type_filter, status_filter()?, period()?)
                .await
                .map_err(|e| ApiError::from_error(e, json!([])))?;
            Json(DataResponse { data: &*data }).into_response()
        }
        "company-projects" => {
            let company = required(&q.company, "Company and project type required")?;
            let raw_type = required(&q.project_type, "Company and project type required")?;
            let project_type = ProjectType::normalize(raw_type)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown project type: {raw_type}")))?;
            let data = dashboard
                .get_company_analytics(company, project_type, status_filter()?, period()?)
                .await
                .map_err(|e| ApiError::from_error(e, json!([])))?;
            Json(DataResponse { data: &*data }).into_response()
        }
        "team-analytics" => {
            let team = required(&q.team_id, "Team ID required")?;
            let data = dashboard
                .get_team_analytics(team)
                .await
                .map_err(|e| ApiError::from_error(e, Value::Null))?;
            Json(DataResponse { data: data.as_deref() }).into_response()
        }
        "all-teams" => {
            let data = dashboard
                .get_all_teams_analytics()
                .await
                .map_err(|e| ApiError::from_error(e, json!([])))?;
            Json(DataResponse { data: &*data }).into_response()
        }
        _ => return Err(ApiError::BadRequest("Invalid type parameter".into())),
    };
    Ok(response)
}

pub async fn dashboard_post(
    State(dashboard): State<Arc<Dashboard>>,
    Query(q): Query<ActionQuery>,
) -> std::result::Result<Response, ApiError> {
    if q.action.as_deref() != Some(REFRESH_ACTION) {
        return Err(ApiError::BadRequest("Invalid action".into()));
    }
    let report = dashboard.refresh_cache().await;
    Ok(Json(json!({ "success": report.success, "message": report.message })).into_response())
}

/// Scheduler hook: refresh the cache when the shared secret matches exactly.
pub async fn background_refresh(
    State(dashboard): State<Arc<Dashboard>>,
    Query(q): Query<SecretQuery>,
) -> std::result::Result<Response, ApiError> {
    if !dashboard.config().secret_matches(q.secret.as_deref()) {
        log::warn!("Rejected background refresh with bad secret");
        return Err(ApiError::Unauthorized);
    }
    log::info!("Background refresh started");
    let report = dashboard.refresh_cache().await;
    Ok(Json(json!({
        "success": report.success,
        "message": report.message,
        "timestamp": timestamp(),
    }))
    .into_response())
}

pub async fn health_probe() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": timestamp(),
        "message": "Background refresh service is running",
    }))
}
