use crate::config::Config;
use crate::ledger::{
    self, DEFAULT_LIMIT, LedgerError, ListQuery, ListResponse, RecordResponse, StatusResponse,
    VisitPayload,
};
use anyhow::anyhow;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<Config>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/status", get(status))
        .route("/api/v1/visitors", get(list_visitors).post(record_visit))
        .layer(TraceLayer::new_for_http())
        .layer(cors())
        .with_state(state)
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<String>,
    active: Option<String>,
}

async fn record_visit(
    State(state): State<ApiState>,
    payload: Result<Json<VisitPayload>, JsonRejection>,
) -> ApiResult<Json<RecordResponse>> {
    let Json(payload) = payload.map_err(|_| ApiError::BadRequest("Invalid input".to_string()))?;
    let db_path = state.config.db_path.clone();

    let recorded = tokio::task::spawn_blocking(move || {
        ledger::record_visit(&db_path, payload, Utc::now())
    })
    .await
    .map_err(|error| ApiError::internal("Failed to save visitor", anyhow!(error)))?
    .map_err(|error| ApiError::from_ledger(error, "Failed to save visitor"))?;

    info!(
        visit_count = recorded.visit_count(),
        outcome = recorded.message(),
        "visit recorded"
    );

    Ok(Json(RecordResponse {
        success: true,
        message: recorded.message().to_string(),
        visit_count: Some(recorded.visit_count()),
    }))
}

async fn list_visitors(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListResponse>> {
    let query = ListQuery {
        limit: parse_limit(params.limit.as_deref())?,
        active_only: parse_flag(params.active.as_deref())?,
    };
    let db_path = state.config.db_path.clone();

    let listing =
        tokio::task::spawn_blocking(move || ledger::list_visitors(&db_path, query, Utc::now()))
            .await
            .map_err(|error| ApiError::internal("Failed to fetch visitors", anyhow!(error)))?
            .map_err(|error| ApiError::from_ledger(error, "Failed to fetch visitors"))?;

    Ok(Json(ListResponse {
        success: true,
        visitors: listing.visitors,
        stats: listing.stats,
    }))
}

async fn status(State(state): State<ApiState>) -> ApiResult<Json<StatusResponse>> {
    let db_path = state.config.db_path.clone();

    let (total, last_visit_at) = tokio::task::spawn_blocking(move || ledger::latest_visit(&db_path))
        .await
        .map_err(|error| ApiError::internal("Failed to read status", anyhow!(error)))?
        .map_err(|error| ApiError::from_ledger(error, "Failed to read status"))?;

    Ok(Json(StatusResponse {
        status: "ok".to_string(),
        total,
        last_visit_at,
    }))
}

fn parse_limit(raw: Option<&str>) -> ApiResult<u32> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(DEFAULT_LIMIT),
        Some(value) => value
            .parse::<u32>()
            .ok()
            .filter(|limit| *limit > 0)
            .ok_or_else(|| ApiError::BadRequest("limit must be a positive integer".to_string())),
    }
}

fn parse_flag(raw: Option<&str>) -> ApiResult<bool> {
    match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") => Ok(false),
        Some("true" | "1" | "yes" | "on") => Ok(true),
        Some("false" | "0" | "no" | "off") => Ok(false),
        Some(_) => Err(ApiError::BadRequest(
            "active must be true or false".to_string(),
        )),
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Internal {
        message: &'static str,
        source: anyhow::Error,
    },
}

impl ApiError {
    fn internal(message: &'static str, source: anyhow::Error) -> Self {
        Self::Internal { message, source }
    }

    fn from_ledger(error: LedgerError, message: &'static str) -> Self {
        match error {
            LedgerError::InvalidInput(reason) => Self::BadRequest(reason.to_string()),
            LedgerError::Storage(source) => Self::internal(message, source),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Internal { message, source } => {
                error!(error = %format!("{source:#}"), "{message}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": message })),
                )
                    .into_response()
            }
        }
    }
}
