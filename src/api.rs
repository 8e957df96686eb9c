use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use shuttle_axum::axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::alert::{Actor, AlertId, DeliveryRecord, ProjectId};
use crate::dispatch::{DispatchEngine, DispatchSummary};
use crate::error::{DispatchError, IngestError};
use crate::ingest::dedup::{DuplicateReport, RejectedAlert};
use crate::ingest::mapper::FieldMapper;
use crate::ingest::{self, IngestRequest, TabularUpload};
use crate::store::AlertStore;

/// Header carrying the caller's identity for the delivery audit trail.
pub const ACTOR_HEADER: &str = "x-actor";
const DEFAULT_ACTOR: &str = "api";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AlertStore>,
    pub engine: Arc<DispatchEngine>,
    pub mapper: Arc<FieldMapper>,
}

impl AppState {
    /// The engine must share `store`.
    pub fn new(store: Arc<dyn AlertStore>, engine: Arc<DispatchEngine>, mapper: FieldMapper) -> Self {
        Self {
            store,
            engine,
            mapper: Arc::new(mapper),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/alerts", post(post_alerts))
        .route("/alerts/tabular", post(post_alerts_tabular))
        .route("/projects/{project_id}/dispatch", post(post_dispatch))
        .route("/deliveries/{alert_id}/reset", post(post_reset))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn actor_from(headers: &HeaderMap) -> Actor {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Actor::new)
        .unwrap_or_else(|| Actor::new(DEFAULT_ACTOR))
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub project_id: ProjectId,
    pub provider: String,
    pub accepted_count: usize,
    pub duplicates: Vec<DuplicateReport>,
    pub rejected: Vec<RejectedAlert>,
    /// Present when the project dispatched automatically.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

async fn post_alerts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    let actor = actor_from(&headers);
    ingest_and_dispatch(&state, &actor, req).await.map(Json)
}

async fn post_alerts_tabular(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(upload): Json<TabularUpload>,
) -> Result<Json<IngestResponse>, ApiError> {
    let actor = actor_from(&headers);
    ingest_and_dispatch(&state, &actor, upload.into_request())
        .await
        .map(Json)
}

async fn ingest_and_dispatch(
    state: &AppState,
    actor: &Actor,
    req: IngestRequest,
) -> Result<IngestResponse, ApiError> {
    let outcome = ingest::ingest(state.store.as_ref(), &state.mapper, actor, req).await?;

    let mut resp = IngestResponse {
        project_id: outcome.project_id.clone(),
        provider: outcome.provider,
        accepted_count: outcome.accepted.len(),
        duplicates: outcome.duplicates,
        rejected: outcome.rejected,
        dispatch: None,
        message: None,
    };

    let duplicated = resp.duplicates.len();
    match state
        .engine
        .dispatch_automatic(actor, &outcome.project_id, Some(outcome.accepted), duplicated)
        .await
    {
        Ok(summary) => resp.dispatch = Some(summary),
        Err(DispatchError::NotInAutomaticMode(p)) => {
            resp.message = Some(format!(
                "project '{p}' is not in automatic mode; alerts stored for later dispatch"
            ));
        }
        Err(e) => return Err(e.into()),
    }
    Ok(resp)
}

async fn post_dispatch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<Json<DispatchSummary>, ApiError> {
    let actor = actor_from(&headers);
    let summary = state
        .engine
        .dispatch_pending(&actor, &ProjectId::new(project_id))
        .await?;
    Ok(Json(summary))
}

async fn post_reset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(alert_id): Path<String>,
) -> Result<Json<DeliveryRecord>, ApiError> {
    let actor = actor_from(&headers);
    let rec = state
        .engine
        .reset_delivery(&actor, &AlertId(alert_id))
        .await?;
    Ok(Json(rec))
}

/// HTTP face of the error taxonomy.
#[derive(Debug)]
pub enum ApiError {
    Ingest(IngestError),
    Dispatch(DispatchError),
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        ApiError::Ingest(e)
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        ApiError::Dispatch(e)
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Ingest(IngestError::Validation(_)) => (StatusCode::BAD_REQUEST, "validation"),
            ApiError::Ingest(IngestError::UnrecognizedSchema { .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unrecognized_schema")
            }
            ApiError::Ingest(IngestError::Store(_)) | ApiError::Dispatch(DispatchError::Store(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "store")
            }
            ApiError::Dispatch(DispatchError::MissingProjectOrBatch(_)) => {
                (StatusCode::BAD_REQUEST, "missing_project_or_batch")
            }
            ApiError::Dispatch(DispatchError::ChannelNotFound(_)) => {
                (StatusCode::BAD_GATEWAY, "channel_not_found")
            }
            ApiError::Dispatch(DispatchError::NotInAutomaticMode(_)) => {
                (StatusCode::OK, "not_in_automatic_mode")
            }
            ApiError::Dispatch(DispatchError::AlertNotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Dispatch(DispatchError::AlreadySent(_)) => (StatusCode::CONFLICT, "already_sent"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let message = match &self {
            ApiError::Ingest(e) => e.to_string(),
            ApiError::Dispatch(e) => e.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(kind, error = %message, "request failed");
        } else {
            tracing::debug!(kind, error = %message, "request rejected");
        }

        let mut body = json!({ "kind": kind, "error": message });
        if let ApiError::Ingest(IngestError::UnrecognizedSchema { headers }) = &self {
            body["headers"] = json!(headers);
        }
        (status, Json(body)).into_response()
    }
}
