//! HTTP API and the MJPEG live stream.

use crate::engine::{EngineError, EngineHandle};
use crate::pipeline::STREAM_CONTENT_TYPE;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{Local, Utc};
use rollcall_core::Identity;
use rollcall_store::{AttendanceFilter, Store, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub store: Arc<Mutex<Store>>,
    /// Open `/video_feed` responses.
    streams: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(engine: EngineHandle, store: Store) -> Self {
        Self {
            engine,
            store: Arc::new(Mutex::new(store)),
            streams: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Engine(#[from] EngineError),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(e) | ApiError::Engine(EngineError::Store(e)) => match e {
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::Duplicate(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Engine(e) => match e {
                EngineError::IdentityNotFound(_) => StatusCode::NOT_FOUND,
                EngineError::NoSamples { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                EngineError::Sensor(_) | EngineError::Camera(_) | EngineError::ChannelClosed => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self.status_code() {
            StatusCode::BAD_REQUEST => "BAD_REQUEST",
            StatusCode::NOT_FOUND => "NOT_FOUND",
            StatusCode::CONFLICT => "CONFLICT",
            StatusCode::UNPROCESSABLE_ENTITY => "NO_SAMPLES",
            StatusCode::SERVICE_UNAVAILABLE => "UNAVAILABLE",
            _ => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        let body = Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Run `f` against the HTTP-side connection on the blocking pool.
async fn with_store<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || {
        let guard = store
            .lock()
            .map_err(|_| ApiError::Internal("store lock poisoned".into()))?;
        f(&guard).map_err(ApiError::from)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/video_feed", get(video_feed))
        .route("/temperature", get(temperature))
        .route("/status", get(status))
        .route("/attendance", get(attendance))
        .route("/attendance/export", get(export_attendance))
        .route("/attendance/restart", post(restart_attendance))
        .route("/identities", get(list_identities).post(create_identity))
        .route("/identities/{id}", put(update_identity).delete(delete_identity))
        .route("/identities/{id}/enroll", post(enroll_identity))
        .route("/gallery/reload", post(reload_gallery))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// One live stream client. The camera is released when the last one leaves.
struct StreamSession {
    engine: EngineHandle,
    streams: Arc<AtomicUsize>,
}

impl StreamSession {
    fn open(state: &AppState) -> Self {
        let active = state.streams.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(active, "video stream opened");
        Self {
            engine: state.engine.clone(),
            streams: state.streams.clone(),
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        let active = self.streams.fetch_sub(1, Ordering::SeqCst) - 1;
        if active == 0 {
            self.engine.release_camera();
        }
        tracing::info!(active, "video stream closed");
    }
}

async fn video_feed(State(state): State<AppState>) -> Response {
    let session = StreamSession::open(&state);

    // One frame is produced per poll, so a dropped body stops the loop.
    let frames = futures::stream::unfold(session, |session| async move {
        match session.engine.next_frame().await {
            Ok(chunk) => Some((Ok::<_, std::io::Error>(chunk), session)),
            Err(e) => {
                tracing::warn!(error = %e, "video stream ended");
                None
            }
        }
    });

    ([(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)], Body::from_stream(frames)).into_response()
}

async fn temperature(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let temperature = state.engine.read_temperature().await?;
    Ok(Json(json!({ "temperature": temperature })))
}

async fn status(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let engine = state.engine.status().await?;
    let identities = with_store(&state, |s| s.list_identities()).await?.len();
    Ok(Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "identities": identities,
        "gallery": engine.gallery,
        "tolerance": engine.tolerance,
    })))
}

async fn attendance(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(with_store(&state, |s| s.latest_per_identity()).await?))
}

async fn export_attendance(State(state): State<AppState>) -> ApiResult<Response> {
    let rows = with_store(&state, |s| s.report()).await?;
    let mut csv = Vec::new();
    rollcall_store::write_csv(&rows, &Local, &mut csv).map_err(|e| ApiError::Internal(e.to_string()))?;

    let filename = format!(
        "attachment; filename=\"Attendance_Export_{}.csv\"",
        Local::now().format("%Y%m%d_%H%M%S")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, filename),
        ],
        csv,
    )
        .into_response())
}

/// Clear today's records (UTC day).
async fn restart_attendance(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let midnight = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .ok_or_else(|| ApiError::Internal("invalid midnight".into()))?;
    let removed = with_store(&state, move |s| s.purge(AttendanceFilter::Since(midnight))).await?;
    Ok(Json(json!({ "removed": removed })))
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct IdentityView {
    pub id: i64,
    pub name: String,
    pub reference: Option<String>,
    pub enrolled: bool,
}

impl From<Identity> for IdentityView {
    fn from(identity: Identity) -> Self {
        Self {
            id: identity.id,
            name: identity.name,
            reference: identity.reference,
            enrolled: identity.embeddings.is_some(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IdentityForm {
    pub name: String,
    #[serde(default)]
    pub reference: Option<String>,
}

impl IdentityForm {
    /// Trimmed name and reference; a blank reference becomes `None`.
    fn validated(self) -> ApiResult<(String, Option<String>)> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ApiError::BadRequest("name must not be empty".into()));
        }
        let reference = self
            .reference
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        Ok((name, reference))
    }
}

async fn list_identities(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let identities = with_store(&state, |s| s.list_identities()).await?;
    Ok(Json(identities.into_iter().map(IdentityView::from).collect::<Vec<_>>()))
}

async fn create_identity(
    State(state): State<AppState>,
    Json(form): Json<IdentityForm>,
) -> ApiResult<impl IntoResponse> {
    let (name, reference) = form.validated()?;
    let identity = with_store(&state, move |s| s.create_identity(&name, reference.as_deref())).await?;
    Ok((StatusCode::CREATED, Json(IdentityView::from(identity))))
}

async fn update_identity(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(form): Json<IdentityForm>,
) -> ApiResult<impl IntoResponse> {
    let (name, reference) = form.validated()?;
    let identity = with_store(&state, move |s| s.update_identity(id, &name, reference.as_deref())).await?;
    refresh_gallery(&state).await;
    Ok(Json(IdentityView::from(identity)))
}

async fn delete_identity(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    if !with_store(&state, move |s| s.delete_identity(id)).await? {
        return Err(StoreError::NotFound(id).into());
    }
    refresh_gallery(&state).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct EnrollParams {
    pub samples: Option<usize>,
}

async fn enroll_identity(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<EnrollParams>,
) -> ApiResult<impl IntoResponse> {
    if params.samples == Some(0) {
        return Err(ApiError::BadRequest("samples must be at least 1".into()));
    }
    Ok(Json(state.engine.enroll(id, params.samples).await?))
}

async fn reload_gallery(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.reload_gallery().await?))
}

/// Identity edits change what the gallery matches against.
async fn refresh_gallery(state: &AppState) {
    if let Err(e) = state.engine.reload_gallery().await {
        tracing::warn!(error = %e, "gallery reload failed");
    }
}
