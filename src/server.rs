//! HTTP surface: upload an image, get a caption, browse and download the history.

use std::io;
use std::sync::Arc;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::json;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::{CaptionError, HistoryError};
use crate::history::{HistoryEntry, HistoryStore};
use crate::worker::InferenceWorker;

pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

const INDEX_HTML: &str = include_str!("../static/index.html");

#[derive(Clone)]
pub struct AppState {
    worker: InferenceWorker,
    history: Arc<HistoryStore>,
}

impl AppState {
    pub fn new(worker: InferenceWorker, history: HistoryStore) -> Self {
        info!(path = %history.path().display(), "recording captions");
        Self {
            worker,
            history: Arc::new(history),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Caption(#[from] CaptionError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Upload(#[from] MultipartError),

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Caption(err) if err.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Upload(err) => err.status(),
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Caption(_) | ApiError::History(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = self.to_string();
        if status.is_server_error() {
            error!(%status, %message, "request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Serialize)]
struct CaptionResponse {
    caption: String,
    image_data: String,
    history_id: Option<Uuid>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/generate_caption", post(generate_caption))
        .route("/download_caption/:history_id", get(download_caption))
        .route("/history", get(list_history).delete(clear_history))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(config: &ServerConfig, state: AppState) -> io::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "caption server listening");
    axum::serve(listener, router(state)).await
}

/// Runs a history operation on the blocking pool.
async fn with_history<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&HistoryStore) -> Result<T, HistoryError> + Send + 'static,
    T: Send + 'static,
{
    let history = Arc::clone(&state.history);
    let result = tokio::task::spawn_blocking(move || op(&history))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(result?)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn generate_caption(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<CaptionResponse>, ApiError> {
    let mut multipart = multipart.map_err(|_| CaptionError::NoImage)?;

    let (filename, bytes) = loop {
        let field = match multipart.next_field().await? {
            Some(field) => field,
            None => return Err(CaptionError::NoImage.into()),
        };
        if field.name() != Some("image") {
            continue;
        }
        // a form value named `image` is not a file upload
        let filename = match field.file_name() {
            Some(name) => name.to_string(),
            None => continue,
        };
        if filename.is_empty() {
            return Err(CaptionError::EmptyFilename.into());
        }
        break (filename, field.bytes().await?);
    };

    info!(%filename, bytes = bytes.len(), "captioning upload");
    let image_data = STANDARD.encode(&bytes);
    let caption = state.worker.caption(bytes.to_vec()).await?;

    let entry = {
        let (image_data, caption) = (image_data.clone(), caption.clone());
        with_history(&state, move |history| history.append(image_data, caption)).await
    };
    let history_id = match entry {
        Ok(entry) => Some(entry.id),
        Err(err) => {
            warn!(error = %err, "caption not saved to history");
            None
        }
    };

    Ok(Json(CaptionResponse {
        caption,
        image_data,
        history_id,
    }))
}

async fn download_caption(
    State(state): State<AppState>,
    Path(history_id): Path<String>,
) -> Result<Response, ApiError> {
    let entry = with_history(&state, move |history| history.get(&history_id))
        .await?
        .ok_or(ApiError::NotFound("Caption not found"))?;

    let disposition = format!("attachment; filename=\"{}\"", entry.download_name());
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        entry.download_text(),
    )
        .into_response())
}

async fn list_history(State(state): State<AppState>) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    Ok(Json(with_history(&state, |history| history.entries()).await?))
}

async fn clear_history(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    with_history(&state, |history| history.clear()).await?;
    info!("history cleared");
    Ok(Json(json!({ "message": "History cleared successfully" })))
}
