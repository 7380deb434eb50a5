use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::{
    config::Config,
    error::AnalyzeError,
    imaging::{self, NormalizeOptions},
    interpret,
    models::{AnalysisResult, HealthStatus, UploadedImage},
    prompt::{self, ANALYSIS_PROMPT},
    vision::{ChatCompletionClient, VisionModel, VisionRequest},
};

/// Room for multipart boundaries, part headers and the notes field on top of the image itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

const NO_STORE: &str = "no-store, no-cache, must-revalidate";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// `None` when the deployment endpoint or key is missing.
    pub model: Option<Arc<dyn VisionModel>>,
}

impl AppState {
    pub fn from_config(config: Config) -> Result<Self, AnalyzeError> {
        let model = ChatCompletionClient::from_config(&config.model)?
            .map(|client| Arc::new(client) as Arc<dyn VisionModel>);
        Ok(Self { config: Arc::new(config), model })
    }
}

pub fn app(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);
    Router::new()
        .route("/api/analyze", post(analyze_meal))
        .route("/api/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn analyze_meal(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("analyze", %request_id);

    match run_pipeline(&state, multipart).instrument(span.clone()).await {
        Ok(result) => ([(header::CACHE_CONTROL, NO_STORE)], Json(result)).into_response(),
        Err(e) => {
            span.in_scope(|| warn!(status = %e.status(), error = %e, "❌ Analysis failed"));
            e.into_response_with(!state.config.production)
        }
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        model_configured: state.model.is_some(),
        prompt_version: ANALYSIS_PROMPT.version,
        time: Utc::now(),
    })
}

/// ingress -> normalize -> interpret. Any failure aborts the request.
async fn run_pipeline(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<AnalysisResult, AnalyzeError> {
    // Checked before the body is even recognised as multipart, so a misconfigured server
    // answers the same way whatever it is sent.
    let model = state
        .model
        .clone()
        .ok_or_else(|| AnalyzeError::Configuration("model endpoint or API key is not configured".into()))?;

    let multipart = multipart
        .map_err(|e| AnalyzeError::MissingInput(format!("invalid multipart body: {}", e.body_text())))?;
    let config = &state.config;
    let (upload, notes) = read_upload(multipart, config.max_upload_bytes).await?;
    info!(
        "🚀 Received image: {} KB, content type {}",
        upload.size / 1024,
        upload.content_type.as_deref().unwrap_or("unknown")
    );

    let opts = NormalizeOptions {
        target_dimension: config.target_dimension,
        quality: config.target_quality,
        max_bytes: config.max_upload_bytes,
    };
    let normalized = tokio::task::spawn_blocking(move || imaging::normalize(&upload.bytes, &opts))
        .await
        .map_err(|e| AnalyzeError::ImageProcessing(format!("normalizer task: {e}")))??;
    info!(
        "🖼️ Sending {:.1} KB image to '{}' ({} bytes, {} base64 chars, passthrough={})",
        normalized.size_kb,
        model.model_name(),
        normalized.bytes.len(),
        normalized.base64.len(),
        normalized.passthrough
    );

    let user_text = prompt::user_text(notes.as_deref());
    let reply = model
        .complete(&VisionRequest {
            prompt: &ANALYSIS_PROMPT,
            user_text: &user_text,
            image_data_url: &normalized.data_url,
        })
        .await?;

    interpret::interpret(&reply, config.duplicate_policy)
}

/// Reads the `image` field (first one wins) and the optional `notes` field.
async fn read_upload(mut multipart: Multipart, max_bytes: usize) -> Result<(UploadedImage, Option<String>), AnalyzeError> {
    let mut image: Option<UploadedImage> = None;
    let mut notes: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(e, max_bytes))? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") if image.is_none() => {
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| multipart_error(e, max_bytes))?;
                if bytes.len() > max_bytes {
                    warn!("Rejecting {} byte upload (limit {})", bytes.len(), max_bytes);
                    return Err(AnalyzeError::ImageTooLarge { max: max_bytes });
                }
                image = Some(UploadedImage { size: bytes.len(), bytes, content_type });
            }
            Some("notes") => {
                notes = Some(field.text().await.map_err(|e| multipart_error(e, max_bytes))?);
            }
            _ => {}
        }
    }

    match image {
        Some(upload) if upload.size > 0 => Ok((upload, notes)),
        Some(_) => Err(AnalyzeError::MissingInput("image field is empty".into())),
        None => Err(AnalyzeError::MissingInput("no image field in request".into())),
    }
}

fn multipart_error(e: MultipartError, max_bytes: usize) -> AnalyzeError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AnalyzeError::ImageTooLarge { max: max_bytes }
    } else {
        AnalyzeError::MissingInput(format!("invalid multipart body: {}", e.body_text()))
    }
}
