use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use opencv::core::Mat;
use serde::{Deserialize, Serialize};

use crate::alert::{AlertDispatcher, FallAlert, WebhookNotifier};
use crate::error::FallError;
use crate::inference::{build_alert, Verdict, VideoDetector};
use crate::model::ModelSpec;
use crate::pose::PoseExtractor;

pub type DynExtractor = Box<dyn PoseExtractor<Mat> + Send>;

#[derive(Clone)]
pub struct AppState {
    pub detector: Arc<Mutex<VideoDetector<DynExtractor>>>,
    pub alerts: Option<Arc<AlertDispatcher<WebhookNotifier>>>,
}

impl AppState {
    pub fn new(
        detector: VideoDetector<DynExtractor>,
        alerts: Option<AlertDispatcher<WebhookNotifier>>,
    ) -> Self {
        Self {
            detector: Arc::new(Mutex::new(detector)),
            alerts: alerts.map(Arc::new),
        }
    }
}

#[derive(Deserialize)]
struct DetectRequest {
    /// Path on the server's filesystem.
    video: PathBuf,
}

#[derive(Serialize)]
struct DetectResponse {
    source: String,
    verdict: Verdict,
    missing_poses: usize,
    alerted: bool,
}

#[derive(Serialize)]
struct ModelResponse {
    spec: ModelSpec,
    parameters: usize,
    frame_skip: usize,
    window_size: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/model", get(model_handler))
        .route("/api/detect", post(detect_handler))
        .with_state(state)
}

pub async fn start_server(state: AppState, port: u16) -> Result<(), std::io::Error> {
    let app = router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        axum::Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn status_for(err: &FallError) -> StatusCode {
    match err {
        FallError::EmptyInput => StatusCode::UNPROCESSABLE_ENTITY,
        FallError::Alert(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn model_handler(State(state): State<AppState>) -> Response {
    let detector = match state.detector.lock() {
        Ok(d) => d,
        Err(_) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, "detector lock error"),
    };
    let classifier = detector.classifier();
    axum::Json(ModelResponse {
        spec: classifier.spec().clone(),
        parameters: classifier.num_parameters(),
        frame_skip: detector.config().frame_skip,
        window_size: detector.config().window_size,
    })
    .into_response()
}

async fn detect_handler(
    State(state): State<AppState>,
    axum::Json(request): axum::Json<DetectRequest>,
) -> Response {
    let detector = Arc::clone(&state.detector);
    let video = request.video;
    let source = video.display().to_string();

    let blocking_source = source.clone();
    let joined = tokio::task::spawn_blocking(move || -> Result<(FallAlert, usize), Response> {
        let mut detector = detector.lock().map_err(|_| {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "detector lock error")
        })?;
        let detection = detector
            .detect_file(&video)
            .map_err(|e| error_response(status_for(&e), e))?;
        Ok((build_alert(&blocking_source, &detection), detection.missing_poses))
    })
    .await;

    let (alert, missing_poses) = match joined {
        Ok(Ok(result)) => result,
        Ok(Err(response)) => return response,
        Err(e) => {
            tracing::error!(source = %source, error = %e, "detection task failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e);
        }
    };

    if let Err(e) = alert.verdict.clone().non_empty() {
        tracing::warn!(source = %source, "no frames could be read");
        return error_response(status_for(&e), e);
    }

    let mut alerted = false;
    if let Some(dispatcher) = &state.alerts {
        match dispatcher.dispatch(&alert).await {
            Ok(sent) => alerted = sent,
            Err(e) => {
                tracing::error!(source = %source, error = %e, "alert delivery failed");
                let err = FallError::from(e);
                return error_response(status_for(&err), err);
            }
        }
    }

    axum::Json(DetectResponse {
        source,
        verdict: alert.verdict,
        missing_poses,
        alerted,
    })
    .into_response()
}
