//! HTTP endpoint that annotates documents for remote clients.
//!
//! Routes:
//! - `POST /?properties=<json>`: body and response are a MessagePack document.
//! - `GET /ping`: liveness, answers `pong`.
//!
//! Pipelines are rebuilt per request from the merged configuration, but
//! their stages come from the shared [`StagePool`], so models load once.

use std::sync::Arc;

use annota_core::{Document, PipelineConfig, Properties};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::client::MSGPACK;
use crate::engine::LocalPipeline;
use crate::error::PipelineError;
use crate::pool::StagePool;

/// Shared server state.
pub struct ServerState {
    pub pool: Arc<StagePool>,
    /// Applied under every request's own properties.
    pub defaults: Properties,
}

impl ServerState {
    pub fn new(pool: Arc<StagePool>, defaults: Properties) -> Self {
        Self { pool, defaults }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnnotateParams {
    properties: Option<String>,
}

/// Build the annotation router.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", post(annotate))
        .route("/ping", get(ping))
        .with_state(state)
}

/// Serve until the listener fails.
pub async fn serve(listener: TcpListener, state: Arc<ServerState>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "annotation server listening");
    }
    axum::serve(listener, router(state)).await
}

async fn ping() -> &'static str {
    "pong"
}

async fn annotate(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<AnnotateParams>,
    body: Bytes,
) -> Response {
    match run(&state, params, &body).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, MSGPACK)], bytes).into_response(),
        Err((status, message)) => {
            warn!(status = status.as_u16(), error = %message, "annotation request failed");
            (status, message).into_response()
        }
    }
}

async fn run(
    state: &ServerState,
    params: AnnotateParams,
    body: &[u8],
) -> Result<Vec<u8>, (StatusCode, String)> {
    let request = match params.properties.as_deref() {
        Some(json) => Properties::from_json(json)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid properties: {e}")))?,
        None => Properties::new(),
    };
    let props = state.defaults.merged(&request);
    let config = PipelineConfig::from_properties(&props)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let document: Document = rmp_serde::from_slice(body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid document: {e}")))?;

    let pipeline = LocalPipeline::build(&config, Arc::clone(&state.pool))
        .await
        .map_err(|e| (status_for(&e), e.to_string()))?;
    debug!(stages = %pipeline.stage_names().join(","), "annotating request");

    let document = pipeline
        .run_blocking(document)
        .await
        .into_result()
        .map_err(|e| (status_for(&e), e.to_string()))?;

    rmp_serde::to_vec_named(&document).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode response: {e}"),
        )
    })
}

/// Caller mistakes are 400; failures while building or running stages are 500.
fn status_for(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::UnknownStage(_)
        | PipelineError::CyclicDependency(_)
        | PipelineError::UnsatisfiableDependency(_)
        | PipelineError::MissingRequirement { .. }
        | PipelineError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
