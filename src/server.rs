//! HTTP surface: routes, extraction and hand-off to the [`Broker`].

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::broker::Broker;
use crate::config::BrokerConfig;
use crate::envelope::ErrorResponse;
use crate::error::{BrokerError, CODE_INVALID_INPUT, CODE_INVALID_MULTIPART, Mode};
use crate::request::{self, AnalysisRequest, BlockUpload};

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
}

pub fn router(broker: Arc<Broker>, config: &BrokerConfig) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route(
            "/api/analyze",
            post(analyze).layer(DefaultBodyLimit::max(config.max_json_bytes)),
        )
        .route(
            "/api/analyze-block",
            post(analyze_block).layer(DefaultBodyLimit::max(config.max_upload_bytes)),
        )
        .with_state(AppState { broker })
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn analyze(State(state): State<AppState>, body: Result<Bytes, BytesRejection>) -> Response {
    let request = match body {
        Ok(body) => request::parse_tx(&body),
        Err(rejection) => Err(BrokerError::validation(
            CODE_INVALID_INPUT,
            rejection.body_text(),
        )),
    };
    respond(&state, Mode::Tx, request).await
}

async fn analyze_block(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let request = match multipart {
        Ok(multipart) => read_block_upload(multipart).await,
        // Not a multipart body at all: no files were sent.
        Err(rejection) => {
            debug!(reason = %rejection.body_text(), "block request is not multipart");
            Err(request::missing_files())
        }
    };
    respond(&state, Mode::Block, request).await
}

async fn read_block_upload(mut multipart: Multipart) -> Result<AnalysisRequest, BrokerError> {
    let mut upload = BlockUpload::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if !BlockUpload::wants(&name) {
            continue;
        }
        let data = field.bytes().await.map_err(multipart_error)?;
        upload.add(&name, data)?;
    }
    upload.finish()
}

fn multipart_error(e: MultipartError) -> BrokerError {
    BrokerError::validation(CODE_INVALID_MULTIPART, e.body_text())
}

async fn respond(
    state: &AppState,
    mode: Mode,
    request: Result<AnalysisRequest, BrokerError>,
) -> Response {
    let outcome = match request {
        Ok(request) => state.broker.analyze(request).await,
        Err(err) => Err(err),
    };

    match outcome {
        Ok(result) => {
            info!(?mode, "analysis succeeded");
            result.into_response()
        }
        Err(err) => {
            if err.is_validation() {
                debug!(?mode, code = err.code(mode), error = %err, "rejected request");
            } else {
                error!(?mode, code = err.code(mode), error = %err, "analysis failed");
            }
            ErrorResponse::new(mode, err).into_response()
        }
    }
}
