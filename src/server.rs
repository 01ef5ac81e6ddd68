use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use base64::Engine;
use log::{debug, error};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::observability::MetricsRegistry;
use crate::sync::{SyncOrchestrator, SyncOutcome};

/// Application state passed to handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
	pub orchestrator: Arc<SyncOrchestrator>,
	pub metrics: Arc<MetricsRegistry>,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
	#[error("envelope is not valid JSON: {0}")]
	Json(#[from] serde_json::Error),

	#[error("message data is not valid base64: {0}")]
	Base64(#[from] base64::DecodeError),
}

#[derive(Debug, Deserialize)]
struct PushEnvelope {
	message: PushMessage,
}

#[derive(Debug, Deserialize)]
struct PushMessage {
	data: String,
}

/// Decode a pub/sub push envelope `{"message": {"data": "<base64 JSON>"}}`
/// into the JSON document it carries.
pub fn decode_envelope(body: &[u8]) -> Result<Value, EnvelopeError> {
	let envelope: PushEnvelope = serde_json::from_slice(body)?;
	let bytes = base64::engine::general_purpose::STANDARD.decode(envelope.message.data.trim())?;
	Ok(serde_json::from_slice(&bytes)?)
}

fn respond(outcome: SyncOutcome) -> axum::response::Response {
	let (body, status) = outcome.as_response();
	let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
	(status, body).into_response()
}

/// Pub/sub push endpoint: one sync run per delivered message.
pub async fn pubsub_push(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
	let document = match decode_envelope(&body) {
		Ok(doc) => doc,
		Err(e) => {
			error!("Extraction of subscription failed: {}", e);
			return respond(SyncOutcome::ServiceUnavailable);
		}
	};
	debug!("Received message: {}", document);

	respond(state.orchestrator.process(&document).await)
}

pub async fn health() -> impl IntoResponse {
	(StatusCode::OK, "ok")
}

/// Prometheus metrics endpoint: returns metrics in Prometheus text format
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
	(StatusCode::OK, state.metrics.encode())
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/", post(pubsub_push))
		.route("/health", get(health))
		.route("/metrics", get(metrics_handler))
		.with_state(state)
}
