mod common;

use std::sync::Arc;

use arcgis_sync::existence::ExistenceResolver;
use arcgis_sync::observability::MetricsRegistry;
use arcgis_sync::server::{AppState, router};
use arcgis_sync::sync::SyncOrchestrator;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use base64::Engine;
use common::{MockFeatureService, MockProvider, StaticAttachmentSource};
use serde_json::json;
use tower::ServiceExt;

fn app(service: Arc<MockFeatureService>) -> (axum::Router, Arc<MetricsRegistry>) {
	let metrics = Arc::new(MetricsRegistry::new());
	let orchestrator = SyncOrchestrator::new(
		common::settings(),
		Arc::new(MockProvider::new(service)),
		ExistenceResolver::Disabled,
		Arc::new(StaticAttachmentSource::default()),
		metrics.clone(),
	);
	let state = AppState {
		orchestrator: Arc::new(orchestrator),
		metrics: metrics.clone(),
	};
	(router(state), metrics)
}

fn push(body: String) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri("/")
		.header("content-type", "application/json")
		.body(Body::from(body))
		.unwrap()
}

fn envelope(document: &serde_json::Value) -> String {
	let data = base64::engine::general_purpose::STANDARD.encode(document.to_string());
	json!({
		"message": {"data": data, "messageId": "2070443601311540", "publishTime": "2021-02-26T19:13:55.749Z"},
		"subscription": "projects/example/subscriptions/sync"
	})
	.to_string()
}

#[tokio::test]
#[cfg(feature = "unit-tests")]
async fn test_push_message_is_synced() {
	let service = Arc::new(MockFeatureService::new("id"));
	let (app, _) = app(service.clone());

	let response = app
		.oneshot(push(envelope(&json!({"id": "A1", "name": "x"}))))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::NO_CONTENT);
	assert_eq!(service.apply_calls().len(), 1);
}

#[tokio::test]
#[cfg(feature = "unit-tests")]
async fn test_undecodable_envelope_is_service_unavailable() {
	let service = Arc::new(MockFeatureService::new("id"));
	let (app, _) = app(service.clone());

	let response = app.oneshot(push("{\"message\": {}}".into())).await.unwrap();
	assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
	let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
	assert_eq!(&body[..], b"Service Unavailable");
	assert!(service.apply_calls().is_empty());
}

#[tokio::test]
#[cfg(feature = "unit-tests")]
async fn test_health_endpoint() {
	let (app, _) = app(Arc::new(MockFeatureService::new("id")));
	let response = app
		.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
	assert_eq!(&body[..], b"ok");
}

#[tokio::test]
#[cfg(feature = "unit-tests")]
async fn test_metrics_endpoint_reflects_runs() {
	let service = Arc::new(MockFeatureService::new("id"));
	let (app, metrics) = app(service);

	let response = app
		.clone()
		.oneshot(push(envelope(&json!([{"id": "A1"}, {"id": "B2"}]))))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::NO_CONTENT);
	assert_eq!(metrics.features_created_total.get(), 2);

	let response = app
		.oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
	let text = String::from_utf8(body.to_vec()).unwrap();
	assert!(text.contains("arcgis_sync_messages_received_total 1"));
	assert!(text.contains("arcgis_sync_features_created_total 2"));
}
