pub mod attachments;
pub mod config;
pub mod existence;
pub mod gis;
pub mod mapping;
pub mod observability;
pub mod server;
pub mod sync;

use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};

use crate::attachments::HttpAttachmentSource;
use crate::config::{ExistenceMode, Settings};
use crate::existence::{
	ExistenceResolver, ExistingFeatureIndex, FeatureIndexStore, MemoryIndexStore, PgIndexStore,
};
use crate::gis::ArcGisProvider;
use crate::observability::MetricsRegistry;
use crate::sync::SyncOrchestrator;

/// Select the existence check from configuration. The index store is
/// PostgreSQL when `index_store.database_url` is set, in memory otherwise.
pub async fn build_existence(settings: &Settings) -> anyhow::Result<ExistenceResolver> {
	let resolver = match settings.existence_mode() {
		Some(ExistenceMode::Arcgis) => ExistenceResolver::Remote {
			id_field: settings.mapping.id_field.clone().unwrap_or_default(),
		},
		Some(ExistenceMode::Firestore) => {
			let kind = settings.arcgis.feature_service.id.clone().unwrap_or_default();
			let store: Arc<dyn FeatureIndexStore> = match &settings.index_store.database_url {
				Some(url) => Arc::new(
					PgIndexStore::connect(url, &settings.index_store.table, &kind).await?,
				),
				None => {
					warn!("No index_store.database_url configured, the existence index is not persistent");
					Arc::new(MemoryIndexStore::new())
				}
			};
			let index = ExistingFeatureIndex::open(store, settings.high_workload)
				.await
				.context("opening the existence index")?;
			ExistenceResolver::Index(index)
		}
		None => ExistenceResolver::Disabled,
	};
	match resolver.mode() {
		Some(mode) => info!("Existence check: {:?}", mode),
		None => info!("Existence check disabled, every record is created"),
	}
	Ok(resolver)
}

/// Wire the production collaborators into an orchestrator.
pub async fn build_orchestrator(
	settings: Settings,
	metrics: Arc<MetricsRegistry>,
) -> anyhow::Result<SyncOrchestrator> {
	let provider = ArcGisProvider::new(
		settings.arcgis.clone(),
		settings.mapping.disable_updated_at,
	)
	.context("building the feature service client")?;
	let source = HttpAttachmentSource::new(
		&settings.arcgis.transport,
		settings.attachments.bearer_token.clone(),
	)
	.context("building the attachment client")?;
	let existence = build_existence(&settings).await?;

	Ok(SyncOrchestrator::new(
		settings,
		Arc::new(provider),
		existence,
		Arc::new(source),
		metrics,
	))
}

/// Serve the pub/sub push endpoint until the process is stopped.
pub async fn serve(settings: Settings, metrics: Arc<MetricsRegistry>) -> anyhow::Result<()> {
	let addr = format!("{}:{}", settings.host, settings.port);
	let orchestrator = Arc::new(build_orchestrator(settings, metrics.clone()).await?);

	let app = server::router(server::AppState {
		orchestrator,
		metrics,
	});

	let listener = tokio::net::TcpListener::bind(&addr)
		.await
		.with_context(|| format!("binding {}", addr))?;
	info!("Listening on http://{} (POST /, GET /health, GET /metrics)", addr);

	axum::serve(listener, app)
		.with_graceful_shutdown(async {
			let _ = tokio::signal::ctrl_c().await;
			info!("Shutting down");
		})
		.await
		.context("serving HTTP")?;
	Ok(())
}
