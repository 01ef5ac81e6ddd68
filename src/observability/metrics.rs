use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Central registry for all Prometheus metrics
pub struct MetricsRegistry {
	registry: Registry,

	// Inbound
	pub messages_received_total: IntCounter,
	pub records_mapped_total: IntCounter,
	pub records_rejected_total: IntCounter,

	// Remote edits
	pub features_created_total: IntCounter,
	pub features_updated_total: IntCounter,
	pub features_deleted_total: IntCounter,
	pub apply_edits_failures_total: IntCounter,

	// Attachments
	pub attachments_uploaded_total: IntCounter,
	pub attachment_failures_total: IntCounter,

	// Existence index
	pub index_commit_failures_total: IntCounter,

	pub sync_duration_seconds: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
	let c = IntCounter::with_opts(Opts::new(name, help))?;
	registry.register(Box::new(c.clone()))?;
	Ok(c)
}

impl MetricsRegistry {
	pub fn try_new() -> prometheus::Result<Self> {
		let registry = Registry::new();

		let messages_received_total = counter(
			&registry,
			"arcgis_sync_messages_received_total",
			"Total number of messages received",
		)?;
		let records_mapped_total = counter(
			&registry,
			"arcgis_sync_records_mapped_total",
			"Total number of records produced by the field mapping",
		)?;
		let records_rejected_total = counter(
			&registry,
			"arcgis_sync_records_rejected_total",
			"Records dropped because of a missing required field, an empty id or an undefined layer",
		)?;
		let features_created_total = counter(
			&registry,
			"arcgis_sync_features_created_total",
			"Features created in the feature service",
		)?;
		let features_updated_total = counter(
			&registry,
			"arcgis_sync_features_updated_total",
			"Features updated in the feature service",
		)?;
		let features_deleted_total = counter(
			&registry,
			"arcgis_sync_features_deleted_total",
			"Stale features deleted after a layer move",
		)?;
		let apply_edits_failures_total = counter(
			&registry,
			"arcgis_sync_apply_edits_failures_total",
			"Failed applyEdits calls",
		)?;
		let attachments_uploaded_total = counter(
			&registry,
			"arcgis_sync_attachments_uploaded_total",
			"Attachments uploaded to features",
		)?;
		let attachment_failures_total = counter(
			&registry,
			"arcgis_sync_attachment_failures_total",
			"Attachments that could not be fetched or uploaded",
		)?;
		let index_commit_failures_total = counter(
			&registry,
			"arcgis_sync_index_commit_failures_total",
			"Failed existence index commits",
		)?;

		let sync_duration_seconds = Histogram::with_opts(
			HistogramOpts::new(
				"arcgis_sync_run_duration_seconds",
				"Duration of one sync run in seconds",
			)
			.buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
		)?;
		registry.register(Box::new(sync_duration_seconds.clone()))?;

		Ok(Self {
			registry,
			messages_received_total,
			records_mapped_total,
			records_rejected_total,
			features_created_total,
			features_updated_total,
			features_deleted_total,
			apply_edits_failures_total,
			attachments_uploaded_total,
			attachment_failures_total,
			index_commit_failures_total,
			sync_duration_seconds,
		})
	}

	pub fn new() -> Self {
		// The metric definitions are static, registration cannot collide.
		Self::try_new().expect("static metric definitions")
	}

	/// Encode metrics in Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				log::error!("Failed to encode metrics: {}", e);
				String::new()
			}
		}
	}
}

impl Default for MetricsRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for MetricsRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MetricsRegistry").finish_non_exhaustive()
	}
}

pub fn init_metrics() -> anyhow::Result<Arc<MetricsRegistry>> {
	Ok(Arc::new(MetricsRegistry::try_new()?))
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn metrics_registry_creation() {
		let registry = super::MetricsRegistry::new();
		assert!(!registry.encode().is_empty());
	}

	#[test]
	fn metrics_increment() {
		let registry = super::MetricsRegistry::new();
		registry.features_created_total.inc();
		registry.attachments_uploaded_total.inc_by(3);
		let out = registry.encode();
		assert!(out.contains("arcgis_sync_features_created_total 1"));
		assert!(out.contains("arcgis_sync_attachments_uploaded_total 3"));
	}

	#[test]
	fn registries_are_independent() {
		let a = super::MetricsRegistry::new();
		let b = super::MetricsRegistry::new();
		a.messages_received_total.inc();
		assert_eq!(b.messages_received_total.get(), 0);
	}
}
