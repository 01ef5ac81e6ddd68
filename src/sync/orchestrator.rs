use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::Mutex;

use super::SyncOutcome;
use super::edits::{Edit, LayerEdits};
use super::reconcile::{ReconciliationEngine, collapse_duplicates};
use crate::attachments::{AttachmentCoordinator, AttachmentSource};
use crate::config::Settings;
use crate::existence::{ExistenceResolver, IndexEntry};
use crate::gis::{EditResult, FeatureService, FeatureServiceProvider};
use crate::mapping::{self, ATTRIBUTES, AttachmentMap, MappingEngine, path};
use crate::observability::MetricsRegistry;

/// Feature written by this run, keyed by entity id.
#[derive(Debug, Clone)]
struct DoneEdit {
	layer_id: i64,
	object_id: i64,
	record: Value,
}

#[derive(Debug, Default)]
struct PublishResult {
	created: HashMap<String, DoneEdit>,
	updated: HashMap<String, DoneEdit>,
	created_count: BTreeMap<i64, usize>,
	updated_count: BTreeMap<i64, usize>,
	deleted_count: BTreeMap<i64, usize>,
}

/// Runs one message through mapping, reconciliation, the remote write,
/// attachment back-fill and the index commit.
pub struct SyncOrchestrator {
	settings: Settings,
	mapping: MappingEngine,
	reconciler: ReconciliationEngine,
	provider: Arc<dyn FeatureServiceProvider>,
	existence: Mutex<ExistenceResolver>,
	attachments: AttachmentCoordinator,
	metrics: Arc<MetricsRegistry>,
}

impl SyncOrchestrator {
	pub fn new(
		settings: Settings,
		provider: Arc<dyn FeatureServiceProvider>,
		existence: ExistenceResolver,
		attachment_source: Arc<dyn AttachmentSource>,
		metrics: Arc<MetricsRegistry>,
	) -> Self {
		let mapping = MappingEngine::from_settings(&settings.mapping);
		let reconciler = ReconciliationEngine::new(settings.arcgis.feature_service.layers.clone());
		Self {
			settings,
			mapping,
			reconciler,
			provider,
			existence: Mutex::new(existence),
			attachments: AttachmentCoordinator::new(attachment_source, metrics.clone()),
			metrics,
		}
	}

	pub fn metrics(&self) -> &Arc<MetricsRegistry> {
		&self.metrics
	}

	/// Process one inbound message. Runs are serialized.
	pub async fn process(&self, document: &Value) -> SyncOutcome {
		self.metrics.messages_received_total.inc();
		let _timer = self.metrics.sync_duration_seconds.start_timer();

		if let Err(e) = self.settings.validate() {
			error!("Function is missing required configuration: {}", e);
			return SyncOutcome::BadGateway;
		}

		let mapped = self.mapping.mapped_records(document);
		self.metrics.records_mapped_total.inc_by(mapped.records.len() as u64);
		self.metrics.records_rejected_total.inc_by(mapped.rejected as u64);
		let records = mapped.records;
		if records.is_empty() {
			info!("No data to be published towards ArcGIS");
			return SyncOutcome::NoContent;
		}

		let service = match self.provider.open().await {
			Ok(s) => s,
			Err(e) => {
				error!("Could not open a feature service session: {}", e);
				return SyncOutcome::ServiceUnavailable;
			}
		};

		let mut existence = self.existence.lock().await;

		let (edits, with_attachments) = self.build_edits(records);
		if edits.is_empty() {
			info!("No valid records to be published towards ArcGIS");
			return SyncOutcome::NoContent;
		}

		let id_values: Vec<Value> = edits.iter().map(|e| e.id_value.clone()).collect();
		let matches = existence
			.resolve_batch(service.as_ref(), &id_values, &self.reconciler.layers_to_check())
			.await;
		let layer_edits = self.reconciler.classify(edits, &matches);

		let published = self.publish(service.as_ref(), &layer_edits).await;
		log_counts("Updated existing features in layers", &published.updated_count);
		log_counts("Created new features in layers", &published.created_count);
		log_counts("Deleted existing features in layers", &published.deleted_count);

		if let Some(index) = existence.index_mut() {
			for (item_id, done) in &published.created {
				index.set(
					item_id,
					IndexEntry {
						entity_id: item_id.clone(),
						layer_id: done.layer_id,
						object_id: done.object_id,
					},
				);
			}
		}

		if !with_attachments.is_empty() {
			self.publish_attachments(service.as_ref(), &published, &with_attachments)
				.await;
		}

		if let Some(index) = existence.index_mut() {
			if let Err(e) = index.commit().await {
				self.metrics.index_commit_failures_total.inc();
				error!(
					"Committing {} entries to the existence index failed: {}",
					index.pending_len(),
					e
				);
			}
		}

		SyncOutcome::NoContent
	}

	/// Strip attachments, read the entity id and resolve the target layer.
	fn build_edits(&self, records: Vec<mapping::MappedRecord>) -> (Vec<Edit>, HashMap<String, AttachmentMap>) {
		let id_field = self.settings.mapping.id_field.as_deref().unwrap_or_default();
		let mut id_path = vec![ATTRIBUTES];
		id_path.extend(path::segments(id_field));

		let mut edits = Vec::with_capacity(records.len());
		let mut with_attachments = HashMap::new();

		for record in records {
			let (object, attachments) = self.mapping.extract_attachments(record.record);
			let id_value = path::get(&object, &id_path).cloned().unwrap_or(Value::Null);
			let Some(item_id) = mapping::id_key(&id_value) else {
				warn!("Record without a value for '{}', skipping it", id_field);
				self.metrics.records_rejected_total.inc();
				continue;
			};
			let Some(layer_id) = self.reconciler.resolve_layer(record.layer.as_ref(), &item_id) else {
				self.metrics.records_rejected_total.inc();
				continue;
			};

			if attachments.is_empty() {
				with_attachments.remove(&item_id);
			} else {
				with_attachments.insert(item_id.clone(), attachments);
			}
			edits.push(Edit::new(item_id, id_value, layer_id, object));
		}

		(collapse_duplicates(edits), with_attachments)
	}

	/// Apply each layer's edits in ascending layer order. A failed layer is
	/// logged and skipped.
	async fn publish(&self, service: &dyn FeatureService, layer_edits: &LayerEdits) -> PublishResult {
		let mut result = PublishResult::default();

		for (&layer_id, batch) in layer_edits {
			if batch.is_empty() {
				continue;
			}
			let response = match service
				.apply_edits(layer_id, &batch.adds(), &batch.updates(), &batch.deletes())
				.await
			{
				Ok(r) => r,
				Err(e) => {
					self.metrics.apply_edits_failures_total.inc();
					error!(
						"Applying {} create(s), {} update(s) and {} delete(s) to layer {} failed: {}",
						batch.to_create.len(),
						batch.to_update.len(),
						batch.to_delete.len(),
						layer_id,
						e
					);
					continue;
				}
			};

			let created = join_results(layer_id, &batch.to_create, &response.add_results, "create");
			let updated = join_results(layer_id, &batch.to_update, &response.update_results, "update");
			let deleted = join_results(layer_id, &batch.to_delete, &response.delete_results, "delete");

			if !created.is_empty() {
				self.metrics.features_created_total.inc_by(created.len() as u64);
				result.created_count.insert(layer_id, created.len());
				result.created.extend(created);
			}
			if !updated.is_empty() {
				self.metrics.features_updated_total.inc_by(updated.len() as u64);
				result.updated_count.insert(layer_id, updated.len());
				result.updated.extend(updated);
			}
			if !deleted.is_empty() {
				self.metrics.features_deleted_total.inc_by(deleted.len() as u64);
				result.deleted_count.insert(layer_id, deleted.len());
			}
		}

		result
	}

	async fn publish_attachments(
		&self,
		service: &dyn FeatureService,
		published: &PublishResult,
		with_attachments: &HashMap<String, AttachmentMap>,
	) {
		let mut item_ids: Vec<&String> = with_attachments.keys().collect();
		item_ids.sort();

		let mut backfills: BTreeMap<i64, Vec<Value>> = BTreeMap::new();
		let mut uploaded = 0;
		for item_id in item_ids {
			let Some(done) = published
				.created
				.get(item_id)
				.or_else(|| published.updated.get(item_id))
			else {
				debug!("Feature '{}' was not written, skipping its attachments", item_id);
				continue;
			};
			let Some(attachments) = with_attachments.get(item_id) else {
				continue;
			};

			if let Some(backfill) = self
				.attachments
				.process(service, done.layer_id, done.object_id, done.record.clone(), attachments)
				.await
			{
				uploaded += backfill.uploaded;
				backfills.entry(done.layer_id).or_default().push(backfill.record);
			}
		}

		if backfills.is_empty() {
			return;
		}

		info!("Uploaded {} attachment(s)", uploaded);
		self.metrics.attachments_uploaded_total.inc_by(uploaded as u64);

		for (layer_id, updates) in backfills {
			match service.apply_edits(layer_id, &[], &updates, &[]).await {
				Ok(response) => {
					for r in response.update_results.iter().filter(|r| !r.success) {
						error!(
							"Writing attachment ids to feature {:?} on layer {} failed: {}",
							r.object_id,
							layer_id,
							describe(r)
						);
					}
				}
				Err(e) => {
					self.metrics.apply_edits_failures_total.inc();
					error!(
						"Writing attachment ids to {} feature(s) on layer {} failed: {}",
						updates.len(),
						layer_id,
						e
					);
				}
			}
		}
	}
}

/// Pair results with the edits they belong to, by position. Only successful
/// results count; a result without an object id falls back to the edit's.
fn join_results(layer_id: i64, edits: &[Edit], results: &[EditResult], kind: &str) -> Vec<(String, DoneEdit)> {
	if results.len() != edits.len() {
		warn!(
			"Layer {} returned {} {} result(s) for {} edit(s)",
			layer_id,
			results.len(),
			kind,
			edits.len()
		);
	}

	edits
		.iter()
		.zip(results)
		.filter_map(|(edit, result)| {
			if !result.success {
				error!(
					"Failed to {} feature '{}' on layer {}: {}",
					kind,
					edit.item_id,
					layer_id,
					describe(result)
				);
				return None;
			}
			let Some(object_id) = result.object_id.or(edit.object_id) else {
				warn!(
					"Layer {} reported a {} of '{}' without an object id",
					layer_id, kind, edit.item_id
				);
				return None;
			};
			Some((
				edit.item_id.clone(),
				DoneEdit {
					layer_id,
					object_id,
					record: edit.object.clone(),
				},
			))
		})
		.collect()
}

fn describe(result: &EditResult) -> String {
	result
		.error
		.as_ref()
		.map(|e| e.to_string())
		.unwrap_or_else(|| "no error details".to_string())
}

fn log_counts(what: &str, counts: &BTreeMap<i64, usize>) {
	if counts.is_empty() {
		return;
	}
	let text = counts
		.iter()
		.map(|(layer, n)| format!("{} ({})", layer, n))
		.collect::<Vec<_>>()
		.join(", ");
	info!("{}: {}", what, text);
}
