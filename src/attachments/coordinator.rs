use std::sync::Arc;

use log::{debug, error, warn};
use serde_json::Value;

use super::AttachmentSource;
use crate::gis::FeatureService;
use crate::mapping::{self, ATTRIBUTES, AttachmentMap};
use crate::observability::MetricsRegistry;

/// Record to send in the follow-up update, with the number of attachments
/// written into it.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentBackfill {
	pub record: Value,
	pub uploaded: usize,
}

/// Uploads attachments for features whose remote id is known.
pub struct AttachmentCoordinator {
	source: Arc<dyn AttachmentSource>,
	metrics: Arc<MetricsRegistry>,
}

impl AttachmentCoordinator {
	pub fn new(source: Arc<dyn AttachmentSource>, metrics: Arc<MetricsRegistry>) -> Self {
		Self { source, metrics }
	}

	/// Fetch and upload each attachment of one feature, writing the new
	/// attachment ids into `record`. A failing attachment is skipped.
	/// Returns `None` when nothing was uploaded.
	pub async fn process(
		&self,
		service: &dyn FeatureService,
		layer_id: i64,
		feature_id: i64,
		mut record: Value,
		attachments: &AttachmentMap,
	) -> Option<AttachmentBackfill> {
		debug!(
			"Found {} attachments to upload for feature {}",
			attachments.len(),
			feature_id
		);

		let mut uploaded = 0;
		for (field, reference) in attachments {
			let Some(reference) = reference.as_str() else {
				warn!(
					"Attachment field '{}' of feature {} does not hold a reference: {}",
					field, feature_id, reference
				);
				self.metrics.attachment_failures_total.inc();
				continue;
			};

			let Some(attachment) = self.source.fetch(reference).await else {
				self.metrics.attachment_failures_total.inc();
				continue;
			};

			let attachment_id = match service.add_attachment(layer_id, feature_id, &attachment).await {
				Ok(id) => id,
				Err(e) => {
					error!(
						"Uploading attachment '{}' to feature {} on layer {} failed: {}",
						attachment.file_name, feature_id, layer_id, e
					);
					self.metrics.attachment_failures_total.inc();
					continue;
				}
			};

			if mapping::insert_attachment_id(&mut record, field, attachment_id) {
				uploaded += 1;
			} else {
				warn!(
					"Attachment {} uploaded but field '{}' is missing from feature {}",
					attachment_id, field, feature_id
				);
			}
		}

		if uploaded == 0 {
			return None;
		}

		if let Some(attributes) = record.get_mut(ATTRIBUTES).and_then(Value::as_object_mut) {
			attributes.insert("objectid".to_string(), Value::from(feature_id));
		}

		Some(AttachmentBackfill { record, uploaded })
	}
}
