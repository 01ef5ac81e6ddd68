use async_trait::async_trait;
use log::{debug, warn};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::transport::{TransportSettings, send_with_retry};
use super::types::{
	AddAttachmentResponse, ApplyEditsResponse, AttachmentInfo, AttachmentInfosResponse,
	DeleteAttachmentsResponse, DeleteFeaturesResponse, EditResult, Feature, QueryResponse,
};
use super::{FeatureService, GisError};
use crate::attachments::Attachment;

/// Authenticated client for one feature service
/// (`https://host/.../FeatureServer`).
pub struct ArcGisClient {
	http: reqwest::Client,
	service_url: String,
	token: String,
	transport: TransportSettings,
	disable_updated_at: bool,
}

impl ArcGisClient {
	pub fn new(
		http: reqwest::Client,
		service_url: impl Into<String>,
		token: impl Into<String>,
		transport: TransportSettings,
		disable_updated_at: bool,
	) -> Self {
		Self {
			http,
			service_url: service_url.into().trim_end_matches('/').to_string(),
			token: token.into(),
			transport,
			disable_updated_at,
		}
	}

	fn endpoint(&self, layer_id: i64, feature_id: Option<i64>, action: &str) -> String {
		match feature_id {
			Some(feature_id) => format!(
				"{}/{}/{}/{}",
				self.service_url, layer_id, feature_id, action
			),
			None => format!("{}/{}/{}", self.service_url, layer_id, action),
		}
	}

	async fn post_form<T: DeserializeOwned>(
		&self,
		url: String,
		mut fields: Vec<(&'static str, String)>,
	) -> Result<T, GisError> {
		fields.push(("f", "json".to_string()));
		fields.push(("token", self.token.clone()));

		let body = send_with_retry(&self.transport, || self.http.post(&url).form(&fields)).await?;
		serde_json::from_value(body).map_err(|e| GisError::Decode(e.to_string()))
	}

	/// Copy records for transmission, stamping `attributes.updated_at` with
	/// the batch timestamp unless disabled.
	fn stamp_records(&self, records: &[Value], timestamp: &str) -> Vec<Value> {
		records
			.iter()
			.cloned()
			.map(|mut record| {
				if !self.disable_updated_at {
					if let Some(attributes) =
						record.get_mut("attributes").and_then(Value::as_object_mut)
					{
						attributes.insert("updated_at".to_string(), Value::from(timestamp));
					}
				}
				record
			})
			.collect()
	}
}

/// Batch timestamp in UTC with seconds precision, e.g. `2024-05-01T12:00:00Z`.
pub fn batch_timestamp() -> String {
	chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[async_trait]
impl FeatureService for ArcGisClient {
	async fn apply_edits(
		&self,
		layer_id: i64,
		adds: &[Value],
		updates: &[Value],
		deletes: &[i64],
	) -> Result<ApplyEditsResponse, GisError> {
		if adds.is_empty() && updates.is_empty() && deletes.is_empty() {
			return Ok(ApplyEditsResponse::default());
		}

		let timestamp = batch_timestamp();
		let mut fields = Vec::new();
		if !adds.is_empty() {
			let adds = self.stamp_records(adds, &timestamp);
			fields.push(("adds", Value::Array(adds).to_string()));
		}
		if !updates.is_empty() {
			let updates = self.stamp_records(updates, &timestamp);
			fields.push(("updates", Value::Array(updates).to_string()));
		}
		if !deletes.is_empty() {
			fields.push(("deletes", Value::from(deletes.to_vec()).to_string()));
		}

		debug!(
			"applyEdits on layer {}: {} add(s), {} update(s), {} delete(s)",
			layer_id,
			adds.len(),
			updates.len(),
			deletes.len()
		);
		self.post_form(self.endpoint(layer_id, None, "applyEdits"), fields)
			.await
	}

	async fn query(
		&self,
		layer_id: i64,
		where_clause: &str,
		out_fields: &[&str],
	) -> Result<Vec<Feature>, GisError> {
		let fields = vec![
			("where", where_clause.to_string()),
			("outFields", out_fields.join(",")),
		];
		let response: QueryResponse = self
			.post_form(self.endpoint(layer_id, None, "query"), fields)
			.await?;
		Ok(response.features)
	}

	async fn add_attachment(
		&self,
		layer_id: i64,
		feature_id: i64,
		attachment: &Attachment,
	) -> Result<i64, GisError> {
		let url = self.endpoint(layer_id, Some(feature_id), "addAttachment");
		let build = || {
			let part = Part::bytes(attachment.bytes.clone()).file_name(attachment.file_name.clone());
			let part = match part.mime_str(&attachment.content_type) {
				Ok(part) => part,
				Err(_) => {
					Part::bytes(attachment.bytes.clone()).file_name(attachment.file_name.clone())
				}
			};
			let form = Form::new()
				.text("f", "json")
				.text("token", self.token.clone())
				.part("attachment", part);
			self.http.post(&url).multipart(form)
		};

		let body = send_with_retry(&self.transport, build).await?;
		let response: AddAttachmentResponse =
			serde_json::from_value(body).map_err(|e| GisError::Decode(e.to_string()))?;
		let result = response.add_attachment_result;

		if !result.success {
			return Err(GisError::Remote(result.error.unwrap_or_default()));
		}
		let attachment_id = result
			.object_id
			.ok_or_else(|| GisError::Decode("addAttachmentResult without objectId".into()))?;

		debug!(
			"Uploaded attachment '{}' to feature with ID '{}'",
			attachment_id, feature_id
		);
		Ok(attachment_id)
	}

	async fn get_attachments(
		&self,
		layer_id: i64,
		feature_id: i64,
	) -> Result<Vec<AttachmentInfo>, GisError> {
		let response: AttachmentInfosResponse = self
			.post_form(
				self.endpoint(layer_id, Some(feature_id), "attachments"),
				Vec::new(),
			)
			.await?;
		Ok(response.attachment_infos)
	}

	async fn delete_attachments(
		&self,
		layer_id: i64,
		feature_id: i64,
		attachment_ids: &[i64],
	) -> Result<Vec<EditResult>, GisError> {
		let ids = attachment_ids
			.iter()
			.map(i64::to_string)
			.collect::<Vec<_>>()
			.join(",");
		let response: DeleteAttachmentsResponse = self
			.post_form(
				self.endpoint(layer_id, Some(feature_id), "deleteAttachments"),
				vec![("attachmentIds", ids)],
			)
			.await?;
		Ok(response.delete_attachment_results)
	}

	async fn delete_features(
		&self,
		layer_id: i64,
		object_ids: &[i64],
	) -> Result<Vec<EditResult>, GisError> {
		for &feature_id in object_ids {
			let attachments = match self.get_attachments(layer_id, feature_id).await {
				Ok(a) => a,
				Err(e) => {
					warn!(
						"Could not list attachments of feature {} on layer {}: {}",
						feature_id, layer_id, e
					);
					continue;
				}
			};
			if attachments.is_empty() {
				continue;
			}
			let ids: Vec<i64> = attachments.iter().map(|a| a.id).collect();
			if let Err(e) = self.delete_attachments(layer_id, feature_id, &ids).await {
				warn!(
					"Could not delete attachments {:?} of feature {} on layer {}: {}",
					ids, feature_id, layer_id, e
				);
			}
		}

		let ids = object_ids
			.iter()
			.map(i64::to_string)
			.collect::<Vec<_>>()
			.join(", ");
		let response: DeleteFeaturesResponse = self
			.post_form(
				self.endpoint(layer_id, None, "deleteFeatures"),
				vec![("objectIds", ids)],
			)
			.await?;
		Ok(response.delete_results)
	}
}
