use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error object as returned inside an otherwise successful HTTP response,
/// either at the top level (`{"error": {...}}`) or per edit result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
	#[serde(default)]
	pub code: Option<i64>,
	#[serde(default)]
	pub message: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub details: Vec<Value>,
}

impl fmt::Display for RemoteError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let text = self
			.message
			.as_deref()
			.or(self.description.as_deref())
			.unwrap_or("unknown error");
		match self.code {
			Some(code) => write!(f, "{} (code {})", text, code)?,
			None => write!(f, "{}", text)?,
		}
		if !self.details.is_empty() {
			write!(f, " {}", Value::Array(self.details.clone()))?;
		}
		Ok(())
	}
}

/// Outcome of one add, update or delete within an `applyEdits` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditResult {
	#[serde(default)]
	pub object_id: Option<i64>,
	#[serde(default)]
	pub global_id: Option<String>,
	#[serde(default)]
	pub success: bool,
	#[serde(default)]
	pub error: Option<RemoteError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyEditsResponse {
	#[serde(default)]
	pub add_results: Vec<EditResult>,
	#[serde(default)]
	pub update_results: Vec<EditResult>,
	#[serde(default)]
	pub delete_results: Vec<EditResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
	#[serde(default)]
	pub attributes: Map<String, Value>,
	#[serde(default)]
	pub geometry: Option<Value>,
}

impl Feature {
	/// Object id of the feature; the service is inconsistent about the
	/// casing of the field name.
	pub fn object_id(&self) -> Option<i64> {
		self.attributes
			.iter()
			.find(|(k, _)| k.eq_ignore_ascii_case("objectid"))
			.and_then(|(_, v)| v.as_i64())
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct QueryResponse {
	#[serde(default)]
	pub features: Vec<Feature>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddAttachmentResponse {
	pub add_attachment_result: EditResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentInfo {
	pub id: i64,
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub content_type: Option<String>,
	#[serde(default)]
	pub size: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AttachmentInfosResponse {
	#[serde(default)]
	pub attachment_infos: Vec<AttachmentInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeleteAttachmentsResponse {
	#[serde(default)]
	pub delete_attachment_results: Vec<EditResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeleteFeaturesResponse {
	#[serde(default)]
	pub delete_results: Vec<EditResult>,
}
