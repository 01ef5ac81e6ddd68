//! Shared test doubles for the sync integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use arcgis_sync::attachments::{Attachment, AttachmentSource};
use arcgis_sync::config::Settings;
use arcgis_sync::gis::{
	ApplyEditsResponse, AttachmentInfo, EditResult, Feature, FeatureService,
	FeatureServiceProvider, GisError,
};
use async_trait::async_trait;
use serde_json::{Map, Value, json};

/// One recorded `apply_edits` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyCall {
	pub layer_id: i64,
	pub adds: Vec<Value>,
	pub updates: Vec<Value>,
	pub deletes: Vec<i64>,
}

#[derive(Default)]
struct MockState {
	next_object_id: i64,
	next_attachment_id: i64,
	features: HashMap<i64, Vec<Feature>>,
	apply_calls: Vec<ApplyCall>,
	queries: Vec<(i64, String)>,
	uploads: Vec<(i64, i64, String)>,
	deleted_features: Vec<(i64, Vec<i64>)>,
}

/// In-process feature service. Adds get increasing object ids starting at
/// 1000, attachments increasing ids starting at 500.
#[derive(Default)]
pub struct MockFeatureService {
	state: Mutex<MockState>,
	failing_layers: Mutex<HashSet<i64>>,
	rejected_adds: Mutex<HashSet<String>>,
	id_field: String,
}

impl MockFeatureService {
	pub fn new(id_field: &str) -> Self {
		Self {
			state: Mutex::new(MockState {
				next_object_id: 1000,
				next_attachment_id: 500,
				..Default::default()
			}),
			id_field: id_field.to_string(),
			..Default::default()
		}
	}

	/// Seed an existing feature for the remote existence check.
	pub fn seed_feature(&self, layer_id: i64, id: &str, object_id: i64) {
		let mut attributes = Map::new();
		attributes.insert(self.id_field.clone(), json!(id));
		attributes.insert("OBJECTID".to_string(), json!(object_id));
		self.state
			.lock()
			.unwrap()
			.features
			.entry(layer_id)
			.or_default()
			.push(Feature {
				attributes,
				geometry: None,
			});
	}

	pub fn fail_layer(&self, layer_id: i64) {
		self.failing_layers.lock().unwrap().insert(layer_id);
	}

	/// Report `success: false` for adds carrying this id.
	pub fn reject_add(&self, id: &str) {
		self.rejected_adds.lock().unwrap().insert(id.to_string());
	}

	pub fn apply_calls(&self) -> Vec<ApplyCall> {
		self.state.lock().unwrap().apply_calls.clone()
	}

	pub fn queries(&self) -> Vec<(i64, String)> {
		self.state.lock().unwrap().queries.clone()
	}

	pub fn uploads(&self) -> Vec<(i64, i64, String)> {
		self.state.lock().unwrap().uploads.clone()
	}

	pub fn deleted_features(&self) -> Vec<(i64, Vec<i64>)> {
		self.state.lock().unwrap().deleted_features.clone()
	}
}

fn ok(object_id: i64) -> EditResult {
	EditResult {
		object_id: Some(object_id),
		success: true,
		..Default::default()
	}
}

#[async_trait]
impl FeatureService for MockFeatureService {
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
		let mut state = self.state.lock().unwrap();
		state.apply_calls.push(ApplyCall {
			layer_id,
			adds: adds.to_vec(),
			updates: updates.to_vec(),
			deletes: deletes.to_vec(),
		});
		if self.failing_layers.lock().unwrap().contains(&layer_id) {
			return Err(GisError::Status(500));
		}

		let rejected = self.rejected_adds.lock().unwrap().clone();
		let add_results = adds
			.iter()
			.map(|add| {
				let id = add["attributes"][&self.id_field].as_str().unwrap_or_default();
				if rejected.contains(id) {
					EditResult {
						success: false,
						..Default::default()
					}
				} else {
					state.next_object_id += 1;
					ok(state.next_object_id)
				}
			})
			.collect();
		let update_results = updates
			.iter()
			.map(|u| ok(u["attributes"]["objectid"].as_i64().unwrap_or_default()))
			.collect();
		let delete_results = deletes.iter().map(|&d| ok(d)).collect();

		Ok(ApplyEditsResponse {
			add_results,
			update_results,
			delete_results,
		})
	}

	async fn query(&self, layer_id: i64, where_clause: &str, _: &[&str]) -> Result<Vec<Feature>, GisError> {
		let mut state = self.state.lock().unwrap();
		state.queries.push((layer_id, where_clause.to_string()));
		if self.failing_layers.lock().unwrap().contains(&layer_id) {
			return Err(GisError::Status(500));
		}
		Ok(state
			.features
			.get(&layer_id)
			.map(|features| {
				features
					.iter()
					.filter(|f| {
						let id = f.attributes[&self.id_field].as_str().unwrap_or_default();
						where_clause.contains(&format!("'{}'", id))
					})
					.cloned()
					.collect()
			})
			.unwrap_or_default())
	}

	async fn add_attachment(&self, layer_id: i64, feature_id: i64, attachment: &Attachment) -> Result<i64, GisError> {
		let mut state = self.state.lock().unwrap();
		state.next_attachment_id += 1;
		let id = state.next_attachment_id;
		state
			.uploads
			.push((layer_id, feature_id, attachment.file_name.clone()));
		Ok(id)
	}

	async fn get_attachments(&self, _: i64, _: i64) -> Result<Vec<AttachmentInfo>, GisError> {
		Ok(Vec::new())
	}

	async fn delete_attachments(&self, _: i64, _: i64, ids: &[i64]) -> Result<Vec<EditResult>, GisError> {
		Ok(ids.iter().map(|&i| ok(i)).collect())
	}

	async fn delete_features(&self, layer_id: i64, object_ids: &[i64]) -> Result<Vec<EditResult>, GisError> {
		self.state
			.lock()
			.unwrap()
			.deleted_features
			.push((layer_id, object_ids.to_vec()));
		Ok(object_ids.iter().map(|&i| ok(i)).collect())
	}
}

/// Hands out the same mock service for every run, or fails to open.
pub struct MockProvider {
	pub service: Arc<MockFeatureService>,
	pub fail: bool,
}

impl MockProvider {
	pub fn new(service: Arc<MockFeatureService>) -> Self {
		Self {
			service,
			fail: false,
		}
	}
}

#[async_trait]
impl FeatureServiceProvider for MockProvider {
	async fn open(&self) -> Result<Arc<dyn FeatureService>, GisError> {
		if self.fail {
			return Err(GisError::Auth("Invalid username or password".into()));
		}
		Ok(self.service.clone())
	}
}

/// Attachment source backed by a fixed map of references.
#[derive(Default)]
pub struct StaticAttachmentSource {
	files: HashMap<String, Attachment>,
}

impl StaticAttachmentSource {
	pub fn with(mut self, reference: &str, file_name: &str) -> Self {
		self.files.insert(
			reference.to_string(),
			Attachment {
				content_type: "image/jpeg".to_string(),
				file_name: file_name.to_string(),
				bytes: vec![0xff, 0xd8, 0xff],
			},
		);
		self
	}
}

#[async_trait]
impl AttachmentSource for StaticAttachmentSource {
	async fn fetch(&self, reference: &str) -> Option<Attachment> {
		self.files.get(reference).cloned()
	}
}

/// Complete settings for a flat `{id, name, photo, layer}` message.
pub fn settings() -> Settings {
	let mut s = Settings::default();
	s.arcgis.authentication.url = Some("https://portal.example.com/sharing/rest/generateToken".into());
	s.arcgis.authentication.username = Some("user_1".into());
	s.arcgis.feature_service.url = Some("https://gis.example.com/FeatureServer".into());
	s.arcgis.feature_service.id = Some("example".into());
	s.mapping.id_field = Some("id".into());
	s.mapping.attachments = vec!["photo".into()];
	s.mapping.fields = json!({
		"attributes": {
			"_items": {
				"id": {"field": "id", "required": true},
				"name": "name",
				"photo": "photo"
			}
		}
	});
	s
}
