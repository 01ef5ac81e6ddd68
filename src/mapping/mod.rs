//! Declarative field mapping: turns an arbitrary nested JSON document into
//! target-schema records using the `mapping` section of the configuration.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::MappingSettings;

pub mod geometry;
pub mod path;
pub mod spec;
pub mod transform;

pub use geometry::{ConversionMode, CoordinateSpec};
pub use spec::{FieldNode, MappingSpec};
pub use transform::FieldRule;

/// Group under which attribute values and attachment fields live.
pub const ATTRIBUTES: &str = "attributes";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MappingError {
	#[error("Required field '{0}' is empty")]
	MissingRequiredField(String),
}

/// One mapped record plus the raw layer value read from its source item.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRecord {
	pub record: Value,
	/// Value of `layer_field` in the source item, when configured and present.
	pub layer: Option<Value>,
}

/// Records mapped from one document, plus how many items were dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedBatch {
	pub records: Vec<MappedRecord>,
	pub rejected: usize,
}

/// Attachment references removed from a record, keyed by their path
/// relative to `attributes`.
pub type AttachmentMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default)]
pub struct MappingEngine {
	spec: MappingSpec,
	data_source: Option<String>,
	coordinates: Option<CoordinateSpec>,
	attachments: Vec<String>,
	layer_field: Option<String>,
}

impl MappingEngine {
	pub fn new(spec: MappingSpec) -> Self {
		Self {
			spec,
			..Default::default()
		}
	}

	pub fn with_data_source(mut self, data_source: impl Into<String>) -> Self {
		self.data_source = Some(data_source.into());
		self
	}

	pub fn with_coordinates(mut self, coordinates: CoordinateSpec) -> Self {
		self.coordinates = Some(coordinates);
		self
	}

	pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
		self.attachments = attachments;
		self
	}

	pub fn with_layer_field(mut self, layer_field: impl Into<String>) -> Self {
		self.layer_field = Some(layer_field.into());
		self
	}

	pub fn from_settings(settings: &MappingSettings) -> Self {
		let coordinates = settings.coordinates.as_ref().map(|c| CoordinateSpec {
			longitude: c.longitude.clone(),
			latitude: c.latitude.clone(),
			conversion: c.conversion_mode(),
		});
		Self {
			spec: MappingSpec::parse(&settings.fields),
			data_source: settings.data_source.clone().filter(|s| !s.is_empty()),
			coordinates,
			attachments: settings.attachments.clone(),
			layer_field: settings.layer_field.clone().filter(|s| !s.is_empty()),
		}
	}

	/// Map one source item. Fails only when a required field is empty.
	pub fn map(&self, item: &Value) -> Result<Value, MappingError> {
		let mut record = map_fields(&self.spec, item)?;
		if let Some(coordinates) = &self.coordinates {
			if let Some(geometry) = coordinates.build(item) {
				record.insert("geometry".to_string(), geometry);
			}
		}
		Ok(Value::Object(record))
	}

	/// Map every item of `document` (after `data_source` selection). Items
	/// that fail a required-field check are logged, counted and skipped.
	pub fn mapped_records(&self, document: &Value) -> MappedBatch {
		let mut batch = MappedBatch::default();
		let source = match &self.data_source {
			Some(p) => path::get_path(document, p).unwrap_or(&Value::Null),
			None => document,
		};
		if transform::is_falsy(source) {
			return batch;
		}

		let items = match source {
			Value::Array(items) => items.iter().collect::<Vec<_>>(),
			single => vec![single],
		};

		batch.records.reserve(items.len());
		for item in items {
			match self.map(item) {
				Ok(record) => {
					let layer = self
						.layer_field
						.as_deref()
						.and_then(|p| path::get_path(item, p))
						.filter(|v| !v.is_null())
						.cloned();
					batch.records.push(MappedRecord { record, layer });
				}
				Err(e) => {
					info!("An error occurred during formatting data: {}", e);
					debug!("{}", item);
					batch.rejected += 1;
				}
			}
		}
		batch
	}

	/// Remove attachment references from `record`, returning the stripped
	/// record and the references that were present. Fields are set to null
	/// rather than removed.
	pub fn extract_attachments(&self, mut record: Value) -> (Value, AttachmentMap) {
		let mut extracted = AttachmentMap::new();
		for field in &self.attachments {
			let full = attribute_path(field);
			if let Some(value) = path::get(&record, &full).filter(|v| !v.is_null()) {
				extracted.insert(field.clone(), value.clone());
			}
			path::set(&mut record, &full, Value::Null);
		}
		(record, extracted)
	}
}

/// Write an uploaded attachment id back at `field` (relative to `attributes`).
pub fn insert_attachment_id(record: &mut Value, field: &str, attachment_id: i64) -> bool {
	path::set(record, &attribute_path(field), Value::from(attachment_id))
}

fn attribute_path(field: &str) -> Vec<&str> {
	let mut full = vec![ATTRIBUTES];
	full.extend(path::segments(field));
	full
}

fn map_fields(spec: &MappingSpec, item: &Value) -> Result<Map<String, Value>, MappingError> {
	let mut out = Map::new();
	for (name, node) in &spec.fields {
		let value = match node {
			FieldNode::Group(inner) => Value::Object(map_fields(inner, item)?),
			FieldNode::Leaf { path: field, rule } => {
				let resolved = path::get_path(item, field);
				if rule.is_identity() {
					resolved.cloned().unwrap_or(Value::Null)
				} else {
					transform::apply(field, rule, resolved)?
				}
			}
		};
		out.insert(name.clone(), value);
	}
	Ok(out)
}

/// Canonical string form of an entity id. Strings are used as-is and
/// numbers by their JSON representation; anything else is not an id.
pub fn id_key(value: &Value) -> Option<String> {
	match value {
		Value::String(s) if !s.is_empty() => Some(s.clone()),
		Value::Number(n) => Some(n.to_string()),
		_ => {
			if !value.is_null() {
				warn!("Entity id {} is not a string or number", value);
			}
			None
		}
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use serde_json::json;

	fn engine() -> MappingEngine {
		MappingEngine::new(MappingSpec::parse(&json!({
			"attributes": {
				"_items": {
					"id": {"field": "id", "required": true},
					"name": "name",
					"photo": "photo"
				}
			}
		})))
		.with_attachments(vec!["photo".into()])
	}

	#[test]
	fn maps_groups_against_the_same_item() {
		let record = engine()
			.map(&json!({"id": "A1", "name": "x", "photo": "https://h/p.jpg"}))
			.unwrap();
		assert_eq!(
			record,
			json!({"attributes": {"id": "A1", "name": "x", "photo": "https://h/p.jpg"}})
		);
	}

	#[test]
	fn required_violation_drops_only_that_item() {
		let batch = engine().mapped_records(&json!([{"id": "a"}, {"id": null}, {"id": "c"}]));
		let ids: Vec<&Value> = batch.records.iter().map(|r| &r.record["attributes"]["id"]).collect();
		assert_eq!(ids, vec![&json!("a"), &json!("c")]);
		assert_eq!(batch.rejected, 1);
	}

	#[test]
	fn mapping_does_not_mutate_the_input() {
		let doc = json!({"id": "A1", "photo": "gs://b/p.jpg"});
		let before = doc.clone();
		let _ = engine().mapped_records(&doc);
		assert_eq!(doc, before);
	}

	#[test]
	fn data_source_selects_nested_items() {
		let e = engine().with_data_source("payload/items");
		assert_eq!(e.mapped_records(&json!({"payload": {"items": [{"id": 1}, {"id": 2}]}})).records.len(), 2);
		assert_eq!(e.mapped_records(&json!({"payload": {"items": {"id": 1}}})).records.len(), 1);
		assert_eq!(e.mapped_records(&json!({"payload": {}})), MappedBatch::default());
		assert_eq!(e.mapped_records(&json!({"payload": {"items": []}})), MappedBatch::default());
	}

	#[test]
	fn geometry_is_added_when_coordinates_are_configured() {
		let e = engine().with_coordinates(CoordinateSpec {
			longitude: "geo/lon".into(),
			latitude: "geo/lat".into(),
			conversion: Some(ConversionMode::Default),
		});
		let record = e.map(&json!({"id": "A1", "geo": {"lon": 5.0, "lat": 52.0}})).unwrap();
		assert_eq!(record["geometry"], json!({"x": 52.0, "y": 5.0}));
	}

	#[test]
	fn layer_value_is_read_from_the_source_item() {
		let e = engine().with_layer_field("meta/layer");
		let records = e
			.mapped_records(&json!([
				{"id": "a", "meta": {"layer": 2}},
				{"id": "b"}
			]))
			.records;
		assert_eq!(records[0].layer, Some(json!(2)));
		assert_eq!(records[1].layer, None);
	}

	#[test]
	fn extract_then_reinsert_attachment_ids() {
		let e = engine();
		let original = e.map(&json!({"id": "A1", "name": "x", "photo": "https://h/p.jpg"})).unwrap();
		let (mut stripped, extracted) = e.extract_attachments(original.clone());

		assert_eq!(stripped["attributes"]["photo"], Value::Null);
		assert_eq!(extracted.get("photo"), Some(&json!("https://h/p.jpg")));

		assert!(insert_attachment_id(&mut stripped, "photo", 17));
		let mut expected = original;
		expected["attributes"]["photo"] = json!(17);
		assert_eq!(stripped, expected);
	}

	#[test]
	fn absent_attachment_values_are_not_extracted() {
		let (record, extracted) = engine().extract_attachments(json!({"attributes": {"id": "A1"}}));
		assert!(extracted.is_empty());
		assert_eq!(record, json!({"attributes": {"id": "A1", "photo": null}}));
	}

	#[test]
	fn id_keys() {
		assert_eq!(id_key(&json!("A1")), Some("A1".into()));
		assert_eq!(id_key(&json!(42)), Some("42".into()));
		assert_eq!(id_key(&json!("")), None);
		assert_eq!(id_key(&json!(null)), None);
		assert_eq!(id_key(&json!(true)), None);
	}
}
