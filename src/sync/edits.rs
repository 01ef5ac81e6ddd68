use std::collections::BTreeMap;

use serde_json::Value;

/// One pending create, update or delete against a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
	/// Canonical entity id key.
	pub item_id: String,
	/// Entity id as found in the record, used for remote queries.
	pub id_value: Value,
	pub layer_id: i64,
	pub object: Value,
	/// Set when the edit targets an existing remote feature.
	pub object_id: Option<i64>,
}

impl Edit {
	pub fn new(item_id: impl Into<String>, id_value: Value, layer_id: i64, object: Value) -> Self {
		Self {
			item_id: item_id.into(),
			id_value,
			layer_id,
			object,
			object_id: None,
		}
	}
}

/// Edits for one layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditBatch {
	pub to_create: Vec<Edit>,
	pub to_update: Vec<Edit>,
	pub to_delete: Vec<Edit>,
}

impl EditBatch {
	pub fn is_empty(&self) -> bool {
		self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
	}

	pub fn adds(&self) -> Vec<Value> {
		self.to_create.iter().map(|e| e.object.clone()).collect()
	}

	pub fn updates(&self) -> Vec<Value> {
		self.to_update.iter().map(|e| e.object.clone()).collect()
	}

	pub fn deletes(&self) -> Vec<i64> {
		self.to_delete.iter().filter_map(|e| e.object_id).collect()
	}
}

/// Edit batches keyed by layer id, iterated in ascending layer order.
pub type LayerEdits = BTreeMap<i64, EditBatch>;
