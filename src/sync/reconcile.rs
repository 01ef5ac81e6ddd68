use std::collections::{BTreeSet, HashMap};

use log::{debug, error, warn};
use serde_json::{Value, json};

use super::edits::{Edit, LayerEdits};
use crate::existence::ExistingMatches;
use crate::mapping::ATTRIBUTES;

/// Sorts mapped records into per-layer create, update and delete sets.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine {
	/// Allowed layers, in search order. Empty means layer `0` only.
	layers: Vec<i64>,
}

impl ReconciliationEngine {
	pub fn new(layers: Vec<i64>) -> Self {
		Self { layers }
	}

	/// Layers searched for existing features.
	pub fn layers_to_check(&self) -> Vec<i64> {
		if self.layers.is_empty() {
			vec![0]
		} else {
			self.layers.clone()
		}
	}

	/// Target layer for a record. An explicit value must be an integer in
	/// the allow-list (when one is configured); `None` rejects the record.
	/// Without a value the first configured layer is used, else `0`.
	pub fn resolve_layer(&self, layer: Option<&Value>, item_id: &str) -> Option<i64> {
		let explicit = match layer {
			None | Some(Value::Null) => None,
			Some(Value::String(s)) if s.trim().is_empty() => None,
			Some(value) => Some(value),
		};

		let Some(value) = explicit else {
			return Some(self.layers.first().copied().unwrap_or(0));
		};

		let parsed = match value {
			Value::Number(n) => n.as_i64(),
			Value::String(s) => s.trim().parse::<i64>().ok(),
			_ => None,
		};

		match parsed {
			Some(layer_id) if self.layers.is_empty() || self.layers.contains(&layer_id) => Some(layer_id),
			_ => {
				error!(
					"Message '{}' contains a not defined layer ID '{}', skipping this",
					item_id, value
				);
				None
			}
		}
	}

	/// Classify `edits` against the features that already hold them.
	///
	/// Repeated item ids are collapsed first, keeping the last occurrence.
	/// A match on the edit's target layer turns it into an update (the last
	/// such match wins). Matches on any other layer are stale copies left by
	/// a layer move and are deleted. Everything else is created. Each
	/// `(layer, object id)` pair is deleted at most once.
	pub fn classify(&self, edits: Vec<Edit>, matches: &ExistingMatches) -> LayerEdits {
		let mut layer_edits = LayerEdits::new();
		let mut deleted: BTreeSet<(i64, i64)> = BTreeSet::new();

		for mut edit in collapse_duplicates(edits) {
			let found = matches.get(&edit.item_id).map(Vec::as_slice).unwrap_or_default();

			let mut claimed = None;
			for m in found {
				if m.layer_id == edit.layer_id {
					claimed = Some(m.object_id);
					continue;
				}
				if !deleted.insert((m.layer_id, m.object_id)) {
					continue;
				}
				debug!(
					"Feature '{}' moved from layer {} to layer {}, deleting object {}",
					edit.item_id, m.layer_id, edit.layer_id, m.object_id
				);
				layer_edits.entry(m.layer_id).or_default().to_delete.push(Edit {
					item_id: edit.item_id.clone(),
					id_value: edit.id_value.clone(),
					layer_id: m.layer_id,
					object: json!({"layer_id": m.layer_id, "object_id": m.object_id}),
					object_id: Some(m.object_id),
				});
			}

			let batch = layer_edits.entry(edit.layer_id).or_default();
			match claimed {
				Some(object_id) => {
					edit.object_id = Some(object_id);
					if let Some(attributes) = edit.object.get_mut(ATTRIBUTES).and_then(Value::as_object_mut) {
						attributes.insert("objectid".to_string(), Value::from(object_id));
					}
					batch.to_update.push(edit);
				}
				None => batch.to_create.push(edit),
			}
		}

		layer_edits
	}
}

/// Keep only the last edit for each item id, in the order those last
/// occurrences appear.
pub fn collapse_duplicates(edits: Vec<Edit>) -> Vec<Edit> {
	let mut last: HashMap<&str, usize> = HashMap::with_capacity(edits.len());
	for (i, edit) in edits.iter().enumerate() {
		last.insert(edit.item_id.as_str(), i);
	}
	if last.len() == edits.len() {
		return edits;
	}
	let keep: BTreeSet<usize> = last.into_values().collect();

	edits
		.into_iter()
		.enumerate()
		.filter_map(|(i, edit)| {
			if keep.contains(&i) {
				Some(edit)
			} else {
				warn!(
					"Message holds '{}' more than once, keeping its last occurrence",
					edit.item_id
				);
				None
			}
		})
		.collect()
}
