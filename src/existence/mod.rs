//! Decides whether an entity already has a remote feature, and where.

use std::collections::BTreeMap;

use log::{debug, error, warn};
use serde_json::Value;

use crate::config::ExistenceMode;
use crate::gis::{Feature, FeatureService};
use crate::mapping;

pub mod index;
pub mod pg;
pub mod store;

pub use index::{COMMIT_BATCH_SIZE, ExistingFeatureIndex, hash_key};
pub use pg::PgIndexStore;
pub use store::{FeatureIndexStore, IndexEntry, IndexError, MemoryIndexStore};

/// A remote feature already holding an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingMatch {
	pub layer_id: i64,
	pub object_id: i64,
}

/// Existing features per entity id key.
pub type ExistingMatches = BTreeMap<String, Vec<ExistingMatch>>;

/// Existence check, selected once from configuration.
pub enum ExistenceResolver {
	/// Query the feature layers for the id field.
	Remote { id_field: String },
	/// Look entities up in the local existence index.
	Index(ExistingFeatureIndex),
	/// Every record is treated as new.
	Disabled,
}

impl ExistenceResolver {
	pub fn mode(&self) -> Option<ExistenceMode> {
		match self {
			ExistenceResolver::Remote { .. } => Some(ExistenceMode::Arcgis),
			ExistenceResolver::Index(_) => Some(ExistenceMode::Firestore),
			ExistenceResolver::Disabled => None,
		}
	}

	pub fn index_mut(&mut self) -> Option<&mut ExistingFeatureIndex> {
		match self {
			ExistenceResolver::Index(index) => Some(index),
			_ => None,
		}
	}

	/// Remote object id of one entity on `layer_id`, if known. A feature
	/// known on another layer does not count, whatever the mode.
	pub async fn resolve(&self, service: &dyn FeatureService, layer_id: i64, id_value: &Value) -> Option<i64> {
		let key = mapping::id_key(id_value)?;
		let mut matches = self
			.resolve_batch(service, std::slice::from_ref(id_value), &[layer_id])
			.await;
		matches
			.remove(&key)?
			.into_iter()
			.find(|m| m.layer_id == layer_id)
			.map(|m| m.object_id)
	}

	/// Existing features for a set of entity ids, searching `layers` in
	/// order. An id matched on one layer is not searched on later layers.
	pub async fn resolve_batch(
		&self,
		service: &dyn FeatureService,
		id_values: &[Value],
		layers: &[i64],
	) -> ExistingMatches {
		let mut remaining: BTreeMap<String, &Value> = BTreeMap::new();
		for value in id_values {
			if let Some(key) = mapping::id_key(value) {
				remaining.entry(key).or_insert(value);
			}
		}

		let mut matches = ExistingMatches::new();
		match self {
			ExistenceResolver::Disabled => {}
			ExistenceResolver::Remote { id_field } => {
				let field = query_field(id_field);
				for &layer_id in layers {
					if remaining.is_empty() {
						break;
					}
					let values: Vec<&Value> = remaining.values().copied().collect();
					let found = query_layer(service, layer_id, field, &values).await;
					for (key, object_id) in found {
						if remaining.remove(&key).is_some() || matches.contains_key(&key) {
							matches
								.entry(key)
								.or_default()
								.push(ExistingMatch { layer_id, object_id });
						}
					}
				}
			}
			ExistenceResolver::Index(index) => {
				for key in remaining.keys() {
					match index.get(key).await {
						Ok(Some(entry)) => {
							matches.entry(key.clone()).or_default().push(ExistingMatch {
								layer_id: entry.layer_id,
								object_id: entry.object_id,
							});
						}
						Ok(None) => {}
						Err(e) => error!("Existence index lookup for '{}' failed: {}", key, e),
					}
				}
			}
		}
		matches
	}
}

/// Attribute name the id field is stored under remotely.
fn query_field(id_field: &str) -> &str {
	id_field.rsplit('/').next().unwrap_or(id_field)
}

/// `field IN (...)`; numbers unquoted, strings quoted with `'` doubled.
pub fn in_clause(field: &str, values: &[&Value]) -> String {
	let items: Vec<String> = values
		.iter()
		.filter_map(|v| match v {
			Value::Number(n) => Some(n.to_string()),
			Value::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
			_ => None,
		})
		.collect();
	format!("{} IN ({})", field, items.join(","))
}

async fn query_layer(
	service: &dyn FeatureService,
	layer_id: i64,
	field: &str,
	values: &[&Value],
) -> Vec<(String, i64)> {
	let where_clause = in_clause(field, values);
	let features = match service.query(layer_id, &where_clause, &[field, "objectid"]).await {
		Ok(f) => f,
		Err(e) => {
			error!(
				"Something went wrong while querying layer {} for existing features: {}",
				layer_id, e
			);
			return Vec::new();
		}
	};

	debug!("Layer {} holds {} of {} queried id(s)", layer_id, features.len(), values.len());
	features
		.iter()
		.filter_map(|feature| {
			let key = attribute(feature, field).and_then(mapping::id_key)?;
			match feature.object_id() {
				Some(oid) => Some((key, oid)),
				None => {
					warn!("Feature '{}' on layer {} has no objectid", key, layer_id);
					None
				}
			}
		})
		.collect()
}

fn attribute<'a>(feature: &'a Feature, field: &str) -> Option<&'a Value> {
	feature.attributes.get(field).or_else(|| {
		feature
			.attributes
			.iter()
			.find(|(k, _)| k.eq_ignore_ascii_case(field))
			.map(|(_, v)| v)
	})
}
