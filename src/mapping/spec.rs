use log::warn;
use serde_json::Value;

use super::transform::FieldRule;

/// One node of a mapping tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldNode {
	/// Nested output group (`_items`), mapped against the same source item.
	Group(MappingSpec),
	/// Value read from `path` in the source item and passed through `rule`.
	/// Bare path strings parse to a leaf with the identity rule.
	Leaf { path: String, rule: FieldRule },
}

/// Parsed mapping tree: output field name to node, in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MappingSpec {
	pub fields: Vec<(String, FieldNode)>,
}

impl MappingSpec {
	/// Parse the `mapping.fields` configuration tree. Nodes that are neither
	/// a group, a leaf with `field`, nor a bare path string are skipped.
	pub fn parse(value: &Value) -> Self {
		let Value::Object(map) = value else {
			if !value.is_null() {
				warn!("Field mapping is not an object, ignoring it");
			}
			return Self::default();
		};

		let mut fields = Vec::with_capacity(map.len());
		for (name, node) in map {
			match parse_node(node) {
				Some(parsed) => fields.push((name.clone(), parsed)),
				None => warn!(
					"Mapping for field '{}' is incorrect, skipping this field",
					name
				),
			}
		}
		Self { fields }
	}

	pub fn is_empty(&self) -> bool {
		self.fields.is_empty()
	}
}

fn parse_node(node: &Value) -> Option<FieldNode> {
	match node {
		Value::String(path) => Some(FieldNode::Leaf {
			path: path.clone(),
			rule: FieldRule::default(),
		}),
		Value::Object(obj) => {
			if let Some(items) = obj.get("_items") {
				return items
					.is_object()
					.then(|| FieldNode::Group(MappingSpec::parse(items)));
			}
			let path = obj.get("field")?.as_str()?.to_string();
			let rule = FieldRule {
				required: obj.get("required").and_then(Value::as_bool).unwrap_or(false),
				list_item: obj.get("list_item").and_then(as_index),
				character_set: obj.get("character_set").and_then(parse_character_set),
			};
			Some(FieldNode::Leaf { path, rule })
		}
		_ => None,
	}
}

/// Integers or integer strings.
fn as_index(value: &Value) -> Option<i64> {
	match value {
		Value::Number(n) => n.as_i64(),
		Value::String(s) => s.trim().parse().ok(),
		_ => None,
	}
}

/// `[start, end]` where either bound may be null; any other shape is ignored.
fn parse_character_set(value: &Value) -> Option<(Option<i64>, Option<i64>)> {
	let [start, end] = value.as_array()?.as_slice() else {
		return None;
	};
	let bound = |v: &Value| if v.is_null() { Some(None) } else { as_index(v).map(Some) };
	Some((bound(start)?, bound(end)?))
}
