use log::debug;
use serde_json::Value;

use super::MappingError;

/// Per-field transform rules of a mapping leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldRule {
	/// Reject the whole source item when the final value is empty.
	pub required: bool,
	/// Select one element of a list (or one character of a string).
	/// Negative indexes count from the end.
	pub list_item: Option<i64>,
	/// `[start, end]` slice; either bound may be open.
	pub character_set: Option<(Option<i64>, Option<i64>)>,
}

impl FieldRule {
	pub fn is_identity(&self) -> bool {
		self == &FieldRule::default()
	}
}

/// Apply `rule` to a resolved value: list-index selection, then slicing,
/// then the required check. A step that cannot be applied to the value's
/// shape yields an absent value rather than an error; only the required
/// check fails.
pub fn apply(field_path: &str, rule: &FieldRule, value: Option<&Value>) -> Result<Value, MappingError> {
	let mut value = value.cloned();

	if let Some(index) = rule.list_item {
		value = value.and_then(|v| select_index(&v, index));
		if value.is_none() {
			debug!(
				"Value transformation for field '{}' failed: no item at index {}",
				field_path, index
			);
		}
	}

	if let Some((start, end)) = rule.character_set {
		value = value.and_then(|v| slice(&v, start, end));
		if value.is_none() {
			debug!(
				"Value transformation for field '{}' failed: value cannot be sliced",
				field_path
			);
		}
	}

	let value = value.unwrap_or(Value::Null);
	if rule.required && is_falsy(&value) {
		return Err(MappingError::MissingRequiredField(field_path.to_string()));
	}

	Ok(value)
}

/// Empty in the loose sense used for required fields: null, false, zero,
/// and empty strings, lists and objects.
pub fn is_falsy(value: &Value) -> bool {
	match value {
		Value::Null => true,
		Value::Bool(b) => !b,
		Value::Number(n) => n.as_f64() == Some(0.0),
		Value::String(s) => s.is_empty(),
		Value::Array(a) => a.is_empty(),
		Value::Object(o) => o.is_empty(),
	}
}

fn resolve_index(len: usize, index: i64) -> Option<usize> {
	let len = len as i64;
	let i = if index < 0 { len + index } else { index };
	(0..len).contains(&i).then_some(i as usize)
}

fn select_index(value: &Value, index: i64) -> Option<Value> {
	match value {
		Value::Array(items) => resolve_index(items.len(), index).map(|i| items[i].clone()),
		Value::String(s) => {
			let chars: Vec<char> = s.chars().collect();
			resolve_index(chars.len(), index).map(|i| Value::String(chars[i].to_string()))
		}
		_ => None,
	}
}

/// Clamp an optional slice bound the way half-open slicing does.
fn slice_bounds(len: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
	let len = len as i64;
	let clamp = |bound: i64| {
		let b = if bound < 0 { len + bound } else { bound };
		b.clamp(0, len) as usize
	};
	let s = start.map(clamp).unwrap_or(0);
	let e = end.map(clamp).unwrap_or(len as usize);
	(s, e.max(s))
}

fn slice(value: &Value, start: Option<i64>, end: Option<i64>) -> Option<Value> {
	match value {
		Value::String(s) => {
			let chars: Vec<char> = s.chars().collect();
			let (from, to) = slice_bounds(chars.len(), start, end);
			Some(Value::String(chars[from..to].iter().collect()))
		}
		Value::Array(items) => {
			let (from, to) = slice_bounds(items.len(), start, end);
			Some(Value::Array(items[from..to].to_vec()))
		}
		_ => None,
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use serde_json::json;

	fn rule(list_item: Option<i64>, character_set: Option<(Option<i64>, Option<i64>)>) -> FieldRule {
		FieldRule {
			required: false,
			list_item,
			character_set,
		}
	}

	#[test]
	fn identity_rule_passes_value_through() {
		let v = json!({"a": 1});
		assert_eq!(apply("f", &FieldRule::default(), Some(&v)).unwrap(), v);
		assert_eq!(apply("f", &FieldRule::default(), None).unwrap(), Value::Null);
	}

	#[test]
	fn list_item_selects_elements() {
		let v = json!(["a", "b", "c"]);
		assert_eq!(apply("f", &rule(Some(1), None), Some(&v)).unwrap(), json!("b"));
		assert_eq!(apply("f", &rule(Some(-1), None), Some(&v)).unwrap(), json!("c"));
		assert_eq!(apply("f", &rule(Some(3), None), Some(&v)).unwrap(), Value::Null);
		assert_eq!(apply("f", &rule(Some(0), None), Some(&json!(5))).unwrap(), Value::Null);
	}

	#[test]
	fn character_set_slices_strings() {
		let v = json!("2024-05-01T10:00:00Z");
		assert_eq!(
			apply("f", &rule(None, Some((Some(0), Some(10)))), Some(&v)).unwrap(),
			json!("2024-05-01")
		);
		assert_eq!(
			apply("f", &rule(None, Some((None, Some(4)))), Some(&v)).unwrap(),
			json!("2024")
		);
		assert_eq!(
			apply("f", &rule(None, Some((Some(-3), None))), Some(&v)).unwrap(),
			json!("00Z")
		);
		assert_eq!(
			apply("f", &rule(None, Some((Some(8), Some(2)))), Some(&v)).unwrap(),
			json!("")
		);
	}

	#[test]
	fn list_item_runs_before_slicing() {
		let v = json!(["NL-1234AB", "BE-1000"]);
		assert_eq!(
			apply("f", &rule(Some(1), Some((Some(0), Some(2)))), Some(&v)).unwrap(),
			json!("BE")
		);
	}

	#[test]
	fn slicing_non_sequences_yields_absent() {
		assert_eq!(
			apply("f", &rule(None, Some((Some(0), Some(2)))), Some(&json!(12345))).unwrap(),
			Value::Null
		);
	}

	#[test]
	fn required_rejects_empty_final_value() {
		let required = FieldRule {
			required: true,
			..Default::default()
		};
		for empty in [json!(null), json!(""), json!(0), json!(false), json!([]), json!({})] {
			assert_eq!(
				apply("properties/id", &required, Some(&empty)),
				Err(MappingError::MissingRequiredField("properties/id".into()))
			);
		}
		assert!(apply("properties/id", &required, None).is_err());
		assert_eq!(apply("properties/id", &required, Some(&json!("A1"))).unwrap(), json!("A1"));
	}

	#[test]
	fn required_check_applies_after_transforms() {
		let r = FieldRule {
			required: true,
			list_item: Some(5),
			character_set: None,
		};
		assert!(apply("tags", &r, Some(&json!(["a"]))).is_err());
	}

	#[test]
	fn unicode_is_sliced_by_character() {
		assert_eq!(
			apply("f", &rule(None, Some((Some(0), Some(2)))), Some(&json!("ÅÖx"))).unwrap(),
			json!("ÅÖ")
		);
	}
}
