//! Get/set by slash-separated path over arbitrarily nested JSON.
//!
//! Both operations are total: `get` returns `None` on any shape mismatch
//! and `set` never creates intermediate containers.

use serde_json::Value;

/// Split `a/b/c` into its segments.
pub fn segments(path: &str) -> Vec<&str> {
	path.split('/').collect()
}

/// Resolve `segments` against `data`. Object keys are matched exactly;
/// array elements are addressed by a non-negative decimal index.
pub fn get<'a>(data: &'a Value, segments: &[&str]) -> Option<&'a Value> {
	segments.iter().try_fold(data, |current, segment| match current {
		Value::Object(map) => map.get(*segment),
		Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
		_ => None,
	})
}

pub fn get_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
	get(data, &segments(path))
}

fn get_mut<'a>(data: &'a mut Value, segments: &[&str]) -> Option<&'a mut Value> {
	segments.iter().try_fold(data, |current, segment| match current {
		Value::Object(map) => map.get_mut(*segment),
		Value::Array(items) => segment
			.parse::<usize>()
			.ok()
			.and_then(move |i| items.get_mut(i)),
		_ => None,
	})
}

/// Write `value` at `segments`. The parent container must already exist;
/// the final key is inserted into an object or replaces an in-range array
/// element. Returns whether anything was written.
pub fn set(data: &mut Value, segments: &[&str], value: Value) -> bool {
	let Some((last, parents)) = segments.split_last() else {
		return false;
	};

	match get_mut(data, parents) {
		Some(Value::Object(map)) => {
			map.insert((*last).to_string(), value);
			true
		}
		Some(Value::Array(items)) => match last
			.parse::<usize>()
			.ok()
			.and_then(move |i| items.get_mut(i))
		{
			Some(slot) => {
				*slot = value;
				true
			}
			None => false,
		},
		_ => false,
	}
}

pub fn set_path(data: &mut Value, path: &str, value: Value) -> bool {
	set(data, &segments(path), value)
}
