//! Helpers shared by the mock clusters.

use serde_json::Value;

/// Deep merge two JSON values (patch into base).
pub fn merge_json(base: Value, patch: Value) -> Value {
	match (base, patch) {
		(Value::Object(mut base_map), Value::Object(patch_map)) => {
			for (key, patch_value) in patch_map {
				let base_value = base_map.remove(&key).unwrap_or(Value::Null);
				base_map.insert(key, merge_json(base_value, patch_value));
			}
			Value::Object(base_map)
		}
		(_, patch) => patch,
	}
}

/// Parse an equality label selector (`a=b,c=d`). Set-based expressions are
/// not supported.
pub fn parse_label_selector(selector: &str) -> Vec<(String, String)> {
	selector
		.split(',')
		.filter(|term| !term.is_empty())
		.filter_map(|term| term.split_once('='))
		.map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
		.collect()
}

/// Whether a raw manifest carries every label in `selector`.
pub fn labels_match(manifest: &Value, selector: &[(String, String)]) -> bool {
	selector.iter().all(|(key, value)| {
		manifest
			.pointer("/metadata/labels")
			.and_then(|labels| labels.get(key))
			.and_then(Value::as_str)
			== Some(value.as_str())
	})
}

/// The message the API server uses for a missing object.
pub fn not_found_message(resource: &str, name: &str) -> String {
	format!("{resource} \"{name}\" not found")
}
