//! Per-method merge policies (spec §4.2 method policy table).

use crate::error::GatewayError;
use serde_json::{Map, Value};

/// One backend's contribution to a fanned-out list call.
pub struct Contribution {
	pub slug: String,
	pub result: Result<Value, GatewayError>,
}

/// Concatenates `items_field` arrays across backends, prefixing each item's
/// `name_field` with `{slug}_`, and folding per-backend errors into
/// `_meta.partialErrors` instead of failing the whole call (spec §4.2
/// Partial failure).
pub fn merge_list(
	contributions: Vec<Contribution>,
	items_field: &str,
	name_field: &str,
) -> Value {
	let mut merged_items = Vec::new();
	let mut partial_errors = Map::new();
	let mut cursors = Map::new();

	for c in contributions {
		match c.result {
			Ok(mut v) => {
				if let Some(cursor) = v.get("nextCursor").cloned() {
					if !cursor.is_null() {
						cursors.insert(c.slug.clone(), cursor);
					}
				}
				let items = v
					.get_mut(items_field)
					.and_then(|v| v.as_array_mut())
					.map(std::mem::take)
					.unwrap_or_default();
				for mut item in items {
					if let Some(name) = item.get(name_field).and_then(|n| n.as_str()) {
						let prefixed = format!("{}_{}", c.slug, name);
						if let Some(obj) = item.as_object_mut() {
							obj.insert(name_field.to_string(), Value::String(prefixed));
						}
					}
					merged_items.push(item);
				}
			},
			Err(e) => {
				partial_errors.insert(
					c.slug,
					serde_json::json!({"code": e.to_rpc_error().code, "message": e.to_string()}),
				);
			},
		}
	}

	let mut meta = Map::new();
	if !partial_errors.is_empty() {
		meta.insert("partialErrors".to_string(), Value::Object(partial_errors));
	}
	if !cursors.is_empty() {
		meta.insert("nextCursor".to_string(), Value::Object(cursors));
	}

	let mut result = Map::new();
	result.insert(items_field.to_string(), Value::Array(merged_items));
	if !meta.is_empty() {
		result.insert("_meta".to_string(), Value::Object(meta));
	}
	Value::Object(result)
}

/// Splits a slug-prefixed name/uri (`"{slug}_{rest}"`) by matching against
/// the caller's live subscription set, preferring the longest matching slug.
/// Errors if zero or more than one subscribed slug is a valid prefix (spec
/// §4.2 "error if ambiguous or missing").
pub fn parse_prefixed_name<'a>(
	name: &'a str,
	subscribed_slugs: &[String],
) -> Result<(&'a str, &'a str), GatewayError> {
	let mut matches: Vec<&str> = subscribed_slugs
		.iter()
		.filter(|slug| name.len() > slug.len() + 1 && name.starts_with(slug.as_str()) && name.as_bytes()[slug.len()] == b'_')
		.map(|s| s.as_str())
		.collect();
	matches.sort_by_key(|s| std::cmp::Reverse(s.len()));

	match matches.len() {
		0 => Err(GatewayError::BackendNotFound(name.to_string())),
		1 => Ok((matches[0], &name[matches[0].len() + 1..])),
		_ if matches[0].len() > matches[1].len() => Ok((matches[0], &name[matches[0].len() + 1..])),
		_ => Err(GatewayError::AmbiguousTarget(name.to_string())),
	}
}

/// Declares the union of upstream capabilities, keyed by `protocolVersion`
/// chosen for the downstream session (spec §4.2 `initialize`).
pub fn merge_initialize(protocol_version: &str, server_name: &str, server_version: &str) -> Value {
	serde_json::json!({
		"protocolVersion": protocol_version,
		"capabilities": {
			"tools": {},
			"prompts": {},
			"resources": { "subscribe": true },
		},
		"serverInfo": { "name": server_name, "version": server_version },
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn merges_and_prefixes_tool_names() {
		let contributions = vec![
			Contribution {
				slug: "a".to_string(),
				result: Ok(serde_json::json!({"tools": [{"name": "echo"}]})),
			},
			Contribution {
				slug: "b".to_string(),
				result: Ok(serde_json::json!({"tools": [{"name": "add"}]})),
			},
		];
		let merged = merge_list(contributions, "tools", "name");
		let names: Vec<&str> = merged["tools"]
			.as_array()
			.unwrap()
			.iter()
			.map(|t| t["name"].as_str().unwrap())
			.collect();
		assert_eq!(names, vec!["a_echo", "b_add"]);
	}

	#[test]
	fn demotes_backend_errors_to_partial_errors() {
		let contributions = vec![
			Contribution {
				slug: "a".to_string(),
				result: Ok(serde_json::json!({"tools": [{"name": "echo"}]})),
			},
			Contribution {
				slug: "b".to_string(),
				result: Err(GatewayError::UpstreamTimeout("b".to_string())),
			},
		];
		let merged = merge_list(contributions, "tools", "name");
		assert_eq!(merged["tools"].as_array().unwrap().len(), 1);
		assert!(merged["_meta"]["partialErrors"]["b"].is_object());
	}

	#[test]
	fn empty_subscriptions_yield_empty_not_error() {
		let merged = merge_list(vec![], "tools", "name");
		assert_eq!(merged["tools"].as_array().unwrap().len(), 0);
		assert!(merged.get("_meta").is_none());
	}

	#[test]
	fn parses_prefixed_name_to_slug_and_rest() {
		let subs = vec!["a".to_string(), "b".to_string()];
		assert_eq!(parse_prefixed_name("a_echo", &subs).unwrap(), ("a", "echo"));
	}

	#[test]
	fn rejects_unknown_slug() {
		let subs = vec!["a".to_string()];
		assert!(matches!(
			parse_prefixed_name("c_echo", &subs),
			Err(GatewayError::BackendNotFound(_))
		));
	}

	#[test]
	fn prefers_longest_matching_slug() {
		let subs = vec!["a".to_string(), "a_b".to_string()];
		assert_eq!(
			parse_prefixed_name("a_b_echo", &subs).unwrap(),
			("a_b", "echo")
		);
	}
}
