//! `GET /discovering` (spec §4.3, §9 Open Questions): probes a target URL in
//! parallel for MCP, A2A, and OpenAPI-ish surfaces. Per the resolved open
//! question, waits for every probe unless one succeeds, in which case it
//! returns immediately with whatever has been filled in.

use super::{DISCOVERY_PROBE_DEADLINE, DISCOVERY_TOTAL_DEADLINE, GatewayState};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(serde::Deserialize)]
pub struct DiscoverQuery {
	url: String,
	#[serde(rename = "authorizationBearer")]
	authorization_bearer: Option<String>,
}

const OPENAPI_PATHS: &[&str] = &["/openapi.json", "/openapi.yaml", "/swagger.json", "/v3/api-docs"];

pub async fn handle(State(_state): State<Arc<GatewayState>>, Query(q): Query<DiscoverQuery>) -> Response {
	let client = reqwest::Client::new();
	let mut probes = JoinSet::new();
	probes.spawn(probe_mcp(client.clone(), q.url.clone(), q.authorization_bearer.clone()));
	probes.spawn(probe_a2a(client.clone(), q.url.clone()));
	probes.spawn(probe_openapi(client.clone(), q.url.clone()));

	let deadline = tokio::time::sleep(DISCOVERY_TOTAL_DEADLINE);
	tokio::pin!(deadline);

	let mut found = None;
	loop {
		tokio::select! {
			next = probes.join_next() => {
				match next {
					Some(Ok(Some(summary))) => {
						found = Some(summary);
						break;
					},
					Some(Ok(None)) => continue,
					Some(Err(_)) => continue,
					None => break,
				}
			},
			_ = &mut deadline => break,
		}
	}
	probes.abort_all();

	match found {
		Some(summary) => Json(summary).into_response(),
		None => (
			StatusCode::NOT_FOUND,
			Json(json!({ "protocol": Value::Null, "message": "no protocol found" })),
		)
			.into_response(),
	}
}

async fn probe_mcp(client: reqwest::Client, url: String, bearer: Option<String>) -> Option<Value> {
	let mut req = client.post(&url).json(&json!({
		"jsonrpc": "2.0",
		"id": 1,
		"method": "initialize",
		"params": {
			"protocolVersion": "2025-06-18",
			"capabilities": {},
			"clientInfo": { "name": "aip-gateway-discovery", "version": env!("CARGO_PKG_VERSION") },
		},
	}));
	if let Some(b) = &bearer {
		req = req.bearer_auth(b);
	}
	let resp = tokio::time::timeout(DISCOVERY_PROBE_DEADLINE, req.send()).await.ok()?.ok()?;
	if !resp.status().is_success() {
		return None;
	}
	let body: Value = resp.json().await.ok()?;
	if body.get("result").and_then(|r| r.get("protocolVersion")).is_some() {
		Some(json!({ "protocol": "mcp", "url": url }))
	} else {
		None
	}
}

async fn probe_a2a(client: reqwest::Client, url: String) -> Option<Value> {
	let candidate = format!("{}/.well-known/agent.json", url.trim_end_matches('/'));
	let resp = tokio::time::timeout(DISCOVERY_PROBE_DEADLINE, client.get(&candidate).send())
		.await
		.ok()?
		.ok()?;
	if !resp.status().is_success() {
		return None;
	}
	let card: Value = resp.json().await.ok()?;
	if card.get("name").is_some() {
		Some(json!({ "protocol": "a2a", "url": candidate, "agentCard": card }))
	} else {
		None
	}
}

async fn probe_openapi(client: reqwest::Client, url: String) -> Option<Value> {
	for path in OPENAPI_PATHS {
		let candidate = format!("{}{}", url.trim_end_matches('/'), path);
		let result = tokio::time::timeout(DISCOVERY_PROBE_DEADLINE, client.get(&candidate).send()).await;
		if let Ok(Ok(resp)) = result {
			if resp.status().is_success() {
				return Some(json!({ "protocol": "openapi", "url": candidate }));
			}
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn openapi_paths_cover_common_conventions() {
		assert!(OPENAPI_PATHS.contains(&"/openapi.json"));
		assert!(OPENAPI_PATHS.contains(&"/v3/api-docs"));
	}

	#[test]
	fn probe_deadline_is_bounded_by_total_budget() {
		assert!(DISCOVERY_PROBE_DEADLINE < DISCOVERY_TOTAL_DEADLINE);
	}
}
