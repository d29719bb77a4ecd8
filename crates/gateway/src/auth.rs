//! API-key authentication (spec §6 "API keys", §8 boundary case "anonymous +
//! UsersOnly → 401 except ping"). Keys travel as plaintext bearer tokens on
//! the wire; the `Config` trait only ever sees their SHA-256 hex hash.

use crate::config::{AuthType, Config, hash_key};
use crate::error::GatewayError;

/// Hashes `bearer` and resolves it to a user id via `Config`. Returns
/// `None` for a missing or unrecognized key — the caller is anonymous.
pub fn resolve_user(config: &dyn Config, bearer: Option<&str>) -> Option<String> {
	let bearer = bearer?;
	let hash = hash_key(bearer);
	config.user_by_key_hash(&hash)
}

/// Methods any caller may invoke before authentication resolves, mirroring
/// the Session Core's own `ping`-before-`Ready` carve-out (spec §4.1).
fn always_allowed(method: &str) -> bool {
	method == "ping"
}

/// Under `MarkedMethods`, only the calls that actually reach a backend need
/// an identified caller — list/browse calls and protocol bookkeeping do not.
fn is_marked(method: &str) -> bool {
	matches!(
		method,
		"tools/call" | "prompts/get" | "resources/read" | "resources/subscribe" | "resources/unsubscribe"
	)
}

/// Enforces `auth_type` for one inbound method call. `user_id` is the result
/// of [`resolve_user`] for this connection.
pub fn check(auth_type: AuthType, user_id: Option<&str>, method: &str) -> Result<(), GatewayError> {
	if user_id.is_some() || always_allowed(method) {
		return Ok(());
	}
	let requires_auth = match auth_type {
		AuthType::None => false,
		AuthType::UsersOnly => true,
		AuthType::MarkedMethods => is_marked(method),
	};
	if requires_auth {
		Err(GatewayError::Unauthorized)
	} else {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ping_always_allowed_anonymous() {
		assert!(check(AuthType::UsersOnly, None, "ping").is_ok());
	}

	#[test]
	fn users_only_rejects_anonymous_non_ping() {
		assert!(matches!(
			check(AuthType::UsersOnly, None, "tools/list"),
			Err(GatewayError::Unauthorized)
		));
	}

	#[test]
	fn users_only_allows_identified_caller() {
		assert!(check(AuthType::UsersOnly, Some("alice"), "tools/list").is_ok());
	}

	#[test]
	fn marked_methods_only_gates_backend_calls() {
		assert!(check(AuthType::MarkedMethods, None, "tools/list").is_ok());
		assert!(matches!(
			check(AuthType::MarkedMethods, None, "tools/call"),
			Err(GatewayError::Unauthorized)
		));
	}

	#[test]
	fn none_mode_never_rejects() {
		assert!(check(AuthType::None, None, "tools/call").is_ok());
	}
}
