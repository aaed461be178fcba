//! Identity resolution from trusted upstream headers and the role store.
//!
//! Authentication happened upstream; the gateway trusts the identity
//! headers injected by the auth gateway. When a user id is present and a
//! role store is configured, the caller's bindings and roles are fetched
//! (`PUBLIC` documents only) and attached to the policy input.

use axum::http::HeaderMap;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;
use warden_core::{Environment, RoleStore, UserInfo};

use crate::error::GatewayError;

/// Resolve the caller's identity. Synchronous: runs on the blocking pool
/// together with input assembly and evaluation.
pub fn resolve_identity(
    headers: &HeaderMap,
    env: &Environment,
    store: Option<&dyn RoleStore>,
) -> Result<UserInfo, GatewayError> {
    let properties = parse_properties(headers, &env.user_properties_header)?;
    let groups = parse_groups(headers, &env.user_groups_header);
    let user_id = header_value(headers, &env.user_id_header);

    let mut user = UserInfo {
        properties,
        groups,
        ..Default::default()
    };

    let Some(store) = store else {
        return Ok(user);
    };
    if user_id.is_empty() {
        return Ok(user);
    }

    let bindings = store.retrieve_user_bindings(&user_id, &user.groups)?;
    let role_ids = UserInfo::role_ids_from_bindings(&bindings);
    let roles = if role_ids.is_empty() {
        Vec::new()
    } else {
        store.retrieve_roles_by_ids(&role_ids)?
    };

    debug!(
        user = %user_id,
        bindings = bindings.len(),
        roles = roles.len(),
        "retrieved user bindings and roles"
    );

    user.bindings = bindings;
    user.roles = roles;
    Ok(user)
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn parse_properties(
    headers: &HeaderMap,
    header_name: &str,
) -> Result<HashMap<String, Value>, GatewayError> {
    let raw = header_value(headers, header_name);
    if raw.is_empty() {
        return Ok(HashMap::new());
    }
    serde_json::from_str(&raw)
        .map_err(|e| GatewayError::Input(format!("user properties header is not valid: {e}")))
}

fn parse_groups(headers: &HeaderMap, header_name: &str) -> Vec<String> {
    let raw = header_value(headers, header_name);
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(',').map(|group| group.to_string()).collect()
}
