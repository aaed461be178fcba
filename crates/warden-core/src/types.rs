//! Identity documents consumed by policy evaluation.
//!
//! Roles and bindings come from the role store; only documents whose `state`
//! is `PUBLIC` are ever returned to the gateway. The serialized form of these
//! types is part of the policy input contract, so field names are stable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named bundle of permissions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    #[serde(default)]
    pub role_id: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub state: String,
}

/// Resource scope of a binding, when the binding is not global.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BindingResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
}

/// A record linking subjects (user ids or groups) to roles and permissions,
/// optionally scoped to a single resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    #[serde(default)]
    pub binding_id: String,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<BindingResource>,
    #[serde(default)]
    pub state: String,
}

/// The caller identity assembled by the identity resolver and handed to the
/// input assembler. Fully materialized before any policy call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserInfo {
    /// Parsed content of the user-properties header.
    pub properties: HashMap<String, Value>,
    /// Groups split from the user-groups header.
    pub groups: Vec<String>,
    /// Bindings matching the caller, `PUBLIC` only.
    pub bindings: Vec<Binding>,
    /// Roles referenced by those bindings, `PUBLIC` only.
    pub roles: Vec<Role>,
}

impl UserInfo {
    /// Collect the distinct role ids referenced by the user's bindings,
    /// preserving first-seen order.
    pub fn role_ids_from_bindings(bindings: &[Binding]) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut ids = Vec::new();
        for binding in bindings {
            for role_id in &binding.roles {
                if seen.insert(role_id.clone()) {
                    ids.push(role_id.clone());
                }
            }
        }
        ids
    }
}
