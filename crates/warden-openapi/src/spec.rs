//! Permission spec deserialization and acquisition.
//!
//! Two descriptor shapes are accepted per operation: the current `x-rond`
//! (`requestFlow`/`responseFlow`) and the legacy `x-permission`
//! (`allow`/`resourceFilter`/`responseFilter`). Legacy descriptors are
//! normalized into the current shape at load, so the rest of the gateway
//! only ever sees [`PolicyConfig`].

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;
use warden_core::Environment;

use crate::error::SpecError;

/// Normalized permission descriptor for one operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyConfig {
    /// Policy evaluated before forwarding; empty means no authorization.
    pub request_policy: String,
    /// When true the request policy is partially evaluated into a row
    /// filter instead of a plain allow/deny.
    pub generate_query: bool,
    /// Header carrying the serialized filter; empty falls back to the
    /// gateway default.
    pub query_header_name: String,
    /// Policy applied to the decoded response body; empty disables the
    /// response filter.
    pub response_policy: String,
}

impl PolicyConfig {
    /// Whether the operation requires any request-phase authorization.
    pub fn requires_authorization(&self) -> bool {
        !self.request_policy.is_empty()
    }
}

/// Verb map for one path template, methods lowercased (`all` included).
pub type PathVerbs = BTreeMap<String, PolicyConfig>;

/// The whole permission spec. Immutable after load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PermissionSpec {
    pub paths: BTreeMap<String, PathVerbs>,
}

impl PermissionSpec {
    /// Parse a permission spec from its JSON source.
    pub fn from_json(source: &str) -> Result<Self, SpecError> {
        let raw: RawSpec = serde_json::from_str(source)
            .map_err(|e| SpecError::Invalid(format!("unmarshal error: {e}")))?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawSpec) -> Self {
        let mut paths = BTreeMap::new();
        for (template, verbs) in raw.paths {
            let mut path_verbs = PathVerbs::new();
            for (method, verb) in verbs {
                path_verbs.insert(method.to_lowercase(), verb.into_config());
            }
            paths.insert(template, path_verbs);
        }
        Self { paths }
    }

    /// Load the spec from a local file.
    pub fn load_file(path: &Path) -> Result<Self, SpecError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SpecError::FileLoad(format!("{}: {e}", path.display())))?;
        Self::from_json(&content).map_err(|e| SpecError::FileLoad(e.to_string()))
    }

    /// Fetch the spec from the target service documentation endpoint.
    pub async fn fetch(url: &str) -> Result<Self, SpecError> {
        let response = reqwest::get(url)
            .await
            .map_err(|e| SpecError::Fetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SpecError::Fetch(format!(
                "invalid status code {}",
                response.status().as_u16()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| SpecError::Fetch(e.to_string()))?;
        Self::from_json(&body).map_err(|e| SpecError::Fetch(e.to_string()))
    }

    /// Acquire the spec per the environment: a local file wins; otherwise
    /// the documentation endpoint is fetched, retrying until it answers.
    pub async fn load(env: &Environment) -> Result<Self, SpecError> {
        if !env.api_permissions_file_path.is_empty() {
            return Self::load_file(Path::new(&env.api_permissions_file_path));
        }

        if !env.target_service_oas_path.is_empty() {
            let url = format!(
                "http://{}{}",
                env.target_service_host, env.target_service_oas_path
            );
            loop {
                match Self::fetch(&url).await {
                    Ok(spec) => return Ok(spec),
                    Err(e) => {
                        warn!(url = %url, error = %e, "failed permission spec fetch, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        Err(SpecError::MissingSource)
    }

    /// Every distinct policy name referenced by the spec, request policies
    /// and response policies alike. Operations without a request policy are
    /// skipped entirely.
    pub fn policy_names(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut names = Vec::new();
        for verbs in self.paths.values() {
            for config in verbs.values() {
                if config.request_policy.is_empty() {
                    continue;
                }
                if seen.insert(config.request_policy.clone()) {
                    names.push(config.request_policy.clone());
                }
                if !config.response_policy.is_empty()
                    && seen.insert(config.response_policy.clone())
                {
                    names.push(config.response_policy.clone());
                }
            }
        }
        names
    }

    /// Permission attached to `GET <path>`, if any.
    pub fn get_permission(&self, path: &str) -> Option<&PolicyConfig> {
        self.paths.get(path).and_then(|verbs| verbs.get("get"))
    }
}

// ----------------------------------------------------------------------
// Raw document shapes
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawSpec {
    #[serde(default)]
    paths: BTreeMap<String, BTreeMap<String, RawVerb>>,
}

#[derive(Debug, Deserialize)]
struct RawVerb {
    #[serde(rename = "x-rond")]
    rond: Option<RawRond>,
    #[serde(rename = "x-permission")]
    legacy: Option<RawLegacy>,
}

impl RawVerb {
    fn into_config(self) -> PolicyConfig {
        if let Some(rond) = self.rond {
            return PolicyConfig {
                request_policy: rond.request_flow.policy_name,
                generate_query: rond.request_flow.generate_query,
                query_header_name: rond.request_flow.query_options.header_name,
                response_policy: rond.response_flow.policy_name,
            };
        }
        if let Some(legacy) = self.legacy {
            return PolicyConfig {
                request_policy: legacy.allow,
                generate_query: legacy.resource_filter.row_filter.enabled,
                query_header_name: legacy.resource_filter.row_filter.header_key,
                response_policy: legacy.response_filter.policy,
            };
        }
        PolicyConfig::default()
    }
}

#[derive(Debug, Deserialize)]
struct RawRond {
    #[serde(rename = "requestFlow", default)]
    request_flow: RawRequestFlow,
    #[serde(rename = "responseFlow", default)]
    response_flow: RawResponseFlow,
}

#[derive(Debug, Default, Deserialize)]
struct RawRequestFlow {
    #[serde(rename = "policyName", default)]
    policy_name: String,
    #[serde(rename = "generateQuery", default)]
    generate_query: bool,
    #[serde(rename = "queryOptions", default)]
    query_options: RawQueryOptions,
}

#[derive(Debug, Default, Deserialize)]
struct RawQueryOptions {
    #[serde(rename = "headerName", default)]
    header_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawResponseFlow {
    #[serde(rename = "policyName", default)]
    policy_name: String,
}

#[derive(Debug, Deserialize)]
struct RawLegacy {
    #[serde(default)]
    allow: String,
    #[serde(rename = "resourceFilter", default)]
    resource_filter: RawResourceFilter,
    #[serde(rename = "responseFilter", default)]
    response_filter: RawResponseFilter,
}

#[derive(Debug, Default, Deserialize)]
struct RawResourceFilter {
    #[serde(rename = "rowFilter", default)]
    row_filter: RawRowFilter,
}

#[derive(Debug, Default, Deserialize)]
struct RawRowFilter {
    #[serde(default)]
    enabled: bool,
    #[serde(rename = "headerKey", default)]
    header_key: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawResponseFilter {
    #[serde(default)]
    policy: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_current_shape() {
        let spec = PermissionSpec::from_json(
            r#"{
                "paths": {
                    "/api": {
                        "GET": {
                            "x-rond": {
                                "requestFlow": {
                                    "policyName": "foo_bar",
                                    "generateQuery": true,
                                    "queryOptions": {"headerName": "customHeaderKey"}
                                },
                                "responseFlow": {"policyName": "original_path"}
                            }
                        }
                    }
                }
            }"#,
        )
        .unwrap();

        let config = &spec.paths["/api"]["get"];
        assert_eq!(
            config,
            &PolicyConfig {
                request_policy: "foo_bar".into(),
                generate_query: true,
                query_header_name: "customHeaderKey".into(),
                response_policy: "original_path".into(),
            }
        );
    }

    #[test]
    fn test_parse_legacy_shape_is_normalized() {
        let spec = PermissionSpec::from_json(
            r#"{
                "paths": {
                    "/api": {
                        "get": {
                            "x-permission": {
                                "allow": "foo_bar",
                                "resourceFilter": {
                                    "rowFilter": {"enabled": true, "headerKey": "customHeaderKey"}
                                },
                                "responseFilter": {"policy": "original_path"}
                            }
                        }
                    }
                }
            }"#,
        )
        .unwrap();

        let config = &spec.paths["/api"]["get"];
        assert_eq!(config.request_policy, "foo_bar");
        assert!(config.generate_query);
        assert_eq!(config.query_header_name, "customHeaderKey");
        assert_eq!(config.response_policy, "original_path");
    }

    #[test]
    fn test_operation_without_descriptor_means_no_authorization() {
        let spec = PermissionSpec::from_json(
            r#"{"paths": {"/docs": {"get": {}}}}"#,
        )
        .unwrap();
        assert!(!spec.paths["/docs"]["get"].requires_authorization());
    }

    #[test]
    fn test_methods_are_lowercased() {
        let spec = PermissionSpec::from_json(
            r#"{"paths": {"/x": {"POST": {"x-rond": {"requestFlow": {"policyName": "p"}}}, "ALL": {}}}}"#,
        )
        .unwrap();
        assert!(spec.paths["/x"].contains_key("post"));
        assert!(spec.paths["/x"].contains_key("all"));
    }

    #[test]
    fn test_invalid_json_fails() {
        let err = PermissionSpec::from_json("not json").unwrap_err();
        assert!(matches!(err, SpecError::Invalid(_)));
    }

    #[test]
    fn test_policy_names_distinct_request_and_response() {
        let spec = PermissionSpec::from_json(
            r#"{
                "paths": {
                    "/a": {"get": {"x-rond": {"requestFlow": {"policyName": "allow_a"}, "responseFlow": {"policyName": "filter_a"}}}},
                    "/b": {"get": {"x-rond": {"requestFlow": {"policyName": "allow_a"}}}},
                    "/c": {"get": {}}
                }
            }"#,
        )
        .unwrap();
        assert_eq!(spec.policy_names(), vec!["allow_a", "filter_a"]);
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(br#"{"paths": {"/api": {"get": {"x-rond": {"requestFlow": {"policyName": "todo"}}}}}}"#)
            .unwrap();

        let spec = PermissionSpec::load_file(&path).unwrap();
        assert_eq!(spec.paths["/api"]["get"].request_policy, "todo");
    }

    #[test]
    fn test_load_file_missing_fails() {
        let err = PermissionSpec::load_file(Path::new("/not/here.json")).unwrap_err();
        assert!(matches!(err, SpecError::FileLoad(_)));
    }

    #[test]
    fn test_get_permission_for_documentation_path() {
        let spec = PermissionSpec::from_json(
            r#"{"paths": {"/documentation/json": {"get": {}}}}"#,
        )
        .unwrap();
        let config = spec.get_permission("/documentation/json").unwrap();
        assert!(!config.requires_authorization());
        assert!(spec.get_permission("/other").is_none());
    }
}
