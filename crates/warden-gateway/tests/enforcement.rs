//! End-to-end enforcement tests against the assembled router.
//!
//! The upstream transport is a recording fake, so every scenario can assert
//! both the response the caller sees and exactly what (if anything) was
//! forwarded to the target service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde_json::{json, Value};
use tower::ServiceExt;

use warden_core::{
    Environment, InMemoryRoleStore, RoleStore, StoreError, NO_PERMISSIONS_ERROR_MESSAGE,
};
use warden_gateway::{
    build_router, AppState, EvaluatorCache, GatewayError, ProxyRequest, ProxyResponse,
    UpstreamClient,
};
use warden_openapi::{PermissionIndex, PermissionSpec};
use warden_policy::{CompiledModule, PolicyModule, MODULE_FILE_NAME};

// ======================================================================
// Test harness
// ======================================================================

/// Upstream fake: records forwarded requests and answers with a canned
/// response.
struct RecordingUpstream {
    requests: Mutex<Vec<ProxyRequest>>,
    status: StatusCode,
    content_type: String,
    body: Bytes,
}

impl RecordingUpstream {
    fn ok_json(body: &str) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            status: StatusCode::OK,
            content_type: "application/json".into(),
            body: Bytes::from(body.to_string()),
        })
    }

    fn ok_text(body: &str) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            status: StatusCode::OK,
            content_type: "text/plain".into(),
            body: Bytes::from(body.to_string()),
        })
    }

    fn recorded(&self) -> Vec<ProxyRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl UpstreamClient for RecordingUpstream {
    async fn forward(&self, request: ProxyRequest) -> Result<ProxyResponse, GatewayError> {
        self.requests.lock().unwrap().push(request);
        let mut headers = HeaderMap::new();
        headers.insert("content-type", self.content_type.parse().unwrap());
        Ok(ProxyResponse {
            status: self.status,
            headers,
            body: self.body.clone(),
        })
    }
}

struct Harness {
    state: AppState,
    upstream: Arc<RecordingUpstream>,
}

fn harness(
    spec_json: &str,
    policy_source: &str,
    upstream: Arc<RecordingUpstream>,
    store: Option<Arc<dyn RoleStore>>,
    extra_env: &[(&str, &str)],
) -> Harness {
    let extra: HashMap<String, String> = extra_env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let env = Environment::from_lookup(move |key| {
        extra.get(key).cloned().or(match key {
            "TARGET_SERVICE_HOST" => Some("localhost:3000".into()),
            "OPA_MODULES_DIRECTORY" => Some("/policies".into()),
            _ => None,
        })
    })
    .unwrap();

    let module = CompiledModule::compile(&PolicyModule {
        name: MODULE_FILE_NAME.into(),
        source: policy_source.into(),
    })
    .unwrap();
    let spec = PermissionSpec::from_json(spec_json).unwrap();
    let index = Arc::new(PermissionIndex::build(&spec).unwrap());
    let cache = Arc::new(EvaluatorCache::build(&module, &spec).unwrap());

    let state = AppState {
        env: Arc::new(env),
        index,
        module,
        cache,
        store,
        upstream: upstream.clone(),
    };
    Harness { state, upstream }
}

async fn send(harness: &Harness, request: Request<Body>) -> Response {
    build_router(harness.state.clone())
        .oneshot(request)
        .await
        .unwrap()
}

async fn body_bytes(response: Response) -> Bytes {
    to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

fn simple_spec(extra: &str) -> String {
    format!(
        r#"{{"paths": {{"/api": {{"get": {{"x-rond": {{"requestFlow": {{"policyName": "todo"{extra}}}}}}}}}}}}}"#
    )
}

// ======================================================================
// Scenario 1: allow, no filter
// ======================================================================

#[tokio::test]
async fn test_allowed_request_is_proxied_with_path_and_query() {
    let upstream = RecordingUpstream::ok_json(r#"{"ok": true}"#);
    let h = harness(
        &simple_spec(""),
        "package policies\ntodo { true }",
        upstream,
        None,
        &[],
    );

    let response = send(
        &h,
        Request::get("/api?mockQuery=iamquery")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let forwarded = h.upstream.recorded();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(
        forwarded[0].url,
        "http://localhost:3000/api?mockQuery=iamquery"
    );
    assert!(forwarded[0].headers.get("acl_rows").is_none());
    assert_eq!(&body_bytes(response).await[..], br#"{"ok": true}"#);
}

// ======================================================================
// Scenario 2: deny
// ======================================================================

#[tokio::test]
async fn test_denied_request_never_reaches_upstream() {
    let upstream = RecordingUpstream::ok_json("{}");
    let h = harness(
        &simple_spec(""),
        "package policies\ntodo { false }",
        upstream,
        None,
        &[],
    );

    let response = send(&h, Request::get("/api").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(h.upstream.recorded().is_empty());

    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["statusCode"], 403);
    assert_eq!(body["message"], NO_PERMISSIONS_ERROR_MESSAGE);
}

// ======================================================================
// Scenario 3: row filter, non-empty
// ======================================================================

const ROW_FILTER_SPEC: &str = r#"{"paths": {"/api": {"get": {"x-rond": {
    "requestFlow": {
        "policyName": "allow",
        "generateQuery": true,
        "queryOptions": {"headerName": "rowfilterquery"}
    }
}}}}}"#;

const ROW_FILTER_POLICY: &str = r#"package policies
allow {
    input.request.method == "GET"
    e := data.resources[_]
    e.manager == "manager_test"
}
allow {
    input.request.method == "GET"
    input.request.path == "/api"
    e := data.resources[_]
    e.salary > 0
}"#;

#[tokio::test]
async fn test_row_filter_header_is_forwarded() {
    let upstream = RecordingUpstream::ok_json("[]");
    let h = harness(ROW_FILTER_SPEC, ROW_FILTER_POLICY, upstream, None, &[]);

    let response = send(&h, Request::get("/api").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let forwarded = h.upstream.recorded();
    assert_eq!(forwarded.len(), 1);

    let header = forwarded[0]
        .headers
        .get("rowfilterquery")
        .expect("row filter header missing")
        .to_str()
        .unwrap();
    let query: Value = serde_json::from_str(header).unwrap();
    assert_eq!(
        query,
        json!({"$or": [
            {"$and": [{"manager": {"$eq": "manager_test"}}]},
            {"$and": [{"salary": {"$gt": 0}}]},
        ]})
    );
}

// ======================================================================
// Scenarios 4 and 5: unsatisfiable filter
// ======================================================================

const EMPTY_FILTER_POLICY: &str = "package policies\nallow { false }";

#[tokio::test]
async fn test_empty_filter_with_json_content_type_returns_empty_list() {
    let upstream = RecordingUpstream::ok_json("[]");
    let h = harness(ROW_FILTER_SPEC, EMPTY_FILTER_POLICY, upstream, None, &[]);

    let response = send(
        &h,
        Request::get("/api")
            .header("content-type", "application/json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(&body_bytes(response).await[..], b"[]");
    assert!(h.upstream.recorded().is_empty());
}

#[tokio::test]
async fn test_empty_filter_with_plain_content_type_is_denied() {
    let upstream = RecordingUpstream::ok_json("[]");
    let h = harness(ROW_FILTER_SPEC, EMPTY_FILTER_POLICY, upstream, None, &[]);

    let response = send(
        &h,
        Request::get("/api")
            .header("content-type", "text/plain")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(h.upstream.recorded().is_empty());
}

// ======================================================================
// Scenario 6: nested path and the ALL verb
// ======================================================================

const ALL_VERB_SPEC: &str = r#"{"paths": {
    "/test/all/": {"all": {"x-rond": {"requestFlow": {"policyName": "permission_for_all"}}}},
    "/test/all/verb": {
        "get": {"x-rond": {"requestFlow": {"policyName": "permission_for_get"}}},
        "post": {"x-rond": {"requestFlow": {"policyName": "permission_for_post"}}}
    }
}}"#;

const ALL_VERB_POLICY: &str = r#"package policies
permission_for_all { true }
permission_for_get { true }
permission_for_post { true }"#;

#[tokio::test]
async fn test_all_verb_fallback_routing() {
    let upstream = RecordingUpstream::ok_json("{}");
    let h = harness(ALL_VERB_SPEC, ALL_VERB_POLICY, upstream, None, &[]);

    let response = send(&h, Request::get("/test/all/verb").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &h,
        Request::put("/test/all/verb").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    // no exact entry and no prefix claims the slashless path
    let response = send(&h, Request::get("/test/all").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ======================================================================
// Scenario 7: percent-encoded path segments
// ======================================================================

#[tokio::test]
async fn test_percent_encoded_segments_match_and_preserve_encoding() {
    let spec = r#"{"paths": {"/files/{fileId}": {"get": {"x-rond": {"requestFlow": {"policyName": "todo"}}}}}}"#;
    for encoded in ["a%252Fb", "a%2Fb"] {
        let upstream = RecordingUpstream::ok_json("{}");
        let h = harness(spec, "package policies\ntodo { true }", upstream, None, &[]);

        let path = format!("/files/{encoded}");
        let response = send(&h, Request::get(path.as_str()).body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK, "{path} should be allowed");

        let forwarded = h.upstream.recorded();
        assert_eq!(forwarded[0].url, format!("http://localhost:3000{path}"));
    }
}

// ======================================================================
// Scenario 8: role-store integration through find_one
// ======================================================================

const FIND_ONE_POLICY: &str = r#"package policies
todo {
    project := find_one("projects", {"projectId": "1234"})
    project.tenantId == "1234"
}"#;

#[tokio::test]
async fn test_find_one_allows_when_document_matches() {
    let store = InMemoryRoleStore::new()
        .with_collection("projects", vec![json!({"projectId": "1234", "tenantId": "1234"})]);
    let upstream = RecordingUpstream::ok_json("{}");
    let h = harness(
        &simple_spec(""),
        FIND_ONE_POLICY,
        upstream,
        Some(Arc::new(store)),
        &[],
    );

    let response = send(&h, Request::get("/api").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.upstream.recorded().len(), 1);
}

#[tokio::test]
async fn test_find_one_denies_when_document_missing() {
    let store = InMemoryRoleStore::new();
    let upstream = RecordingUpstream::ok_json("{}");
    let h = harness(
        &simple_spec(""),
        FIND_ONE_POLICY,
        upstream,
        Some(Arc::new(store)),
        &[],
    );

    let response = send(&h, Request::get("/api").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(h.upstream.recorded().is_empty());
}

struct FailingStore;

impl RoleStore for FailingStore {
    fn find_one(&self, _: &str, _: &Value) -> Result<Option<Value>, StoreError> {
        Err(StoreError::Query("no reachable servers".into()))
    }
    fn find_many(&self, _: &str, _: &Value) -> Result<Vec<Value>, StoreError> {
        Err(StoreError::Query("no reachable servers".into()))
    }
    fn retrieve_user_bindings(
        &self,
        _: &str,
        _: &[String],
    ) -> Result<Vec<warden_core::Binding>, StoreError> {
        Err(StoreError::Query("no reachable servers".into()))
    }
    fn retrieve_roles_by_ids(&self, _: &[String]) -> Result<Vec<warden_core::Role>, StoreError> {
        Err(StoreError::Query("no reachable servers".into()))
    }
    fn disconnect(&self) {}
}

#[tokio::test]
async fn test_find_one_denies_when_store_errors() {
    let upstream = RecordingUpstream::ok_json("{}");
    let h = harness(
        &simple_spec(""),
        FIND_ONE_POLICY,
        upstream,
        Some(Arc::new(FailingStore)),
        &[],
    );

    let response = send(&h, Request::get("/api").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_identity_store_failure_is_internal_error() {
    let upstream = RecordingUpstream::ok_json("{}");
    let h = harness(
        &simple_spec(""),
        "package policies\ntodo { true }",
        upstream,
        Some(Arc::new(FailingStore)),
        &[],
    );

    // a user id triggers the bindings lookup, which fails
    let response = send(
        &h,
        Request::get("/api")
            .header("miauserid", "user1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(h.upstream.recorded().is_empty());
}

// ======================================================================
// Identity flows through policy input
// ======================================================================

#[tokio::test]
async fn test_user_bindings_and_roles_reach_the_policy() {
    let store = InMemoryRoleStore::new()
        .with_bindings(vec![warden_core::Binding {
            binding_id: "binding1".into(),
            subjects: vec!["user1".into()],
            roles: vec!["role1".into()],
            state: warden_core::STATE_PUBLIC.into(),
            ..Default::default()
        }])
        .with_roles(vec![warden_core::Role {
            role_id: "role1".into(),
            permissions: vec!["console.project.view".into()],
            state: warden_core::STATE_PUBLIC.into(),
        }]);

    let policy = r#"package policies
todo {
    role := input.user.roles[_]
    role.permissions[_] == "console.project.view"
}"#;
    let upstream = RecordingUpstream::ok_json("{}");
    let h = harness(&simple_spec(""), policy, upstream, Some(Arc::new(store)), &[]);

    let response = send(
        &h,
        Request::get("/api")
            .header("miauserid", "user1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    // an unknown caller has no bindings, so the same policy denies
    let response = send(&h, Request::get("/api").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_get_header_is_case_insensitive_end_to_end() {
    let policy = r#"package policies
todo { get_header("x-backdoor", input.request.headers) == "mocked value" }"#;
    let upstream = RecordingUpstream::ok_json("{}");
    let h = harness(&simple_spec(""), policy, upstream, None, &[]);

    let response = send(
        &h,
        Request::get("/api")
            .header("X-BACKDOOR", "mocked value")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

// ======================================================================
// Body handling
// ======================================================================

#[tokio::test]
async fn test_request_body_reaches_upstream_byte_for_byte() {
    let policy = r#"package policies
todo { input.request.body.hello == "world" }"#;
    let spec = r#"{"paths": {"/api": {"post": {"x-rond": {"requestFlow": {"policyName": "todo"}}}}}}"#;
    let upstream = RecordingUpstream::ok_json("{}");
    let h = harness(spec, policy, upstream, None, &[]);

    let raw_body: &[u8] = br#"{"hello":  "world"}"#;
    let response = send(
        &h,
        Request::post("/api")
            .header("content-type", "application/json")
            .body(Body::from(raw_body))
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let forwarded = h.upstream.recorded();
    // whitespace preserved: the parsed body never replaces the original
    assert_eq!(&forwarded[0].body[..], raw_body);
}

#[tokio::test]
async fn test_unparsable_json_write_body_is_internal_error() {
    let spec = r#"{"paths": {"/api": {"post": {"x-rond": {"requestFlow": {"policyName": "todo"}}}}}}"#;
    let upstream = RecordingUpstream::ok_json("{}");
    let h = harness(spec, "package policies\ntodo { true }", upstream, None, &[]);

    let response = send(
        &h,
        Request::post("/api")
            .header("content-type", "application/json")
            .body(Body::from("{not-json"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(h.upstream.recorded().is_empty());
}

// ======================================================================
// Index misses, documentation path, health
// ======================================================================

#[tokio::test]
async fn test_unknown_path_is_denied() {
    let upstream = RecordingUpstream::ok_json("{}");
    let h = harness(
        &simple_spec(""),
        "package policies\ntodo { true }",
        upstream,
        None,
        &[],
    );

    let response = send(&h, Request::get("/unknown").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(h.upstream.recorded().is_empty());
}

#[tokio::test]
async fn test_documentation_path_is_proxied_without_authorization() {
    let upstream = RecordingUpstream::ok_json(r#"{"paths": {}}"#);
    let h = harness(
        &simple_spec(""),
        "package policies\ntodo { true }",
        upstream,
        None,
        &[("TARGET_SERVICE_OAS_PATH", "/documentation/json")],
    );

    let response = send(
        &h,
        Request::get("/documentation/json").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.upstream.recorded().len(), 1);
}

#[tokio::test]
async fn test_route_without_request_policy_is_proxied() {
    let spec = r#"{"paths": {"/open": {"get": {}}}}"#;
    let upstream = RecordingUpstream::ok_json("{}");
    let h = harness(spec, "package policies\ntodo { true }", upstream, None, &[]);

    let response = send(&h, Request::get("/open").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.upstream.recorded().len(), 1);
}

#[tokio::test]
async fn test_health_endpoints_skip_authorization() {
    let upstream = RecordingUpstream::ok_json("{}");
    let h = harness(
        &simple_spec(""),
        "package policies\ntodo { false }",
        upstream,
        None,
        &[],
    );

    for path in ["/-/healthz", "/-/ready", "/-/check-up"] {
        let response = send(&h, Request::get(path).body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK, "{path}");
    }
    assert!(h.upstream.recorded().is_empty());
}

// ======================================================================
// Standalone mode
// ======================================================================

#[tokio::test]
async fn test_standalone_mode_echoes_filter_instead_of_proxying() {
    let upstream = RecordingUpstream::ok_json("{}");
    let h = harness(
        ROW_FILTER_SPEC,
        ROW_FILTER_POLICY,
        upstream,
        None,
        &[
            ("STANDALONE", "true"),
            ("BINDINGS_CRUD_SERVICE_URL", "http://crud"),
            ("TARGET_SERVICE_HOST", ""),
        ],
    );

    let response = send(&h, Request::get("/eval/api").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let header = response
        .headers()
        .get("rowfilterquery")
        .expect("filter header missing")
        .to_str()
        .unwrap();
    let query: Value = serde_json::from_str(header).unwrap();
    assert_eq!(query["$or"].as_array().unwrap().len(), 2);

    assert!(h.upstream.recorded().is_empty());
}

#[tokio::test]
async fn test_standalone_mode_denies_like_inline() {
    let upstream = RecordingUpstream::ok_json("{}");
    let h = harness(
        &simple_spec(""),
        "package policies\ntodo { false }",
        upstream,
        None,
        &[
            ("STANDALONE", "true"),
            ("BINDINGS_CRUD_SERVICE_URL", "http://crud"),
            ("TARGET_SERVICE_HOST", ""),
        ],
    );

    let response = send(&h, Request::get("/eval/api").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_standalone_grant_and_revoke_forward_to_crud() {
    let upstream = RecordingUpstream::ok_json(r#"{"bindingId": "b-1"}"#);
    let h = harness(
        &simple_spec(""),
        "package policies\ntodo { true }",
        upstream,
        None,
        &[
            ("STANDALONE", "true"),
            ("BINDINGS_CRUD_SERVICE_URL", "http://crud-service"),
            ("TARGET_SERVICE_HOST", ""),
        ],
    );

    let response = send(
        &h,
        Request::post("/grant/bindings/resource/project")
            .body(Body::from(r#"{"subject": "user1"}"#))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let forwarded = h.upstream.recorded();
    assert_eq!(
        forwarded[0].url,
        "http://crud-service/grant/bindings/resource/project"
    );

    let response = send(
        &h,
        Request::post("/revoke/bindings/resource/project")
            .body(Body::from(r#"{"subject": "user1"}"#))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        h.upstream.recorded()[1].url,
        "http://crud-service/revoke/bindings/resource/project"
    );
}

// ======================================================================
// Response filtering
// ======================================================================

const RESPONSE_FILTER_SPEC: &str = r#"{"paths": {"/api": {"get": {"x-rond": {
    "requestFlow": {"policyName": "todo"},
    "responseFlow": {"policyName": "response_filter"}
}}}}}"#;

#[tokio::test]
async fn test_response_policy_rewrites_body() {
    let policy = r#"package policies
todo { true }
response_filter = filtered {
    filtered := [{"masked": true}]
}"#;
    let upstream = RecordingUpstream::ok_json(r#"[{"id": 1}, {"id": 2}]"#);
    let h = harness(RESPONSE_FILTER_SPEC, policy, upstream, None, &[]);

    let response = send(&h, Request::get("/api").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body, json!([{"masked": true}]));
}

#[tokio::test]
async fn test_response_policy_can_inspect_the_body() {
    let policy = r#"package policies
todo { true }
response_filter { input.response.body[_].id == 2 }"#;
    let upstream = RecordingUpstream::ok_json(r#"[{"id": 1}, {"id": 2}]"#);
    let h = harness(RESPONSE_FILTER_SPEC, policy, upstream, None, &[]);

    let response = send(&h, Request::get("/api").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    // allowed without a returned value: the body passes through unchanged
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body, json!([{"id": 1}, {"id": 2}]));
}

#[tokio::test]
async fn test_response_policy_denial_replaces_body_with_403() {
    let policy = r#"package policies
todo { true }
response_filter { false }"#;
    let upstream = RecordingUpstream::ok_json(r#"[{"secret": "value"}]"#);
    let h = harness(RESPONSE_FILTER_SPEC, policy, upstream, None, &[]);

    let response = send(&h, Request::get("/api").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["statusCode"], 403);
    assert!(body["error"].as_str().unwrap().contains("response"));
}

#[tokio::test]
async fn test_response_policy_skips_non_json_bodies() {
    let policy = r#"package policies
todo { true }
response_filter { false }"#;
    let upstream = RecordingUpstream::ok_text("plain body");
    let h = harness(RESPONSE_FILTER_SPEC, policy, upstream, None, &[]);

    let response = send(&h, Request::get("/api").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&body_bytes(response).await[..], b"plain body");
}
