//! Warden: a sidecar authorization gateway.
//!
//! Every inbound request is matched against the permission index, enriched
//! with the caller's identity, evaluated against a declarative policy, and
//! then proxied to the target service, answered with a row-filter header, or
//! denied. A response-side policy may rewrite the backend's body on the way
//! out.

pub mod cache;
pub mod enforce;
pub mod error;
pub mod identity;
pub mod input;
pub mod proxy;
pub mod response;
pub mod server;
pub mod standalone;
pub mod store;

pub use cache::EvaluatorCache;
pub use error::GatewayError;
pub use proxy::{ProxyRequest, ProxyResponse, ReqwestUpstream, UpstreamClient};
pub use server::{build_router, run, AppState};
