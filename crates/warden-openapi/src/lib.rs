//! Permission spec handling for the Warden gateway.
//!
//! The spec is an OpenAPI-style JSON document whose operations carry a
//! permission descriptor (`x-rond`, with the legacy `x-permission` shape
//! normalized at load). [`index::PermissionIndex`] turns the spec into a
//! routing trie answering `(method, path)` lookups with wildcard and
//! ALL-verb fallbacks.

pub mod error;
pub mod index;
pub mod spec;

pub use error::SpecError;
pub use index::{PermissionIndex, RouteMatch, ALL_HTTP_METHOD};
pub use spec::{PermissionSpec, PolicyConfig};
