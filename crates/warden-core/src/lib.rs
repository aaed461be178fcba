//! Common types for Warden: identity documents, configuration, errors, and
//! the role-store interface shared by the policy engine and the gateway.

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::{ConfigError, Environment};
pub use error::ErrorBody;
pub use store::{InMemoryRoleStore, RoleStore, StoreError};
pub use types::{Binding, BindingResource, Role, UserInfo};

/// Business message returned to clients for any internal failure.
pub const GENERIC_BUSINESS_ERROR_MESSAGE: &str = "Internal server error, please try again later";

/// Business message returned to clients when a policy denies the request.
pub const NO_PERMISSIONS_ERROR_MESSAGE: &str =
    "You do not have permissions to access this feature, contact the project administrator for more information.";

/// Document state value under which role-store documents are visible.
pub const STATE_PUBLIC: &str = "PUBLIC";

/// Default header carrying the serialized row-filter predicate.
pub const BASE_ROW_FILTER_HEADER_KEY: &str = "acl_rows";

/// Content type prefix that gates request/response body parsing.
pub const JSON_CONTENT_TYPE: &str = "application/json";
