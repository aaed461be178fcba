//! Role-store interface.
//!
//! The gateway only ever needs four reads and a shutdown hook, so the store
//! is a narrow trait rather than a driver type. Policy evaluation is
//! synchronous CPU-bound work running on the blocking pool, which is why the
//! trait is synchronous as well; async drivers are wrapped behind it.

use serde_json::Value;
use thiserror::Error;

use crate::types::{Binding, Role};

/// Role-store failure. Surfaces to clients as HTTP 500.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection or query failure.
    #[error("role store query failed: {0}")]
    Query(String),

    /// The store configuration is incomplete or invalid.
    #[error("role store configuration invalid: {0}")]
    Configuration(String),

    /// A document could not be decoded into the expected shape.
    #[error("role store document decode failed: {0}")]
    Decode(String),
}

/// Narrow read interface over the roles/bindings store.
///
/// Implementations must be cheap to share across requests; the gateway holds
/// one handle for the whole process and only calls [`RoleStore::disconnect`]
/// at shutdown.
pub trait RoleStore: Send + Sync {
    /// Single-document lookup for the `find_one` policy built-in.
    fn find_one(&self, collection: &str, query: &Value) -> Result<Option<Value>, StoreError>;

    /// Multi-document lookup for the `find_many` policy built-in.
    fn find_many(&self, collection: &str, query: &Value) -> Result<Vec<Value>, StoreError>;

    /// Bindings whose subjects contain the user id or whose groups intersect
    /// the caller's groups. `PUBLIC` documents only.
    fn retrieve_user_bindings(
        &self,
        user_id: &str,
        groups: &[String],
    ) -> Result<Vec<Binding>, StoreError>;

    /// Roles matching the given id set. `PUBLIC` documents only.
    fn retrieve_roles_by_ids(&self, role_ids: &[String]) -> Result<Vec<Role>, StoreError>;

    /// Release the underlying connections. Called once at shutdown.
    fn disconnect(&self);
}

/// In-memory role store used by tests and local development.
#[derive(Default)]
pub struct InMemoryRoleStore {
    collections: std::sync::Mutex<std::collections::HashMap<String, Vec<Value>>>,
    bindings: Vec<Binding>,
    roles: Vec<Role>,
}

impl InMemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an arbitrary collection consumed by `find_one`/`find_many`.
    pub fn with_collection(self, name: &str, documents: Vec<Value>) -> Self {
        self.collections
            .lock()
            .expect("collection lock poisoned")
            .insert(name.to_string(), documents);
        self
    }

    /// Seed the bindings returned for any subject.
    pub fn with_bindings(mut self, bindings: Vec<Binding>) -> Self {
        self.bindings = bindings;
        self
    }

    /// Seed the roles returned for any id set.
    pub fn with_roles(mut self, roles: Vec<Role>) -> Self {
        self.roles = roles;
        self
    }

    fn matches(query: &Value, document: &Value) -> bool {
        match query.as_object() {
            Some(fields) => fields
                .iter()
                .all(|(key, expected)| document.get(key) == Some(expected)),
            None => false,
        }
    }
}

impl RoleStore for InMemoryRoleStore {
    fn find_one(&self, collection: &str, query: &Value) -> Result<Option<Value>, StoreError> {
        let collections = self.collections.lock().expect("collection lock poisoned");
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|doc| Self::matches(query, doc)).cloned()))
    }

    fn find_many(&self, collection: &str, query: &Value) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.lock().expect("collection lock poisoned");
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| Self::matches(query, doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn retrieve_user_bindings(
        &self,
        user_id: &str,
        groups: &[String],
    ) -> Result<Vec<Binding>, StoreError> {
        Ok(self
            .bindings
            .iter()
            .filter(|binding| {
                binding.state == crate::STATE_PUBLIC
                    && (binding.subjects.iter().any(|s| s == user_id)
                        || binding.groups.iter().any(|g| groups.contains(g)))
            })
            .cloned()
            .collect())
    }

    fn retrieve_roles_by_ids(&self, role_ids: &[String]) -> Result<Vec<Role>, StoreError> {
        Ok(self
            .roles
            .iter()
            .filter(|role| role.state == crate::STATE_PUBLIC && role_ids.contains(&role.role_id))
            .cloned()
            .collect())
    }

    fn disconnect(&self) {}
}
