//! MongoDB-backed role store.
//!
//! Wraps the driver's synchronous API behind the narrow [`RoleStore`]
//! trait: the evaluator and the identity resolver run on the blocking pool,
//! so the store is called synchronously. The client keeps its own
//! connection pool; the process holds one handle for its whole lifetime.

use mongodb::bson::{doc, Bson, Document};
use mongodb::sync::{Client, Collection, Database};
use serde_json::Value;
use tracing::{debug, info};
use warden_core::{Binding, Environment, Role, RoleStore, StoreError, STATE_PUBLIC};

/// Role store over MongoDB collections.
#[derive(Debug)]
pub struct MongoRoleStore {
    database: Database,
    roles: Collection<Document>,
    bindings: Collection<Document>,
}

impl MongoRoleStore {
    /// Build the store from the environment. Returns `None` when no Mongo
    /// URL is configured (the gateway then runs without a role store).
    pub fn from_env(env: &Environment) -> Result<Option<Self>, StoreError> {
        if env.mongodb_url.is_empty() {
            return Ok(None);
        }
        if env.roles_collection_name.is_empty() || env.bindings_collection_name.is_empty() {
            return Err(StoreError::Configuration(format!(
                "MongoDB url is not empty, required variables might be missing: BindingsCollectionName: {:?},  RolesCollectionName: {:?}",
                env.bindings_collection_name, env.roles_collection_name
            )));
        }

        let client = Client::with_uri_str(&env.mongodb_url).map_err(|e| {
            StoreError::Configuration(format!("failed MongoDB connection string validation: {e}"))
        })?;
        let database = client.default_database().ok_or_else(|| {
            StoreError::Configuration(
                "MongoDB connection string must name a database".to_string(),
            )
        })?;

        let roles = database.collection::<Document>(&env.roles_collection_name);
        let bindings = database.collection::<Document>(&env.bindings_collection_name);

        info!(
            database = %database.name(),
            roles = %env.roles_collection_name,
            bindings = %env.bindings_collection_name,
            "role store configured"
        );
        Ok(Some(Self {
            database,
            roles,
            bindings,
        }))
    }
}

impl RoleStore for MongoRoleStore {
    fn find_one(&self, collection: &str, query: &Value) -> Result<Option<Value>, StoreError> {
        let filter = json_to_document(query)?;
        let found = self
            .database
            .collection::<Document>(collection)
            .find_one(filter, None)
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(found.map(document_to_json))
    }

    fn find_many(&self, collection: &str, query: &Value) -> Result<Vec<Value>, StoreError> {
        let filter = json_to_document(query)?;
        let cursor = self
            .database
            .collection::<Document>(collection)
            .find(filter, None)
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut documents = Vec::new();
        for result in cursor {
            let document = result.map_err(|e| StoreError::Query(e.to_string()))?;
            documents.push(document_to_json(document));
        }
        Ok(documents)
    }

    fn retrieve_user_bindings(
        &self,
        user_id: &str,
        groups: &[String],
    ) -> Result<Vec<Binding>, StoreError> {
        let filter = doc! {
            "$and": [
                {
                    "$or": [
                        { "subjects": user_id },
                        { "groups": { "$in": groups } },
                    ]
                },
                { "state": STATE_PUBLIC },
            ]
        };

        let cursor = self
            .bindings
            .find(filter, None)
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut bindings = Vec::new();
        for result in cursor {
            let document = result.map_err(|e| StoreError::Query(e.to_string()))?;
            bindings.push(
                mongodb::bson::from_document(document)
                    .map_err(|e| StoreError::Decode(e.to_string()))?,
            );
        }
        Ok(bindings)
    }

    fn retrieve_roles_by_ids(&self, role_ids: &[String]) -> Result<Vec<Role>, StoreError> {
        let filter = doc! {
            "roleId": { "$in": role_ids },
            "state": STATE_PUBLIC,
        };

        let cursor = self
            .roles
            .find(filter, None)
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut roles = Vec::new();
        for result in cursor {
            let document = result.map_err(|e| StoreError::Query(e.to_string()))?;
            roles.push(
                mongodb::bson::from_document(document)
                    .map_err(|e| StoreError::Decode(e.to_string()))?,
            );
        }
        Ok(roles)
    }

    fn disconnect(&self) {
        // the driver closes its pool when the client drops
        debug!("role store disconnect requested");
    }
}

fn json_to_document(value: &Value) -> Result<Document, StoreError> {
    mongodb::bson::to_document(value).map_err(|e| StoreError::Query(format!("invalid query: {e}")))
}

fn document_to_json(document: Document) -> Value {
    Bson::Document(document).into_relaxed_extjson()
}
