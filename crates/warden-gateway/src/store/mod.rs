//! Role-store implementations.

pub mod mongo;

pub use mongo::MongoRoleStore;
