//! Environment-driven configuration.
//!
//! All options come from environment variables; defaults mirror the values
//! the sidecar has always shipped with. Validation happens once at startup:
//! a bad environment is fatal before the server ever binds.

use thiserror::Error;

/// Environment variable names that participate in startup validation.
pub const TARGET_SERVICE_HOST_ENV_KEY: &str = "TARGET_SERVICE_HOST";
pub const TARGET_SERVICE_OAS_PATH_ENV_KEY: &str = "TARGET_SERVICE_OAS_PATH";
pub const API_PERMISSIONS_FILE_PATH_ENV_KEY: &str = "API_PERMISSIONS_FILE_PATH";
pub const STANDALONE_ENV_KEY: &str = "STANDALONE";
pub const BINDINGS_CRUD_SERVICE_URL_ENV_KEY: &str = "BINDINGS_CRUD_SERVICE_URL";

/// Configuration error, fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is missing or an exclusive pair is unset.
    #[error("missing environment variables, {0}")]
    MissingVariable(String),

    /// A variable holds a value that cannot be parsed.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// The full set of recognized options.
///
/// Immutable after load; shared process-wide.
#[derive(Debug, Clone)]
pub struct Environment {
    pub log_level: String,
    pub http_port: u16,
    pub service_version: String,
    pub target_service_host: String,
    pub target_service_oas_path: String,
    pub api_permissions_file_path: String,
    pub policy_modules_directory: String,
    pub user_properties_header: String,
    pub user_groups_header: String,
    pub user_id_header: String,
    pub client_type_header: String,
    pub delay_shutdown_seconds: u64,
    pub mongodb_url: String,
    pub roles_collection_name: String,
    pub bindings_collection_name: String,
    pub standalone: bool,
    pub path_prefix_standalone: String,
    pub bindings_crud_service_url: String,
}

impl Environment {
    /// Load the environment from process variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the environment through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let http_port = get("HTTP_PORT", "8080");
        let http_port: u16 = http_port.parse().map_err(|_| ConfigError::InvalidValue {
            key: "HTTP_PORT".into(),
            message: format!("not a port number: {http_port}"),
        })?;

        let delay = get("DELAY_SHUTDOWN_SECONDS", "10");
        let delay_shutdown_seconds: u64 =
            delay.parse().map_err(|_| ConfigError::InvalidValue {
                key: "DELAY_SHUTDOWN_SECONDS".into(),
                message: format!("not a number of seconds: {delay}"),
            })?;

        let standalone = matches!(
            get(STANDALONE_ENV_KEY, "").as_str(),
            "true" | "TRUE" | "1"
        );

        let policy_modules_directory = get("OPA_MODULES_DIRECTORY", "");
        if policy_modules_directory.is_empty() {
            return Err(ConfigError::MissingVariable(
                "OPA_MODULES_DIRECTORY is required".into(),
            ));
        }

        let env = Self {
            log_level: get("LOG_LEVEL", "info"),
            http_port,
            service_version: get("SERVICE_VERSION", ""),
            target_service_host: get(TARGET_SERVICE_HOST_ENV_KEY, ""),
            target_service_oas_path: get(TARGET_SERVICE_OAS_PATH_ENV_KEY, ""),
            api_permissions_file_path: get(API_PERMISSIONS_FILE_PATH_ENV_KEY, ""),
            policy_modules_directory,
            user_properties_header: get("USER_PROPERTIES_HEADER_KEY", "miauserproperties"),
            user_groups_header: get("USER_GROUPS_HEADER_KEY", "miausergroups"),
            user_id_header: get("USER_ID_HEADER_KEY", "miauserid"),
            client_type_header: get("CLIENT_TYPE_HEADER_KEY", "Client-Type"),
            delay_shutdown_seconds,
            mongodb_url: get("MONGODB_URL", ""),
            roles_collection_name: get("ROLES_COLLECTION_NAME", ""),
            bindings_collection_name: get("BINDINGS_COLLECTION_NAME", ""),
            standalone,
            path_prefix_standalone: get("PATH_PREFIX_STANDALONE", "/eval"),
            bindings_crud_service_url: get(BINDINGS_CRUD_SERVICE_URL_ENV_KEY, ""),
        };

        env.validate()?;
        Ok(env)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.target_service_host.is_empty() && !self.standalone {
            return Err(ConfigError::MissingVariable(format!(
                "one of {TARGET_SERVICE_HOST_ENV_KEY} or {STANDALONE_ENV_KEY} set to true is required"
            )));
        }
        if self.standalone && self.bindings_crud_service_url.is_empty() {
            return Err(ConfigError::MissingVariable(format!(
                "{BINDINGS_CRUD_SERVICE_URL_ENV_KEY} must be set if mode is standalone"
            )));
        }
        Ok(())
    }

    /// Whether a role store is configured at all.
    pub fn has_role_store(&self) -> bool {
        !self.mongodb_url.is_empty()
    }
}
