//! Server assembly and process lifecycle.
//!
//! Startup order matters: policies are compiled and the evaluator cache is
//! fully built before the listener starts accepting traffic, so no request
//! ever sees a cold cache. Shutdown waits out the configured drain delay
//! before closing, then disconnects the role store.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tracing::info;
use warden_core::{Environment, RoleStore};
use warden_openapi::{PermissionIndex, PermissionSpec};
use warden_policy::{load_directory, CompiledModule};

use crate::cache::EvaluatorCache;
use crate::enforce::enforcement_handler;
use crate::proxy::{ReqwestUpstream, UpstreamClient};
use crate::standalone::{grant_handler, revoke_handler};
use crate::store::MongoRoleStore;

/// Shared state for handlers. The heavyweight members are process-scoped
/// and read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub env: Arc<Environment>,
    pub index: Arc<PermissionIndex>,
    pub module: Arc<CompiledModule>,
    pub cache: Arc<EvaluatorCache>,
    pub store: Option<Arc<dyn RoleStore>>,
    pub upstream: Arc<dyn UpstreamClient>,
}

/// Assemble the router: health endpoints excluded from authorization,
/// standalone CRUD forwarding when enabled, and the enforcement handler as
/// the catch-all for everything else.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/-/healthz", get(health_handler))
        .route("/-/ready", get(health_handler))
        .route("/-/check-up", get(health_handler));

    if state.env.standalone {
        router = router
            .route("/grant/bindings/resource/{resourceType}", post(grant_handler))
            .route(
                "/revoke/bindings/resource/{resourceType}",
                post(revoke_handler),
            );
    }

    router.fallback(enforcement_handler).with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "statusCode": 200,
        "status": "OK",
        "version": state.env.service_version,
    }))
}

/// Build the process state and serve until shutdown.
pub async fn run(env: Environment) -> anyhow::Result<()> {
    let env = Arc::new(env);

    let policy_module = load_directory(std::path::Path::new(&env.policy_modules_directory))?;
    let module = CompiledModule::compile(&policy_module)?;

    let spec = PermissionSpec::load(&env).await?;
    let index = Arc::new(PermissionIndex::build(&spec)?);

    let store: Option<Arc<dyn RoleStore>> = MongoRoleStore::from_env(&env)?
        .map(|store| Arc::new(store) as Arc<dyn RoleStore>);

    let cache = Arc::new(EvaluatorCache::build(&module, &spec)?);
    info!(policies = cache.len(), "evaluator cache ready");

    let state = AppState {
        env: Arc::clone(&env),
        index,
        module,
        cache,
        store: store.clone(),
        upstream: Arc::new(ReqwestUpstream::new()),
    };

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", env.http_port)).await?;
    info!(
        port = env.http_port,
        standalone = env.standalone,
        "warden listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(env.delay_shutdown_seconds))
        .await?;

    if let Some(store) = store {
        store.disconnect();
    }
    info!("warden shut down");
    Ok(())
}

/// Wait for SIGTERM/ctrl-c, then keep serving for the drain delay so the
/// platform can deregister the sidecar before connections stop.
async fn shutdown_signal(delay_seconds: u64) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!(delay_seconds, "shutdown requested, draining");
    tokio::time::sleep(Duration::from_secs(delay_seconds)).await;
}
