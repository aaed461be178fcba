//! Evaluator cache.
//!
//! Built once at startup for every policy the permission spec references
//! (request and response policies alike), then shared read-only for the
//! process lifetime. A miss falls back to preparing the policy on the fly,
//! which keeps dynamically-registered test routes working; production
//! traffic always hits the cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;
use warden_openapi::PermissionSpec;
use warden_policy::{CompiledModule, PolicyError, PreparedPolicy};

/// Policy name → pre-compiled evaluator.
#[derive(Debug, Default)]
pub struct EvaluatorCache {
    policies: HashMap<String, Arc<PreparedPolicy>>,
}

impl EvaluatorCache {
    /// Prepare every policy the permission spec references. Fails startup when a
    /// referenced policy has no rule in the module.
    pub fn build(
        module: &Arc<CompiledModule>,
        spec: &PermissionSpec,
    ) -> Result<Self, PolicyError> {
        let mut policies = HashMap::new();
        for name in spec.policy_names() {
            let started = Instant::now();
            let prepared = Arc::new(module.prepare(&name)?);
            info!(policy = %name, elapsed = ?started.elapsed(), "precomputed policy evaluator");
            policies.insert(name, prepared);
        }
        Ok(Self { policies })
    }

    /// Fetch a precomputed policy.
    pub fn get(&self, policy: &str) -> Option<Arc<PreparedPolicy>> {
        self.policies.get(policy).cloned()
    }

    /// Fetch from the cache, or prepare on the fly when absent.
    pub fn get_or_prepare(
        &self,
        module: &Arc<CompiledModule>,
        policy: &str,
    ) -> Result<Arc<PreparedPolicy>, PolicyError> {
        match self.get(policy) {
            Some(prepared) => Ok(prepared),
            None => Ok(Arc::new(module.prepare(policy)?)),
        }
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
