//! Policy module loading and pre-compilation.
//!
//! Every `.rego` source in the policy directory is concatenated (sorted by
//! file name, so the module content is deterministic) into a single module
//! named `policies.rego`. Compilation parses the module once; preparing a
//! policy pins its rule and validates it exists. A prepared policy is shared
//! process-wide and bound to fresh inputs per request.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::ast::Module;
use crate::error::PolicyError;
use crate::evaluator::{EvalContext, Evaluator};
use crate::parser::parse_module;

/// Package every policy rule must live in.
pub const POLICIES_PACKAGE: &str = "policies";

/// Canonical name of the concatenated module.
pub const MODULE_FILE_NAME: &str = "policies.rego";

/// A loaded, not yet compiled, policy module.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyModule {
    pub name: String,
    pub source: String,
}

/// Read every policy source file in a directory into a single module.
pub fn load_directory(dir: &Path) -> Result<PolicyModule, PolicyError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| PolicyError::Module(format!("cannot read {}: {e}", dir.display())))?;

    let mut files: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("rego"))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(PolicyError::Module(format!(
            "no policy files found in {}",
            dir.display()
        )));
    }

    let mut source = String::new();
    for path in &files {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PolicyError::Module(format!("cannot read {}: {e}", path.display())))?;
        source.push_str(&content);
        source.push('\n');
        debug!(file = %path.display(), "loaded policy source");
    }

    info!(files = files.len(), directory = %dir.display(), "policy module loaded");
    Ok(PolicyModule {
        name: MODULE_FILE_NAME.to_string(),
        source,
    })
}

/// Map a policy name to its rule name: `project.read` → `project_read`.
pub fn sanitize_policy_name(policy: &str) -> String {
    policy.replace('.', "_")
}

/// A parsed module, shared behind `Arc` for the process lifetime.
#[derive(Debug)]
pub struct CompiledModule {
    module: Module,
}

impl CompiledModule {
    /// Parse and validate a policy module.
    pub fn compile(policy_module: &PolicyModule) -> Result<Arc<Self>, PolicyError> {
        let module = parse_module(&policy_module.source)?;
        if module.package != POLICIES_PACKAGE {
            return Err(PolicyError::Module(format!(
                "module {} must declare `package {POLICIES_PACKAGE}`, found `package {}`",
                policy_module.name, module.package
            )));
        }
        Ok(Arc::new(Self { module }))
    }

    /// Whether a rule exists for the given policy name.
    pub fn has_policy(&self, policy: &str) -> bool {
        self.module.has_rule(&sanitize_policy_name(policy))
    }

    /// Pre-compile one policy: validates the rule exists and pins it.
    pub fn prepare(self: &Arc<Self>, policy: &str) -> Result<PreparedPolicy, PolicyError> {
        let rule = sanitize_policy_name(policy);
        if !self.module.has_rule(&rule) {
            return Err(PolicyError::UnknownPolicy(policy.to_string()));
        }
        Ok(PreparedPolicy {
            module: Arc::clone(self),
            policy: policy.to_string(),
            rule,
        })
    }
}

/// A pre-compiled policy: the parse-once residual shared across requests.
///
/// Binding a concrete input produces a fresh, independent evaluator; the
/// prepared policy itself is never mutated.
#[derive(Debug, Clone)]
pub struct PreparedPolicy {
    module: Arc<CompiledModule>,
    policy: String,
    rule: String,
}

impl PreparedPolicy {
    /// The policy name this was prepared for.
    pub fn policy_name(&self) -> &str {
        &self.policy
    }

    /// Bind the prepared policy to a per-request input.
    pub fn bind<'a>(&'a self, input: &'a Value, ctx: EvalContext<'a>) -> Evaluator<'a> {
        Evaluator::new(&self.module.module, self.rule.clone(), input, ctx)
    }
}
