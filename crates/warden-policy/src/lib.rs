//! Policy engine for the Warden gateway.
//!
//! Policies are written in a small Datalog-family language: a module declares
//! `package policies` and one rule per policy name; a rule is a disjunction
//! of bodies, each body a conjunction of expressions over `input` and
//! `data.resources`. The engine supports two evaluation modes:
//!
//! - **Full evaluation** answers allow/deny for a concrete input, optionally
//!   returning a value (used by response-filter policies).
//! - **Partial evaluation** treats `data.resources` as unknown and produces a
//!   residual — a disjunction of conjunctions of atomic comparisons over
//!   resource fields — which the translator turns into a Mongo-dialect
//!   predicate for row-level filtering.
//!
//! Custom built-ins (`get_header`, `find_one`, `find_many`) are bound to the
//! role store and expose a cancellation checkpoint.

pub mod ast;
pub mod builtins;
pub mod error;
pub mod evaluator;
pub mod lexer;
pub mod module;
pub mod parser;
pub mod translate;

pub use error::PolicyError;
pub use evaluator::{Decision, EvalContext, Evaluator};
pub use module::{
    load_directory, sanitize_policy_name, CompiledModule, PolicyModule, PreparedPolicy,
    MODULE_FILE_NAME, POLICIES_PACKAGE,
};
pub use translate::{translate, PartialQueries, QueryAtom, TranslateError};
