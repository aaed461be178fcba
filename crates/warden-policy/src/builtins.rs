//! Built-in functions available inside policies.
//!
//! `get_header`, `find_one` and `find_many` are the gateway's custom
//! built-ins; the rest is a small standard library. Store-backed built-ins
//! check the cancellation token before touching the network — this is the
//! context checkpoint that aborts evaluation when the caller disconnects.
//!
//! A store failure makes the calling expression undefined (the body fails
//! and the policy denies) rather than aborting evaluation; this mirrors the
//! lenient built-in error mode of the original engine.

use serde_json::{Number, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use warden_core::RoleStore;

use crate::error::PolicyError;

/// Evaluation context handed to built-ins.
#[derive(Clone, Copy, Default)]
pub struct BuiltinContext<'a> {
    pub store: Option<&'a dyn RoleStore>,
    pub cancellation: Option<&'a CancellationToken>,
}

impl BuiltinContext<'_> {
    fn checkpoint(&self) -> Result<(), PolicyError> {
        match self.cancellation {
            Some(token) if token.is_cancelled() => Err(PolicyError::Canceled),
            _ => Ok(()),
        }
    }
}

/// Outcome of a built-in call. `Undefined` fails the enclosing expression
/// without failing the whole evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum BuiltinOutcome {
    Value(Value),
    Undefined,
}

/// Dispatch a built-in by name.
pub fn call(
    name: &str,
    args: &[Value],
    ctx: &BuiltinContext<'_>,
) -> Result<BuiltinOutcome, PolicyError> {
    match name {
        "get_header" => get_header(name, args),
        "find_one" => find_one(name, args, ctx),
        "find_many" => find_many(name, args, ctx),
        "count" => Ok(count(args)),
        "lower" => Ok(map_string(args, |s| s.to_lowercase())),
        "upper" => Ok(map_string(args, |s| s.to_uppercase())),
        "startswith" => Ok(string_pair(args, |s, p| s.starts_with(p))),
        "endswith" => Ok(string_pair(args, |s, p| s.ends_with(p))),
        "contains" => Ok(string_pair(args, |s, p| s.contains(p))),
        "split" => Ok(split(args)),
        other => Err(PolicyError::Evaluation(format!(
            "unknown function: {other}"
        ))),
    }
}

/// Case-insensitive header lookup over the multi-map headers object.
/// Returns the first value, or `""` when the header is absent.
fn get_header(name: &str, args: &[Value]) -> Result<BuiltinOutcome, PolicyError> {
    let (key, headers) = match args {
        [Value::String(key), Value::Object(headers)] => (key, headers),
        _ => {
            return Err(PolicyError::builtin(
                name,
                "expects a header name and the headers object",
            ))
        }
    };

    let value = headers
        .iter()
        .find(|(header, _)| header.eq_ignore_ascii_case(key))
        .map(|(_, value)| first_header_value(value))
        .unwrap_or_default();

    Ok(BuiltinOutcome::Value(Value::String(value)))
}

fn first_header_value(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .first()
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

fn find_one(
    name: &str,
    args: &[Value],
    ctx: &BuiltinContext<'_>,
) -> Result<BuiltinOutcome, PolicyError> {
    ctx.checkpoint()?;
    let (collection, query) = store_args(name, args)?;
    let Some(store) = ctx.store else {
        warn!(collection, "find_one called without a configured role store");
        return Ok(BuiltinOutcome::Undefined);
    };
    match store.find_one(collection, query) {
        Ok(Some(document)) => Ok(BuiltinOutcome::Value(document)),
        Ok(None) => Ok(BuiltinOutcome::Value(Value::Null)),
        Err(e) => {
            warn!(collection, error = %e, "find_one failed, expression is undefined");
            Ok(BuiltinOutcome::Undefined)
        }
    }
}

fn find_many(
    name: &str,
    args: &[Value],
    ctx: &BuiltinContext<'_>,
) -> Result<BuiltinOutcome, PolicyError> {
    ctx.checkpoint()?;
    let (collection, query) = store_args(name, args)?;
    let Some(store) = ctx.store else {
        warn!(collection, "find_many called without a configured role store");
        return Ok(BuiltinOutcome::Undefined);
    };
    match store.find_many(collection, query) {
        Ok(documents) => Ok(BuiltinOutcome::Value(Value::Array(documents))),
        Err(e) => {
            warn!(collection, error = %e, "find_many failed, expression is undefined");
            Ok(BuiltinOutcome::Undefined)
        }
    }
}

fn store_args<'a>(name: &str, args: &'a [Value]) -> Result<(&'a str, &'a Value), PolicyError> {
    match args {
        [Value::String(collection), query @ Value::Object(_)] => Ok((collection, query)),
        _ => Err(PolicyError::builtin(
            name,
            "expects a collection name and a query object",
        )),
    }
}

fn count(args: &[Value]) -> BuiltinOutcome {
    let len = match args {
        [Value::Array(items)] => items.len(),
        [Value::Object(map)] => map.len(),
        [Value::String(s)] => s.chars().count(),
        _ => return BuiltinOutcome::Undefined,
    };
    BuiltinOutcome::Value(Value::Number(Number::from(len as u64)))
}

fn map_string(args: &[Value], f: impl Fn(&str) -> String) -> BuiltinOutcome {
    match args {
        [Value::String(s)] => BuiltinOutcome::Value(Value::String(f(s))),
        _ => BuiltinOutcome::Undefined,
    }
}

fn string_pair(args: &[Value], f: impl Fn(&str, &str) -> bool) -> BuiltinOutcome {
    match args {
        [Value::String(a), Value::String(b)] => BuiltinOutcome::Value(Value::Bool(f(a, b))),
        _ => BuiltinOutcome::Undefined,
    }
}

fn split(args: &[Value]) -> BuiltinOutcome {
    match args {
        [Value::String(s), Value::String(delimiter)] => BuiltinOutcome::Value(Value::Array(
            s.split(delimiter.as_str())
                .map(|part| Value::String(part.to_string()))
                .collect(),
        )),
        _ => BuiltinOutcome::Undefined,
    }
}
