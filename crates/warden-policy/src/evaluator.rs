//! Policy evaluation: full and partial.
//!
//! Bodies are solved by a backtracking search over expression branches.
//! Iteration over known collections forks the search; references into the
//! unknown (`data.resources[_]`) flow through as symbolic slots and surface
//! as residual atoms when they meet a comparison. Every successful branch of
//! a partial evaluation contributes one conjunction to the residual.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::{Map, Number, Value};
use tokio_util::sync::CancellationToken;
use tracing::trace;
use warden_core::RoleStore;

use crate::ast::{CompareOp, Expr, Module, Ref, RefArg, RefBase, Term};
use crate::builtins::{self, BuiltinContext, BuiltinOutcome};
use crate::error::PolicyError;
use crate::translate::{PartialQueries, QueryAtom, TranslateError};

/// Outcome of a full evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Whether some rule body succeeded.
    pub allowed: bool,
    /// The rule's returned value, for value rules.
    pub value: Option<Value>,
}

/// External collaborators available during evaluation.
#[derive(Clone, Copy, Default)]
pub struct EvalContext<'a> {
    /// Role store backing `find_one`/`find_many`.
    pub store: Option<&'a dyn RoleStore>,
    /// Cancellation token checked inside store-backed built-ins.
    pub cancellation: Option<&'a CancellationToken>,
}

/// A short-lived evaluator bound to one input.
///
/// The module is shared and immutable; binding a fresh input produces an
/// independent evaluator, so precompiled policies are safe to share across
/// requests.
pub struct Evaluator<'a> {
    module: &'a Module,
    rule: String,
    input: &'a Value,
    data: Option<&'a Value>,
    ctx: EvalContext<'a>,
}

impl<'a> Evaluator<'a> {
    /// Bind an evaluator to a rule and a concrete input.
    pub fn new(
        module: &'a Module,
        rule: impl Into<String>,
        input: &'a Value,
        ctx: EvalContext<'a>,
    ) -> Self {
        Self {
            module,
            rule: rule.into(),
            input,
            data: None,
            ctx,
        }
    }

    /// Provide a concrete `data` document (used by tests and by full
    /// evaluation of policies that read `data.resources` directly).
    pub fn with_data(mut self, data: &'a Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Full evaluation: allow/deny plus the optional returned value.
    pub fn evaluate(&self) -> Result<Decision, PolicyError> {
        let started = Instant::now();
        let rules = self.rules()?;

        for rule in rules {
            let branches = self.solve_body(&rule.body, false)?;
            if let Some(branch) = branches.into_iter().next() {
                let value = match &rule.value {
                    Some(term) => self
                        .eval_term(term, &branch, false)?
                        .into_iter()
                        .find_map(|(slot, _)| match slot {
                            Slot::Known(v) => Some(v),
                            Slot::Unknown(_) => None,
                        }),
                    None => None,
                };
                trace!(rule = %self.rule, elapsed = ?started.elapsed(), allowed = true, "policy evaluated");
                return Ok(Decision {
                    allowed: true,
                    value,
                });
            }
        }

        trace!(rule = %self.rule, elapsed = ?started.elapsed(), allowed = false, "policy evaluated");
        Ok(Decision {
            allowed: false,
            value: None,
        })
    }

    /// Partial evaluation with `data.resources` unknown.
    pub fn partial_evaluate(&self) -> Result<PartialQueries, PolicyError> {
        let started = Instant::now();
        let rules = self.rules()?;

        let mut queries: Vec<Vec<QueryAtom>> = Vec::new();
        for rule in rules {
            for branch in self.solve_body(&rule.body, true)? {
                if !queries.contains(&branch.atoms) {
                    queries.push(branch.atoms);
                }
            }
        }

        trace!(
            rule = %self.rule,
            elapsed = ?started.elapsed(),
            conjunctions = queries.len(),
            "policy partially evaluated"
        );
        Ok(PartialQueries { queries })
    }

    fn rules(&self) -> Result<Vec<&'a crate::ast::Rule>, PolicyError> {
        let rules = self.module.rules_named(&self.rule);
        if rules.is_empty() {
            return Err(PolicyError::UnknownPolicy(self.rule.clone()));
        }
        Ok(rules)
    }

    // ------------------------------------------------------------------
    // Body solving
    // ------------------------------------------------------------------

    fn solve_body(&self, body: &[Expr], partial: bool) -> Result<Vec<Branch>, PolicyError> {
        let mut branches = vec![Branch::default()];
        for expr in body {
            let mut next = Vec::new();
            for branch in branches {
                next.extend(self.eval_expr(expr, branch, partial)?);
            }
            branches = next;
            if branches.is_empty() {
                break;
            }
        }
        Ok(branches)
    }

    fn eval_expr(
        &self,
        expr: &Expr,
        branch: Branch,
        partial: bool,
    ) -> Result<Vec<Branch>, PolicyError> {
        match expr {
            Expr::Assign { var, term } => {
                if branch.env.contains_key(var) {
                    return Err(PolicyError::Evaluation(format!(
                        "variable {var} assigned twice"
                    )));
                }
                let mut out = Vec::new();
                for (slot, mut br) in self.eval_term(term, &branch, partial)? {
                    br.env.insert(var.clone(), slot);
                    out.push(br);
                }
                Ok(out)
            }

            Expr::Comparison { left, op, right } => {
                let mut out = Vec::new();
                for (lhs, br1) in self.eval_term(left, &branch, partial)? {
                    for (rhs, mut br2) in self.eval_term(right, &br1, partial)? {
                        match (lhs.clone(), rhs) {
                            (Slot::Known(a), Slot::Known(b)) => {
                                if compare_values(*op, &a, &b) {
                                    out.push(br2);
                                }
                            }
                            (Slot::Unknown(unknown), Slot::Known(value)) => {
                                br2.atoms.push(residual_atom(&unknown, *op, value)?);
                                out.push(br2);
                            }
                            (Slot::Known(value), Slot::Unknown(unknown)) => {
                                br2.atoms
                                    .push(residual_atom(&unknown, op.flipped(), value)?);
                                out.push(br2);
                            }
                            (Slot::Unknown(_), Slot::Unknown(_)) => {
                                return Err(TranslateError::Unsupported(
                                    "comparison between two unknown resource references".into(),
                                )
                                .into());
                            }
                        }
                    }
                }
                Ok(out)
            }

            Expr::Membership { needle, haystack } => {
                let mut out = Vec::new();
                for (n, br1) in self.eval_term(needle, &branch, partial)? {
                    for (h, mut br2) in self.eval_term(haystack, &br1, partial)? {
                        match (n.clone(), h) {
                            (Slot::Known(needle), Slot::Known(haystack)) => {
                                if known_membership(&needle, &haystack) {
                                    out.push(br2);
                                }
                            }
                            (Slot::Known(needle), Slot::Unknown(unknown)) => {
                                if unknown.iterated || unknown.path.is_empty() {
                                    return Err(TranslateError::Unsupported(
                                        "containment over an iterated resource field".into(),
                                    )
                                    .into());
                                }
                                br2.atoms.push(QueryAtom::Contains {
                                    field: unknown.field(),
                                    value: needle,
                                });
                                out.push(br2);
                            }
                            (Slot::Unknown(unknown), Slot::Known(haystack)) => {
                                if unknown.iterated || unknown.path.is_empty() {
                                    return Err(TranslateError::Unsupported(
                                        "membership of an iterated resource field".into(),
                                    )
                                    .into());
                                }
                                let Value::Array(values) = haystack else {
                                    return Err(TranslateError::Unsupported(
                                        "membership haystack must be an array".into(),
                                    )
                                    .into());
                                };
                                br2.atoms.push(QueryAtom::In {
                                    field: unknown.field(),
                                    values,
                                });
                                out.push(br2);
                            }
                            (Slot::Unknown(_), Slot::Unknown(_)) => {
                                return Err(TranslateError::Unsupported(
                                    "membership between two unknown references".into(),
                                )
                                .into());
                            }
                        }
                    }
                }
                Ok(out)
            }

            Expr::Not(inner) => self.eval_not(inner, branch, partial),

            Expr::Term(term) => {
                let mut out = Vec::new();
                for (slot, mut br) in self.eval_term(term, &branch, partial)? {
                    match slot {
                        Slot::Known(value) => {
                            if truthy(&value) {
                                out.push(br);
                            }
                        }
                        Slot::Unknown(unknown) => {
                            if unknown.iterated || unknown.path.is_empty() {
                                return Err(TranslateError::Unsupported(
                                    "bare iterated resource reference".into(),
                                )
                                .into());
                            }
                            br.atoms.push(QueryAtom::Compare {
                                field: unknown.field(),
                                op: CompareOp::Eq,
                                value: Value::Bool(true),
                            });
                            out.push(br);
                        }
                    }
                }
                Ok(out)
            }
        }
    }

    fn eval_not(
        &self,
        inner: &Expr,
        branch: Branch,
        partial: bool,
    ) -> Result<Vec<Branch>, PolicyError> {
        // probe with a clean atom list so residuals of the inner expression
        // are distinguishable from those already accumulated
        let probe = Branch {
            env: branch.env.clone(),
            atoms: Vec::new(),
        };
        let results = self.eval_expr(inner, probe, partial)?;

        if results.is_empty() {
            // negation as failure
            return Ok(vec![branch]);
        }

        if results.iter().all(|b| b.atoms.is_empty()) {
            // inner holds concretely, so the negation fails
            return Ok(Vec::new());
        }

        if partial && results.len() == 1 && results[0].atoms.len() == 1 {
            let mut out = branch;
            out.atoms
                .push(QueryAtom::Not(Box::new(results[0].atoms[0].clone())));
            return Ok(vec![out]);
        }

        Err(TranslateError::Unsupported("negation over a compound unknown expression".into()).into())
    }

    // ------------------------------------------------------------------
    // Term evaluation
    // ------------------------------------------------------------------

    fn eval_term(
        &self,
        term: &Term,
        branch: &Branch,
        partial: bool,
    ) -> Result<Vec<(Slot, Branch)>, PolicyError> {
        match term {
            Term::Scalar(value) => Ok(vec![(Slot::Known(value.clone()), branch.clone())]),

            Term::Array(items) => {
                let mut acc: Vec<(Vec<Value>, Branch)> = vec![(Vec::new(), branch.clone())];
                for item in items {
                    let mut next = Vec::new();
                    for (values, br) in &acc {
                        for (slot, br2) in self.eval_term(item, br, partial)? {
                            match slot {
                                Slot::Known(v) => {
                                    let mut values = values.clone();
                                    values.push(v);
                                    next.push((values, br2));
                                }
                                Slot::Unknown(_) => {
                                    return Err(TranslateError::Unsupported(
                                        "unknown reference inside an array literal".into(),
                                    )
                                    .into());
                                }
                            }
                        }
                    }
                    acc = next;
                }
                Ok(acc
                    .into_iter()
                    .map(|(values, br)| (Slot::Known(Value::Array(values)), br))
                    .collect())
            }

            Term::Object(entries) => {
                let mut acc: Vec<(Map<String, Value>, Branch)> =
                    vec![(Map::new(), branch.clone())];
                for (key, item) in entries {
                    let mut next = Vec::new();
                    for (map, br) in &acc {
                        for (slot, br2) in self.eval_term(item, br, partial)? {
                            match slot {
                                Slot::Known(v) => {
                                    let mut map = map.clone();
                                    map.insert(key.clone(), v);
                                    next.push((map, br2));
                                }
                                Slot::Unknown(_) => {
                                    return Err(TranslateError::Unsupported(
                                        "unknown reference inside an object literal".into(),
                                    )
                                    .into());
                                }
                            }
                        }
                    }
                    acc = next;
                }
                Ok(acc
                    .into_iter()
                    .map(|(map, br)| (Slot::Known(Value::Object(map)), br))
                    .collect())
            }

            Term::Ref(reference) => self.eval_ref(reference, branch, partial),
        }
    }

    fn eval_ref(
        &self,
        reference: &Ref,
        branch: &Branch,
        partial: bool,
    ) -> Result<Vec<(Slot, Branch)>, PolicyError> {
        match &reference.base {
            RefBase::Var(name) if name == "input" => self.fold_args(
                &reference.args,
                Slot::Known(self.input.clone()),
                branch.clone(),
                partial,
            ),

            RefBase::Var(name) if name == "data" => {
                if partial {
                    if let Some(RefArg::Field(first)) = reference.args.first() {
                        if first == "resources" {
                            return match reference.args.get(1) {
                                Some(RefArg::Iterate) => self.fold_args(
                                    &reference.args[2..],
                                    Slot::Unknown(UnknownRef::element()),
                                    branch.clone(),
                                    partial,
                                ),
                                _ => Err(TranslateError::Unsupported(
                                    "data.resources must be iterated with [_]".into(),
                                )
                                .into()),
                            };
                        }
                    }
                }
                match self.data {
                    Some(data) => self.fold_args(
                        &reference.args,
                        Slot::Known(data.clone()),
                        branch.clone(),
                        partial,
                    ),
                    None => Ok(Vec::new()),
                }
            }

            RefBase::Var(name) => match branch.env.get(name) {
                Some(slot) => {
                    self.fold_args(&reference.args, slot.clone(), branch.clone(), partial)
                }
                None => Err(PolicyError::Evaluation(format!("unsafe variable: {name}"))),
            },

            RefBase::Call(name, arg_terms) => {
                let mut acc: Vec<(Vec<Value>, Branch)> = vec![(Vec::new(), branch.clone())];
                for term in arg_terms {
                    let mut next = Vec::new();
                    for (args, br) in &acc {
                        for (slot, br2) in self.eval_term(term, br, partial)? {
                            match slot {
                                Slot::Known(v) => {
                                    let mut args = args.clone();
                                    args.push(v);
                                    next.push((args, br2));
                                }
                                Slot::Unknown(_) => {
                                    return Err(TranslateError::Unsupported(
                                        "unknown reference passed to a built-in".into(),
                                    )
                                    .into());
                                }
                            }
                        }
                    }
                    acc = next;
                }

                let ctx = BuiltinContext {
                    store: self.ctx.store,
                    cancellation: self.ctx.cancellation,
                };
                let mut out = Vec::new();
                for (args, br) in acc {
                    match builtins::call(name, &args, &ctx)? {
                        BuiltinOutcome::Value(value) => out.extend(self.fold_args(
                            &reference.args,
                            Slot::Known(value),
                            br,
                            partial,
                        )?),
                        BuiltinOutcome::Undefined => {}
                    }
                }
                Ok(out)
            }
        }
    }

    fn fold_args(
        &self,
        args: &[RefArg],
        slot: Slot,
        branch: Branch,
        partial: bool,
    ) -> Result<Vec<(Slot, Branch)>, PolicyError> {
        let mut states = vec![(slot, branch)];
        for arg in args {
            let mut next = Vec::new();
            for (slot, br) in states {
                match (slot, arg) {
                    (Slot::Known(value), RefArg::Field(field)) => {
                        if let Some(found) = value.get(field) {
                            next.push((Slot::Known(found.clone()), br));
                        }
                    }

                    (Slot::Known(value), RefArg::Iterate) => match value {
                        Value::Array(items) => {
                            for item in items {
                                next.push((Slot::Known(item.clone()), br.clone()));
                            }
                        }
                        Value::Object(map) => {
                            for item in map.values() {
                                next.push((Slot::Known(item.clone()), br.clone()));
                            }
                        }
                        _ => {}
                    },

                    (Slot::Known(value), RefArg::Index(index)) => {
                        // an unbound bare variable as index binds to each key
                        if let Some(var) = index.as_bare_var() {
                            if !br.env.contains_key(var) && var != "input" && var != "data" {
                                match &value {
                                    Value::Array(items) => {
                                        for (idx, item) in items.iter().enumerate() {
                                            let mut bound = br.clone();
                                            bound.env.insert(
                                                var.to_string(),
                                                Slot::Known(Value::Number(Number::from(
                                                    idx as u64,
                                                ))),
                                            );
                                            next.push((Slot::Known(item.clone()), bound));
                                        }
                                    }
                                    Value::Object(map) => {
                                        for (key, item) in map {
                                            let mut bound = br.clone();
                                            bound.env.insert(
                                                var.to_string(),
                                                Slot::Known(Value::String(key.clone())),
                                            );
                                            next.push((Slot::Known(item.clone()), bound));
                                        }
                                    }
                                    _ => {}
                                }
                                continue;
                            }
                        }

                        for (index_slot, br2) in self.eval_term(index, &br, partial)? {
                            match index_slot {
                                Slot::Known(Value::String(key)) => {
                                    if let Some(found) = value.get(&key) {
                                        next.push((Slot::Known(found.clone()), br2));
                                    }
                                }
                                Slot::Known(Value::Number(n)) => {
                                    if let Some(found) =
                                        n.as_u64().and_then(|i| value.get(i as usize))
                                    {
                                        next.push((Slot::Known(found.clone()), br2));
                                    }
                                }
                                Slot::Known(_) => {}
                                Slot::Unknown(_) => {
                                    return Err(TranslateError::Unsupported(
                                        "unknown reference used as an index".into(),
                                    )
                                    .into());
                                }
                            }
                        }
                    }

                    (Slot::Unknown(unknown), RefArg::Field(field)) => {
                        if unknown.iterated {
                            return Err(TranslateError::Unsupported(
                                "field access beneath an iterated resource field".into(),
                            )
                            .into());
                        }
                        next.push((Slot::Unknown(unknown.child(field)), br));
                    }

                    (Slot::Unknown(unknown), RefArg::Iterate) => {
                        if unknown.iterated || unknown.path.is_empty() {
                            return Err(TranslateError::Unsupported(
                                "nested iteration over the unknown resource".into(),
                            )
                            .into());
                        }
                        let mut iterated = unknown.clone();
                        iterated.iterated = true;
                        next.push((Slot::Unknown(iterated), br));
                    }

                    (Slot::Unknown(unknown), RefArg::Index(index)) => {
                        match index.as_ref() {
                            Term::Scalar(Value::String(key)) => {
                                if unknown.iterated {
                                    return Err(TranslateError::Unsupported(
                                        "field access beneath an iterated resource field".into(),
                                    )
                                    .into());
                                }
                                next.push((Slot::Unknown(unknown.child(key)), br));
                            }
                            _ => {
                                return Err(TranslateError::Unsupported(
                                    "computed index into the unknown resource".into(),
                                )
                                .into());
                            }
                        }
                    }
                }
            }
            states = next;
            if states.is_empty() {
                break;
            }
        }
        Ok(states)
    }
}

// ----------------------------------------------------------------------
// Branch state
// ----------------------------------------------------------------------

/// A symbolic reference into the unknown resource element.
#[derive(Clone, Debug, PartialEq)]
struct UnknownRef {
    path: Vec<String>,
    iterated: bool,
}

impl UnknownRef {
    fn element() -> Self {
        Self {
            path: Vec::new(),
            iterated: false,
        }
    }

    fn child(&self, field: &str) -> Self {
        let mut path = self.path.clone();
        path.push(field.to_string());
        Self {
            path,
            iterated: self.iterated,
        }
    }

    fn field(&self) -> String {
        self.path.join(".")
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Slot {
    Known(Value),
    Unknown(UnknownRef),
}

#[derive(Clone, Debug, Default)]
struct Branch {
    env: HashMap<String, Slot>,
    atoms: Vec<QueryAtom>,
}

// ----------------------------------------------------------------------
// Value helpers
// ----------------------------------------------------------------------

fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare_values(op: CompareOp, a: &Value, b: &Value) -> bool {
    match op {
        CompareOp::Eq => value_eq(a, b),
        CompareOp::Ne => !value_eq(a, b),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ordering = match (a, b) {
                (Value::Number(x), Value::Number(y)) => {
                    x.as_f64().partial_cmp(&y.as_f64())
                }
                (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
                _ => None,
            };
            match ordering {
                Some(ordering) => match op {
                    CompareOp::Lt => ordering.is_lt(),
                    CompareOp::Le => ordering.is_le(),
                    CompareOp::Gt => ordering.is_gt(),
                    CompareOp::Ge => ordering.is_ge(),
                    _ => unreachable!(),
                },
                None => false,
            }
        }
    }
}

fn known_membership(needle: &Value, haystack: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| value_eq(item, needle)),
        Value::Object(map) => map.values().any(|item| value_eq(item, needle)),
        _ => false,
    }
}

fn residual_atom(
    unknown: &UnknownRef,
    op: CompareOp,
    value: Value,
) -> Result<QueryAtom, PolicyError> {
    if unknown.path.is_empty() {
        return Err(TranslateError::Unsupported(
            "comparison against the whole resource document".into(),
        )
        .into());
    }
    if unknown.iterated {
        if op == CompareOp::Eq {
            return Ok(QueryAtom::Contains {
                field: unknown.field(),
                value,
            });
        }
        return Err(TranslateError::Unsupported(
            "ordered comparison over an iterated resource field".into(),
        )
        .into());
    }
    Ok(QueryAtom::Compare {
        field: unknown.field(),
        op,
        value,
    })
}
