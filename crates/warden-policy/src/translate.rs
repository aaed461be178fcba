//! Residual-to-query translation.
//!
//! Partial evaluation leaves a residual: a disjunction of conjunctions of
//! atomic constraints over `data.resources[_].<field>`. This module turns
//! that residual into a predicate in the Mongo query dialect. The
//! translation is purely syntactic — no simplification against runtime data;
//! the only collapses are the explicit match-all and unsatisfiable cases.

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::ast::CompareOp;

/// Translation failure.
#[derive(Debug, Error)]
pub enum TranslateError {
    /// No conjunction survived: the filter matches nothing.
    #[error("policy allows nothing, the query is empty")]
    EmptyQuery,

    /// The residual contains a shape with no query counterpart.
    #[error("unsupported residual expression: {0}")]
    Unsupported(String),
}

/// One atomic constraint over a resource field.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryAtom {
    /// `field <op> value`
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    /// `field ∈ values` (set membership)
    In { field: String, values: Vec<Value> },
    /// `value ∈ field` (array field containment)
    Contains { field: String, value: Value },
    /// Logical negation of an atom.
    Not(Box<QueryAtom>),
}

/// The output of partial evaluation: a disjunction of conjunctions.
///
/// An empty conjunction is trivially true; an empty disjunction is
/// unsatisfiable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialQueries {
    pub queries: Vec<Vec<QueryAtom>>,
}

impl PartialQueries {
    /// True when no conjunction survived evaluation.
    pub fn is_unsatisfiable(&self) -> bool {
        self.queries.is_empty()
    }

    /// True when some conjunction holds unconditionally.
    pub fn is_always_true(&self) -> bool {
        self.queries.iter().any(|conjunction| conjunction.is_empty())
    }
}

/// Translate a residual into a Mongo-dialect predicate.
///
/// Returns the empty object `{}` (match-all) when a conjunction holds
/// unconditionally, and [`TranslateError::EmptyQuery`] when nothing could
/// ever match.
pub fn translate(partial: &PartialQueries) -> Result<Value, TranslateError> {
    if partial.is_unsatisfiable() {
        return Err(TranslateError::EmptyQuery);
    }
    if partial.is_always_true() {
        return Ok(Value::Object(Map::new()));
    }

    let mut disjuncts = Vec::with_capacity(partial.queries.len());
    for conjunction in &partial.queries {
        let clauses = conjunction
            .iter()
            .map(atom_clause)
            .collect::<Result<Vec<_>, _>>()?;
        disjuncts.push(json!({ "$and": clauses }));
    }

    if disjuncts.len() == 1 {
        Ok(disjuncts.into_iter().next().expect("one disjunct"))
    } else {
        Ok(json!({ "$or": disjuncts }))
    }
}

fn atom_clause(atom: &QueryAtom) -> Result<Value, TranslateError> {
    match atom {
        QueryAtom::Compare { field, op, value } => {
            Ok(json!({ field: { mongo_operator(*op): value } }))
        }
        QueryAtom::In { field, values } => Ok(json!({ field: { "$in": values } })),
        QueryAtom::Contains { field, value } => {
            Ok(json!({ field: { "$elemMatch": { "$eq": value } } }))
        }
        QueryAtom::Not(inner) => match inner.as_ref() {
            QueryAtom::Compare { field, op, value } => {
                Ok(json!({ field: { mongo_operator(op.negated()): value } }))
            }
            QueryAtom::Not(doubly) => atom_clause(doubly),
            QueryAtom::In { .. } | QueryAtom::Contains { .. } => Err(
                TranslateError::Unsupported("negated membership constraint".into()),
            ),
        },
    }
}

fn mongo_operator(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "$eq",
        CompareOp::Ne => "$ne",
        CompareOp::Lt => "$lt",
        CompareOp::Le => "$lte",
        CompareOp::Gt => "$gt",
        CompareOp::Ge => "$gte",
    }
}
