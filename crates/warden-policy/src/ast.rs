//! Abstract syntax of the policy language.

use serde_json::Value;

/// A parsed policy module: `package policies` plus a flat list of rules.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// Dotted package path, e.g. `policies`.
    pub package: String,
    /// Rules in source order. Several rules may share one name; together
    /// they form a disjunction.
    pub rules: Vec<Rule>,
}

impl Module {
    /// All rules registered under the given (sanitized) name, in order.
    pub fn rules_named(&self, name: &str) -> Vec<&Rule> {
        self.rules.iter().filter(|r| r.name == name).collect()
    }

    /// Whether any rule carries the given name.
    pub fn has_rule(&self, name: &str) -> bool {
        self.rules.iter().any(|r| r.name == name)
    }
}

/// One rule: `name { body }` or `name = term { body }`.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    /// Returned value for value rules, evaluated after the body succeeds.
    pub value: Option<Term>,
    /// Conjunction of expressions.
    pub body: Vec<Expr>,
}

/// An expression inside a rule body.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `x := term`
    Assign { var: String, term: Term },
    /// `left <op> right`
    Comparison {
        left: Term,
        op: CompareOp,
        right: Term,
    },
    /// `needle in haystack`
    Membership { needle: Term, haystack: Term },
    /// `not expr` — negation as failure over known terms, complement over
    /// residual atoms.
    Not(Box<Expr>),
    /// A bare term asserted for truthiness.
    Term(Term),
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Operator with sides swapped (`a < b` == `b > a`).
    pub fn flipped(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
        }
    }

    /// Logical complement, used when negation is pushed onto an atom.
    pub fn negated(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Le => Self::Gt,
            Self::Gt => Self::Le,
            Self::Ge => Self::Lt,
        }
    }
}

/// A term: literal, composite, or reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// String, number, boolean or null literal.
    Scalar(Value),
    /// `[a, b, c]`
    Array(Vec<Term>),
    /// `{"key": term, ...}`
    Object(Vec<(String, Term)>),
    /// `base.path[index]...` or `fn(args).path...`
    Ref(Ref),
}

impl Term {
    /// A reference consisting of a bare variable.
    pub fn var(name: impl Into<String>) -> Self {
        Term::Ref(Ref {
            base: RefBase::Var(name.into()),
            args: Vec::new(),
        })
    }

    /// The variable name if this term is a bare variable reference.
    pub fn as_bare_var(&self) -> Option<&str> {
        match self {
            Term::Ref(r) if r.args.is_empty() => match &r.base {
                RefBase::Var(name) => Some(name),
                RefBase::Call(..) => None,
            },
            _ => None,
        }
    }
}

/// A reference chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Ref {
    pub base: RefBase,
    pub args: Vec<RefArg>,
}

/// Head of a reference chain.
#[derive(Debug, Clone, PartialEq)]
pub enum RefBase {
    /// A variable: `input`, `data`, or a body-local binding.
    Var(String),
    /// A built-in call: `find_one("projects", {...})`.
    Call(String, Vec<Term>),
}

/// One step of a reference chain.
#[derive(Debug, Clone, PartialEq)]
pub enum RefArg {
    /// `.field` or `["field"]` with a literal key.
    Field(String),
    /// `[term]` with a computed or variable index.
    Index(Box<Term>),
    /// `[_]` — iterate over elements.
    Iterate,
}
