//! Recursive-descent parser producing the module AST.

use serde_json::{Number, Value};

use crate::ast::{CompareOp, Expr, Module, Ref, RefArg, RefBase, Rule, Term};
use crate::error::PolicyError;
use crate::lexer::{tokenize, Spanned, Token};

/// Parse a complete policy module source.
pub fn parse_module(source: &str) -> Result<Module, PolicyError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.module()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn module(&mut self) -> Result<Module, PolicyError> {
        self.skip_separators();
        self.expect(&Token::Package, "expected `package` declaration")?;
        let package = self.package_path()?;

        let mut rules = Vec::new();
        loop {
            self.skip_separators();
            if self.peek().is_none() {
                break;
            }
            // concatenated source files each repeat the declaration
            if self.peek() == Some(&Token::Package) {
                self.advance();
                let repeated = self.package_path()?;
                if repeated != package {
                    return Err(PolicyError::parse(
                        self.line(),
                        format!(
                            "all policy files must share one package, found `{repeated}` after `{package}`"
                        ),
                    ));
                }
                continue;
            }
            rules.push(self.rule()?);
        }

        Ok(Module { package, rules })
    }

    fn package_path(&mut self) -> Result<String, PolicyError> {
        let mut package = self.expect_ident("expected package name")?;
        while self.peek() == Some(&Token::Dot) {
            self.advance();
            package.push('.');
            package.push_str(&self.expect_ident("expected package path segment")?);
        }
        Ok(package)
    }

    fn rule(&mut self) -> Result<Rule, PolicyError> {
        let name = self.expect_ident("expected rule name")?;

        let value = if self.peek() == Some(&Token::Unify) {
            self.advance();
            Some(self.term()?)
        } else {
            None
        };

        self.expect(&Token::LBrace, "expected `{` opening the rule body")?;
        let body = self.body()?;
        self.expect(&Token::RBrace, "expected `}` closing the rule body")?;

        Ok(Rule { name, value, body })
    }

    fn body(&mut self) -> Result<Vec<Expr>, PolicyError> {
        let mut exprs = Vec::new();
        loop {
            self.skip_separators();
            if self.peek() == Some(&Token::RBrace) || self.peek().is_none() {
                break;
            }
            exprs.push(self.expr()?);
            match self.peek() {
                Some(Token::Newline) | Some(Token::Semicolon) | Some(Token::RBrace) | None => {}
                Some(other) => {
                    return Err(PolicyError::parse(
                        self.line(),
                        format!("expected expression separator, found {other:?}"),
                    ))
                }
            }
        }
        Ok(exprs)
    }

    fn expr(&mut self) -> Result<Expr, PolicyError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.expr()?)));
        }

        // `x := term`
        if let Some(Token::Ident(name)) = self.peek() {
            if self.peek_at(1) == Some(&Token::Assign) {
                let var = name.clone();
                self.advance();
                self.advance();
                let term = self.term()?;
                return Ok(Expr::Assign { var, term });
            }
        }

        let left = self.term()?;
        let op = match self.peek() {
            Some(Token::Eq) | Some(Token::Unify) => Some(CompareOp::Eq),
            Some(Token::Ne) => Some(CompareOp::Ne),
            Some(Token::Lt) => Some(CompareOp::Lt),
            Some(Token::Le) => Some(CompareOp::Le),
            Some(Token::Gt) => Some(CompareOp::Gt),
            Some(Token::Ge) => Some(CompareOp::Ge),
            Some(Token::In) => {
                self.advance();
                let haystack = self.term()?;
                return Ok(Expr::Membership {
                    needle: left,
                    haystack,
                });
            }
            _ => None,
        };

        match op {
            Some(op) => {
                self.advance();
                let right = self.term()?;
                Ok(Expr::Comparison { left, op, right })
            }
            None => Ok(Expr::Term(left)),
        }
    }

    fn term(&mut self) -> Result<Term, PolicyError> {
        let primary = self.primary()?;
        match primary {
            Term::Ref(mut reference) => {
                loop {
                    match self.peek() {
                        Some(Token::Dot) => {
                            self.advance();
                            let field = self.expect_ident("expected field name after `.`")?;
                            reference.args.push(RefArg::Field(field));
                        }
                        Some(Token::LBracket) => {
                            self.advance();
                            let arg = match self.peek() {
                                Some(Token::Underscore) => {
                                    self.advance();
                                    RefArg::Iterate
                                }
                                Some(Token::Str(key)) => {
                                    let key = key.clone();
                                    self.advance();
                                    RefArg::Field(key)
                                }
                                _ => RefArg::Index(Box::new(self.term()?)),
                            };
                            self.expect(&Token::RBracket, "expected `]` closing the index")?;
                            reference.args.push(arg);
                        }
                        _ => break,
                    }
                }
                Ok(Term::Ref(reference))
            }
            other => Ok(other),
        }
    }

    fn primary(&mut self) -> Result<Term, PolicyError> {
        let line = self.line();
        match self.advance() {
            Some(Token::Str(s)) => Ok(Term::Scalar(Value::String(s))),
            Some(Token::Int(n)) => Ok(Term::Scalar(Value::Number(Number::from(n)))),
            Some(Token::Float(f)) => Ok(Term::Scalar(number_from_f64(f, line)?)),
            Some(Token::True) => Ok(Term::Scalar(Value::Bool(true))),
            Some(Token::False) => Ok(Term::Scalar(Value::Bool(false))),
            Some(Token::Null) => Ok(Term::Scalar(Value::Null)),
            Some(Token::Minus) => match self.advance() {
                Some(Token::Int(n)) => Ok(Term::Scalar(Value::Number(Number::from(-n)))),
                Some(Token::Float(f)) => Ok(Term::Scalar(number_from_f64(-f, line)?)),
                _ => Err(PolicyError::parse(line, "expected number after `-`")),
            },
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                loop {
                    if self.peek() == Some(&Token::RBracket) {
                        break;
                    }
                    items.push(self.term()?);
                    if self.peek() == Some(&Token::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(&Token::RBracket, "expected `]` closing the array")?;
                Ok(Term::Array(items))
            }
            Some(Token::LBrace) => {
                let mut entries = Vec::new();
                loop {
                    if self.peek() == Some(&Token::RBrace) {
                        break;
                    }
                    let key = match self.advance() {
                        Some(Token::Str(s)) => s,
                        Some(Token::Ident(s)) => s,
                        _ => {
                            return Err(PolicyError::parse(
                                line,
                                "expected string or identifier object key",
                            ))
                        }
                    };
                    self.expect(&Token::Colon, "expected `:` after object key")?;
                    entries.push((key, self.term()?));
                    if self.peek() == Some(&Token::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(&Token::RBrace, "expected `}` closing the object")?;
                Ok(Term::Object(entries))
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.advance();
                    let mut args = Vec::new();
                    loop {
                        if self.peek() == Some(&Token::RParen) {
                            break;
                        }
                        args.push(self.term()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                    self.expect(&Token::RParen, "expected `)` closing the call")?;
                    Ok(Term::Ref(Ref {
                        base: RefBase::Call(name, args),
                        args: Vec::new(),
                    }))
                } else {
                    Ok(Term::var(name))
                }
            }
            Some(other) => Err(PolicyError::parse(
                line,
                format!("unexpected token in term position: {other:?}"),
            )),
            None => Err(PolicyError::parse(line, "unexpected end of module")),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| s.line)
            .unwrap_or(1)
    }

    fn expect(&mut self, token: &Token, message: &str) -> Result<(), PolicyError> {
        if self.peek() == Some(token) {
            self.advance();
            Ok(())
        } else {
            Err(PolicyError::parse(
                self.line(),
                format!("{message}, found {:?}", self.peek()),
            ))
        }
    }

    fn expect_ident(&mut self, message: &str) -> Result<String, PolicyError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => Err(PolicyError::parse(
                self.line(),
                format!("{message}, found {other:?}"),
            )),
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(Token::Newline) | Some(Token::Semicolon)) {
            self.advance();
        }
    }
}

fn number_from_f64(f: f64, line: usize) -> Result<Value, PolicyError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| PolicyError::parse(line, "number literal is not finite"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_boolean_rule() {
        let module = parse_module("package policies\n\ntodo { true }").unwrap();
        assert_eq!(module.package, "policies");
        assert_eq!(module.rules.len(), 1);
        assert_eq!(module.rules[0].name, "todo");
        assert!(module.rules[0].value.is_none());
        assert_eq!(
            module.rules[0].body,
            vec![Expr::Term(Term::Scalar(Value::Bool(true)))]
        );
    }

    #[test]
    fn test_parse_row_filter_policy() {
        let source = r#"
package policies

allow {
    input.request.method == "GET"
    e := data.resources[_]
    e.manager == "manager_test"
}

allow {
    input.request.method == "GET"
    input.request.path == "/api"
    e := data.resources[_]
    e.salary > 0
}
"#;
        let module = parse_module(source).unwrap();
        assert_eq!(module.rules_named("allow").len(), 2);

        let first = &module.rules[0];
        assert_eq!(first.body.len(), 3);
        match &first.body[1] {
            Expr::Assign { var, term } => {
                assert_eq!(var, "e");
                match term {
                    Term::Ref(r) => {
                        assert_eq!(r.base, RefBase::Var("data".into()));
                        assert_eq!(
                            r.args,
                            vec![RefArg::Field("resources".into()), RefArg::Iterate]
                        );
                    }
                    other => panic!("expected reference, got {other:?}"),
                }
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_semicolon_separated_body() {
        let module =
            parse_module("package policies\nallow { input.request.method==\"GET\"; 1 < 2 }")
                .unwrap();
        assert_eq!(module.rules[0].body.len(), 2);
    }

    #[test]
    fn test_parse_value_rule() {
        let module = parse_module(
            "package policies\nfiltered = body { body := input.response.body }",
        )
        .unwrap();
        let rule = &module.rules[0];
        assert_eq!(rule.value, Some(Term::var("body")));
        assert_eq!(rule.body.len(), 1);
    }

    #[test]
    fn test_parse_builtin_call_with_postfix() {
        let module = parse_module(
            r#"package policies
allowed {
    project := find_one("projects", {"projectId": "1234"})
    project.tenantId == "1234"
}"#,
        )
        .unwrap();
        match &module.rules[0].body[0] {
            Expr::Assign { term: Term::Ref(r), .. } => match &r.base {
                RefBase::Call(name, args) => {
                    assert_eq!(name, "find_one");
                    assert_eq!(args.len(), 2);
                }
                other => panic!("expected call base, got {other:?}"),
            },
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_membership_and_negation() {
        let module = parse_module(
            "package policies\nrule { \"admin\" in input.user.groups; not input.user.banned }",
        )
        .unwrap();
        assert!(matches!(module.rules[0].body[0], Expr::Membership { .. }));
        assert!(matches!(module.rules[0].body[1], Expr::Not(_)));
    }

    #[test]
    fn test_parse_bracket_string_is_field_access() {
        let module =
            parse_module("package policies\nrule { input.request.headers[\"Content-Type\"] }")
                .unwrap();
        match &module.rules[0].body[0] {
            Expr::Term(Term::Ref(r)) => {
                assert_eq!(r.args.last(), Some(&RefArg::Field("Content-Type".into())));
            }
            other => panic!("unexpected expr {other:?}"),
        }
    }

    #[test]
    fn test_parse_unify_is_equality() {
        let module = parse_module("package policies\nrule { input.clientType = \"sdk\" }").unwrap();
        assert!(matches!(
            module.rules[0].body[0],
            Expr::Comparison {
                op: CompareOp::Eq,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_negative_number() {
        let module = parse_module("package policies\nrule { input.x > -5 }").unwrap();
        match &module.rules[0].body[0] {
            Expr::Comparison { right, .. } => {
                assert_eq!(right, &Term::Scalar(serde_json::json!(-5)));
            }
            other => panic!("unexpected expr {other:?}"),
        }
    }

    #[test]
    fn test_missing_package_fails() {
        let err = parse_module("allow { true }").unwrap_err();
        assert!(err.to_string().contains("package"));
    }

    #[test]
    fn test_concatenated_files_repeat_the_package() {
        let module = parse_module(
            "package policies\nfirst { true }\n\npackage policies\nsecond { true }",
        )
        .unwrap();
        assert!(module.has_rule("first"));
        assert!(module.has_rule("second"));
    }

    #[test]
    fn test_conflicting_packages_fail() {
        let err =
            parse_module("package policies\na { true }\npackage other\nb { true }").unwrap_err();
        assert!(err.to_string().contains("one package"));
    }

    #[test]
    fn test_unclosed_body_fails() {
        let err = parse_module("package policies\nallow { true").unwrap_err();
        assert!(err.to_string().contains("closing the rule body"));
    }

    #[test]
    fn test_dotted_policy_rule_names_with_underscores() {
        // policy `project.read` is written as rule `project_read`
        let module = parse_module("package policies\nproject_read { true }").unwrap();
        assert!(module.has_rule("project_read"));
    }
}
