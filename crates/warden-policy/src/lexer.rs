//! Tokenizer for the policy language.
//!
//! Newlines separate expressions (like semicolons), so the lexer emits them
//! as tokens — except right after a token that cannot end an expression,
//! which lets rule bodies span multiple lines naturally.

use crate::error::PolicyError;

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    True,
    False,
    Null,
    Package,
    Not,
    In,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Semicolon,
    Newline,
    Dot,
    Underscore,
    Colon,
    Assign, // :=
    Unify,  // =
    Eq,     // ==
    Ne,     // !=
    Lt,
    Le,
    Gt,
    Ge,
    Minus,
}

impl Token {
    /// True when an expression may continue after this token, so a following
    /// newline is not a separator.
    fn continues_expression(&self) -> bool {
        matches!(
            self,
            Token::Package
                | Token::Not
                | Token::In
                | Token::LBrace
                | Token::LBracket
                | Token::LParen
                | Token::Comma
                | Token::Semicolon
                | Token::Newline
                | Token::Dot
                | Token::Colon
                | Token::Assign
                | Token::Unify
                | Token::Eq
                | Token::Ne
                | Token::Lt
                | Token::Le
                | Token::Gt
                | Token::Ge
                | Token::Minus
        )
    }
}

/// A token with the 1-based source line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

/// Tokenize a module source.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, PolicyError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens: Vec<Spanned> = Vec::new();
    let mut i = 0;
    let mut line = 1;

    let push = |tokens: &mut Vec<Spanned>, token: Token, line: usize| {
        if token == Token::Newline {
            match tokens.last() {
                None => return,
                Some(last) if last.token.continues_expression() => return,
                _ => {}
            }
        }
        tokens.push(Spanned { token, line });
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' => i += 1,
            '\n' => {
                push(&mut tokens, Token::Newline, line);
                line += 1;
                i += 1;
            }
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '{' => {
                push(&mut tokens, Token::LBrace, line);
                i += 1;
            }
            '}' => {
                push(&mut tokens, Token::RBrace, line);
                i += 1;
            }
            '[' => {
                push(&mut tokens, Token::LBracket, line);
                i += 1;
            }
            ']' => {
                push(&mut tokens, Token::RBracket, line);
                i += 1;
            }
            '(' => {
                push(&mut tokens, Token::LParen, line);
                i += 1;
            }
            ')' => {
                push(&mut tokens, Token::RParen, line);
                i += 1;
            }
            ',' => {
                push(&mut tokens, Token::Comma, line);
                i += 1;
            }
            ';' => {
                push(&mut tokens, Token::Semicolon, line);
                i += 1;
            }
            '.' => {
                push(&mut tokens, Token::Dot, line);
                i += 1;
            }
            '-' => {
                push(&mut tokens, Token::Minus, line);
                i += 1;
            }
            ':' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                push(&mut tokens, Token::Assign, line);
                i += 2;
            }
            ':' => {
                push(&mut tokens, Token::Colon, line);
                i += 1;
            }
            '=' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                push(&mut tokens, Token::Eq, line);
                i += 2;
            }
            '=' => {
                push(&mut tokens, Token::Unify, line);
                i += 1;
            }
            '!' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                push(&mut tokens, Token::Ne, line);
                i += 2;
            }
            '<' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                push(&mut tokens, Token::Le, line);
                i += 2;
            }
            '<' => {
                push(&mut tokens, Token::Lt, line);
                i += 1;
            }
            '>' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                push(&mut tokens, Token::Ge, line);
                i += 2;
            }
            '>' => {
                push(&mut tokens, Token::Gt, line);
                i += 1;
            }
            '"' => {
                let (value, consumed) = read_string(&chars, i, line)?;
                push(&mut tokens, Token::Str(value), line);
                i = consumed;
            }
            c if c.is_ascii_digit() => {
                let (token, consumed) = read_number(&chars, i, line)?;
                push(&mut tokens, token, line);
                i = consumed;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.as_str() {
                    "_" => Token::Underscore,
                    "package" => Token::Package,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                };
                push(&mut tokens, token, line);
            }
            other => {
                return Err(PolicyError::parse(
                    line,
                    format!("unexpected character: {other:?}"),
                ));
            }
        }
    }

    Ok(tokens)
}

fn read_string(chars: &[char], start: usize, line: usize) -> Result<(String, usize), PolicyError> {
    let mut i = start + 1;
    let mut value = String::new();
    while i < chars.len() {
        match chars[i] {
            '"' => return Ok((value, i + 1)),
            '\\' => {
                i += 1;
                let escaped = chars
                    .get(i)
                    .ok_or_else(|| PolicyError::parse(line, "unterminated escape"))?;
                match escaped {
                    '"' => value.push('"'),
                    '\\' => value.push('\\'),
                    '/' => value.push('/'),
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    other => {
                        return Err(PolicyError::parse(
                            line,
                            format!("unsupported escape: \\{other}"),
                        ))
                    }
                }
                i += 1;
            }
            '\n' => return Err(PolicyError::parse(line, "unterminated string literal")),
            c => {
                value.push(c);
                i += 1;
            }
        }
    }
    Err(PolicyError::parse(line, "unterminated string literal"))
}

fn read_number(chars: &[char], start: usize, line: usize) -> Result<(Token, usize), PolicyError> {
    let mut i = start;
    let mut is_float = false;
    while i < chars.len() {
        match chars[i] {
            c if c.is_ascii_digit() => i += 1,
            // a dot is part of the number only when a digit follows,
            // so `0.field` style refs never arise from literals
            '.' if i + 1 < chars.len() && chars[i + 1].is_ascii_digit() && !is_float => {
                is_float = true;
                i += 1;
            }
            _ => break,
        }
    }
    let text: String = chars[start..i].iter().collect();
    let token = if is_float {
        Token::Float(
            text.parse()
                .map_err(|_| PolicyError::parse(line, format!("invalid number: {text}")))?,
        )
    } else {
        Token::Int(
            text.parse()
                .map_err(|_| PolicyError::parse(line, format!("invalid number: {text}")))?,
        )
    };
    Ok((token, i))
}
