//! # Step Conditions
//!
//! A planned step may carry a condition that is evaluated against the task
//! context right before the step would run. The language is deliberately
//! small:
//!
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | compare
//! compare := operand ( ("==" | "!=" | "<" | "<=" | ">" | ">=") operand )?
//! operand := literal | path | "(" expr ")"
//! literal := number | "string" | 'string' | true | false | null
//! path    := resources.<key> | state.<key>(.<field>)* | history.<step_id>
//! ```
//!
//! A bare operand is tested for truthiness. `history.<id>` is `true` when
//! that step has a successful history entry.
//!
//! Parentheses and `!` may nest at most [`MAX_NESTING`] levels deep.

use serde_json::Value;
use std::cmp::Ordering;
use std::str::FromStr;
use thiserror::Error;

use crate::context::OrchestrationContext;

/// Deepest allowed nesting of parentheses and negations.
pub const MAX_NESTING: usize = 64;

/// Reasons a condition could not be parsed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("empty condition")]
    Empty,

    #[error("unexpected character '{ch}' at position {position}")]
    UnexpectedChar { ch: char, position: usize },

    #[error("unterminated string starting at position {0}")]
    UnterminatedString(usize),

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("unexpected end of condition")]
    UnexpectedEnd,

    #[error("unknown path root '{0}', expected resources, state or history")]
    UnknownRoot(String),

    #[error("path '{0}' needs a key after the root")]
    IncompletePath(String),

    #[error("condition nests deeper than {0} levels")]
    TooDeep(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Compare(CompareOp),
    Literal(Value),
    Ident(String),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Not => write!(f, "!"),
            Token::Compare(op) => write!(f, "{:?}", op),
            Token::Literal(value) => write!(f, "{}", value),
            Token::Ident(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    Resources,
    State,
    History,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Literal(Value),
    Path(Root, Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Not(Box<Expr>),
    Compare(Operand, CompareOp, Operand),
    Operand(Operand),
}

/// A parsed condition.
///
/// # Example
///
/// ```rust
/// use reelcraft_core::condition::Condition;
/// use reelcraft_core::context::OrchestrationContext;
///
/// let mut ctx = OrchestrationContext::new("task-1", "make a video");
/// ctx.set_state("quality_score", 0.55);
///
/// let condition: Condition = "state.quality_score < 0.7".parse().unwrap();
/// assert!(condition.evaluate(&ctx));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ConditionError::Empty);
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(ConditionError::UnexpectedToken(token.to_string()));
        }
        Ok(Self { expr })
    }

    pub fn evaluate(&self, ctx: &OrchestrationContext) -> bool {
        eval(&self.expr, ctx)
    }
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parse and evaluate in one go.
pub fn evaluate(source: &str, ctx: &OrchestrationContext) -> Result<bool, ConditionError> {
    Ok(Condition::parse(source)?.evaluate(ctx))
}

fn tokenize(source: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();
        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Compare(CompareOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Compare(CompareOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let inclusive = next == Some('=');
                let op = match (ch, inclusive) {
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    ('>', false) => CompareOp::Gt,
                    _ => CompareOp::Ge,
                };
                tokens.push(Token::Compare(op));
                i += if inclusive { 2 } else { 1 };
            }
            '"' | '\'' => {
                let start = i;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ConditionError::UnterminatedString(start)),
                        Some(&c) if c == ch => {
                            i += 1;
                            break;
                        }
                        Some('\\') if i + 1 < chars.len() => {
                            text.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(&c) => {
                            text.push(c);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Literal(Value::String(text)));
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .ok_or(ConditionError::UnexpectedToken(text))?;
                tokens.push(Token::Literal(Value::Number(number)));
            }
            c if is_ident_char(c) => {
                let start = i;
                while i < chars.len() && (is_ident_char(chars[i]) || chars[i] == '.') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "null" => Token::Literal(Value::Null),
                    _ => Token::Ident(word),
                });
            }
            _ => return Err(ConditionError::UnexpectedChar { ch, position: i }),
        }
    }
    Ok(tokens)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn descend(&mut self) -> Result<(), ConditionError> {
        if self.depth >= MAX_NESTING {
            return Err(ConditionError::TooDeep(MAX_NESTING));
        }
        self.depth += 1;
        Ok(())
    }

    // Operator chains are kept flat so only parentheses and `!` add depth.
    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut terms = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut terms = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::And(terms)
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            self.descend()?;
            let inner = self.parse_or()?;
            self.depth -= 1;
            return match self.next() {
                Some(Token::RParen) => Ok(inner),
                Some(token) => Err(ConditionError::UnexpectedToken(token.to_string())),
                None => Err(ConditionError::UnexpectedEnd),
            };
        }

        let left = self.parse_operand()?;
        if let Some(Token::Compare(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_operand()?;
            return Ok(Expr::Compare(left, op, right));
        }
        Ok(Expr::Operand(left))
    }

    fn parse_operand(&mut self) -> Result<Operand, ConditionError> {
        match self.next() {
            Some(Token::Literal(value)) => Ok(Operand::Literal(value)),
            Some(Token::Ident(path)) => parse_path(&path),
            Some(token) => Err(ConditionError::UnexpectedToken(token.to_string())),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }
}

fn parse_path(path: &str) -> Result<Operand, ConditionError> {
    let mut segments = path.split('.');
    let root = match segments.next().unwrap_or_default() {
        "resources" => Root::Resources,
        "state" => Root::State,
        "history" => Root::History,
        other => return Err(ConditionError::UnknownRoot(other.to_string())),
    };
    let rest: Vec<String> = segments.map(str::to_string).collect();
    if rest.is_empty() || rest.iter().any(String::is_empty) {
        return Err(ConditionError::IncompletePath(path.to_string()));
    }
    Ok(Operand::Path(root, rest))
}

fn eval(expr: &Expr, ctx: &OrchestrationContext) -> bool {
    match expr {
        Expr::Or(terms) => terms.iter().any(|term| eval(term, ctx)),
        Expr::And(terms) => terms.iter().all(|term| eval(term, ctx)),
        Expr::Not(inner) => !eval(inner, ctx),
        Expr::Operand(operand) => truthy(&resolve(operand, ctx)),
        Expr::Compare(left, op, right) => compare(&resolve(left, ctx), *op, &resolve(right, ctx)),
    }
}

fn resolve(operand: &Operand, ctx: &OrchestrationContext) -> Value {
    match operand {
        Operand::Literal(value) => value.clone(),
        Operand::Path(Root::Resources, keys) => ctx
            .resource(&keys.join("."))
            .map_or(Value::Null, |location| Value::String(location.to_string())),
        Operand::Path(Root::History, keys) => Value::Bool(ctx.succeeded(&keys.join("."))),
        Operand::Path(Root::State, keys) => {
            let mut current = ctx.state(&keys[0]);
            for key in &keys[1..] {
                current = current.and_then(|value| match value {
                    Value::Object(map) => map.get(key),
                    Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
                    _ => None,
                });
            }
            current.cloned().unwrap_or(Value::Null)
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    match op {
        CompareOp::Eq => ordering.map_or(left == right, |o| o == Ordering::Equal),
        CompareOp::Ne => ordering.map_or(left != right, |o| o != Ordering::Equal),
        CompareOp::Lt => ordering == Some(Ordering::Less),
        CompareOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => ordering == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityResult;
    use crate::context::CompletedCall;
    use crate::registry::Dispatch;
    use crate::schema::Params;
    use serde_json::json;
    use std::time::Duration;

    fn context() -> OrchestrationContext {
        let mut ctx = OrchestrationContext::new("task-1", "make a video");
        ctx.set_resource("script", "/tmp/script.json");
        ctx.set_state("quality_score", 0.55);
        ctx.set_state("script", json!({"title": "Tides", "scenes": [{"duration": 4}]}));
        ctx.set_state("style", "cinematic");
        ctx.record(CompletedCall::from_dispatch(
            "s1",
            1,
            Dispatch {
                capability: "generate_script".to_string(),
                params: Params::new(),
                result: CapabilityResult::success("ok"),
                started_at: chrono::Utc::now(),
                duration: Duration::ZERO,
            },
        ));
        ctx
    }

    fn check(source: &str) -> bool {
        evaluate(source, &context()).unwrap()
    }

    #[test]
    fn resource_presence() {
        assert!(check("resources.script"));
        assert!(!check("resources.final_video"));
        assert!(check("!resources.final_video"));
    }

    #[test]
    fn numeric_comparisons() {
        assert!(check("state.quality_score < 0.7"));
        assert!(!check("state.quality_score >= 0.7"));
        assert!(check("state.script.scenes.0.duration == 4"));
    }

    #[test]
    fn string_comparisons() {
        assert!(check("state.style == 'cinematic'"));
        assert!(check("state.script.title != \"Waves\""));
    }

    #[test]
    fn history_and_boolean_logic() {
        assert!(check("history.s1 && resources.script"));
        assert!(!check("history.s2"));
        assert!(check("history.s2 || (state.quality_score > 0.5 && !history.s2)"));
    }

    #[test]
    fn missing_values_compare_false() {
        assert!(!check("state.missing < 1"));
        assert!(check("state.missing == null"));
    }

    #[test]
    fn parse_errors() {
        assert_eq!(Condition::parse("   "), Err(ConditionError::Empty));
        assert!(matches!(
            Condition::parse("budget > 3"),
            Err(ConditionError::UnknownRoot(_))
        ));
        assert!(matches!(
            Condition::parse("state.x == 'open"),
            Err(ConditionError::UnterminatedString(_))
        ));
        assert!(matches!(
            Condition::parse("(history.s1"),
            Err(ConditionError::UnexpectedEnd)
        ));
        assert!(matches!(
            Condition::parse("state.x # 2"),
            Err(ConditionError::UnexpectedChar { ch: '#', .. })
        ));
        assert!(matches!(
            Condition::parse("history"),
            Err(ConditionError::IncompletePath(_))
        ));
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let parens = format!("{}history.s1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert_eq!(
            Condition::parse(&parens),
            Err(ConditionError::TooDeep(MAX_NESTING))
        );

        let negations = format!("{}history.s1", "!".repeat(200_000));
        assert_eq!(
            Condition::parse(&negations),
            Err(ConditionError::TooDeep(MAX_NESTING))
        );
    }

    #[test]
    fn nesting_up_to_the_limit_still_parses() {
        let source = format!(
            "{}history.s1{}",
            "(".repeat(MAX_NESTING),
            ")".repeat(MAX_NESTING)
        );
        assert!(check(&source));
        assert!(check(&format!("{}history.s1", "!!".repeat(MAX_NESTING / 2))));
    }

    #[test]
    fn long_operator_chains_stay_flat() {
        let chain = vec!["history.s1"; 100_000].join(" && ");
        assert!(check(&chain));

        let chain = vec!["history.s2"; 100_000].join(" || ");
        assert!(!check(&chain));
    }
}
