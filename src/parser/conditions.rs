//! Boolean expression parsing for conditional tags
//!
//! This module handles the `{% if %}` condition grammar using precedence
//! climbing over the tag's pre-split argument bits, with the filter
//! expression grammar supplying the operands.
//!
//! # Operators and precedence
//!
//! Low to high: `or` (6), `and` (7), `not` (8, prefix), `in`/`not in` (9),
//! `is`/`is not`/`==`/`!=`/`===`/`!==`/`<`/`<=`/`>`/`>=` (10). All infix
//! operators are left-associative. The two-word operators `not in` and
//! `is not` are merged into single tokens before parsing.
//!
//! # Evaluation
//!
//! Evaluation is lazy: `or` and `and` short-circuit and yield the deciding
//! operand's value, so truthiness chains through. A comparator that cannot
//! be applied (ordering across unlike types, `in` against a scalar)
//! evaluates to false rather than raising, and a not-found operand is falsy,
//! never an error. Conditions must not break a render over data shape.

use crate::context::stack::Context;
use crate::context::value::Value;
use crate::error::SyntaxError;
use crate::parser::expressions::FilterExpression;
use crate::parser::parser::Parser;

/// Infix operators, in source spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CondOp {
    Or,
    And,
    In,
    NotIn,
    Is,
    IsNot,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CondOp {
    fn binding_power(self) -> u8 {
        match self {
            CondOp::Or => 6,
            CondOp::And => 7,
            CondOp::In | CondOp::NotIn => 9,
            _ => 10,
        }
    }

    fn display(self) -> &'static str {
        match self {
            CondOp::Or => "or",
            CondOp::And => "and",
            CondOp::In => "in",
            CondOp::NotIn => "not in",
            CondOp::Is => "is",
            CondOp::IsNot => "is not",
            CondOp::Eq => "==",
            CondOp::Ne => "!=",
            CondOp::StrictEq => "===",
            CondOp::StrictNe => "!==",
            CondOp::Lt => "<",
            CondOp::Le => "<=",
            CondOp::Gt => ">",
            CondOp::Ge => ">=",
        }
    }

    fn from_bit(bit: &str) -> Option<CondOp> {
        match bit {
            "or" => Some(CondOp::Or),
            "and" => Some(CondOp::And),
            "in" => Some(CondOp::In),
            "is" => Some(CondOp::Is),
            "==" => Some(CondOp::Eq),
            "!=" => Some(CondOp::Ne),
            "===" => Some(CondOp::StrictEq),
            "!==" => Some(CondOp::StrictNe),
            "<" => Some(CondOp::Lt),
            "<=" => Some(CondOp::Le),
            ">" => Some(CondOp::Gt),
            ">=" => Some(CondOp::Ge),
            _ => None,
        }
    }
}

const NOT_BINDING_POWER: u8 = 8;

/// A parsed condition tree.
#[derive(Debug, Clone)]
pub(crate) enum Condition {
    Operand(FilterExpression),
    Not(Box<Condition>),
    Binary {
        op: CondOp,
        left: Box<Condition>,
        right: Box<Condition>,
    },
}

impl Condition {
    /// Parse a condition from a tag's argument bits.
    pub(crate) fn build(bits: &[String], parser: &Parser) -> Result<Condition, SyntaxError> {
        let tokens = merge_operators(bits);
        let mut cond_parser = ConditionParser {
            tokens,
            pos: 0,
            parser,
        };
        let condition = cond_parser.parse_binding(0)?;
        if let Some(extra) = cond_parser.peek() {
            return Err(SyntaxError::new(
                format!("Unused '{}' at end of condition", extra.display()),
                parser.current_line(),
            ));
        }
        Ok(condition)
    }

    /// Evaluate lazily against the context. Or/and return the deciding
    /// operand's value; comparators return booleans.
    pub(crate) fn eval(&self, context: &mut Context) -> Value {
        match self {
            Condition::Operand(expr) => expr.resolve(context, true),
            Condition::Not(inner) => Value::Bool(!inner.eval(context).is_truthy()),
            Condition::Binary { op, left, right } => match op {
                CondOp::Or => {
                    let lhs = left.eval(context);
                    if lhs.is_truthy() {
                        lhs
                    } else {
                        right.eval(context)
                    }
                }
                CondOp::And => {
                    let lhs = left.eval(context);
                    if !lhs.is_truthy() {
                        lhs
                    } else {
                        right.eval(context)
                    }
                }
                comparator => {
                    let lhs = left.eval(context);
                    let rhs = right.eval(context);
                    Value::Bool(compare(*comparator, &lhs, &rhs))
                }
            },
        }
    }

    /// Convenience for `{% if %}` arms.
    pub(crate) fn is_true(&self, context: &mut Context) -> bool {
        self.eval(context).is_truthy()
    }
}

/// Apply a comparator; any unsupported pairing is false, never an error.
fn compare(op: CondOp, lhs: &Value, rhs: &Value) -> bool {
    use std::cmp::Ordering;
    match op {
        CondOp::In => rhs.contains(lhs).unwrap_or(false),
        CondOp::NotIn => rhs.contains(lhs) == Some(false),
        CondOp::Eq => lhs == rhs,
        CondOp::Ne => lhs != rhs,
        CondOp::Is | CondOp::StrictEq => lhs.strict_eq(rhs),
        CondOp::IsNot | CondOp::StrictNe => !lhs.strict_eq(rhs),
        CondOp::Lt => lhs.compare(rhs) == Some(Ordering::Less),
        CondOp::Le => matches!(
            lhs.compare(rhs),
            Some(Ordering::Less) | Some(Ordering::Equal)
        ),
        CondOp::Gt => lhs.compare(rhs) == Some(Ordering::Greater),
        CondOp::Ge => matches!(
            lhs.compare(rhs),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        ),
        CondOp::Or | CondOp::And => unreachable!("handled before comparators"),
    }
}

#[derive(Debug, Clone)]
enum CondTok {
    Infix(CondOp),
    Not,
    Operand(String),
}

impl CondTok {
    fn display(&self) -> String {
        match self {
            CondTok::Infix(op) => op.display().to_string(),
            CondTok::Not => "not".to_string(),
            CondTok::Operand(text) => text.clone(),
        }
    }
}

/// Merge `not in` and `is not` into single tokens, classify the rest.
fn merge_operators(bits: &[String]) -> Vec<CondTok> {
    let mut tokens = Vec::with_capacity(bits.len());
    let mut i = 0;
    while i < bits.len() {
        let bit = bits[i].as_str();
        let next = bits.get(i + 1).map(String::as_str);
        match (bit, next) {
            ("not", Some("in")) => {
                tokens.push(CondTok::Infix(CondOp::NotIn));
                i += 2;
            }
            ("is", Some("not")) => {
                tokens.push(CondTok::Infix(CondOp::IsNot));
                i += 2;
            }
            ("not", _) => {
                tokens.push(CondTok::Not);
                i += 1;
            }
            _ => {
                match CondOp::from_bit(bit) {
                    Some(op) => tokens.push(CondTok::Infix(op)),
                    None => tokens.push(CondTok::Operand(bits[i].clone())),
                }
                i += 1;
            }
        }
    }
    tokens
}

struct ConditionParser<'p> {
    tokens: Vec<CondTok>,
    pos: usize,
    parser: &'p Parser,
}

impl ConditionParser<'_> {
    fn peek(&self) -> Option<CondOp> {
        match self.tokens.get(self.pos) {
            Some(CondTok::Infix(op)) => Some(*op),
            _ => None,
        }
    }

    fn next(&mut self) -> Option<CondTok> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Precedence climbing: parse everything binding tighter than `rbp`.
    fn parse_binding(&mut self, rbp: u8) -> Result<Condition, SyntaxError> {
        let mut left = self.parse_prefix()?;
        while let Some(op) = self.peek() {
            if op.binding_power() <= rbp {
                break;
            }
            self.pos += 1;
            // Left-associative: the right side only takes tighter bindings.
            let right = self.parse_binding(op.binding_power())?;
            left = Condition::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Condition, SyntaxError> {
        let line = self.parser.current_line();
        match self.next() {
            Some(CondTok::Not) => Ok(Condition::Not(Box::new(
                self.parse_binding(NOT_BINDING_POWER)?,
            ))),
            Some(CondTok::Operand(text)) => Ok(Condition::Operand(
                FilterExpression::compile(&text, self.parser)?,
            )),
            Some(token @ CondTok::Infix(_)) => Err(SyntaxError::new(
                format!("Unexpected '{}' in condition", token.display()),
                line,
            )),
            None => Err(SyntaxError::new("Unexpected end of condition", line)),
        }
    }
}
