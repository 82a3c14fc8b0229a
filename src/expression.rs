//! Stack machine for rule constraints.
//!
//! An [`Expression`] is a postfix sequence of operations. Evaluation never
//! panics: a missing binding, a kind mismatch, an arithmetic overflow or a
//! malformed stack all yield `None`, which excludes the candidate row.

use std::cell::RefCell;
use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::ast::{validate_set, Term};
use crate::symbols::{SymbolIndex, SymbolTable};

/// Upper bound on the compiled size of a `.matches()` pattern.
pub const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// `.matches()` patterns compiled once per rule application, keyed by the
/// pattern's symbol. Patterns that fail to compile are cached as `None`.
#[derive(Debug, Default)]
pub struct Regexes(RefCell<HashMap<SymbolIndex, Option<Regex>>>);

impl Regexes {
    pub fn new() -> Regexes {
        Regexes::default()
    }

    fn is_match(&self, pattern: SymbolIndex, s: &str, symbols: &SymbolTable) -> Option<bool> {
        let mut cache = self.0.borrow_mut();
        let re = cache.entry(pattern).or_insert_with(|| {
            let source = symbols.resolve(pattern)?;
            RegexBuilder::new(source)
                .size_limit(REGEX_SIZE_LIMIT)
                .dfa_size_limit(REGEX_SIZE_LIMIT)
                .build()
                .ok()
        });
        re.as_ref().map(|re| re.is_match(s))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Value(Term),
    Unary(Unary),
    Binary(Binary),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unary {
    Negate,
    Parens,
    Length,
}

impl Unary {
    fn evaluate(&self, value: Term, symbols: &SymbolTable) -> Option<Term> {
        match (self, value) {
            (Unary::Negate, Term::Bool(b)) => Some(Term::Bool(!b)),
            (Unary::Parens, t) => Some(t),
            (Unary::Length, Term::Str(i)) => symbols
                .resolve(i)
                .and_then(|s| i64::try_from(s.len()).ok())
                .map(Term::Integer),
            (Unary::Length, Term::Bytes(b)) => i64::try_from(b.len()).ok().map(Term::Integer),
            (Unary::Length, Term::Set(s)) => i64::try_from(s.len()).ok().map(Term::Integer),
            _ => None,
        }
    }

    fn print(&self, value: String) -> String {
        match self {
            Unary::Negate => format!("!{}", value),
            Unary::Parens => format!("({})", value),
            Unary::Length => format!("{}.length()", value),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Binary {
    LessThan,
    GreaterThan,
    LessOrEqual,
    GreaterOrEqual,
    Equal,
    Contains,
    Prefix,
    Suffix,
    Regex,
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Intersection,
    Union,
}

impl Binary {
    fn evaluate(
        &self,
        left: Term,
        right: Term,
        symbols: &SymbolTable,
        regexes: &Regexes,
    ) -> Option<Term> {
        use Term::*;

        match (self, left, right) {
            // integer
            (Binary::LessThan, Integer(i), Integer(j)) => Some(Bool(i < j)),
            (Binary::GreaterThan, Integer(i), Integer(j)) => Some(Bool(i > j)),
            (Binary::LessOrEqual, Integer(i), Integer(j)) => Some(Bool(i <= j)),
            (Binary::GreaterOrEqual, Integer(i), Integer(j)) => Some(Bool(i >= j)),
            (Binary::Equal, Integer(i), Integer(j)) => Some(Bool(i == j)),
            (Binary::Add, Integer(i), Integer(j)) => i.checked_add(j).map(Integer),
            (Binary::Sub, Integer(i), Integer(j)) => i.checked_sub(j).map(Integer),
            (Binary::Mul, Integer(i), Integer(j)) => i.checked_mul(j).map(Integer),
            (Binary::Div, Integer(i), Integer(j)) => i.checked_div(j).map(Integer),

            // string
            (Binary::Prefix, Str(s), Str(pref)) => {
                let (s, pref) = (symbols.resolve(s)?, symbols.resolve(pref)?);
                Some(Bool(s.starts_with(pref)))
            }
            (Binary::Suffix, Str(s), Str(suff)) => {
                let (s, suff) = (symbols.resolve(s)?, symbols.resolve(suff)?);
                Some(Bool(s.ends_with(suff)))
            }
            (Binary::Regex, Str(s), Str(r)) => {
                let s = symbols.resolve(s)?;
                regexes.is_match(r, s, symbols).map(Bool)
            }
            (Binary::Equal, Str(i), Str(j)) => Some(Bool(i == j)),

            // date
            (Binary::LessThan, Date(i), Date(j)) => Some(Bool(i < j)),
            (Binary::GreaterThan, Date(i), Date(j)) => Some(Bool(i > j)),
            (Binary::LessOrEqual, Date(i), Date(j)) => Some(Bool(i <= j)),
            (Binary::GreaterOrEqual, Date(i), Date(j)) => Some(Bool(i >= j)),
            (Binary::Equal, Date(i), Date(j)) => Some(Bool(i == j)),

            // bytes
            (Binary::Equal, Bytes(i), Bytes(j)) => Some(Bool(i == j)),

            // set
            (Binary::Equal, Set(i), Set(j)) => Some(Bool(i == j)),
            (Binary::Intersection, Set(i), Set(j)) => {
                let s = i.intersection(&j).cloned().collect();
                validate_set(&s).ok()?;
                Some(Set(s))
            }
            (Binary::Union, Set(i), Set(j)) => {
                let s = i.union(&j).cloned().collect();
                validate_set(&s).ok()?;
                Some(Set(s))
            }
            (Binary::Contains, Set(i), Set(j)) => Some(Bool(i.is_superset(&j))),
            (Binary::Contains, Set(s), scalar @ (Integer(_) | Str(_) | Date(_) | Bytes(_) | Bool(_))) => {
                Some(Bool(s.contains(&scalar)))
            }

            // boolean
            (Binary::And, Bool(i), Bool(j)) => Some(Bool(i && j)),
            (Binary::Or, Bool(i), Bool(j)) => Some(Bool(i || j)),
            (Binary::Equal, Bool(i), Bool(j)) => Some(Bool(i == j)),

            _ => None,
        }
    }

    fn print(&self, left: String, right: String) -> String {
        match self {
            Binary::LessThan => format!("{} < {}", left, right),
            Binary::GreaterThan => format!("{} > {}", left, right),
            Binary::LessOrEqual => format!("{} <= {}", left, right),
            Binary::GreaterOrEqual => format!("{} >= {}", left, right),
            Binary::Equal => format!("{} == {}", left, right),
            Binary::Contains => format!("{}.contains({})", left, right),
            Binary::Prefix => format!("{}.starts_with({})", left, right),
            Binary::Suffix => format!("{}.ends_with({})", left, right),
            Binary::Regex => format!("{}.matches({})", left, right),
            Binary::Add => format!("{} + {}", left, right),
            Binary::Sub => format!("{} - {}", left, right),
            Binary::Mul => format!("{} * {}", left, right),
            Binary::Div => format!("{} / {}", left, right),
            Binary::And => format!("{} && {}", left, right),
            Binary::Or => format!("{} || {}", left, right),
            Binary::Intersection => format!("{}.intersection({})", left, right),
            Binary::Union => format!("{}.union({})", left, right),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    pub ops: Vec<Op>,
}

impl Expression {
    pub fn new(ops: Vec<Op>) -> Expression {
        Expression { ops }
    }

    pub fn evaluate(&self, values: &HashMap<u32, Term>, symbols: &SymbolTable) -> Option<Term> {
        self.evaluate_with(values, symbols, &Regexes::new())
    }

    /// Same as [`Expression::evaluate`], reusing compiled patterns across calls.
    pub fn evaluate_with(
        &self,
        values: &HashMap<u32, Term>,
        symbols: &SymbolTable,
        regexes: &Regexes,
    ) -> Option<Term> {
        let mut stack: Vec<Term> = Vec::new();

        for op in &self.ops {
            match op {
                Op::Value(Term::Variable(i)) => stack.push(values.get(i)?.clone()),
                Op::Value(term) => stack.push(term.clone()),
                Op::Unary(unary) => {
                    let value = stack.pop()?;
                    stack.push(unary.evaluate(value, symbols)?);
                }
                Op::Binary(binary) => {
                    let right = stack.pop()?;
                    let left = stack.pop()?;
                    stack.push(binary.evaluate(left, right, symbols, regexes)?);
                }
            }
        }

        if stack.len() == 1 {
            stack.pop()
        } else {
            None
        }
    }

    /// Renders the expression in infix form, `None` if the stack is malformed.
    pub fn print(&self, symbols: &SymbolTable) -> Option<String> {
        let mut stack: Vec<String> = Vec::new();

        for op in &self.ops {
            match op {
                Op::Value(term) => stack.push(symbols.print_term(term)),
                Op::Unary(unary) => {
                    let value = stack.pop()?;
                    stack.push(unary.print(value));
                }
                Op::Binary(binary) => {
                    let right = stack.pop()?;
                    let left = stack.pop()?;
                    stack.push(binary.print(left, right));
                }
            }
        }

        if stack.len() == 1 {
            stack.pop()
        } else {
            None
        }
    }

    pub(crate) fn variables(&self) -> impl Iterator<Item = u32> + '_ {
        self.ops.iter().filter_map(|op| match op {
            Op::Value(Term::Variable(i)) => Some(*i),
            _ => None,
        })
    }
}
