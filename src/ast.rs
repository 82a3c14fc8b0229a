//! Term model shared by facts, rules and expressions.
//!
//! Every name (predicate names, string values, variable names) is a
//! [`SymbolIndex`](crate::symbols::SymbolIndex) into a symbol table.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::TermError;
use crate::expression::Expression;
use crate::symbols::SymbolIndex;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    Variable(u32),
    Integer(i64),
    Str(SymbolIndex),
    Date(u64),
    Bytes(Vec<u8>),
    Bool(bool),
    Set(BTreeSet<Term>),
}

/// Kind tag used to keep sets homogeneous.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Kind {
    Variable,
    Integer,
    Str,
    Date,
    Bytes,
    Bool,
    Set,
}

impl Term {
    /// Builds a set, rejecting variables, nested sets and mixed element kinds.
    pub fn set<I: IntoIterator<Item = Term>>(items: I) -> Result<Term, TermError> {
        let set: BTreeSet<Term> = items.into_iter().collect();
        validate_set(&set)?;
        Ok(Term::Set(set))
    }

    pub(crate) fn kind(&self) -> Kind {
        match self {
            Term::Variable(_) => Kind::Variable,
            Term::Integer(_) => Kind::Integer,
            Term::Str(_) => Kind::Str,
            Term::Date(_) => Kind::Date,
            Term::Bytes(_) => Kind::Bytes,
            Term::Bool(_) => Kind::Bool,
            Term::Set(_) => Kind::Set,
        }
    }

    /// A ground term contains no variable.
    pub fn is_ground(&self) -> bool {
        match self {
            Term::Variable(_) => false,
            Term::Set(s) => s.iter().all(Term::is_ground),
            _ => true,
        }
    }

    /// Re-checks the set invariant on a term that did not go through
    /// [`Term::set`], e.g. one that was just deserialized.
    pub fn validate(&self) -> Result<(), TermError> {
        match self {
            Term::Set(s) => validate_set(s),
            _ => Ok(()),
        }
    }
}

pub(crate) fn validate_set(set: &BTreeSet<Term>) -> Result<(), TermError> {
    let mut kind = None;
    for item in set {
        match item.kind() {
            Kind::Variable => return Err(TermError::VariableInSet),
            Kind::Set => return Err(TermError::NestedSet),
            k => match kind {
                None => kind = Some(k),
                Some(previous) if previous != k => return Err(TermError::MixedSet),
                Some(_) => {}
            },
        }
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Predicate {
    pub name: SymbolIndex,
    pub terms: Vec<Term>,
}

impl Predicate {
    pub fn new(name: SymbolIndex, terms: Vec<Term>) -> Predicate {
        Predicate { name, terms }
    }

    pub fn is_ground(&self) -> bool {
        self.terms.iter().all(Term::is_ground)
    }

    pub(crate) fn variables(&self) -> impl Iterator<Item = u32> + '_ {
        self.terms.iter().filter_map(|t| match t {
            Term::Variable(i) => Some(*i),
            _ => None,
        })
    }
}

/// A ground predicate.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fact {
    pub predicate: Predicate,
}

impl Fact {
    pub fn new(name: SymbolIndex, terms: Vec<Term>) -> Fact {
        Fact {
            predicate: Predicate::new(name, terms),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub head: Predicate,
    pub body: Vec<Predicate>,
    pub expressions: Vec<Expression>,
}

impl Rule {
    pub fn new(head: Predicate, body: Vec<Predicate>, expressions: Vec<Expression>) -> Rule {
        Rule {
            head,
            body,
            expressions,
        }
    }

    /// Variables appearing in the body predicates.
    pub fn body_variables(&self) -> HashSet<u32> {
        self.body.iter().flat_map(Predicate::variables).collect()
    }

    /// True when every variable of the head and of the expressions is
    /// bound by some body predicate.
    pub fn is_range_restricted(&self) -> bool {
        let bound = self.body_variables();
        self.head.variables().all(|v| bound.contains(&v))
            && self
                .expressions
                .iter()
                .flat_map(Expression::variables)
                .all(|v| bound.contains(&v))
    }
}

/// A check passes if any of its queries matches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub queries: Vec<Rule>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyKind {
    Allow,
    Deny,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub queries: Vec<Rule>,
    pub kind: PolicyKind,
}
