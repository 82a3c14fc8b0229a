//! String interning and pretty printing.

use std::collections::HashMap;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::ast::{Check, Fact, Policy, PolicyKind, Predicate, Rule, Term};
use crate::expression::Expression;

pub type SymbolIndex = u64;

/// Symbols every implementation knows, so they never travel with a token.
pub const DEFAULT_SYMBOLS: [&str; 7] = [
    "authority",
    "ambient",
    "resource",
    "operation",
    "right",
    "current_time",
    "revocation_id",
];

/// Ordered, duplicate-free list of strings. The index of a symbol is its
/// insertion position.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SymbolTable {
    symbols: Vec<String>,
    index: HashMap<String, SymbolIndex>,
}

/// The table pre-loaded with [`DEFAULT_SYMBOLS`].
pub fn default_symbol_table() -> SymbolTable {
    let mut syms = SymbolTable::new();
    for s in DEFAULT_SYMBOLS.iter() {
        syms.insert(s);
    }
    syms
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    /// Returns the index of `s`, appending it first if it is unknown.
    pub fn insert(&mut self, s: &str) -> SymbolIndex {
        if let Some(i) = self.index.get(s) {
            return *i;
        }
        let i = self.symbols.len() as SymbolIndex;
        self.symbols.push(s.to_owned());
        self.index.insert(s.to_owned(), i);
        i
    }

    /// Interns `s` and wraps it in a string term.
    pub fn add(&mut self, s: &str) -> Term {
        Term::Str(self.insert(s))
    }

    pub fn get(&self, s: &str) -> Option<SymbolIndex> {
        self.index.get(s).copied()
    }

    pub fn resolve(&self, i: SymbolIndex) -> Option<&str> {
        usize::try_from(i)
            .ok()
            .and_then(|i| self.symbols.get(i))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(String::as_str)
    }

    pub fn is_disjoint(&self, other: &SymbolTable) -> bool {
        other.iter().all(|s| self.get(s).is_none())
    }

    /// Appends the symbols of `other`, keeping insertion idempotent.
    pub fn extend(&mut self, other: &SymbolTable) {
        for s in other.iter() {
            self.insert(s);
        }
    }

    /// Symbols inserted after the first `base_len` ones.
    pub fn split_off(&self, base_len: usize) -> SymbolTable {
        let mut table = SymbolTable::new();
        for s in self.symbols.iter().skip(base_len) {
            table.insert(s);
        }
        table
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.symbols.clone()
    }

    pub fn print_symbol(&self, i: SymbolIndex) -> String {
        match self.resolve(i) {
            Some(s) => s.to_owned(),
            None => format!("<{}?>", i),
        }
    }

    pub fn print_term(&self, term: &Term) -> String {
        match term {
            Term::Variable(i) => format!("${}", self.print_symbol(u64::from(*i))),
            Term::Integer(i) => i.to_string(),
            Term::Str(i) => format!("{:?}", self.print_symbol(*i)),
            Term::Date(d) => print_date(*d),
            Term::Bytes(b) => format!("hex:{}", hex::encode(b)),
            Term::Bool(b) => b.to_string(),
            Term::Set(s) => {
                let items: Vec<String> = s.iter().map(|t| self.print_term(t)).collect();
                format!("[{}]", items.join(", "))
            }
        }
    }

    pub fn print_predicate(&self, p: &Predicate) -> String {
        let terms: Vec<String> = p.terms.iter().map(|t| self.print_term(t)).collect();
        format!("{}({})", self.print_symbol(p.name), terms.join(", "))
    }

    pub fn print_fact(&self, f: &Fact) -> String {
        self.print_predicate(&f.predicate)
    }

    pub fn print_expression(&self, e: &Expression) -> String {
        e.print(self)
            .unwrap_or_else(|| format!("<invalid expression: {:?}>", e.ops))
    }

    pub fn print_rule_body(&self, r: &Rule) -> String {
        let preds = r.body.iter().map(|p| self.print_predicate(p));
        let exprs = r.expressions.iter().map(|e| self.print_expression(e));
        preds.chain(exprs).collect::<Vec<_>>().join(", ")
    }

    pub fn print_rule(&self, r: &Rule) -> String {
        format!("{} <- {}", self.print_predicate(&r.head), self.print_rule_body(r))
    }

    pub fn print_check(&self, c: &Check) -> String {
        let queries: Vec<String> = c.queries.iter().map(|q| self.print_rule_body(q)).collect();
        format!("check if {}", queries.join(" or "))
    }

    pub fn print_policy(&self, p: &Policy) -> String {
        let queries: Vec<String> = p.queries.iter().map(|q| self.print_rule_body(q)).collect();
        let kind = match p.kind {
            PolicyKind::Allow => "allow",
            PolicyKind::Deny => "deny",
        };
        format!("{} if {}", kind, queries.join(" or "))
    }
}

fn print_date(seconds: u64) -> String {
    i64::try_from(seconds)
        .ok()
        .and_then(|s| OffsetDateTime::from_unix_timestamp(s).ok())
        .and_then(|d| d.format(&Rfc3339).ok())
        .unwrap_or_else(|| format!("date({})", seconds))
}
