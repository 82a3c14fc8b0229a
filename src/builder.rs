//! Helper types to write facts, rules, checks and policies with plain
//! strings, and convert them against a symbol table.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ast::{self, validate_set, PolicyKind};
use crate::error::TermError;
use crate::expression::{self, Binary, Unary};
use crate::symbols::SymbolTable;
use crate::token::Block;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    Variable(String),
    Integer(i64),
    Str(String),
    Date(u64),
    Bytes(Vec<u8>),
    Bool(bool),
    Set(BTreeSet<Term>),
}

impl Term {
    pub fn convert(&self, symbols: &mut SymbolTable) -> ast::Term {
        match self {
            Term::Variable(name) => ast::Term::Variable(symbols.insert(name) as u32),
            Term::Integer(i) => ast::Term::Integer(*i),
            Term::Str(s) => symbols.add(s),
            Term::Date(d) => ast::Term::Date(*d),
            Term::Bytes(b) => ast::Term::Bytes(b.clone()),
            Term::Bool(b) => ast::Term::Bool(*b),
            Term::Set(s) => ast::Term::Set(s.iter().map(|t| t.convert(symbols)).collect()),
        }
    }

    pub fn convert_from(term: &ast::Term, symbols: &SymbolTable) -> Term {
        match term {
            ast::Term::Variable(i) => Term::Variable(symbols.print_symbol(u64::from(*i))),
            ast::Term::Integer(i) => Term::Integer(*i),
            ast::Term::Str(i) => Term::Str(symbols.print_symbol(*i)),
            ast::Term::Date(d) => Term::Date(*d),
            ast::Term::Bytes(b) => Term::Bytes(b.clone()),
            ast::Term::Bool(b) => Term::Bool(*b),
            ast::Term::Set(s) => Term::Set(s.iter().map(|t| Term::convert_from(t, symbols)).collect()),
        }
    }
}

impl From<i64> for Term {
    fn from(i: i64) -> Self {
        Term::Integer(i)
    }
}

impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Term::Str(s.to_owned())
    }
}

impl From<bool> for Term {
    fn from(b: bool) -> Self {
        Term::Bool(b)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Predicate {
    pub name: String,
    pub terms: Vec<Term>,
}

impl Predicate {
    pub fn new(name: String, terms: Vec<Term>) -> Predicate {
        Predicate { name, terms }
    }

    pub fn convert(&self, symbols: &mut SymbolTable) -> ast::Predicate {
        let name = symbols.insert(&self.name);
        let terms = self.terms.iter().map(|t| t.convert(symbols)).collect();
        ast::Predicate { name, terms }
    }

    pub fn convert_from(p: &ast::Predicate, symbols: &SymbolTable) -> Predicate {
        Predicate {
            name: symbols.print_symbol(p.name),
            terms: p.terms.iter().map(|t| Term::convert_from(t, symbols)).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fact(pub Predicate);

impl Fact {
    pub fn new(name: String, terms: Vec<Term>) -> Fact {
        Fact(Predicate::new(name, terms))
    }

    pub fn convert(&self, symbols: &mut SymbolTable) -> ast::Fact {
        ast::Fact {
            predicate: self.0.convert(symbols),
        }
    }

    pub fn convert_from(f: &ast::Fact, symbols: &SymbolTable) -> Fact {
        Fact(Predicate::convert_from(&f.predicate, symbols))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Value(Term),
    Unary(Unary),
    Binary(Binary),
}

/// Postfix expression over string-level terms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expression {
    pub ops: Vec<Op>,
}

impl Expression {
    pub fn convert(&self, symbols: &mut SymbolTable) -> expression::Expression {
        let ops = self
            .ops
            .iter()
            .map(|op| match op {
                Op::Value(t) => expression::Op::Value(t.convert(symbols)),
                Op::Unary(u) => expression::Op::Unary(*u),
                Op::Binary(b) => expression::Op::Binary(*b),
            })
            .collect();
        expression::Expression { ops }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
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

    pub fn convert(&self, symbols: &mut SymbolTable) -> ast::Rule {
        let head = self.head.convert(symbols);
        let body = self.body.iter().map(|p| p.convert(symbols)).collect();
        let expressions = self.expressions.iter().map(|e| e.convert(symbols)).collect();
        ast::Rule::new(head, body, expressions)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Check {
    pub queries: Vec<Rule>,
}

impl Check {
    pub fn convert(&self, symbols: &mut SymbolTable) -> ast::Check {
        ast::Check {
            queries: self.queries.iter().map(|q| q.convert(symbols)).collect(),
        }
    }
}

impl From<Rule> for Check {
    fn from(query: Rule) -> Self {
        Check {
            queries: vec![query],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    pub queries: Vec<Rule>,
    pub kind: PolicyKind,
}

impl Policy {
    pub fn convert(&self, symbols: &mut SymbolTable) -> ast::Policy {
        ast::Policy {
            queries: self.queries.iter().map(|q| q.convert(symbols)).collect(),
            kind: self.kind,
        }
    }
}

/// Collects the content of a block before it is attached to a token.
#[derive(Clone, Debug, Default)]
pub struct BlockBuilder {
    pub facts: Vec<Fact>,
    pub rules: Vec<Rule>,
    pub checks: Vec<Check>,
    pub context: Option<String>,
}

impl BlockBuilder {
    pub fn new() -> BlockBuilder {
        BlockBuilder::default()
    }

    pub fn add_fact(&mut self, fact: Fact) {
        self.facts.push(fact);
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn add_check(&mut self, check: Check) {
        self.checks.push(check);
    }

    pub fn set_context(&mut self, context: String) {
        self.context = Some(context);
    }

    /// `check if resource(#ambient, <resource>)`
    pub fn check_resource(&mut self, resource: &str) {
        self.add_check(Check::from(rule(
            "check_resource",
            &[],
            &[pred("resource", &[s("ambient"), string(resource)])],
        )));
    }

    /// `check if operation(#ambient, <operation>)`
    pub fn check_operation(&mut self, operation: &str) {
        self.add_check(Check::from(rule(
            "check_operation",
            &[],
            &[pred("operation", &[s("ambient"), string(operation)])],
        )));
    }

    /// `check if current_time(#ambient, $time), $time <= <expiration>`
    pub fn expiration_date(&mut self, expiration: SystemTime) {
        let check = constrained_rule(
            "expiration",
            &[var("time")],
            &[pred("current_time", &[s("ambient"), var("time")])],
            &[Expression {
                ops: vec![
                    Op::Value(var("time")),
                    Op::Value(date(&expiration)),
                    Op::Binary(Binary::LessOrEqual),
                ],
            }],
        );
        self.add_check(Check::from(check));
    }

    /// Converts the block against the token's current symbols. The
    /// returned block only lists the symbols it introduced.
    pub fn build(&self, symbols: &SymbolTable) -> Block {
        let mut table = symbols.clone();
        let facts = self.facts.iter().map(|f| f.convert(&mut table)).collect();
        let rules = self.rules.iter().map(|r| r.convert(&mut table)).collect();
        let checks = self.checks.iter().map(|c| c.convert(&mut table)).collect();

        let mut block = Block::new(table.split_off(symbols.len()));
        block.facts = facts;
        block.rules = rules;
        block.checks = checks;
        block.context = self.context.clone();
        block
    }
}

/// creates a new fact
pub fn fact(name: &str, terms: &[Term]) -> Fact {
    Fact(pred(name, terms))
}

/// creates a predicate
pub fn pred(name: &str, terms: &[Term]) -> Predicate {
    Predicate::new(name.to_owned(), terms.to_vec())
}

/// creates a rule
pub fn rule(head_name: &str, head_terms: &[Term], predicates: &[Predicate]) -> Rule {
    constrained_rule(head_name, head_terms, predicates, &[])
}

/// creates a rule with constraints
pub fn constrained_rule(
    head_name: &str,
    head_terms: &[Term],
    predicates: &[Predicate],
    expressions: &[Expression],
) -> Rule {
    Rule::new(
        pred(head_name, head_terms),
        predicates.to_vec(),
        expressions.to_vec(),
    )
}

pub fn int(i: i64) -> Term {
    Term::Integer(i)
}

pub fn string(s: &str) -> Term {
    Term::Str(s.to_owned())
}

/// symbol, written `#name` in source text
pub fn s(s: &str) -> Term {
    Term::Str(s.to_owned())
}

pub fn date(t: &SystemTime) -> Term {
    let dur = t.duration_since(UNIX_EPOCH).unwrap_or_default();
    Term::Date(dur.as_secs())
}

pub fn var(s: &str) -> Term {
    Term::Variable(s.to_owned())
}

pub fn bytes(b: &[u8]) -> Term {
    Term::Bytes(b.to_vec())
}

pub fn boolean(b: bool) -> Term {
    Term::Bool(b)
}

/// Builds a set with the same restrictions as [`ast::Term::set`].
pub fn set<I: IntoIterator<Item = Term>>(items: I) -> Result<Term, TermError> {
    let items: BTreeSet<Term> = items.into_iter().collect();
    let mut scratch = SymbolTable::new();
    let converted: BTreeSet<ast::Term> = items.iter().map(|t| t.convert(&mut scratch)).collect();
    validate_set(&converted)?;
    Ok(Term::Set(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{default_symbol_table, DEFAULT_SYMBOLS};

    #[test]
    fn block_only_lists_new_symbols() {
        let base = default_symbol_table();
        let mut builder = BlockBuilder::new();
        builder.add_fact(fact("right", &[s("authority"), string("file1"), s("read")]));
        builder.check_operation("read");
        builder.set_context("ctx".to_owned());

        let block = builder.build(&base);
        assert_eq!(
            vec!["file1".to_owned(), "read".to_owned(), "check_operation".to_owned()],
            block.symbols.to_vec()
        );
        assert_eq!(Some("ctx".to_owned()), block.context);

        let mut all = base.clone();
        all.extend(&block.symbols);
        assert_eq!(
            "right(\"authority\", \"file1\", \"read\")",
            all.print_fact(&block.facts[0])
        );
        assert_eq!(
            "check if operation(\"ambient\", \"read\")",
            all.print_check(&block.checks[0])
        );
        assert_eq!(DEFAULT_SYMBOLS.len() + 3, all.len());
    }

    #[test]
    fn conversion_back_to_strings() {
        let mut syms = SymbolTable::new();
        let f = fact("file", &[string("/a/b"), int(3), var("x")]);
        let converted = f.convert(&mut syms);
        assert_eq!(f, Fact::convert_from(&converted, &syms));
    }

    #[test]
    fn sets_are_checked() {
        assert!(set(vec![int(1), int(2)]).is_ok());
        assert_eq!(Err(TermError::MixedSet), set(vec![int(1), string("a")]));
        assert_eq!(Err(TermError::VariableInSet), set(vec![var("x")]));
    }

    #[test]
    fn expiration_check() {
        let mut builder = BlockBuilder::new();
        builder.expiration_date(UNIX_EPOCH + std::time::Duration::from_secs(60));
        let mut syms = default_symbol_table();
        let block = builder.build(&syms);
        syms.extend(&block.symbols);
        assert_eq!(
            "check if current_time(\"ambient\", $time), $time <= 1970-01-01T00:01:00Z",
            syms.print_check(&block.checks[0])
        );
    }
}
