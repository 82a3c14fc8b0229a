//! Unification of rule bodies against a fact set.
//!
//! The join walks body predicates left to right with an explicit stack of
//! frames instead of recursion. Each frame owns the partial binding built
//! so far and a cursor over the candidate facts for its predicate, so the
//! search is lazy and only one path of the cross product is live at a time.

use std::collections::hash_set;
use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::ast::{Fact, Predicate, Rule, Term};
use crate::expression::{Expression, Regexes};
use crate::symbols::SymbolTable;

/// Bindings for the variables of a rule body, `None` until unified.
#[derive(Clone, Debug)]
pub struct MatchedVariables(HashMap<u32, Option<Term>>);

impl MatchedVariables {
    pub fn new(variables: &HashSet<u32>) -> MatchedVariables {
        MatchedVariables(variables.iter().map(|v| (*v, None)).collect())
    }

    /// Binds `key` to `value`, or checks that it is already bound to it.
    pub fn insert(&mut self, key: u32, value: &Term) -> bool {
        match self.0.get_mut(&key) {
            None => false,
            Some(Some(v)) => *v == *value,
            Some(slot) => {
                *slot = Some(value.clone());
                true
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.0.values().all(Option::is_some)
    }

    pub fn complete(&self) -> Option<HashMap<u32, Term>> {
        self.0
            .iter()
            .map(|(k, v)| v.clone().map(|v| (*k, v)))
            .collect()
    }
}

/// True if `fact` has the name and arity of `rule_pred` and agrees with
/// every constant position.
pub fn match_preds(rule_pred: &Predicate, fact: &Predicate) -> bool {
    rule_pred.name == fact.name
        && rule_pred.terms.len() == fact.terms.len()
        && rule_pred
            .terms
            .iter()
            .zip(fact.terms.iter())
            .all(|(r, f)| match (r, f) {
                (_, Term::Variable(_)) => false,
                (Term::Variable(_), _) => true,
                (r, f) => r == f,
            })
}

struct Frame<'a> {
    depth: usize,
    variables: MatchedVariables,
    candidates: hash_set::Iter<'a, Fact>,
}

/// Lazy iterator over the complete bindings satisfying a rule body and
/// its expressions. Consumed once.
pub struct Combinator<'a> {
    predicates: &'a [Predicate],
    expressions: &'a [Expression],
    facts: &'a HashSet<Fact>,
    symbols: &'a SymbolTable,
    regexes: Regexes,
    stack: Vec<Frame<'a>>,
    // only used when the body is empty
    pending: Option<MatchedVariables>,
}

impl<'a> Combinator<'a> {
    pub fn new(
        variables: MatchedVariables,
        predicates: &'a [Predicate],
        expressions: &'a [Expression],
        facts: &'a HashSet<Fact>,
        symbols: &'a SymbolTable,
    ) -> Combinator<'a> {
        let (stack, pending) = if predicates.is_empty() {
            (Vec::new(), Some(variables))
        } else {
            let root = Frame {
                depth: 0,
                variables,
                candidates: facts.iter(),
            };
            (vec![root], None)
        };

        Combinator {
            predicates,
            expressions,
            facts,
            symbols,
            regexes: Regexes::new(),
            stack,
            pending,
        }
    }

    fn accept(&self, variables: &MatchedVariables) -> Option<HashMap<u32, Term>> {
        let bindings = variables.complete()?;
        let valid = self
            .expressions
            .iter()
            .all(|e| e.evaluate_with(&bindings, self.symbols, &self.regexes) == Some(Term::Bool(true)));
        if valid {
            Some(bindings)
        } else {
            None
        }
    }
}

impl<'a> Iterator for Combinator<'a> {
    type Item = HashMap<u32, Term>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(variables) = self.pending.take() {
            return self.accept(&variables);
        }

        loop {
            let (depth, variables) = {
                let frame = self.stack.last_mut()?;
                let pred = &self.predicates[frame.depth];

                let fact = match frame.candidates.next() {
                    Some(fact) => fact,
                    None => {
                        self.stack.pop();
                        continue;
                    }
                };

                if !match_preds(pred, &fact.predicate) {
                    continue;
                }

                let mut variables = frame.variables.clone();
                let unified = pred
                    .terms
                    .iter()
                    .zip(fact.predicate.terms.iter())
                    .all(|(r, f)| match r {
                        Term::Variable(k) => variables.insert(*k, f),
                        _ => true,
                    });
                if !unified {
                    continue;
                }

                (frame.depth + 1, variables)
            };

            if depth == self.predicates.len() {
                if let Some(bindings) = self.accept(&variables) {
                    return Some(bindings);
                }
            } else {
                self.stack.push(Frame {
                    depth,
                    variables,
                    candidates: self.facts.iter(),
                });
            }
        }
    }
}

impl Rule {
    /// Lazily derives the head facts of every binding of the body.
    pub fn apply<'a>(
        &'a self,
        facts: &'a HashSet<Fact>,
        symbols: &'a SymbolTable,
    ) -> impl Iterator<Item = Fact> + 'a {
        let variables = MatchedVariables::new(&self.body_variables());
        Combinator::new(variables, &self.body, &self.expressions, facts, symbols).filter_map(
            move |bindings| {
                let mut head = self.head.clone();
                for term in head.terms.iter_mut() {
                    if let Term::Variable(i) = term {
                        match bindings.get(i) {
                            Some(value) => *term = value.clone(),
                            None => {
                                warn!(
                                    variable = %symbols.print_symbol(u64::from(*i)),
                                    rule = %symbols.print_rule(self),
                                    "head variable is not bound by the rule body, skipping fact"
                                );
                                return None;
                            }
                        }
                    }
                }
                Some(Fact { predicate: head })
            },
        )
    }

    /// True if the body has at least one satisfying binding.
    pub fn find_match(&self, facts: &HashSet<Fact>, symbols: &SymbolTable) -> bool {
        let variables = MatchedVariables::new(&self.body_variables());
        Combinator::new(variables, &self.body, &self.expressions, facts, symbols)
            .next()
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{Binary, Op};

    fn var(syms: &mut SymbolTable, name: &str) -> Term {
        Term::Variable(syms.insert(name) as u32)
    }

    #[test]
    fn join_on_shared_variable() {
        let mut syms = SymbolTable::new();
        let mut facts = HashSet::new();

        let abc = syms.add("abc");
        let def = syms.add("def");
        let ghi = syms.add("ghi");
        let aaa = syms.add("AAA");
        let bbb = syms.add("BBB");
        let ccc = syms.add("CCC");
        let t1 = syms.insert("t1");
        let t2 = syms.insert("t2");
        let join = syms.insert("join");

        facts.insert(Fact::new(t1, vec![Term::Integer(0), abc.clone()]));
        facts.insert(Fact::new(t1, vec![Term::Integer(1), def.clone()]));
        facts.insert(Fact::new(t1, vec![Term::Integer(2), ghi]));
        facts.insert(Fact::new(t2, vec![Term::Integer(0), aaa.clone(), Term::Integer(0)]));
        facts.insert(Fact::new(t2, vec![Term::Integer(1), bbb.clone(), Term::Integer(0)]));
        facts.insert(Fact::new(t2, vec![Term::Integer(2), ccc.clone(), Term::Integer(1)]));

        let (id, left, right, t2_id) = (
            var(&mut syms, "id"),
            var(&mut syms, "left"),
            var(&mut syms, "right"),
            var(&mut syms, "t2_id"),
        );
        let body = vec![
            Predicate::new(t1, vec![id.clone(), left.clone()]),
            Predicate::new(t2, vec![t2_id, right.clone(), id.clone()]),
        ];
        let head = Predicate::new(join, vec![left, right]);

        let rule = Rule::new(head.clone(), body.clone(), vec![]);
        let res: HashSet<Fact> = rule.apply(&facts, &syms).collect();
        let expected: HashSet<Fact> = vec![
            Fact::new(join, vec![abc.clone(), aaa.clone()]),
            Fact::new(join, vec![abc.clone(), bbb.clone()]),
            Fact::new(join, vec![def, ccc]),
        ]
        .into_iter()
        .collect();
        assert_eq!(expected, res);

        let constrained = Rule::new(
            head,
            body,
            vec![Expression::new(vec![
                Op::Value(id),
                Op::Value(Term::Integer(1)),
                Op::Binary(Binary::LessThan),
            ])],
        );
        let res: HashSet<Fact> = constrained.apply(&facts, &syms).collect();
        let expected: HashSet<Fact> = vec![
            Fact::new(join, vec![abc.clone(), aaa]),
            Fact::new(join, vec![abc, bbb]),
        ]
        .into_iter()
        .collect();
        assert_eq!(expected, res);
    }

    #[test]
    fn constants_in_body_filter_candidates() {
        let mut syms = SymbolTable::new();
        let mut facts = HashSet::new();
        let resource = syms.insert("resource");
        let operation = syms.insert("operation");
        let right = syms.insert("right");
        let file1 = syms.add("file1");
        let file2 = syms.add("file2");
        let read = syms.add("read");
        let write = syms.add("write");
        let check = syms.insert("check");

        facts.insert(Fact::new(resource, vec![file2.clone()]));
        facts.insert(Fact::new(operation, vec![write.clone()]));
        facts.insert(Fact::new(right, vec![file1.clone(), read.clone()]));
        facts.insert(Fact::new(right, vec![file2, read.clone()]));
        facts.insert(Fact::new(right, vec![file1.clone(), write]));

        let r1 = Rule::new(
            Predicate::new(check, vec![file1.clone()]),
            vec![Predicate::new(resource, vec![file1])],
            vec![],
        );
        assert!(!r1.find_match(&facts, &syms));

        let x = var(&mut syms, "x");
        let r2 = Rule::new(
            Predicate::new(check, vec![x.clone()]),
            vec![
                Predicate::new(resource, vec![x.clone()]),
                Predicate::new(operation, vec![read.clone()]),
                Predicate::new(right, vec![x, read]),
            ],
            vec![],
        );
        assert_eq!(0, r2.apply(&facts, &syms).count());
    }

    #[test]
    fn repeated_variable_must_agree() {
        let mut syms = SymbolTable::new();
        let mut facts = HashSet::new();
        let edge = syms.insert("edge");
        let lp = syms.insert("loop");
        facts.insert(Fact::new(edge, vec![Term::Integer(1), Term::Integer(1)]));
        facts.insert(Fact::new(edge, vec![Term::Integer(1), Term::Integer(2)]));

        let x = var(&mut syms, "x");
        let rule = Rule::new(
            Predicate::new(lp, vec![x.clone()]),
            vec![Predicate::new(edge, vec![x.clone(), x])],
            vec![],
        );
        let res: Vec<Fact> = rule.apply(&facts, &syms).collect();
        assert_eq!(vec![Fact::new(lp, vec![Term::Integer(1)])], res);
    }

    #[test]
    fn empty_body_yields_one_binding() {
        let syms = SymbolTable::new();
        let facts = HashSet::new();
        let always = Rule::new(
            Predicate::new(0, vec![]),
            vec![],
            vec![Expression::new(vec![Op::Value(Term::Bool(true))])],
        );
        assert_eq!(1, always.apply(&facts, &syms).count());

        let never = Rule::new(
            Predicate::new(0, vec![]),
            vec![],
            vec![Expression::new(vec![Op::Value(Term::Bool(false))])],
        );
        assert!(!never.find_match(&facts, &syms));
    }

    #[test]
    fn unbound_head_variable_is_skipped() {
        let mut syms = SymbolTable::new();
        let mut facts = HashSet::new();
        let p = syms.insert("p");
        let q = syms.insert("q");
        facts.insert(Fact::new(p, vec![Term::Integer(1)]));

        let x = var(&mut syms, "x");
        let y = var(&mut syms, "y");
        let rule = Rule::new(
            Predicate::new(q, vec![y]),
            vec![Predicate::new(p, vec![x])],
            vec![],
        );
        assert_eq!(0, rule.apply(&facts, &syms).count());
        // the body still matches
        assert!(rule.find_match(&facts, &syms));
    }

    #[test]
    fn facts_with_variables_never_match() {
        let fact = Predicate::new(0, vec![Term::Variable(1)]);
        let rule = Predicate::new(0, vec![Term::Variable(2)]);
        assert!(!match_preds(&rule, &fact));
        assert!(match_preds(&rule, &Predicate::new(0, vec![Term::Integer(1)])));
        assert!(!match_preds(&rule, &Predicate::new(1, vec![Term::Integer(1)])));
        assert!(!match_preds(&rule, &Predicate::new(0, vec![])));
    }
}
