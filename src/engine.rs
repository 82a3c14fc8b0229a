/*
 * stores the datalog facts and derives new ones from the working rules
 */
use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::ast::{Fact, Predicate, Rule, Term};
use crate::error::RunLimitError;
use crate::symbols::SymbolTable;

/// Resource ceilings for a fixpoint run or a whole verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunLimits {
    /// maximum number of facts in the world (memory usage)
    pub max_facts: u64,
    /// maximum number of rule application rounds (prevents degenerate rules)
    pub max_iterations: u64,
    pub max_time: Duration,
}

impl RunLimits {
    pub fn new(max_facts: u64, max_iterations: u64, max_time: Duration) -> RunLimits {
        RunLimits {
            max_facts,
            max_iterations,
            max_time,
        }
    }
}

impl Default for RunLimits {
    fn default() -> Self {
        RunLimits {
            max_facts: 1000,
            max_iterations: 100,
            max_time: Duration::from_millis(5),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct World {
    facts: HashSet<Fact>,
    rules: Vec<Rule>,
}

impl World {
    pub fn new() -> World {
        World::default()
    }

    pub fn from_parts(facts: HashSet<Fact>, rules: Vec<Rule>) -> World {
        World { facts, rules }
    }

    pub fn add_fact(&mut self, fact: Fact) {
        self.facts.insert(fact);
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn clear_rules(&mut self) {
        self.rules.clear();
    }

    pub fn contains(&self, fact: &Fact) -> bool {
        self.facts.contains(fact)
    }

    pub fn facts(&self) -> &HashSet<Fact> {
        &self.facts
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Applies the working rules until no new fact appears.
    pub fn run(&mut self, symbols: &SymbolTable, limits: &RunLimits) -> Result<(), RunLimitError> {
        let deadline = Instant::now() + limits.max_time;
        self.run_until(symbols, limits, deadline)
    }

    /// Same as [`World::run`], but bounded by a deadline fixed by the caller.
    pub fn run_until(
        &mut self,
        symbols: &SymbolTable,
        limits: &RunLimits,
        deadline: Instant,
    ) -> Result<(), RunLimitError> {
        let mut iterations: u64 = 0;

        loop {
            let mut new_facts = HashSet::new();
            for rule in &self.rules {
                for fact in rule.apply(&self.facts, symbols) {
                    if self.facts.contains(&fact) || !new_facts.insert(fact) {
                        continue;
                    }
                    if (self.facts.len() + new_facts.len()) as u64 > limits.max_facts {
                        return Err(RunLimitError::TooManyFacts);
                    }
                }
                // checked between rules as well as between iterations
                if Instant::now() >= deadline {
                    return Err(RunLimitError::Timeout);
                }
            }

            if new_facts.is_empty() {
                debug!(iterations, facts = self.facts.len(), "fixpoint reached");
                return Ok(());
            }
            self.facts.extend(new_facts);

            iterations += 1;
            debug!(iterations, facts = self.facts.len(), "rules applied");

            if iterations >= limits.max_iterations {
                return Err(RunLimitError::TooManyIterations);
            }
            if Instant::now() >= deadline {
                return Err(RunLimitError::Timeout);
            }
        }
    }

    // facts matching the pattern: variables match any term, constants must be equal
    pub fn query(&self, pattern: &Predicate) -> Vec<&Fact> {
        self.facts
            .iter()
            .filter(|f| {
                f.predicate.name == pattern.name
                    && f.predicate.terms.len() == pattern.terms.len()
                    && f.predicate
                        .terms
                        .iter()
                        .zip(pattern.terms.iter())
                        .all(|(f, p)| matches!(p, Term::Variable(_)) || f == p)
            })
            .collect()
    }

    /// Facts derived by one application of `rule`; the world is unchanged.
    pub fn query_rule(&self, rule: &Rule, symbols: &SymbolTable) -> Vec<Fact> {
        rule.apply(&self.facts, symbols).collect()
    }

    pub fn query_match(&self, rule: &Rule, symbols: &SymbolTable) -> bool {
        rule.find_match(&self.facts, symbols)
    }
}
