//! Authorization decisions over a token and verifier-provided data.
//!
//! A verifier is usually prepared once with the facts, rules, checks and
//! policies of the service, then cloned for each request so the token can
//! be added to the clone.

use std::collections::BTreeSet;
use std::time::{Instant, SystemTime};

use tracing::{debug, info};

use crate::ast::{Check, Fact, Policy, PolicyKind, Predicate, Rule, Term};
use crate::builder;
use crate::engine::{RunLimits, World};
use crate::error::{self, FailedCheck, FormatError, LogicError, RunLimitError};
use crate::expression::{Expression, Op};
use crate::format::{self, VerifierPolicies};
use crate::parser::Statement;
use crate::symbols::{default_symbol_table, SymbolIndex, SymbolTable};
use crate::token::{Biscuit, Block};

/// Token content, with indices already translated into the verifier's
/// symbol table.
#[derive(Clone, Debug)]
struct LoadedToken {
    authority: Block,
    blocks: Vec<Block>,
    revocation_ids: Vec<Vec<u8>>,
}

#[derive(Clone, Debug)]
pub struct Verifier {
    world: World,
    symbols: SymbolTable,
    rules: Vec<Rule>,
    checks: Vec<Check>,
    policies: Vec<Policy>,
    token: Option<LoadedToken>,
}

impl Default for Verifier {
    fn default() -> Self {
        Verifier::new()
    }
}

impl Verifier {
    /// Creates an empty verifier over the default symbols.
    ///
    /// Useful without a token (unauthenticated requests) or when a lot of
    /// data is loaded once and the verifier is cloned per token.
    pub fn new() -> Verifier {
        Verifier {
            world: World::new(),
            symbols: default_symbol_table(),
            rules: vec![],
            checks: vec![],
            policies: vec![],
            token: None,
        }
    }

    /// Loads a token. A verifier holds at most one.
    pub fn add_token(&mut self, token: &Biscuit) -> error::Result<()> {
        if self.token.is_some() {
            return Err(LogicError::VerifierNotEmpty.into());
        }

        let mut translator = Translator {
            from: token.symbols(),
            to: &mut self.symbols,
        };
        let authority = translator.block(token.authority())?;
        let blocks = token
            .blocks()
            .iter()
            .map(|b| translator.block(b))
            .collect::<error::Result<Vec<_>>>()?;

        self.token = Some(LoadedToken {
            authority,
            blocks,
            revocation_ids: token.revocation_identifiers(),
        });
        Ok(())
    }

    pub fn add_fact(&mut self, fact: builder::Fact) -> error::Result<()> {
        let fact = fact.convert(&mut self.symbols);
        if !fact.predicate.is_ground() {
            return Err(error::TermError::VariableInFact.into());
        }
        self.world.add_fact(fact);
        Ok(())
    }

    pub fn add_rule(&mut self, rule: builder::Rule) {
        let rule = rule.convert(&mut self.symbols);
        self.rules.push(rule);
    }

    pub fn add_check(&mut self, check: builder::Check) {
        let check = check.convert(&mut self.symbols);
        self.checks.push(check);
    }

    pub fn add_policy(&mut self, policy: builder::Policy) {
        let policy = policy.convert(&mut self.symbols);
        self.policies.push(policy);
    }

    /// Adds a parsed statement. Queries are not stored: run them with
    /// [`Verifier::query`].
    pub fn push(&mut self, statement: Statement) -> error::Result<()> {
        match statement {
            Statement::Fact(f) => self.add_fact(f)?,
            Statement::Rule(r) => self.add_rule(r),
            Statement::Check(c) => self.add_check(c),
            Statement::Policy(p) => self.add_policy(p),
            Statement::Query(_) => {
                return Err(error::Token::Parse(
                    "queries are not stored in the verifier".to_owned(),
                ))
            }
        }
        Ok(())
    }

    /// `resource(#ambient, <resource>)`
    pub fn add_resource(&mut self, resource: &str) {
        self.add_ambient_fact("resource", builder::string(resource));
    }

    /// `operation(#ambient, <operation>)`
    pub fn add_operation(&mut self, operation: &str) {
        self.add_ambient_fact("operation", builder::s(operation));
    }

    /// `current_time(#ambient, <now>)`
    pub fn set_time(&mut self) {
        self.add_ambient_fact("current_time", builder::date(&SystemTime::now()));
    }

    fn add_ambient_fact(&mut self, name: &str, term: builder::Term) {
        let fact = builder::fact(name, &[builder::s("ambient"), term]);
        let fact = fact.convert(&mut self.symbols);
        self.world.add_fact(fact);
    }

    /// Runs the verifier's rules, then returns the facts derived by `rule`.
    pub fn query(&mut self, rule: builder::Rule, limits: &RunLimits) -> error::Result<Vec<Fact>> {
        let rule = rule.convert(&mut self.symbols);
        for r in &self.rules {
            self.world.add_rule(r.clone());
        }
        let res = self.world.run(&self.symbols, limits);
        self.world.clear_rules();
        res?;

        Ok(self.world.query_rule(&rule, &self.symbols))
    }

    /// Evaluates checks and policies.
    ///
    /// Returns the index of the matching allow policy, or every failed
    /// check. Facts derived during the run stay in the verifier.
    pub fn verify(&mut self, limits: &RunLimits) -> error::Result<usize> {
        let deadline = Instant::now() + limits.max_time;

        let (authority_tag, ambient_tag) =
            match (self.symbols.get("authority"), self.symbols.get("ambient")) {
                (Some(authority), Some(ambient)) => (authority, ambient),
                _ => return Err(error::Token::MissingSymbols),
            };

        let token = self.token.clone();
        let mut errors = vec![];

        if let Some(token) = &token {
            if let Some(rule) = token.authority.rules.iter().find(|r| !r.is_range_restricted()) {
                return Err(LogicError::InvalidBlockRule(0, self.symbols.print_rule(rule)).into());
            }

            for fact in &token.authority.facts {
                self.world.add_fact(fact.clone());
            }

            let revocation_id = self.symbols.insert("revocation_id");
            for (i, id) in token.revocation_ids.iter().enumerate() {
                let index = i64::try_from(i).unwrap_or(i64::MAX);
                self.world.add_fact(Fact::new(
                    revocation_id,
                    vec![Term::Integer(index), Term::Bytes(id.clone())],
                ));
            }
        }

        let mut rules = token
            .as_ref()
            .map(|t| t.authority.rules.clone())
            .unwrap_or_default();
        rules.extend(self.rules.iter().cloned());
        self.world = self.derive(&rules, limits, deadline)?;
        debug!(facts = self.world.facts().len(), "authority and verifier rules applied");

        for (i, check) in self.checks.iter().enumerate() {
            if !self.any_match(&check.queries, deadline)? {
                errors.push(FailedCheck::Verifier {
                    check_id: i as u32,
                    rule: self.symbols.print_check(check),
                });
            }
        }

        if let Some(token) = &token {
            for (j, check) in token.authority.checks.iter().enumerate() {
                if !self.any_match(&check.queries, deadline)? {
                    errors.push(FailedCheck::Block {
                        block_id: 0,
                        check_id: j as u32,
                        rule: self.symbols.print_check(check),
                    });
                }
            }
        }

        let mut decision = None;
        for (i, policy) in self.policies.iter().enumerate() {
            if self.any_match(&policy.queries, deadline)? {
                decision = Some((i, policy.kind));
                break;
            }
        }
        debug!(?decision, "policies evaluated");

        if let Some(token) = &token {
            let is_tagged = |p: &Predicate| {
                matches!(p.terms.first(), Some(Term::Str(s)) if *s == authority_tag || *s == ambient_tag)
            };

            for (i, block) in token.blocks.iter().enumerate() {
                let block_id = (i + 1) as u32;

                if let Some(fact) = block.facts.iter().find(|f| is_tagged(&f.predicate)) {
                    return Err(
                        LogicError::InvalidBlockFact(block_id, self.symbols.print_fact(fact)).into(),
                    );
                }
                if let Some(rule) = block
                    .rules
                    .iter()
                    .find(|r| is_tagged(&r.head) || !r.is_range_restricted())
                {
                    return Err(
                        LogicError::InvalidBlockRule(block_id, self.symbols.print_rule(rule)).into(),
                    );
                }

                for fact in &block.facts {
                    self.world.add_fact(fact.clone());
                }
                let world = self.derive(&block.rules, limits, deadline)?;

                // a head starting with a variable can still bind it to a tag
                for rule in &block.rules {
                    if !matches!(rule.head.terms.first(), Some(Term::Variable(_))) {
                        continue;
                    }
                    if world
                        .query_rule(rule, &self.symbols)
                        .iter()
                        .any(|f| is_tagged(&f.predicate))
                    {
                        return Err(
                            LogicError::InvalidBlockRule(block_id, self.symbols.print_rule(rule))
                                .into(),
                        );
                    }
                }
                self.world = world;
                debug!(block_id, facts = self.world.facts().len(), "block rules applied");

                for (j, check) in block.checks.iter().enumerate() {
                    if !self.any_match(&check.queries, deadline)? {
                        errors.push(FailedCheck::Block {
                            block_id,
                            check_id: j as u32,
                            rule: self.symbols.print_check(check),
                        });
                    }
                }
            }
        }

        if !errors.is_empty() {
            info!(failed = errors.len(), "verification failed");
            return Err(LogicError::FailedChecks(errors).into());
        }

        match decision {
            Some((i, PolicyKind::Allow)) => {
                info!(policy = i, "allowed");
                Ok(i)
            }
            Some((i, PolicyKind::Deny)) => {
                info!(policy = i, "denied");
                Err(LogicError::Deny(i).into())
            }
            None => {
                info!("no matching policy");
                Err(LogicError::NoMatchingPolicy.into())
            }
        }
    }

    // runs on a copy, the world is only replaced when the run succeeds
    fn derive(
        &self,
        rules: &[Rule],
        limits: &RunLimits,
        deadline: Instant,
    ) -> Result<World, RunLimitError> {
        let mut world = self.world.clone();
        for rule in rules {
            world.add_rule(rule.clone());
        }
        world.run_until(&self.symbols, limits, deadline)?;
        world.clear_rules();
        Ok(world)
    }

    // the deadline is checked after every query
    fn any_match(&self, queries: &[Rule], deadline: Instant) -> Result<bool, RunLimitError> {
        for query in queries {
            let found = self.world.query_match(query, &self.symbols);
            if Instant::now() >= deadline {
                return Err(RunLimitError::Timeout);
            }
            if found {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Serializes the verifier's facts, rules, checks and policies.
    ///
    /// The checks of a loaded token are saved after the verifier's own and
    /// come back as verifier checks. Token rules and blocks are not saved.
    pub fn save(&self) -> error::Result<Vec<u8>> {
        let mut checks = self.checks.clone();
        if let Some(token) = &self.token {
            checks.extend(token.authority.checks.iter().cloned());
            for block in &token.blocks {
                checks.extend(block.checks.iter().cloned());
            }
        }

        let policies = VerifierPolicies {
            symbols: self.symbols.clone(),
            facts: self.world.facts().iter().cloned().collect(),
            rules: self.rules.clone(),
            checks,
            policies: self.policies.clone(),
        };
        Ok(format::serialize_verifier(&policies)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> error::Result<Verifier> {
        let VerifierPolicies {
            symbols,
            facts,
            rules,
            checks,
            policies,
        } = format::deserialize_verifier(bytes)?;

        Ok(Verifier {
            world: World::from_parts(facts.into_iter().collect(), vec![]),
            symbols,
            rules,
            checks,
            policies,
            token: None,
        })
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Facts, rules, checks and policies, one per line.
    pub fn print_world(&self) -> String {
        let facts: BTreeSet<String> = self
            .world
            .facts()
            .iter()
            .map(|f| self.symbols.print_fact(f))
            .collect();

        let mut out = String::from("facts:\n");
        for f in facts {
            out.push_str(&format!("\t{}\n", f));
        }
        out.push_str("rules:\n");
        for r in &self.rules {
            out.push_str(&format!("\t{}\n", self.symbols.print_rule(r)));
        }
        out.push_str("checks:\n");
        for c in &self.checks {
            out.push_str(&format!("\t{}\n", self.symbols.print_check(c)));
        }
        if let Some(token) = &self.token {
            let blocks = std::iter::once(&token.authority).chain(token.blocks.iter());
            for (i, block) in blocks.enumerate() {
                for c in &block.checks {
                    out.push_str(&format!("\t[block {}] {}\n", i, self.symbols.print_check(c)));
                }
            }
        }
        out.push_str("policies:\n");
        for p in &self.policies {
            out.push_str(&format!("\t{}\n", self.symbols.print_policy(p)));
        }
        out
    }
}

/// Re-interns the strings behind a token's symbol indices into another
/// table.
struct Translator<'a> {
    from: &'a SymbolTable,
    to: &'a mut SymbolTable,
}

impl Translator<'_> {
    fn symbol(&mut self, i: SymbolIndex) -> error::Result<SymbolIndex> {
        let s = self
            .from
            .resolve(i)
            .ok_or_else(|| FormatError::BlockDeserialization(format!("unknown symbol {}", i)))?;
        Ok(self.to.insert(s))
    }

    fn term(&mut self, term: &Term) -> error::Result<Term> {
        Ok(match term {
            Term::Variable(v) => Term::Variable(self.symbol(u64::from(*v))? as u32),
            Term::Str(s) => Term::Str(self.symbol(*s)?),
            Term::Set(items) => Term::Set(
                items
                    .iter()
                    .map(|t| self.term(t))
                    .collect::<error::Result<_>>()?,
            ),
            other => other.clone(),
        })
    }

    fn predicate(&mut self, p: &Predicate) -> error::Result<Predicate> {
        let name = self.symbol(p.name)?;
        let terms = p
            .terms
            .iter()
            .map(|t| self.term(t))
            .collect::<error::Result<_>>()?;
        Ok(Predicate::new(name, terms))
    }

    fn rule(&mut self, r: &Rule) -> error::Result<Rule> {
        let head = self.predicate(&r.head)?;
        let body = r
            .body
            .iter()
            .map(|p| self.predicate(p))
            .collect::<error::Result<_>>()?;
        let expressions = r
            .expressions
            .iter()
            .map(|e| {
                let ops = e
                    .ops
                    .iter()
                    .map(|op| match op {
                        Op::Value(t) => self.term(t).map(Op::Value),
                        other => Ok(other.clone()),
                    })
                    .collect::<error::Result<_>>()?;
                Ok(Expression::new(ops))
            })
            .collect::<error::Result<_>>()?;
        Ok(Rule::new(head, body, expressions))
    }

    fn block(&mut self, block: &Block) -> error::Result<Block> {
        let facts = block
            .facts
            .iter()
            .map(|f| {
                self.predicate(&f.predicate)
                    .map(|predicate| Fact { predicate })
            })
            .collect::<error::Result<_>>()?;
        let rules = block
            .rules
            .iter()
            .map(|r| self.rule(r))
            .collect::<error::Result<_>>()?;
        let checks = block
            .checks
            .iter()
            .map(|c| {
                c.queries
                    .iter()
                    .map(|q| self.rule(q))
                    .collect::<error::Result<_>>()
                    .map(|queries| Check { queries })
            })
            .collect::<error::Result<_>>()?;

        Ok(Block {
            symbols: SymbolTable::new(),
            facts,
            rules,
            checks,
            context: block.context.clone(),
            version: block.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BlockBuilder;
    use crate::crypto::KeyPair;
    use crate::parser::parse_statement;
    use std::time::Duration;

    fn limits() -> RunLimits {
        RunLimits::new(1000, 100, Duration::from_secs(1))
    }

    fn block(symbols: &SymbolTable, code: &[&str]) -> Block {
        let mut builder = BlockBuilder::new();
        for line in code {
            match parse_statement(line).unwrap() {
                Statement::Fact(f) => builder.add_fact(f),
                Statement::Rule(r) => builder.add_rule(r),
                Statement::Check(c) => builder.add_check(c),
                other => panic!("not a block statement: {:?}", other),
            }
        }
        builder.build(symbols)
    }

    fn token(authority: &[&str], blocks: &[&[&str]]) -> Biscuit {
        let root = KeyPair::new();
        let base = default_symbol_table();
        let mut token = Biscuit::new(None, &root, &base, block(&base, authority)).unwrap();
        for code in blocks {
            let b = block(token.symbols(), code);
            token = token.append(&KeyPair::new(), b).unwrap();
        }
        token
    }

    fn verifier(code: &[&str]) -> Verifier {
        let mut v = Verifier::new();
        for line in code {
            v.push(parse_statement(line).unwrap()).unwrap();
        }
        v
    }

    #[test]
    fn allow_with_token() {
        let token = token(
            &[
                "right(#authority, \"file1\", #read)",
                "right(#authority, \"file2\", #read)",
            ],
            &[&["check if resource(#ambient, $f), operation(#ambient, #read), right(#authority, $f, #read)"]],
        );

        let mut v = verifier(&["allow if resource(#ambient, \"file1\")"]);
        v.add_token(&token).unwrap();
        v.add_resource("file1");
        v.add_operation("read");
        assert_eq!(Ok(0), v.verify(&limits()));
    }

    #[test]
    fn failed_checks_are_collected() {
        let token = token(
            &["right(#authority, \"file1\", #read)"],
            &[&["check if resource(#ambient, \"file1\")"], &["check if operation(#ambient, #read)"]],
        );

        let mut v = verifier(&["check if admin(#ambient)", "allow if true"]);
        v.add_token(&token).unwrap();
        v.add_resource("file2");
        v.add_operation("write");

        match v.verify(&limits()) {
            Err(error::Token::FailedLogic(LogicError::FailedChecks(failed))) => assert_eq!(
                vec![
                    FailedCheck::Verifier {
                        check_id: 0,
                        rule: "check if admin(\"ambient\")".to_owned(),
                    },
                    FailedCheck::Block {
                        block_id: 1,
                        check_id: 0,
                        rule: "check if resource(\"ambient\", \"file1\")".to_owned(),
                    },
                    FailedCheck::Block {
                        block_id: 2,
                        check_id: 0,
                        rule: "check if operation(\"ambient\", \"read\")".to_owned(),
                    },
                ],
                failed
            ),
            other => panic!("expected failed checks, got {:?}", other),
        }
    }

    #[test]
    fn check_passes_when_any_query_matches() {
        let token = token(
            &["admin(#authority)"],
            &[&["check if resource(#ambient, \"file1\") or admin(#authority)"]],
        );
        let mut v = verifier(&["allow if true"]);
        v.add_token(&token).unwrap();
        v.add_resource("file2");
        assert_eq!(Ok(0), v.verify(&limits()));
    }

    #[test]
    fn first_matching_policy_wins() {
        let mut v = verifier(&[
            "blocked(\"alice\")",
            "deny if blocked($u)",
            "allow if true",
        ]);
        assert_eq!(
            Err(error::Token::FailedLogic(LogicError::Deny(0))),
            v.verify(&limits())
        );

        let mut v = verifier(&["allow if true", "deny if true"]);
        assert_eq!(Ok(0), v.verify(&limits()));

        let mut v = verifier(&["allow if admin(#ambient)"]);
        assert_eq!(
            Err(error::Token::FailedLogic(LogicError::NoMatchingPolicy)),
            v.verify(&limits())
        );
    }

    #[test]
    fn verifier_rules_and_authority_rules() {
        let token = token(
            &[
                "owner(#authority, \"alice\", \"file1\")",
                "right(#authority, $f, #read) <- owner(#authority, $u, $f)",
            ],
            &[],
        );
        let mut v = verifier(&[
            "user(\"alice\")",
            "can_read($f) <- right(#authority, $f, #read), resource(#ambient, $f)",
            "allow if can_read(\"file1\")",
        ]);
        v.add_token(&token).unwrap();
        v.add_resource("file1");
        assert_eq!(Ok(0), v.verify(&limits()));
    }

    #[test]
    fn block_cannot_forge_authority_facts() {
        let token = token(&[], &[&["right(#authority, \"file1\", #write)"]]);
        let mut v = verifier(&["allow if true"]);
        v.add_token(&token).unwrap();
        assert_eq!(
            Err(error::Token::FailedLogic(LogicError::InvalidBlockFact(
                1,
                "right(\"authority\", \"file1\", \"write\")".to_owned()
            ))),
            v.verify(&limits())
        );

        let token = self::token(&[], &[&["operation(#ambient, #write) <- resource(#ambient, $f)"]]);
        let mut v = verifier(&["allow if true"]);
        v.add_token(&token).unwrap();
        assert!(matches!(
            v.verify(&limits()),
            Err(error::Token::FailedLogic(LogicError::InvalidBlockRule(1, _)))
        ));
    }

    #[test]
    fn block_rules_must_bind_head_variables() {
        let token = token(&[], &[&["grant($x, $y) <- request($x)"]]);
        let mut v = verifier(&["allow if true"]);
        v.add_token(&token).unwrap();
        assert!(matches!(
            v.verify(&limits()),
            Err(error::Token::FailedLogic(LogicError::InvalidBlockRule(1, _)))
        ));
    }

    #[test]
    fn authority_rules_must_bind_head_variables() {
        let token = token(&["grant($x, $y) <- request($x)"], &[]);
        let mut v = verifier(&["allow if true"]);
        v.add_token(&token).unwrap();
        assert!(matches!(
            v.verify(&limits()),
            Err(error::Token::FailedLogic(LogicError::InvalidBlockRule(0, _)))
        ));
    }

    #[test]
    fn block_rule_cannot_bind_a_tag_through_a_variable() {
        let token = token(
            &["right(#authority, \"file1\", #read)"],
            &[
                &["right($a, \"file1\", #write) <- right($a, \"file1\", #read)"],
                &["check if right(#authority, \"file1\", #write)"],
            ],
        );
        let mut v = verifier(&["allow if true"]);
        v.add_token(&token).unwrap();
        assert!(matches!(
            v.verify(&limits()),
            Err(error::Token::FailedLogic(LogicError::InvalidBlockRule(1, _)))
        ));

        let right = v.symbols().get("right").unwrap();
        let write = v.symbols().get("write").unwrap();
        let forged = v.world().query(&Predicate::new(
            right,
            vec![Term::Variable(0), Term::Variable(1), Term::Str(write)],
        ));
        assert!(forged.is_empty());

        // variables in the head are fine as long as they bind no tag
        let token = self::token(
            &["right(#authority, \"file1\", #read)"],
            &[&[
                "readable($f) <- right(#authority, $f, #read)",
                "check if readable(\"file1\")",
            ]],
        );
        let mut v = verifier(&["allow if true"]);
        v.add_token(&token).unwrap();
        assert_eq!(Ok(0), v.verify(&limits()));
    }

    #[test]
    fn failed_runs_leave_no_rules_behind() {
        let token = token(&["a(1)", "b($x) <- a($x)", "c($x) <- b($x)"], &[]);
        let mut v = verifier(&["allow if true"]);
        v.add_token(&token).unwrap();
        assert_eq!(
            Err(error::Token::RunLimit(RunLimitError::TooManyFacts)),
            v.verify(&RunLimits::new(2, 100, Duration::from_secs(1)))
        );
        assert!(v.world().rules().is_empty());

        // the authority rules are not replayed by a later query
        let rule = builder::Rule::try_from("q($x) <- b($x)").unwrap();
        assert!(v.query(rule, &limits()).unwrap().is_empty());

        let token = self::token(&["a(1)"], &[&["ok($x) <- a($x)", "grant($x, $y) <- a($x)"]]);
        let mut v = verifier(&["allow if true"]);
        v.add_token(&token).unwrap();
        assert!(matches!(
            v.verify(&limits()),
            Err(error::Token::FailedLogic(LogicError::InvalidBlockRule(1, _)))
        ));
        assert!(v.world().rules().is_empty());
        let ok = v.symbols().get("ok").unwrap();
        assert!(v.world().query(&Predicate::new(ok, vec![Term::Variable(0)])).is_empty());
    }

    #[test]
    fn block_rules_are_bounded_by_run_limits() {
        let token = token(
            &["n(1)", "n(2)", "n(3)"],
            &[&["pair($x, $y) <- n($x), n($y)"]],
        );
        let mut v = verifier(&["allow if true"]);
        v.add_token(&token).unwrap();
        assert_eq!(
            Err(error::Token::RunLimit(RunLimitError::TooManyFacts)),
            v.verify(&RunLimits::new(8, 100, Duration::from_secs(1)))
        );

        let token = self::token(
            &["edge(1, 2)", "edge(2, 3)", "edge(3, 4)", "edge(4, 5)"],
            &[&[
                "path($x, $y) <- edge($x, $y)",
                "path($x, $z) <- path($x, $y), edge($y, $z)",
            ]],
        );
        let mut v = verifier(&["allow if true"]);
        v.add_token(&token).unwrap();
        assert_eq!(
            Err(error::Token::RunLimit(RunLimitError::TooManyIterations)),
            v.verify(&RunLimits::new(1000, 2, Duration::from_secs(1)))
        );
    }

    #[test]
    fn revocation_ids_are_facts() {
        let token = token(&[], &[&[]]);
        let ids = token.revocation_identifiers();
        assert_eq!(2, ids.len());

        let mut v = verifier(&["allow if true"]);
        v.add_token(&token).unwrap();
        v.verify(&limits()).unwrap();

        let revocation_id = v.symbols().get("revocation_id").unwrap();
        let found = v.world().query(&Predicate::new(
            revocation_id,
            vec![Term::Integer(1), Term::Variable(0)],
        ));
        assert_eq!(1, found.len());
        assert_eq!(Term::Bytes(ids[1].clone()), found[0].predicate.terms[1]);
    }

    #[test]
    fn only_one_token() {
        let token = token(&[], &[]);
        let mut v = Verifier::new();
        v.add_token(&token).unwrap();
        assert_eq!(
            Err(error::Token::FailedLogic(LogicError::VerifierNotEmpty)),
            v.add_token(&token)
        );
    }

    #[test]
    fn clones_do_not_share_state() {
        let base = verifier(&["allow if resource(#ambient, \"file1\")"]);

        let mut first = base.clone();
        first.add_token(&token(&[], &[])).unwrap();
        first.add_resource("file1");
        assert_eq!(Ok(0), first.verify(&limits()));

        let mut second = base.clone();
        second.add_token(&token(&[], &[])).unwrap();
        assert_eq!(
            Err(error::Token::FailedLogic(LogicError::NoMatchingPolicy)),
            second.verify(&limits())
        );
    }

    #[test]
    fn token_symbols_are_translated() {
        // the verifier interns "file9" before the token is loaded, so the
        // token's index for it differs from the verifier's
        let mut v = verifier(&["other(\"file9\")", "allow if right(#authority, \"file9\")"]);
        let token = token(&["right(#authority, \"file9\")"], &[]);
        v.add_token(&token).unwrap();
        assert_eq!(Ok(0), v.verify(&limits()));
    }

    #[test]
    fn missing_symbols() {
        let mut symbols = SymbolTable::new();
        symbols.insert("resource");
        let bytes = format::serialize_verifier(&VerifierPolicies {
            symbols,
            facts: vec![],
            rules: vec![],
            checks: vec![],
            policies: vec![],
        })
        .unwrap();
        let mut v = Verifier::from_bytes(&bytes).unwrap();
        assert_eq!(Err(error::Token::MissingSymbols), v.verify(&limits()));
    }

    #[test]
    fn saved_verifier_keeps_policies() {
        let mut v = verifier(&[
            "user(\"alice\")",
            "admin($u) <- user($u), $u == \"alice\"",
            "check if admin(\"alice\")",
            "allow if true",
        ]);
        let bytes = v.save().unwrap();
        let mut restored = Verifier::from_bytes(&bytes).unwrap();
        assert_eq!(v.print_world(), restored.print_world());
        assert_eq!(Ok(0), restored.verify(&limits()));
        assert_eq!(Ok(0), v.verify(&limits()));
    }

    #[test]
    fn saved_verifier_keeps_token_checks() {
        let token = token(&[], &[&["check if resource(#ambient, \"file1\")"]]);
        let mut v = verifier(&["allow if true"]);
        v.add_token(&token).unwrap();
        let bytes = v.save().unwrap();

        let mut restored = Verifier::from_bytes(&bytes).unwrap();
        match restored.verify(&limits()) {
            Err(error::Token::FailedLogic(LogicError::FailedChecks(failed))) => assert_eq!(
                vec![FailedCheck::Verifier {
                    check_id: 0,
                    rule: "check if resource(\"ambient\", \"file1\")".to_owned(),
                }],
                failed
            ),
            other => panic!("unexpected result: {:?}", other),
        }

        let mut restored = Verifier::from_bytes(&bytes).unwrap();
        restored.add_resource("file1");
        assert_eq!(Ok(0), restored.verify(&limits()));
    }

    #[test]
    fn query_derives_facts() {
        let mut v = verifier(&[
            "parent(\"A\", \"B\")",
            "parent(\"B\", \"C\")",
            "grandparent($a, $c) <- parent($a, $b), parent($b, $c)",
        ]);
        let rule = builder::Rule::try_from("q($a) <- grandparent($a, \"C\")").unwrap();
        let facts = v.query(rule, &limits()).unwrap();
        let printed: Vec<String> = facts.iter().map(|f| v.symbols().print_fact(f)).collect();
        assert_eq!(vec!["q(\"A\")".to_owned()], printed);
    }

    #[test]
    fn expired_token() {
        let mut authority = BlockBuilder::new();
        authority.expiration_date(SystemTime::UNIX_EPOCH + Duration::from_secs(60));
        let base = default_symbol_table();
        let token = Biscuit::new(None, &KeyPair::new(), &base, authority.build(&base)).unwrap();

        let mut v = verifier(&["allow if true"]);
        v.add_token(&token).unwrap();
        v.set_time();
        assert!(matches!(
            v.verify(&limits()),
            Err(error::Token::FailedLogic(LogicError::FailedChecks(_)))
        ));
    }

    #[test]
    fn timeout() {
        let mut v = verifier(&["allow if true"]);
        let limits = RunLimits::new(1000, 100, Duration::ZERO);
        assert_eq!(
            Err(error::Token::RunLimit(RunLimitError::Timeout)),
            v.verify(&limits)
        );
    }

    #[test]
    fn parsed_queries_are_not_stored() {
        let mut v = Verifier::new();
        let q = parse_statement("?- a($x)").unwrap();
        assert!(matches!(v.push(q), Err(error::Token::Parse(_))));
    }
}
