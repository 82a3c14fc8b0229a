use std::time::Duration;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use datalog::crypto::PublicKey;
use datalog::error::{self, Token};
use datalog::parser::{parse_statement, Statement};
use datalog::{Biscuit, RunLimits, Verifier};

const HELP: &str = "\
statements:
  fact(\"a\", 1)                      add a fact
  head($x) <- body($x), $x > 1       add a rule
  check if body($x) or other($x)     add a check
  allow if ... / deny if ...         add a policy
  ?- body($x, $y)                    run the rules and list the matches
commands:
  :verify                            verify a copy of the current state
  :token <base64> <hex root key>     load a token
  :world                             print facts, rules, checks and policies
  :limits [facts iterations millis]  show or set the run limits
  :now                               add current_time(#ambient, <now>)
  :reset                             start over
  :quit";

struct Session {
    verifier: Verifier,
    limits: RunLimits,
}

impl Session {
    fn new() -> Session {
        Session {
            verifier: Verifier::new(),
            limits: RunLimits::default(),
        }
    }

    fn eval(&mut self, line: &str) -> error::Result<String> {
        let line = line.trim();
        let mut words = line.split_whitespace();

        match words.next() {
            None => Ok(String::new()),
            Some(":help") => Ok(HELP.to_owned()),
            Some(":world") => Ok(self.verifier.print_world()),
            Some(":now") => {
                self.verifier.set_time();
                Ok("ok".to_owned())
            }
            Some(":reset") => {
                *self = Session::new();
                Ok("ok".to_owned())
            }
            Some(":verify") => {
                // verifying adds facts, so it runs on a copy
                let mut verifier = self.verifier.clone();
                let policy = verifier.verify(&self.limits)?;
                Ok(format!("allowed by policy {}", policy))
            }
            Some(":limits") => {
                let args: Vec<&str> = words.collect();
                if !args.is_empty() {
                    self.limits = parse_limits(&args)?;
                }
                Ok(format!(
                    "max facts: {}, max iterations: {}, max time: {:?}",
                    self.limits.max_facts, self.limits.max_iterations, self.limits.max_time
                ))
            }
            Some(":token") => {
                let (data, key) = match (words.next(), words.next()) {
                    (Some(data), Some(key)) => (data, key),
                    _ => return Err(Token::Parse("usage: :token <base64> <hex root key>".to_owned())),
                };
                let key = hex::decode(key).map_err(|e| Token::Parse(e.to_string()))?;
                let root = PublicKey::from_bytes(&key)?;
                let token = Biscuit::from_base64(data, |_| Some(root))?;
                self.verifier.add_token(&token)?;
                Ok(token.to_string())
            }
            Some(other) if other.starts_with(':') => {
                Err(Token::Parse(format!("unknown command {}, try :help", other)))
            }
            Some(_) => match parse_statement(line)? {
                Statement::Query(rule) => {
                    let facts = self.verifier.query(rule, &self.limits)?;
                    let symbols = self.verifier.symbols();
                    let lines: Vec<String> = facts.iter().map(|f| symbols.print_fact(f)).collect();
                    if lines.is_empty() {
                        Ok("no results".to_owned())
                    } else {
                        Ok(lines.join("\n"))
                    }
                }
                statement => {
                    self.verifier.push(statement)?;
                    Ok("ok".to_owned())
                }
            },
        }
    }
}

fn parse_limits(args: &[&str]) -> error::Result<RunLimits> {
    let usage = || Token::Parse("usage: :limits <facts> <iterations> <millis>".to_owned());
    let numbers = args
        .iter()
        .map(|a| a.parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| usage())?;

    match numbers[..] {
        [facts, iterations, millis] => Ok(RunLimits::new(
            facts,
            iterations,
            Duration::from_millis(millis),
        )),
        _ => Err(usage()),
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            eprintln!("Error: {:?}", err);
            return;
        }
    };

    let mut session = Session::new();
    loop {
        let readline = rl.readline(">> ");
        match readline {
            Ok(line) => {
                if line.trim() == ":quit" {
                    break;
                }
                let _ = rl.add_history_entry(line.as_str());
                match session.eval(&line) {
                    Ok(out) if out.is_empty() => {}
                    Ok(out) => println!("{}", out),
                    Err(e) => println!("error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }
}

#[test]
fn test_session() {
    let mut s = Session::new();
    assert_eq!("ok", s.eval("parent(\"A\", \"B\")").unwrap());
    assert_eq!("ok", s.eval("parent(\"B\", \"C\")").unwrap());
    assert_eq!(
        "ok",
        s.eval("grandparent($a, $c) <- parent($a, $b), parent($b, $c)")
            .unwrap()
    );
    assert_eq!(
        "query(\"A\", \"C\")",
        s.eval("?- grandparent($x, $y)").unwrap()
    );
    assert_eq!("no results", s.eval("?- grandparent(\"B\", $y)").unwrap());
    assert_eq!("", s.eval("   ").unwrap());
}

#[test]
fn test_verify_runs_on_a_copy() {
    let mut s = Session::new();
    s.eval(":limits 1000 100 1000").unwrap();
    s.eval("allow if resource(#ambient, \"file1\")").unwrap();
    assert!(matches!(s.eval(":verify"), Err(Token::FailedLogic(_))));
    s.eval("resource(#ambient, \"file1\")").unwrap();
    assert_eq!("allowed by policy 0", s.eval(":verify").unwrap());
    assert!(s
        .eval(":world")
        .unwrap()
        .contains("resource(\"ambient\", \"file1\")"));
}

#[test]
fn test_limits_command() {
    let mut s = Session::new();
    assert!(s.eval(":limits 10 2").is_err());
    assert!(s.eval(":limits a b c").is_err());
    assert_eq!(
        "max facts: 10, max iterations: 2, max time: 3ms",
        s.eval(":limits 10 2 3").unwrap()
    );
    assert!(s.eval(":bogus").is_err());
}

#[test]
fn test_token_command() {
    use datalog::builder::BlockBuilder;
    use datalog::crypto::KeyPair;

    let root = KeyPair::new();
    let symbols = datalog::default_symbol_table();
    let mut authority = BlockBuilder::new();
    authority.add_fact(datalog::builder::Fact::try_from("right(#authority, \"file1\")").unwrap());
    let token = Biscuit::new(None, &root, &symbols, authority.build(&symbols)).unwrap();

    let mut s = Session::new();
    s.eval(":limits 1000 100 1000").unwrap();
    let line = format!(
        ":token {} {}",
        token.to_base64().unwrap(),
        hex::encode(root.public().to_bytes())
    );
    assert!(s.eval(&line).unwrap().contains("right(\"authority\", \"file1\")"));
    s.eval("allow if right(#authority, \"file1\")").unwrap();
    assert_eq!("allowed by policy 0", s.eval(":verify").unwrap());
}
