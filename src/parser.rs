//! Text syntax.
//!
//! ```text
//! right(#authority, "file1", #read)
//! can_read($file) <- right(#authority, $file, #read)
//! check if resource(#ambient, $f), $f.starts_with("/tmp/") or admin(#authority)
//! allow if can_read($f), resource(#ambient, $f)
//! ?- can_read($file)
//! ```
//!
//! Identifiers and literals are recognized with anchored regexes, the
//! structure is assembled with `nom` combinators.

use std::sync::OnceLock;

use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, tag};
use nom::character::complete::{char, multispace0, none_of, one_of};
use nom::combinator::{map, opt, value};
use nom::error::{Error, ErrorKind};
use nom::multi::{separated_list0, separated_list1};
use nom::sequence::{delimited, preceded};
use nom::{Err, IResult};
use regex::Regex;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::ast::PolicyKind;
use crate::builder::{self, Check, Expression, Fact, Op, Policy, Predicate, Rule, Term};
use crate::error;
use crate::expression::{Binary, Unary};

/// Anything that can be typed at the prompt.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Fact(Fact),
    Rule(Rule),
    Check(Check),
    Policy(Policy),
    /// `?- body`, with every body variable in the head
    Query(Rule),
}

pub fn parse_statement(i: &str) -> error::Result<Statement> {
    complete(i, statement)
}

impl TryFrom<&str> for Fact {
    type Error = error::Token;

    fn try_from(i: &str) -> Result<Self, Self::Error> {
        complete(i, fact)
    }
}

impl TryFrom<&str> for Rule {
    type Error = error::Token;

    fn try_from(i: &str) -> Result<Self, Self::Error> {
        complete(i, rule)
    }
}

impl TryFrom<&str> for Check {
    type Error = error::Token;

    fn try_from(i: &str) -> Result<Self, Self::Error> {
        complete(i, check)
    }
}

impl TryFrom<&str> for Policy {
    type Error = error::Token;

    fn try_from(i: &str) -> Result<Self, Self::Error> {
        complete(i, policy)
    }
}

fn complete<'a, O, F>(i: &'a str, mut parser: F) -> error::Result<O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    let (rest, o) = parser(i)?;
    let (rest, _) = terminator(rest)?;
    if rest.is_empty() {
        Ok(o)
    } else {
        Err(error::Token::Parse(format!("unexpected input at \"{}\"", rest)))
    }
}

fn terminator(i: &str) -> IResult<&str, Option<char>> {
    delimited(multispace0, opt(one_of(";.")), multispace0)(i)
}

fn space(i: &str) -> IResult<&str, &str> {
    multispace0(i)
}

/// skips whitespace, then matches `t`
fn sym<'a>(t: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    preceded(multispace0, tag(t))
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("hard-coded regex"))
}

fn regex_find<'a>(re: &Regex, i: &'a str) -> IResult<&'a str, &'a str> {
    match re.find(i) {
        Some(m) if m.start() == 0 => Ok((&i[m.end()..], &i[..m.end()])),
        _ => Err(Err::Error(Error::new(i, ErrorKind::RegexpFind))),
    }
}

fn failure<O>(i: &str) -> IResult<&str, O> {
    Err(Err::Failure(Error::new(i, ErrorKind::Verify)))
}

fn name(i: &str) -> IResult<&str, &str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex_find(regex(&RE, r"^[a-zA-Z_][a-zA-Z0-9_:]*"), i)
}

fn variable(i: &str) -> IResult<&str, Term> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let (rest, _) = sym("$")(i)?;
    let (rest, n) = regex_find(regex(&RE, r"^[a-zA-Z0-9_]+"), rest)?;
    Ok((rest, Term::Variable(n.to_owned())))
}

fn symbol(i: &str) -> IResult<&str, Term> {
    let (rest, _) = sym("#")(i)?;
    let (rest, n) = name(rest)?;
    Ok((rest, Term::Str(n.to_owned())))
}

fn string_literal(i: &str) -> IResult<&str, String> {
    let escaped = escaped_transform(
        none_of("\\\""),
        '\\',
        alt((
            value("\\", tag("\\")),
            value("\"", tag("\"")),
            value("\n", tag("n")),
            value("\t", tag("t")),
        )),
    );
    delimited(
        char('"'),
        map(opt(escaped), Option::unwrap_or_default),
        char('"'),
    )(i)
}

fn date(i: &str) -> IResult<&str, Term> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let pattern = r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})";
    let (rest, text) = regex_find(regex(&RE, pattern), i)?;
    match OffsetDateTime::parse(text, &Rfc3339)
        .ok()
        .and_then(|d| u64::try_from(d.unix_timestamp()).ok())
    {
        Some(seconds) => Ok((rest, Term::Date(seconds))),
        None => failure(i),
    }
}

fn bytes(i: &str) -> IResult<&str, Term> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let (rest, _) = sym("hex:")(i)?;
    let (rest, digits) = regex_find(regex(&RE, r"^[0-9a-fA-F]*"), rest)?;
    match hex::decode(digits) {
        Ok(b) => Ok((rest, Term::Bytes(b))),
        Err(_) => failure(i),
    }
}

fn boolean(i: &str) -> IResult<&str, Term> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let (rest, b) = regex_find(regex(&RE, r"^(true|false)\b"), i)?;
    Ok((rest, Term::Bool(b == "true")))
}

fn integer(i: &str) -> IResult<&str, Term> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let (rest, digits) = regex_find(regex(&RE, r"^-?\d+"), i)?;
    match digits.parse::<i64>() {
        Ok(n) => Ok((rest, Term::Integer(n))),
        Err(_) => failure(i),
    }
}

fn scalar(i: &str) -> IResult<&str, Term> {
    alt((
        variable,
        symbol,
        map(string_literal, Term::Str),
        date,
        bytes,
        boolean,
        integer,
    ))(i)
}

fn set(i: &str) -> IResult<&str, Term> {
    let (rest, _) = sym("[")(i)?;
    let (rest, items) = separated_list0(sym(","), preceded(space, scalar))(rest)?;
    let (rest, _) = sym("]")(rest)?;
    match builder::set(items) {
        Ok(t) => Ok((rest, t)),
        Err(_) => failure(i),
    }
}

fn term(i: &str) -> IResult<&str, Term> {
    let (i, _) = space(i)?;
    alt((scalar, set))(i)
}

fn predicate(i: &str) -> IResult<&str, Predicate> {
    let (i, _) = space(i)?;
    let (i, n) = name(i)?;
    let (i, _) = sym("(")(i)?;
    let (i, terms) = separated_list0(sym(","), term)(i)?;
    let (i, _) = sym(")")(i)?;
    Ok((i, Predicate::new(n.to_owned(), terms)))
}

fn fact(i: &str) -> IResult<&str, Fact> {
    let (rest, p) = predicate(i)?;
    if p.terms.iter().any(|t| matches!(t, Term::Variable(_))) {
        return failure(i);
    }
    Ok((rest, Fact(p)))
}

// postfix operand followed by any number of `operator operand`
fn binary_chain<'a, N, O>(i: &'a str, mut operand: N, mut operator: O) -> IResult<&'a str, Vec<Op>>
where
    N: FnMut(&'a str) -> IResult<&'a str, Vec<Op>>,
    O: FnMut(&'a str) -> IResult<&'a str, Binary>,
{
    let (mut i, mut ops) = operand(i)?;
    loop {
        let (rest, _) = space(i)?;
        let (rest, op) = match operator(rest) {
            Ok(r) => r,
            Err(Err::Error(_)) => return Ok((i, ops)),
            Err(e) => return Err(e),
        };
        let (rest, right) = operand(rest)?;
        ops.extend(right);
        ops.push(Op::Binary(op));
        i = rest;
    }
}

fn expr_or(i: &str) -> IResult<&str, Vec<Op>> {
    binary_chain(i, expr_and, value(Binary::Or, tag("||")))
}

fn expr_and(i: &str) -> IResult<&str, Vec<Op>> {
    binary_chain(i, expr_cmp, value(Binary::And, tag("&&")))
}

fn expr_cmp(i: &str) -> IResult<&str, Vec<Op>> {
    let comparison = alt((
        value(Binary::LessOrEqual, tag("<=")),
        value(Binary::GreaterOrEqual, tag(">=")),
        value(Binary::Equal, tag("==")),
        value(Binary::LessThan, tag("<")),
        value(Binary::GreaterThan, tag(">")),
    ));
    binary_chain(i, expr_add, comparison)
}

fn expr_add(i: &str) -> IResult<&str, Vec<Op>> {
    let operator = alt((value(Binary::Add, tag("+")), value(Binary::Sub, tag("-"))));
    binary_chain(i, expr_mul, operator)
}

fn expr_mul(i: &str) -> IResult<&str, Vec<Op>> {
    let operator = alt((value(Binary::Mul, tag("*")), value(Binary::Div, tag("/"))));
    binary_chain(i, expr_not, operator)
}

fn expr_not(i: &str) -> IResult<&str, Vec<Op>> {
    match sym("!")(i) {
        Ok((rest, _)) => {
            let (rest, mut ops) = expr_not(rest)?;
            ops.push(Op::Unary(Unary::Negate));
            Ok((rest, ops))
        }
        Err(_) => expr_method(i),
    }
}

fn expr_method(i: &str) -> IResult<&str, Vec<Op>> {
    let (mut i, mut ops) = primary(i)?;
    loop {
        match method_call(i) {
            Ok((rest, (argument, op))) => {
                ops.extend(argument);
                ops.push(op);
                i = rest;
            }
            Err(Err::Error(_)) => return Ok((i, ops)),
            Err(e) => return Err(e),
        }
    }
}

fn method_call(i: &str) -> IResult<&str, (Vec<Op>, Op)> {
    let (i, _) = sym(".")(i)?;
    let (i, method) = name(i)?;
    let (i, _) = sym("(")(i)?;

    let binary = match method {
        "length" => {
            let (i, _) = sym(")")(i)?;
            return Ok((i, (vec![], Op::Unary(Unary::Length))));
        }
        "contains" => Binary::Contains,
        "starts_with" => Binary::Prefix,
        "ends_with" => Binary::Suffix,
        "matches" => Binary::Regex,
        "intersection" => Binary::Intersection,
        "union" => Binary::Union,
        _ => return Err(Err::Error(Error::new(i, ErrorKind::Tag))),
    };

    let (i, argument) = expr_or(i)?;
    let (i, _) = sym(")")(i)?;
    Ok((i, (argument, Op::Binary(binary))))
}

fn parens(i: &str) -> IResult<&str, Vec<Op>> {
    let (i, _) = sym("(")(i)?;
    let (i, mut ops) = expr_or(i)?;
    let (i, _) = sym(")")(i)?;
    ops.push(Op::Unary(Unary::Parens));
    Ok((i, ops))
}

fn primary(i: &str) -> IResult<&str, Vec<Op>> {
    let (i, _) = space(i)?;
    alt((parens, map(term, |t| vec![Op::Value(t)])))(i)
}

fn expression(i: &str) -> IResult<&str, Expression> {
    map(expr_or, |ops| Expression { ops })(i)
}

enum BodyElement {
    Predicate(Predicate),
    Expression(Expression),
}

fn rule_body(i: &str) -> IResult<&str, (Vec<Predicate>, Vec<Expression>)> {
    let element = alt((
        map(predicate, BodyElement::Predicate),
        map(expression, BodyElement::Expression),
    ));
    let (i, elements) = separated_list1(sym(","), element)(i)?;

    let mut predicates = vec![];
    let mut expressions = vec![];
    for e in elements {
        match e {
            BodyElement::Predicate(p) => predicates.push(p),
            BodyElement::Expression(e) => expressions.push(e),
        }
    }
    Ok((i, (predicates, expressions)))
}

fn rule(i: &str) -> IResult<&str, Rule> {
    let (i, head) = predicate(i)?;
    let (i, _) = sym("<-")(i)?;
    let (i, (body, expressions)) = rule_body(i)?;
    Ok((i, Rule::new(head, body, expressions)))
}

fn queries(i: &str) -> IResult<&str, Vec<Rule>> {
    let query = map(rule_body, |(body, expressions)| {
        Rule::new(Predicate::new("query".to_owned(), vec![]), body, expressions)
    });
    separated_list1(sym("or"), query)(i)
}

fn check(i: &str) -> IResult<&str, Check> {
    let (i, _) = sym("check")(i)?;
    let (i, _) = sym("if")(i)?;
    let (i, queries) = queries(i)?;
    Ok((i, Check { queries }))
}

fn policy(i: &str) -> IResult<&str, Policy> {
    let (i, kind) = alt((
        value(PolicyKind::Allow, sym("allow")),
        value(PolicyKind::Deny, sym("deny")),
    ))(i)?;
    let (i, _) = sym("if")(i)?;
    let (i, queries) = queries(i)?;
    Ok((i, Policy { queries, kind }))
}

fn query(i: &str) -> IResult<&str, Rule> {
    let (i, _) = sym("?-")(i)?;
    let (i, (body, expressions)) = rule_body(i)?;

    let mut head: Vec<Term> = vec![];
    for t in body.iter().flat_map(|p| p.terms.iter()) {
        if matches!(t, Term::Variable(_)) && !head.contains(t) {
            head.push(t.clone());
        }
    }
    Ok((
        i,
        Rule::new(Predicate::new("query".to_owned(), head), body, expressions),
    ))
}

fn statement(i: &str) -> IResult<&str, Statement> {
    alt((
        map(check, Statement::Check),
        map(policy, Statement::Policy),
        map(query, Statement::Query),
        map(rule, Statement::Rule),
        map(fact, Statement::Fact),
    ))(i)
}
