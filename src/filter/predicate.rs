//! Second-tier filtering: per-message predicates over attributes.
//!
//! After a chunk passes admission and is opened, each message is evaluated
//! against the subscription's predicate. The grammar is a small boolean
//! language over attribute comparisons:
//!
//! ```text
//! kind = 'order.created'
//! region IN ('eu', 'us') AND kind = 'order.created'
//! (region = 'eu' OR region = 'us') AND tier = 'gold'
//! ```
//!
//! `AND` binds tighter than `OR`; parentheses group. Keywords are
//! case-insensitive, attribute names and literal values are not. Syntax
//! errors are reported once at subscribe time, never per message.

use std::collections::HashMap;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{char, multispace0},
    combinator::{map, value},
    multi::separated_list1,
    sequence::{delimited, preceded, separated_pair, tuple},
};

use crate::error::{Result, StreamError};

/// A parsed subscription predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Matches every message.
    True,
    /// `attribute = 'literal'`
    Eq { key: String, value: String },
    /// `attribute IN ('a', 'b')`
    In { key: String, values: Vec<String> },
    /// All branches must match.
    And(Vec<Predicate>),
    /// Any branch may match.
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Parse a predicate. `None` or an all-whitespace string means no
    /// second-tier filtering.
    pub fn parse(input: Option<&str>) -> Result<Self> {
        let Some(text) = input else {
            return Ok(Predicate::True);
        };
        if text.trim().is_empty() {
            return Ok(Predicate::True);
        }
        match parse_expression(text) {
            Ok((rest, predicate)) if rest.trim().is_empty() => Ok(predicate),
            Ok((rest, _)) => Err(StreamError::InvalidFilterSyntax {
                fragment: rest.trim().chars().take(32).collect(),
                reason: "unexpected trailing input".to_string(),
            }),
            Err(_) => Err(StreamError::InvalidFilterSyntax {
                fragment: text.trim().chars().take(32).collect(),
                reason: "expected `attr = 'value'`, `attr IN (...)`, AND/OR, or parentheses"
                    .to_string(),
            }),
        }
    }

    /// Evaluate against one message's attributes. A missing attribute never
    /// matches a comparison.
    pub fn matches(&self, attributes: &HashMap<String, String>) -> bool {
        match self {
            Predicate::True => true,
            Predicate::Eq { key, value } => attributes.get(key).is_some_and(|v| v == value),
            Predicate::In { key, values } => attributes
                .get(key)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
            Predicate::And(branches) => branches.iter().all(|p| p.matches(attributes)),
            Predicate::Or(branches) => branches.iter().any(|p| p.matches(attributes)),
        }
    }
}

fn ws<'a, O>(
    inner: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, O> {
    delimited(multispace0, inner, multispace0)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')(input)
}

/// Single-quoted literal; no escape sequences, a quote ends the literal.
fn literal(input: &str) -> IResult<&str, String> {
    map(
        delimited(char('\''), take_while1(|c| c != '\''), char('\'')),
        str::to_string,
    )(input)
}

fn empty_literal(input: &str) -> IResult<&str, String> {
    value(String::new(), tag("''"))(input)
}

fn quoted(input: &str) -> IResult<&str, String> {
    alt((empty_literal, literal))(input)
}

fn comparison_eq(input: &str) -> IResult<&str, Predicate> {
    map(
        separated_pair(ws(identifier), char('='), ws(quoted)),
        |(key, value)| Predicate::Eq {
            key: key.to_string(),
            value,
        },
    )(input)
}

fn comparison_in(input: &str) -> IResult<&str, Predicate> {
    map(
        tuple((
            ws(identifier),
            tag_no_case("in"),
            ws(delimited(
                char('('),
                separated_list1(ws(char(',')), ws(quoted)),
                char(')'),
            )),
        )),
        |(key, _, values)| Predicate::In {
            key: key.to_string(),
            values,
        },
    )(input)
}

fn primary(input: &str) -> IResult<&str, Predicate> {
    alt((
        ws(delimited(char('('), parse_expression, char(')'))),
        comparison_in,
        comparison_eq,
    ))(input)
}

fn conjunction(input: &str) -> IResult<&str, Predicate> {
    let (input, first) = primary(input)?;
    let (input, rest) = nom::multi::many0(preceded(ws(tag_no_case("and")), primary))(input)?;
    if rest.is_empty() {
        Ok((input, first))
    } else {
        let mut branches = vec![first];
        branches.extend(rest);
        Ok((input, Predicate::And(branches)))
    }
}

fn parse_expression(input: &str) -> IResult<&str, Predicate> {
    let (input, first) = conjunction(input)?;
    let (input, rest) = nom::multi::many0(preceded(ws(tag_no_case("or")), conjunction))(input)?;
    if rest.is_empty() {
        Ok((input, first))
    } else {
        let mut branches = vec![first];
        branches.extend(rest);
        Ok((input, Predicate::Or(branches)))
    }
}
