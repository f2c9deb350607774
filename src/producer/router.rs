//! Attribute expressions and partition routing.
//!
//! Both the routing key and the filter value are selected from a message by
//! a small expression: `attributes['some-key']` (or a bare attribute name
//! as shorthand). Expressions are parsed once at startup; an empty string
//! is the constant expression, which disables keyed routing or filtering.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::{all_consuming, map},
    sequence::delimited,
};

use crate::codec::fnv1a64;
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::message::Message;
use crate::types::PartitionIndex;

const ROUTING_HASH_SEED: u64 = 0;

/// A parsed attribute-selection expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyExpression {
    /// Empty expression; evaluates to nothing for every message.
    Constant,
    /// Selects one attribute by name.
    Attribute(String),
}

impl KeyExpression {
    /// Parse an expression. Accepted forms:
    ///
    /// - `""` (constant)
    /// - `attributes['order-id']`
    /// - `order-id` (bare shorthand)
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(KeyExpression::Constant);
        }
        match all_consuming(expression)(trimmed) {
            Ok((_, expr)) => Ok(expr),
            Err(_) => Err(StreamError::Config(format!(
                "invalid key expression `{trimmed}`: expected `attributes['name']` or a bare attribute name"
            ))),
        }
    }

    /// Whether this is the empty expression.
    pub fn is_constant(&self) -> bool {
        matches!(self, KeyExpression::Constant)
    }

    /// Evaluate against one message.
    pub fn evaluate<'m>(&self, message: &'m Message) -> Option<&'m str> {
        match self {
            KeyExpression::Constant => None,
            KeyExpression::Attribute(name) => message.attribute(name),
        }
    }
}

fn attribute_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')(input)
}

fn bracketed(input: &str) -> IResult<&str, KeyExpression> {
    let (input, _) = tag("attributes")(input)?;
    map(
        delimited(
            char('['),
            delimited(char('\''), attribute_name, char('\'')),
            char(']'),
        ),
        |name: &str| KeyExpression::Attribute(name.to_string()),
    )(input)
}

fn bare(input: &str) -> IResult<&str, KeyExpression> {
    map(attribute_name, |name: &str| {
        KeyExpression::Attribute(name.to_string())
    })(input)
}

fn expression(input: &str) -> IResult<&str, KeyExpression> {
    alt((bracketed, bare))(input)
}

/// Maps each message to its partition.
///
/// The same key always lands on the same partition: the key's stable hash
/// modulo the fixed partition count. A message without the routing
/// attribute goes to partition 0, or fails outright under strict routing.
#[derive(Debug, Clone)]
pub struct PartitionRouter {
    expression: KeyExpression,
    partition_count: u32,
    strict: bool,
}

impl PartitionRouter {
    pub fn new(expression: KeyExpression, partition_count: u32, strict: bool) -> Self {
        Self {
            expression,
            partition_count,
            strict,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Result<Self> {
        Ok(Self::new(
            KeyExpression::parse(&config.partition_key_expression)?,
            config.partition_count,
            config.strict_routing,
        ))
    }

    /// Number of partitions this router spreads over.
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Pick the partition for one message.
    pub fn route(&self, message: &Message) -> Result<PartitionIndex> {
        match self.expression.evaluate(message) {
            Some(key) => {
                let hash = fnv1a64(ROUTING_HASH_SEED, key.as_bytes());
                Ok(PartitionIndex::new((hash % self.partition_count as u64) as u32))
            }
            None if self.strict => match &self.expression {
                KeyExpression::Attribute(name) => Err(StreamError::MissingRoutingKey {
                    attribute: name.clone(),
                }),
                KeyExpression::Constant => Ok(PartitionIndex::new(0)),
            },
            None => Ok(PartitionIndex::new(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with(key: &str, value: &str) -> Message {
        Message::builder()
            .payload("x")
            .attribute(key, value)
            .build()
    }

    #[test]
    fn test_parse_bracketed_form() {
        let expr = KeyExpression::parse("attributes['order-id']").unwrap();
        assert_eq!(expr, KeyExpression::Attribute("order-id".to_string()));
    }

    #[test]
    fn test_parse_bare_form() {
        let expr = KeyExpression::parse("region").unwrap();
        assert_eq!(expr, KeyExpression::Attribute("region".to_string()));
    }

    #[test]
    fn test_parse_empty_is_constant() {
        assert!(KeyExpression::parse("").unwrap().is_constant());
        assert!(KeyExpression::parse("   ").unwrap().is_constant());
    }

    #[test]
    fn test_parse_rejects_other_syntax() {
        for bad in ["attributes[order-id]", "attributes['']", "payload.len()", "a b"] {
            assert!(KeyExpression::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_evaluate() {
        let expr = KeyExpression::parse("attributes['region']").unwrap();
        assert_eq!(expr.evaluate(&message_with("region", "eu")), Some("eu"));
        assert_eq!(expr.evaluate(&message_with("kind", "x")), None);
    }

    #[test]
    fn test_same_key_same_partition() {
        let router = PartitionRouter::new(
            KeyExpression::parse("attributes['order-id']").unwrap(),
            8,
            false,
        );
        let a = router.route(&message_with("order-id", "o-42")).unwrap();
        let b = router.route(&message_with("order-id", "o-42")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_keys_spread_over_partitions() {
        let router = PartitionRouter::new(
            KeyExpression::parse("attributes['order-id']").unwrap(),
            8,
            false,
        );
        let mut seen = std::collections::HashSet::new();
        for i in 0..200 {
            let p = router
                .route(&message_with("order-id", &format!("o-{i}")))
                .unwrap();
            assert!(p.value() < 8);
            seen.insert(p.value());
        }
        assert!(seen.len() > 4, "200 keys landed on only {} partitions", seen.len());
    }

    #[test]
    fn test_missing_key_defaults_to_partition_zero() {
        let router = PartitionRouter::new(
            KeyExpression::parse("attributes['order-id']").unwrap(),
            8,
            false,
        );
        let p = router.route(&message_with("other", "x")).unwrap();
        assert_eq!(p.value(), 0);
    }

    #[test]
    fn test_missing_key_fails_under_strict_routing() {
        let router = PartitionRouter::new(
            KeyExpression::parse("attributes['order-id']").unwrap(),
            8,
            true,
        );
        assert!(router.route(&message_with("other", "x")).is_err());
    }

    #[test]
    fn test_constant_expression_routes_everything_to_zero() {
        let router = PartitionRouter::new(KeyExpression::Constant, 1, false);
        let p = router.route(&message_with("any", "thing")).unwrap();
        assert_eq!(p.value(), 0);
    }
}
