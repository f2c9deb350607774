//! Batch filter tagging.
//!
//! When a batch seals, the tagger derives the chunk's filter metadata from
//! the messages inside: the batch-wide filter value and the probabilistic
//! index consumers probe during admission. A batch whose messages disagree
//! on the filter attribute is handled per the configured conflict policy.
//! Messages are never dropped here; the worst case is an unfiltered chunk
//! that every subscriber must open.

use tracing::warn;

use crate::config::{FilterConflictPolicy, StreamConfig};
use crate::error::{Result, StreamError};
use crate::filter::FilterIndex;
use crate::message::Message;
use crate::types::{BatchId, FilterValue};

use super::router::KeyExpression;

/// Filter metadata for one sealed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagOutcome {
    /// The batch-wide filter value; wildcard when unfiltered.
    pub value: FilterValue,
    /// Index over every filter value observed in the batch.
    pub index: FilterIndex,
    /// The chunk must be admitted by every subscriber.
    pub unfiltered: bool,
}

impl TagOutcome {
    fn unfiltered_with(index: FilterIndex) -> Self {
        Self {
            value: FilterValue::wildcard(),
            index,
            unfiltered: true,
        }
    }
}

/// Derives chunk filter metadata from a sealed batch.
#[derive(Debug, Clone)]
pub struct FilterTagger {
    expression: KeyExpression,
    policy: FilterConflictPolicy,
}

impl FilterTagger {
    pub fn new(expression: KeyExpression, policy: FilterConflictPolicy) -> Self {
        Self { expression, policy }
    }

    pub fn from_config(config: &StreamConfig) -> Result<Self> {
        Ok(Self::new(
            KeyExpression::parse(&config.filter_value_expression)?,
            config.filter_conflict_policy,
        ))
    }

    /// Tag one sealed batch.
    pub fn tag(&self, batch: BatchId, messages: &[Message]) -> Result<TagOutcome> {
        if self.expression.is_constant() {
            // Filtering disabled for this stream.
            return Ok(TagOutcome::unfiltered_with(FilterIndex::empty()));
        }

        let mut index = FilterIndex::empty();
        let mut shared: Option<Option<&str>> = None;
        let mut conflict: Option<(String, String)> = None;

        for message in messages {
            let value = self.expression.evaluate(message);
            if let Some(v) = value {
                index.insert(&FilterValue::new(v));
            }
            match shared {
                None => shared = Some(value),
                Some(seen) if seen != value && conflict.is_none() => {
                    conflict = Some((label(seen), label(value)));
                }
                Some(_) => {}
            }
        }

        if let Some((first, second)) = conflict {
            return match self.policy {
                FilterConflictPolicy::Reject => Err(StreamError::FilterConflict {
                    batch,
                    attribute: self.attribute_name(),
                    first,
                    second,
                }),
                FilterConflictPolicy::Wildcard => {
                    warn!(
                        batch = batch.value(),
                        attribute = %self.attribute_name(),
                        %first,
                        %second,
                        "batch has mixed filter values, tagging chunk as unfiltered"
                    );
                    Ok(TagOutcome::unfiltered_with(index))
                }
            };
        }

        match shared.flatten() {
            Some(value) => Ok(TagOutcome {
                value: FilterValue::new(value),
                index,
                unfiltered: false,
            }),
            // No message carried the attribute.
            None => Ok(TagOutcome::unfiltered_with(index)),
        }
    }

    fn attribute_name(&self) -> String {
        match &self.expression {
            KeyExpression::Attribute(name) => name.clone(),
            KeyExpression::Constant => String::new(),
        }
    }
}

fn label(value: Option<&str>) -> String {
    value.unwrap_or("<none>").to_string()
}
