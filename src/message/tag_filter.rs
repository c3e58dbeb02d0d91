use std::collections::HashSet;

use crate::{AppError, AppResult};

use super::Message;

/// Client-side subscription filter: either everything, or an OR of exact tags
/// written as `a||b||c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagExpression {
    All,
    AnyOf(HashSet<String>),
}

impl TagExpression {
    pub const WILDCARD: &'static str = "*";
    pub const DELIMITER: &'static str = "||";

    pub fn parse(expression: Option<&str>) -> AppResult<Self> {
        let expression = match expression {
            None => return Ok(TagExpression::All),
            Some(e) if e == Self::WILDCARD => return Ok(TagExpression::All),
            Some(e) => e,
        };
        let mut tags = HashSet::new();
        for tag in expression.split(Self::DELIMITER) {
            if tag.is_empty() {
                return Err(AppError::MalformedTagExpression(expression.to_string()));
            }
            tags.insert(tag.to_string());
        }
        Ok(TagExpression::AnyOf(tags))
    }

    pub fn matches(&self, tag: Option<&str>) -> bool {
        match self {
            TagExpression::All => true,
            TagExpression::AnyOf(tags) => tag.is_some_and(|t| tags.contains(t)),
        }
    }

    /// Keeps the messages whose tag is selected, in their original order.
    pub fn filter(&self, messages: Vec<Message>) -> Vec<Message> {
        match self {
            TagExpression::All => messages,
            TagExpression::AnyOf(_) => messages
                .into_iter()
                .filter(|msg| self.matches(msg.tags.as_deref()))
                .collect(),
        }
    }
}

/// Filters `messages` by a raw tag expression.
pub fn filter_messages(
    messages: Vec<Message>,
    tag_expression: Option<&str>,
) -> AppResult<Vec<Message>> {
    Ok(TagExpression::parse(tag_expression)?.filter(messages))
}
