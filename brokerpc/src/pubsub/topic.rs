//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Topic construction.

use crate::context::{Context, TOPIC_VARIABLE_HEADER_PREFIX};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Separator between prefix segments, scope and operation.
pub const DEFAULT_DELIMITER: char = '.';

/// Errors raised while building a topic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    /// A `{variable}` in the prefix had no value.
    #[error("prefix variable {name} is not set")]
    UnresolvedVariable {
        /// Variable name
        name: String,
    },

    /// A `{variable}` in the prefix resolved to an empty string.
    #[error("prefix variable {name} is empty")]
    EmptyVariable {
        /// Variable name
        name: String,
    },

    /// The scope name was empty.
    #[error("scope name cannot be empty")]
    EmptyScope,

    /// The operation name was empty.
    #[error("operation name cannot be empty")]
    EmptyOperation,

    /// The prefix template could not be parsed.
    #[error("malformed prefix {prefix:?}: {reason}")]
    MalformedPrefix {
        /// Template text
        prefix: String,
        /// What is wrong with it
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Variable(String),
}

/// A dotted topic prefix with `{variable}` segments, such as `foo.{user}`.
///
/// # Examples
///
/// ```rust
/// use brokerpc::pubsub::PrefixTemplate;
/// use std::collections::HashMap;
///
/// let template = PrefixTemplate::parse("foo.{user}").unwrap();
/// assert_eq!(template.variables(), vec!["user"]);
///
/// let values = HashMap::from([("user".to_string(), "alice".to_string())]);
/// assert_eq!(template.resolve(&values).unwrap(), "foo.alice.");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrefixTemplate {
    text: String,
    segments: Vec<Segment>,
}

impl PrefixTemplate {
    /// Parses a template. The empty string is the empty prefix.
    ///
    /// # Errors
    ///
    /// Fails with [`TopicError::MalformedPrefix`] on empty segments,
    /// unbalanced braces or empty variable names.
    pub fn parse(text: &str) -> Result<Self, TopicError> {
        let malformed = |reason| TopicError::MalformedPrefix {
            prefix: text.to_string(),
            reason,
        };
        if text.is_empty() {
            return Ok(Self::default());
        }

        let mut segments = Vec::new();
        for part in text.split(DEFAULT_DELIMITER) {
            if part.is_empty() {
                return Err(malformed("empty segment"));
            }
            match part.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) {
                Some(name) if name.is_empty() => return Err(malformed("empty variable name")),
                Some(name) if name.contains(['{', '}']) => return Err(malformed("nested braces")),
                Some(name) => segments.push(Segment::Variable(name.to_string())),
                None if part.contains(['{', '}']) => return Err(malformed("unbalanced braces")),
                None => segments.push(Segment::Static(part.to_string())),
            }
        }
        Ok(Self {
            text: text.to_string(),
            segments,
        })
    }

    /// Returns the variable names in order of appearance.
    pub fn variables(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Variable(name) => Some(name.as_str()),
                Segment::Static(_) => None,
            })
            .collect()
    }

    /// Returns `true` if the template has no variables.
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Static(_)))
    }

    /// Substitutes every variable and returns the prefix with a trailing
    /// `.`, or the empty string for the empty template.
    pub fn resolve(&self, values: &HashMap<String, String>) -> Result<String, TopicError> {
        self.resolve_with(|name| values.get(name).map(String::as_str))
    }

    /// Substitutes variables from the `_topic_<name>` request headers.
    ///
    /// ```rust
    /// use brokerpc::context::Context;
    /// use brokerpc::pubsub::PrefixTemplate;
    ///
    /// let mut ctx = Context::new();
    /// ctx.add_request_header("_topic_tenant", "acme").unwrap();
    /// let template = PrefixTemplate::parse("billing.{tenant}").unwrap();
    /// assert_eq!(template.resolve_from_context(&ctx).unwrap(), "billing.acme.");
    /// ```
    pub fn resolve_from_context(&self, ctx: &Context) -> Result<String, TopicError> {
        self.resolve_with(|name| {
            ctx.request_header(&format!("{TOPIC_VARIABLE_HEADER_PREFIX}{name}"))
                .map(str::to_string)
        })
    }

    fn resolve_with<F, S>(&self, lookup: F) -> Result<String, TopicError>
    where
        F: Fn(&str) -> Option<S>,
        S: AsRef<str>,
    {
        let mut prefix = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Static(text) => prefix.push_str(text),
                Segment::Variable(name) => {
                    let value = lookup(name).ok_or_else(|| TopicError::UnresolvedVariable {
                        name: name.clone(),
                    })?;
                    if value.as_ref().is_empty() {
                        return Err(TopicError::EmptyVariable { name: name.clone() });
                    }
                    prefix.push_str(value.as_ref());
                }
            }
            prefix.push(DEFAULT_DELIMITER);
        }
        Ok(prefix)
    }
}

impl fmt::Display for PrefixTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// A fully resolved topic, `<prefix><scope>.<operation>`.
///
/// # Examples
///
/// ```rust
/// use brokerpc::pubsub::{PrefixTemplate, Topic};
/// use std::collections::HashMap;
///
/// let template = PrefixTemplate::parse("foo.bar").unwrap();
/// let topic = Topic::resolve(&template, &HashMap::new(), "Events", "EventCreated").unwrap();
/// assert_eq!(topic.as_str(), "foo.bar.Events.EventCreated");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    name: String,
    scope: String,
    operation: String,
}

impl Topic {
    /// Joins an already resolved prefix (empty or ending in `.`) with a scope
    /// and an operation.
    pub fn new(
        resolved_prefix: &str,
        scope: impl Into<String>,
        operation: impl Into<String>,
    ) -> Result<Self, TopicError> {
        let scope = scope.into();
        let operation = operation.into();
        if scope.is_empty() {
            return Err(TopicError::EmptyScope);
        }
        if operation.is_empty() {
            return Err(TopicError::EmptyOperation);
        }
        if !resolved_prefix.is_empty() && !resolved_prefix.ends_with(DEFAULT_DELIMITER) {
            return Err(TopicError::MalformedPrefix {
                prefix: resolved_prefix.to_string(),
                reason: "resolved prefix must end with the delimiter",
            });
        }
        Ok(Self {
            name: format!("{resolved_prefix}{scope}{DEFAULT_DELIMITER}{operation}"),
            scope,
            operation,
        })
    }

    /// Resolves `template` with `values` and builds the topic.
    pub fn resolve(
        template: &PrefixTemplate,
        values: &HashMap<String, String>,
        scope: impl Into<String>,
        operation: impl Into<String>,
    ) -> Result<Self, TopicError> {
        Self::new(&template.resolve(values)?, scope, operation)
    }

    /// Resolves `template` from `_topic_<name>` request headers and builds
    /// the topic.
    pub fn from_context(
        template: &PrefixTemplate,
        ctx: &Context,
        scope: impl Into<String>,
        operation: impl Into<String>,
    ) -> Result<Self, TopicError> {
        Self::new(&template.resolve_from_context(ctx)?, scope, operation)
    }

    /// Returns the full topic string.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Returns the scope name.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Returns the operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_static_prefix() {
        let template = PrefixTemplate::parse("foo.bar").unwrap();
        assert!(template.is_static());
        let topic = Topic::resolve(&template, &HashMap::new(), "Events", "EventCreated").unwrap();
        assert_eq!(topic.to_string(), "foo.bar.Events.EventCreated");
        assert_eq!(topic.scope(), "Events");
        assert_eq!(topic.operation(), "EventCreated");
    }

    #[test]
    fn test_empty_prefix() {
        let template = PrefixTemplate::parse("").unwrap();
        let topic = Topic::resolve(&template, &HashMap::new(), "Album", "Winner").unwrap();
        assert_eq!(topic.as_str(), "Album.Winner");
    }

    #[test]
    fn test_variables_substituted_in_order() {
        let template = PrefixTemplate::parse("v1.{region}.music.{user}").unwrap();
        assert_eq!(template.variables(), vec!["region", "user"]);
        let prefix = template
            .resolve(&values(&[("user", "bob"), ("region", "eu")]))
            .unwrap();
        assert_eq!(prefix, "v1.eu.music.bob.");
    }

    #[test]
    fn test_unresolved_and_empty_variables() {
        let template = PrefixTemplate::parse("foo.{user}").unwrap();
        assert_eq!(
            template.resolve(&HashMap::new()),
            Err(TopicError::UnresolvedVariable {
                name: "user".to_string()
            })
        );
        assert_eq!(
            template.resolve(&values(&[("user", "")])),
            Err(TopicError::EmptyVariable {
                name: "user".to_string()
            })
        );
    }

    #[test]
    fn test_malformed_prefixes() {
        for text in ["foo..bar", "foo.", ".foo", "foo.{}", "foo.{user", "foo.us}er"] {
            assert!(
                matches!(
                    PrefixTemplate::parse(text),
                    Err(TopicError::MalformedPrefix { .. })
                ),
                "{text} should be rejected"
            );
        }
    }

    #[test]
    fn test_empty_names() {
        assert_eq!(Topic::new("", "", "Op"), Err(TopicError::EmptyScope));
        assert_eq!(Topic::new("", "Scope", ""), Err(TopicError::EmptyOperation));
        assert!(Topic::new("no-dot", "Scope", "Op").is_err());
    }

    #[test]
    fn test_delimiter_joins_every_part() {
        let template = PrefixTemplate::parse("a.b").unwrap();
        let prefix = template.resolve(&HashMap::new()).unwrap();
        assert!(prefix.ends_with(DEFAULT_DELIMITER));

        let topic = Topic::new(&prefix, "Scope", "Op").unwrap();
        let parts: Vec<&str> = topic.as_str().split(DEFAULT_DELIMITER).collect();
        assert_eq!(parts, vec!["a", "b", "Scope", "Op"]);
    }

    #[test]
    fn test_resolve_from_context() {
        let mut ctx = Context::new();
        ctx.add_request_header("_topic_user", "carol").unwrap();
        let template = PrefixTemplate::parse("foo.{user}").unwrap();
        let topic = Topic::from_context(&template, &ctx, "Events", "EventCreated").unwrap();
        assert_eq!(topic.as_str(), "foo.carol.Events.EventCreated");

        let missing = Topic::from_context(&template, &Context::new(), "Events", "EventCreated");
        assert!(matches!(missing, Err(TopicError::UnresolvedVariable { .. })));
    }
}
