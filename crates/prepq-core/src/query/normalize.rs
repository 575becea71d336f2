//! Template normalization: turn a command with parameter slots into an
//! executable command for one call's real values.
//!
//! A membership slot built against a single representative proxy element is
//! expanded to as many placeholders as the real list has elements, and the
//! list is flattened into the parameter values at the same position.

use std::fmt;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{PrepqError, PrepqResult};
use crate::lazy::context::ValueContext;
use crate::models::Value;
use crate::query::builder::{BuiltQuery, Param, LIST_SEPARATOR, PLACEHOLDER};

/// Quoted literals are matched so placeholders inside them are skipped.
static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"'(?:[^']|'')*'|"(?:[^"]|"")*"|\?"#).unwrap());

/// A concrete command and its parameter values, ready for the executor.
#[derive(Clone, Debug, PartialEq)]
pub struct Prepared {
    pub command: String,
    pub params: Vec<Value>,
}

impl Prepared {
    pub fn new(command: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            params,
        }
    }
}

impl fmt::Display for Prepared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.command)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str("]")
    }
}

/// Byte ranges of the placeholders in `command`, outside quoted literals.
pub fn placeholder_spans(command: &str) -> Vec<Range<usize>> {
    TOKEN_RE
        .find_iter(command)
        .filter(|m| m.as_str() == PLACEHOLDER)
        .map(|m| m.range())
        .collect()
}

/// Normalize `command`/`params` against the real values in `context`.
///
/// Proxies are revealed in safe mode: this runs after construction and only
/// renders the final command.
pub fn normalize(command: &str, params: &[Param], context: &ValueContext) -> PrepqResult<Prepared> {
    let spans = placeholder_spans(command);
    if spans.len() != params.len() {
        return Err(PrepqError::PlaceholderMismatch {
            placeholders: spans.len(),
            params: params.len(),
        });
    }

    let mut text = String::with_capacity(command.len());
    let mut values = Vec::with_capacity(params.len());
    let mut last = 0;

    for (span, param) in spans.into_iter().zip(params) {
        text.push_str(&command[last..span.start]);
        last = span.end;

        let (value, origin) = match param {
            Param::Value(value) => (value.clone(), None),
            Param::Proxy(proxy) => (proxy.reveal_in(context, true)?, Some(proxy.key())),
        };

        match value {
            Value::List(items) => {
                if items.is_empty() {
                    return Err(PrepqError::invalid_input(
                        origin.unwrap_or("<list parameter>"),
                        "empty list leads to a different query shape",
                    ));
                }
                text.push_str(&vec![PLACEHOLDER; items.len()].join(LIST_SEPARATOR));
                values.extend(items.into_iter().map(Value::into_canonical));
            }
            other => {
                text.push_str(PLACEHOLDER);
                values.push(other.into_canonical());
            }
        }
    }
    text.push_str(&command[last..]);

    Ok(Prepared {
        command: text,
        params: values,
    })
}

/// Normalize a builder's output.
pub fn normalize_built(query: &BuiltQuery, context: &ValueContext) -> PrepqResult<Prepared> {
    let (command, params) = query.extract_command_and_parameters();
    normalize(command, params, context)
}
