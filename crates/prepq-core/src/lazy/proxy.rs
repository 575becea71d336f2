//! Placeholder values used during the dry construction pass.
//!
//! Builders never see a [`ProxyValue`] directly. They are written against
//! [`Arg`], which is either a real value or a proxy, and every capability a
//! builder may use on an argument is a method on `Arg`. Capabilities that
//! would let the query shape depend on the hidden value (truthiness, unsafe
//! reveals) fail with `UnsafeProxyAccess` on a proxy. Checks against the
//! constants embedded in the cache key (null, booleans, 0, 1) are allowed on
//! whole arguments only: list elements are not part of the key.

use std::fmt;

use crate::errors::{PrepqError, PrepqResult};
use crate::lazy::context::ValueContext;
use crate::models::{ScalarKind, Value};
use crate::query::builder::Param;
use crate::query::signature::Special;

// ---------------------------------------------------------------------------
// ProxyValue
// ---------------------------------------------------------------------------

/// Stand-in for one argument, identified by the argument name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProxyValue {
    /// A single scalar, or one representative element of a sequence.
    Scalar(String),
    /// A non-empty collection of unknown length.
    Sequence(String),
    /// The representative element produced by iterating a proxy. Resolves to
    /// the whole list, which the normalizer expands.
    Element(String),
    /// A scalar the builder coerced to a specific type.
    Typed(String, ScalarKind),
}

impl ProxyValue {
    /// Create the proxy for `value` stored under `key`.
    ///
    /// Empty lists change the query shape and domain objects may carry
    /// query-relevant state, so neither can be proxied.
    pub fn wrap(key: &str, value: &Value) -> PrepqResult<Self> {
        match value {
            Value::List(items) if items.is_empty() => Err(PrepqError::invalid_input(
                key,
                "empty list leads to a different query shape",
            )),
            Value::List(_) => Ok(ProxyValue::Sequence(key.to_string())),
            Value::Model(model) => Err(PrepqError::invalid_input(
                key,
                format!("model object '{}' cannot be a cache argument", model.model),
            )),
            _ => Ok(ProxyValue::Scalar(key.to_string())),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            ProxyValue::Scalar(key)
            | ProxyValue::Sequence(key)
            | ProxyValue::Element(key)
            | ProxyValue::Typed(key, _) => key,
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, ProxyValue::Sequence(_))
    }

    /// Branching on a proxy is always an error.
    pub fn is_truthy(&self) -> PrepqResult<bool> {
        Err(PrepqError::unsafe_access(
            self.key(),
            "checking the proxy instead of its value",
        ))
    }

    /// Iterating any proxy yields exactly one element proxy for the same key.
    ///
    /// The single placeholder it produces is expanded to the real element
    /// count by the normalizer.
    pub fn iter(&self) -> std::iter::Once<ProxyValue> {
        std::iter::once(ProxyValue::Element(self.key().to_string()))
    }

    pub fn coerce(&self, kind: ScalarKind) -> ProxyValue {
        ProxyValue::Typed(self.key().to_string(), kind)
    }

    /// Resolve against the current context of this thread.
    pub fn reveal(&self, safe: bool) -> PrepqResult<Value> {
        let context = ValueContext::current().ok_or_else(|| {
            PrepqError::unsafe_access(self.key(), "no active value context")
        })?;
        self.reveal_in(&context, safe)
    }

    /// Resolve against an explicit context.
    pub fn reveal_in(&self, context: &ValueContext, safe: bool) -> PrepqResult<Value> {
        let value = context.get(self.key(), safe)?;
        match (self, value) {
            // coerced element of a membership list
            (ProxyValue::Typed(_, kind), Value::List(items)) => items
                .iter()
                .map(|item| item.coerce(*kind))
                .collect::<PrepqResult<Vec<_>>>()
                .map(Value::List),
            (ProxyValue::Typed(_, kind), value) => value.coerce(*kind),
            (_, value) => Ok(value.clone()),
        }
    }
}

impl fmt::Display for ProxyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyValue::Scalar(key) => write!(f, "<proxy {key}>"),
            ProxyValue::Sequence(key) => write!(f, "<proxy {key}[..]>"),
            ProxyValue::Element(key) => write!(f, "<proxy {key}[i]>"),
            ProxyValue::Typed(key, kind) => write!(f, "<proxy {key}:{kind}>"),
        }
    }
}

// ---------------------------------------------------------------------------
// Arg
// ---------------------------------------------------------------------------

/// An argument as seen by a query builder.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Real(Value),
    Proxy(ProxyValue),
}

impl Arg {
    pub fn is_proxy(&self) -> bool {
        matches!(self, Arg::Proxy(_))
    }

    pub fn is_truthy(&self) -> PrepqResult<bool> {
        match self {
            Arg::Real(value) => Ok(value.is_truthy()),
            Arg::Proxy(proxy) => proxy.is_truthy(),
        }
    }

    /// Null check. Allowed on proxies because null-ness is part of the cache
    /// key, so calls sharing a template agree on it.
    pub fn is_null(&self) -> PrepqResult<bool> {
        Ok(self.special()? == Some(Special::Null))
    }

    /// The key-embedded constant this argument holds, if any.
    pub fn special(&self) -> PrepqResult<Option<Special>> {
        match self {
            Arg::Real(value) => Ok(Special::classify(value)),
            Arg::Proxy(proxy) => Ok(Special::classify(&key_covered(proxy, "constant check")?)),
        }
    }

    /// Elements of a membership argument.
    pub fn iter_values(&self) -> PrepqResult<Vec<Arg>> {
        match self {
            Arg::Real(Value::List(items)) => Ok(items.iter().cloned().map(Arg::Real).collect()),
            Arg::Real(other) => Err(PrepqError::Builder(format!(
                "expected a list, got {}",
                other.type_name()
            ))),
            Arg::Proxy(proxy) => Ok(proxy.iter().map(Arg::Proxy).collect()),
        }
    }

    pub fn as_int(&self) -> PrepqResult<Arg> {
        self.coerce(ScalarKind::Int)
    }

    pub fn as_text(&self) -> PrepqResult<Arg> {
        self.coerce(ScalarKind::Text)
    }

    fn coerce(&self, kind: ScalarKind) -> PrepqResult<Arg> {
        match self {
            Arg::Real(value) => value.coerce(kind).map(Arg::Real),
            Arg::Proxy(proxy) => Ok(Arg::Proxy(proxy.coerce(kind))),
        }
    }

    pub fn reveal(&self, safe: bool) -> PrepqResult<Value> {
        match self {
            Arg::Real(value) => Ok(value.clone()),
            Arg::Proxy(proxy) => proxy.reveal(safe),
        }
    }

    /// Metadata probe: whether the value is a timezone-aware timestamp.
    ///
    /// Answers only a yes/no about the value's type, so it reads through
    /// whole-argument proxies in safe mode. List elements and coerced proxies
    /// refuse it.
    pub fn is_tz_aware(&self) -> PrepqResult<bool> {
        let value = match self {
            Arg::Real(value) => value.clone(),
            Arg::Proxy(proxy) => key_covered(proxy, "timezone probe")?,
        };
        Ok(matches!(value, Value::TimestampTz(_)))
    }

    pub fn to_param(&self) -> Param {
        match self {
            Arg::Real(value) => Param::Value(value.clone()),
            Arg::Proxy(proxy) => Param::Proxy(proxy.clone()),
        }
    }
}

/// Safe reveal for probes that may only see whole, uncoerced arguments.
fn key_covered(proxy: &ProxyValue, probe: &str) -> PrepqResult<Value> {
    match proxy {
        ProxyValue::Scalar(_) | ProxyValue::Sequence(_) => proxy.reveal(true),
        ProxyValue::Element(key) => Err(PrepqError::unsafe_access(
            key,
            format!("{probe} on a list element"),
        )),
        ProxyValue::Typed(key, _) => Err(PrepqError::unsafe_access(
            key,
            format!("{probe} on a coerced proxy"),
        )),
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Real(value)
    }
}

impl From<ProxyValue> for Arg {
    fn from(proxy: ProxyValue) -> Self {
        Arg::Proxy(proxy)
    }
}
