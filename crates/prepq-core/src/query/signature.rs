//! Two-level cache addressing: argument signature and cache key.

use std::fmt;

use crate::models::{Arguments, Value};

/// Sorted names of the arguments present in a call.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(Vec<String>);

impl Signature {
    pub fn of(args: &Arguments) -> Self {
        let mut names: Vec<String> = args.keys().cloned().collect();
        names.sort();
        Self(names)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Signature {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut names: Vec<String> = iter.into_iter().map(Into::into).collect();
        names.sort();
        Self(names)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

/// Constants embedded literally in a cache key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Special {
    True,
    False,
    Null,
    Zero,
    One,
}

impl Special {
    pub const ALL: [Special; 5] = [
        Special::True,
        Special::False,
        Special::Null,
        Special::Zero,
        Special::One,
    ];

    pub fn classify(value: &Value) -> Option<Special> {
        match value {
            Value::Bool(true) => Some(Special::True),
            Value::Bool(false) => Some(Special::False),
            Value::Null => Some(Special::Null),
            Value::Int(0) => Some(Special::Zero),
            Value::Int(1) => Some(Special::One),
            _ => None,
        }
    }
}

/// One position of a cache key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Special(Special),
    /// "A value is present here."
    Stub,
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Special(Special::True) => f.write_str("true"),
            KeyPart::Special(Special::False) => f.write_str("false"),
            KeyPart::Special(Special::Null) => f.write_str("null"),
            KeyPart::Special(Special::Zero) => f.write_str("0"),
            KeyPart::Special(Special::One) => f.write_str("1"),
            KeyPart::Stub => f.write_str("/stub/"),
        }
    }
}

/// Per-value key in signature order.
///
/// Only the special constants are embedded, so each position has at most
/// `Special::ALL.len() + 1` possible parts.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<KeyPart>);

impl CacheKey {
    pub fn of(args: &Arguments, signature: &Signature) -> Self {
        Self(
            signature
                .names()
                .iter()
                .map(|name| match args.get(name).and_then(Special::classify) {
                    Some(special) => KeyPart::Special(special),
                    None => KeyPart::Stub,
                })
                .collect(),
        )
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }
}

impl FromIterator<KeyPart> for CacheKey {
    fn from_iter<I: IntoIterator<Item = KeyPart>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{part}")?;
        }
        f.write_str(")")
    }
}
