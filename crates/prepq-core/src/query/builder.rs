//! Query-builder interface consumed by the substitution cache.
//!
//! A builder turns a receiver plus named [`Arg`]s into a [`BuiltQuery`]. The
//! engine calls it with proxies on a cache miss and with real values when
//! verifying; on a hit it is not called at all.

use std::fmt;
use std::marker::PhantomData;

use indexmap::IndexMap;

use crate::errors::{PrepqError, PrepqResult};
use crate::lazy::proxy::{Arg, ProxyValue};
use crate::models::{Arguments, Value};

/// Positional placeholder understood by the executor.
pub const PLACEHOLDER: &str = "?";

/// Separator between the placeholders of a membership list.
pub const LIST_SEPARATOR: &str = ", ";

// ---------------------------------------------------------------------------
// Param / BuiltQuery
// ---------------------------------------------------------------------------

/// One parameter slot of a built command.
#[derive(Clone, Debug, PartialEq)]
pub enum Param {
    /// A value fixed by the builder, or a real argument value.
    Value(Value),
    /// An argument slot still waiting for its real value.
    Proxy(ProxyValue),
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Value(value) => write!(f, "{value}"),
            Param::Proxy(proxy) => write!(f, "{proxy}"),
        }
    }
}

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        Param::Value(value)
    }
}

/// Output of a builder: command text plus its ordered parameter slots.
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltQuery {
    pub command: String,
    pub params: Vec<Param>,
}

impl BuiltQuery {
    pub fn new(command: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            command: command.into(),
            params,
        }
    }

    pub fn extract_command_and_parameters(&self) -> (&str, &[Param]) {
        (&self.command, &self.params)
    }
}

// ---------------------------------------------------------------------------
// BuildArgs
// ---------------------------------------------------------------------------

/// Named arguments handed to a builder.
#[derive(Clone, Debug, Default)]
pub struct BuildArgs {
    args: IndexMap<String, Arg>,
}

impl BuildArgs {
    /// Arguments carrying their real values.
    pub fn real(values: &Arguments) -> Self {
        Self {
            args: values
                .iter()
                .map(|(name, value)| (name.clone(), Arg::Real(value.clone())))
                .collect(),
        }
    }

    /// Arguments replaced by proxies keyed on their names.
    pub fn proxied(values: &Arguments) -> PrepqResult<Self> {
        let mut args = IndexMap::with_capacity(values.len());
        for (name, value) in values {
            args.insert(name.clone(), Arg::Proxy(ProxyValue::wrap(name, value)?));
        }
        Ok(Self { args })
    }

    pub fn get(&self, name: &str) -> Option<&Arg> {
        self.args.get(name)
    }

    pub fn require(&self, name: &str) -> PrepqResult<&Arg> {
        self.args
            .get(name)
            .ok_or_else(|| PrepqError::KeyNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arg)> {
        self.args.iter().map(|(name, arg)| (name.as_str(), arg))
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

// ---------------------------------------------------------------------------
// QueryBuilder
// ---------------------------------------------------------------------------

/// A deterministic query-construction function.
pub trait QueryBuilder {
    type Receiver: ?Sized;

    fn build(&self, receiver: &Self::Receiver, args: &BuildArgs) -> PrepqResult<BuiltQuery>;

    /// Name used in log lines.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<B: QueryBuilder + ?Sized> QueryBuilder for &B {
    type Receiver = B::Receiver;

    fn build(&self, receiver: &Self::Receiver, args: &BuildArgs) -> PrepqResult<BuiltQuery> {
        (**self).build(receiver, args)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Adapts a closure into a [`QueryBuilder`].
pub struct FnBuilder<R: ?Sized, F> {
    name: String,
    func: F,
    _receiver: PhantomData<fn(&R)>,
}

impl<R: ?Sized, F> FnBuilder<R, F>
where
    F: Fn(&R, &BuildArgs) -> PrepqResult<BuiltQuery>,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _receiver: PhantomData,
        }
    }
}

impl<R: ?Sized, F> QueryBuilder for FnBuilder<R, F>
where
    F: Fn(&R, &BuildArgs) -> PrepqResult<BuiltQuery>,
{
    type Receiver = R;

    fn build(&self, receiver: &R, args: &BuildArgs) -> PrepqResult<BuiltQuery> {
        (self.func)(receiver, args)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// SelectBuilder
// ---------------------------------------------------------------------------

/// Minimal `SELECT` builder written against [`Arg`].
#[derive(Clone, Debug)]
pub struct SelectBuilder {
    table: String,
    columns: Vec<String>,
    conditions: Vec<String>,
    params: Vec<Param>,
    order_by: Vec<String>,
    limit: Option<Param>,
}

impl SelectBuilder {
    pub fn new(table: &str, columns: &[&str]) -> Self {
        Self {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            conditions: Vec::new(),
            params: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn filter_eq(mut self, column: &str, arg: &Arg) -> Self {
        self.conditions.push(format!("{column} = {PLACEHOLDER}"));
        self.params.push(arg.to_param());
        self
    }

    /// `column IN (?, ?, ...)`, one placeholder per element.
    pub fn filter_in(mut self, column: &str, arg: &Arg) -> PrepqResult<Self> {
        let items = arg.iter_values()?;
        if items.is_empty() {
            return Err(PrepqError::Builder(format!(
                "empty membership list for {column}"
            )));
        }
        let placeholders = vec![PLACEHOLDER; items.len()].join(LIST_SEPARATOR);
        self.conditions.push(format!("{column} IN ({placeholders})"));
        self.params.extend(items.iter().map(Arg::to_param));
        Ok(self)
    }

    pub fn filter_null(mut self, column: &str) -> Self {
        self.conditions.push(format!("{column} IS NULL"));
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by.push(column.to_string());
        self
    }

    pub fn limit(mut self, arg: &Arg) -> Self {
        self.limit = Some(arg.to_param());
        self
    }

    pub fn build(self) -> BuiltQuery {
        let mut command = format!("SELECT {} FROM {}", self.columns.join(", "), self.table);
        if !self.conditions.is_empty() {
            command.push_str(" WHERE ");
            command.push_str(&self.conditions.join(" AND "));
        }
        if !self.order_by.is_empty() {
            command.push_str(" ORDER BY ");
            command.push_str(&self.order_by.join(", "));
        }
        let mut params = self.params;
        if let Some(limit) = self.limit {
            command.push_str(&format!(" LIMIT {PLACEHOLDER}"));
            params.push(limit);
        }
        BuiltQuery { command, params }
    }
}
