//! Call-local registry of real argument values.
//!
//! A [`ValueContext`] holds the real values behind every proxy of one call.
//! Contexts are activated with [`ValueContext::enter`], which pushes them on
//! a per-thread stack; the returned [`ContextScope`] pops back to the
//! previous context when dropped, whichever way the scope is left.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::{PrepqError, PrepqResult};
use crate::models::{Arguments, Value};

/// Hook applied to the raw arguments before they are stored in a context.
pub type Preprocessor = Arc<dyn Fn(Arguments) -> Arguments + Send + Sync>;

thread_local! {
    static ACTIVE: RefCell<Vec<Arc<ValueContext>>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug)]
pub struct ValueContext {
    values: Arguments,
    values_allowed: AtomicBool,
}

impl ValueContext {
    pub fn new(values: Arguments) -> Self {
        Self {
            values,
            values_allowed: AtomicBool::new(false),
        }
    }

    /// Create a context after running `values` through each preprocessor in
    /// order.
    pub fn with_preprocessors(preprocessors: &[Preprocessor], values: Arguments) -> Self {
        let values = preprocessors
            .iter()
            .fold(values, |acc, preprocess| preprocess(acc));
        Self::new(values)
    }

    pub fn values(&self) -> &Arguments {
        &self.values
    }

    pub fn values_allowed(&self) -> bool {
        self.values_allowed.load(Ordering::Acquire)
    }

    /// Allow revealing real values from this context. Idempotent.
    pub fn allow(&self) {
        self.values_allowed.store(true, Ordering::Release);
    }

    /// Look up the real value for `key`.
    ///
    /// Unless `safe` is set, this only succeeds once values are allowed.
    pub fn get(&self, key: &str, safe: bool) -> PrepqResult<&Value> {
        if !(safe || self.values_allowed()) {
            return Err(PrepqError::unsafe_access(
                key,
                "real values are not available during query construction",
            ));
        }
        self.values
            .get(key)
            .ok_or_else(|| PrepqError::KeyNotFound(key.to_string()))
    }

    /// Make this the current context until the returned scope is dropped.
    pub fn enter(self: &Arc<Self>) -> ContextScope {
        let depth = ACTIVE.with(|stack| {
            let mut stack = stack.borrow_mut();
            let depth = stack.len();
            stack.push(Arc::clone(self));
            depth
        });
        ContextScope {
            context: Arc::clone(self),
            depth,
            _not_send: PhantomData,
        }
    }

    /// The innermost active context on this thread.
    pub fn current() -> Option<Arc<ValueContext>> {
        ACTIVE.with(|stack| stack.borrow().last().cloned())
    }

    /// Allow real values on the current context, if there is one.
    pub fn allow_values() {
        if let Some(current) = Self::current() {
            current.allow();
        }
    }

    /// Run `f` with a fresh context built from `values` active.
    ///
    /// `f` receives the preprocessed arguments, which is what callers should
    /// hand to the engine.
    pub fn scoped<T>(
        preprocessors: &[Preprocessor],
        values: Arguments,
        f: impl FnOnce(&Arguments) -> T,
    ) -> T {
        let context = Arc::new(Self::with_preprocessors(preprocessors, values));
        let _scope = context.enter();
        f(context.values())
    }
}

/// Guard for an active [`ValueContext`].
///
/// Not `Send`: the stack it restores belongs to the thread that entered it.
#[must_use = "the context is deactivated as soon as the scope is dropped"]
pub struct ContextScope {
    context: Arc<ValueContext>,
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl ContextScope {
    pub fn context(&self) -> &Arc<ValueContext> {
        &self.context
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        ACTIVE.with(|stack| stack.borrow_mut().truncate(self.depth));
    }
}

// ---------------------------------------------------------------------------
// Preprocessors
// ---------------------------------------------------------------------------

/// Replace an empty list under any of `names` with `Null`.
///
/// An empty membership list would otherwise drop its clause from the query,
/// and cannot be proxied.
pub fn empty_list_to_null(names: &[&str]) -> Preprocessor {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    Arc::new(move |mut args: Arguments| {
        for name in &names {
            if let Some(value) = args.get_mut(name) {
                if matches!(value, Value::List(items) if items.is_empty()) {
                    *value = Value::Null;
                }
            }
        }
        args
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::arguments;

    fn ctx(pairs: &[(&str, i64)]) -> Arc<ValueContext> {
        Arc::new(ValueContext::new(arguments(pairs.iter().map(|(k, v)| (*k, *v)))))
    }

    #[test]
    fn get_requires_safe_or_allowed() {
        let context = ctx(&[("a", 1)]);
        assert!(matches!(
            context.get("a", false),
            Err(PrepqError::UnsafeProxyAccess { .. })
        ));
        assert_eq!(context.get("a", true).unwrap(), &Value::Int(1));

        context.allow();
        context.allow();
        assert_eq!(context.get("a", false).unwrap(), &Value::Int(1));
    }

    #[test]
    fn get_missing_key() {
        let context = ctx(&[("a", 1)]);
        assert!(matches!(context.get("b", true), Err(PrepqError::KeyNotFound(k)) if k == "b"));
    }

    #[test]
    fn nested_scopes_restore_previous() {
        assert!(ValueContext::current().is_none());
        let outer = ctx(&[("a", 1)]);
        let inner = ctx(&[("a", 2)]);
        {
            let _outer_scope = outer.enter();
            {
                let _inner_scope = inner.enter();
                let current = ValueContext::current().unwrap();
                assert!(Arc::ptr_eq(&current, &inner));
            }
            let current = ValueContext::current().unwrap();
            assert!(Arc::ptr_eq(&current, &outer));
        }
        assert!(ValueContext::current().is_none());
    }

    #[test]
    fn scope_restored_on_error_path() {
        fn fails(context: &Arc<ValueContext>) -> PrepqResult<()> {
            let _scope = context.enter();
            context.get("missing", true)?;
            Ok(())
        }
        let context = ctx(&[("a", 1)]);
        assert!(fails(&context).is_err());
        assert!(ValueContext::current().is_none());
    }

    #[test]
    fn scope_restored_on_panic() {
        let context = ctx(&[("a", 1)]);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = context.enter();
            panic!("builder blew up");
        }));
        assert!(result.is_err());
        assert!(ValueContext::current().is_none());
    }

    #[test]
    fn allow_values_targets_current_only() {
        let outer = ctx(&[("a", 1)]);
        let inner = ctx(&[("a", 2)]);
        let _outer_scope = outer.enter();
        {
            let _inner_scope = inner.enter();
            ValueContext::allow_values();
        }
        assert!(inner.values_allowed());
        assert!(!outer.values_allowed());
    }

    #[test]
    fn preprocessors_apply_in_order() {
        let double: Preprocessor = Arc::new(|mut args: Arguments| {
            if let Some(Value::Int(i)) = args.get_mut("a") {
                *i *= 2;
            }
            args
        });
        let add_one: Preprocessor = Arc::new(|mut args: Arguments| {
            if let Some(Value::Int(i)) = args.get_mut("a") {
                *i += 1;
            }
            args
        });
        let context = ValueContext::with_preprocessors(&[double, add_one], arguments([("a", 3)]));
        assert_eq!(context.get("a", true).unwrap(), &Value::Int(7));
    }

    #[test]
    fn empty_list_becomes_null() {
        let pre = empty_list_to_null(&["integers"]);
        let args = pre(arguments([
            ("integers", Value::List(vec![])),
            ("other", Value::List(vec![])),
        ]));
        assert_eq!(args["integers"], Value::Null);
        assert_eq!(args["other"], Value::List(vec![]));
    }

    #[test]
    fn scoped_exposes_preprocessed_values() {
        let pre = empty_list_to_null(&["integers"]);
        let seen = ValueContext::scoped(&[pre], arguments([("integers", Value::List(vec![]))]), |args| {
            assert!(ValueContext::current().is_some());
            args["integers"].clone()
        });
        assert_eq!(seen, Value::Null);
        assert!(ValueContext::current().is_none());
    }
}
