//! Substitution cache configuration.

use serde::Deserialize;

use crate::errors::{PrepqError, PrepqResult};

/// Options recognised by [`crate::query::engine::SubstituteCache`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubstituteConfig {
    /// When false, every call goes straight to the builder.
    pub enabled: bool,
    /// Build with real values too and compare against the proxy build.
    pub verify: bool,
    /// Propagate verification failures instead of serving uncached results.
    /// Implies `verify`.
    pub strict: bool,
    /// Remember keys that failed verification and stop retrying them.
    pub remember_failures: bool,
}

impl Default for SubstituteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            verify: true,
            strict: true,
            remember_failures: false,
        }
    }
}

impl SubstituteConfig {
    /// No verification: misses build once with proxies, hits never build.
    pub fn production() -> Self {
        Self {
            enabled: true,
            verify: false,
            strict: false,
            remember_failures: false,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn from_json(raw: &str) -> PrepqResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Defaults overridden by `PREPQ_ENABLED`, `PREPQ_VERIFY`, `PREPQ_STRICT`
    /// and `PREPQ_REMEMBER_FAILURES`.
    pub fn from_env() -> PrepqResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            enabled: env_flag("PREPQ_ENABLED", defaults.enabled)?,
            verify: env_flag("PREPQ_VERIFY", defaults.verify)?,
            strict: env_flag("PREPQ_STRICT", defaults.strict)?,
            remember_failures: env_flag("PREPQ_REMEMBER_FAILURES", defaults.remember_failures)?,
        })
    }

    pub fn verifies(&self) -> bool {
        self.verify || self.strict
    }
}

fn env_flag(name: &str, default: bool) -> PrepqResult<bool> {
    match std::env::var(name) {
        Ok(val) => parse_flag(&val)
            .ok_or_else(|| PrepqError::Config(format!("{name}: expected a boolean, got {val:?}"))),
        Err(_) => Ok(default),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    let v = raw.trim().to_lowercase();
    match v.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
