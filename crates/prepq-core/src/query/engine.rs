//! Substitution cache engine.
//!
//! Wraps a [`QueryBuilder`] and memoizes the *shape* of what it builds.
//! Per call:
//!
//! 1. Preprocess the arguments and activate a fresh [`ValueContext`].
//! 2. Compute the [`Signature`] and [`CacheKey`].
//! 3. Hit: substitute the real values into the cached template (and, when
//!    verifying, compare with a real build; any mismatch is an error).
//! 4. Miss: build once with proxies (and once with real values when
//!    verifying), compare, store the template and return it normalized. A
//!    mismatch either propagates (`strict`) or serves the real build
//!    without caching.
//! 5. Allow real values on the call's context, whatever the outcome.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::SubstituteConfig;
use crate::errors::PrepqResult;
use crate::lazy::context::{Preprocessor, ValueContext};
use crate::models::Arguments;
use crate::query::builder::{BuildArgs, QueryBuilder};
use crate::query::cache::{CacheEntry, CacheStats, CachedTemplate, TemplateCache};
use crate::query::equivalence::{assert_equivalent, MappingFailure};
use crate::query::normalize::{normalize_built, Prepared};
use crate::query::signature::{CacheKey, Signature};

/// Result of one engine call.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Served from (`hit`) or freshly stored into the template cache.
    Cached { query: Prepared, hit: bool },
    /// Proxy and real builds disagreed; `query` is the uncached real build.
    VerificationFailed {
        query: Prepared,
        failure: MappingFailure,
    },
    /// Caching is disabled; `query` came straight from the builder.
    Disabled { query: Prepared },
}

impl Outcome {
    pub fn query(&self) -> &Prepared {
        match self {
            Outcome::Cached { query, .. }
            | Outcome::VerificationFailed { query, .. }
            | Outcome::Disabled { query } => query,
        }
    }

    pub fn into_query(self) -> Prepared {
        match self {
            Outcome::Cached { query, .. }
            | Outcome::VerificationFailed { query, .. }
            | Outcome::Disabled { query } => query,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Outcome::Cached { hit: true, .. })
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Outcome::Cached { .. })
    }
}

/// Opens the call's context for rendering on every exit path.
struct AllowOnExit<'a>(&'a ValueContext);

impl Drop for AllowOnExit<'_> {
    fn drop(&mut self) {
        self.0.allow();
    }
}

/// Per-builder memoization layer.
pub struct SubstituteCache<B: QueryBuilder> {
    builder: B,
    config: SubstituteConfig,
    preprocessors: Vec<Preprocessor>,
    cache: TemplateCache,
}

impl<B: QueryBuilder> SubstituteCache<B> {
    pub fn new(builder: B) -> Self {
        Self::with_config(builder, SubstituteConfig::default())
    }

    pub fn with_config(builder: B, config: SubstituteConfig) -> Self {
        Self {
            builder,
            config,
            preprocessors: Vec::new(),
            cache: TemplateCache::new(),
        }
    }

    /// Add an argument preprocessor; preprocessors run in insertion order.
    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessors.push(preprocessor);
        self
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    pub fn config(&self) -> &SubstituteConfig {
        &self.config
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Build the query for `args`, through the template cache when enabled.
    pub fn call(&self, receiver: &B::Receiver, args: Arguments) -> PrepqResult<Outcome> {
        let context = Arc::new(ValueContext::with_preprocessors(&self.preprocessors, args));
        let _scope = context.enter();
        let _allow = AllowOnExit(&context);

        if !self.config.enabled {
            self.cache.record_bypass();
            let query = self.build_real(receiver, &context)?;
            return Ok(Outcome::Disabled { query });
        }

        let values = context.values();
        let signature = Signature::of(values);
        let key = CacheKey::of(values, &signature);

        match self.cache.lookup(&signature, &key) {
            Some(CacheEntry::Template(template)) => {
                self.on_hit(receiver, &context, &signature, &key, &template)
            }
            Some(CacheEntry::Uncacheable(failure)) => {
                debug!(
                    "Known uncacheable key for {}:{signature}\n{key}",
                    self.builder.name()
                );
                self.cache.record_fallback();
                let query = self.build_real(receiver, &context)?;
                Ok(Outcome::VerificationFailed { query, failure })
            }
            None => self.on_miss(receiver, &context, signature, key),
        }
    }

    fn on_hit(
        &self,
        receiver: &B::Receiver,
        context: &ValueContext,
        signature: &Signature,
        key: &CacheKey,
        template: &CachedTemplate,
    ) -> PrepqResult<Outcome> {
        let name = self.builder.name();
        debug!("Cache hit for {name}:{signature}\n{key}");
        self.cache.record_hit();

        let query = template.normalize(context)?;
        if self.config.verifies() {
            let expected = self.build_real(receiver, context)?;
            assert_equivalent(&expected, &query, "Cached result does not match real")?;
            debug!("Used cached result for {name}");
        }
        Ok(Outcome::Cached { query, hit: true })
    }

    fn on_miss(
        &self,
        receiver: &B::Receiver,
        context: &ValueContext,
        signature: Signature,
        key: CacheKey,
    ) -> PrepqResult<Outcome> {
        let name = self.builder.name();
        debug!("Cache miss for {name}:{signature}\n{key}");
        self.cache.record_miss();

        let expected = if self.config.verifies() {
            Some(self.build_real(receiver, context)?)
        } else {
            None
        };

        let proxied = BuildArgs::proxied(context.values())?;
        let template = CachedTemplate::from_built(self.builder.build(receiver, &proxied)?);
        let query = template.normalize(context)?;

        if let Some(expected) = expected {
            if let Err(failure) = assert_equivalent(&expected, &query, "Can't cache query") {
                if self.config.strict {
                    return Err(failure.into());
                }
                warn!("Serving uncached query for {name}:{signature}\n{key}");
                self.cache.record_fallback();
                if self.config.remember_failures {
                    self.cache.mark_uncacheable(signature, key, failure.clone());
                }
                return Ok(Outcome::VerificationFailed {
                    query: expected,
                    failure,
                });
            }
        }

        self.cache.store(signature, key, template);
        Ok(Outcome::Cached { query, hit: false })
    }

    fn build_real(&self, receiver: &B::Receiver, context: &ValueContext) -> PrepqResult<Prepared> {
        let built = self.builder.build(receiver, &BuildArgs::real(context.values()))?;
        normalize_built(&built, context)
    }
}
