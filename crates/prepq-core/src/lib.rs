//! prepq core library: a substitution cache for dynamically built queries.
//!
//! A wrapped query builder is run once per argument *shape* with proxy
//! values standing in for the real arguments. The resulting command text and
//! parameter slots are cached as a template; later calls with the same shape
//! skip the builder and only substitute their real values, expanding
//! membership lists to the actual element count.
//!
//! Layout:
//! - [`lazy`]: proxy values and the call-local value context.
//! - [`query`]: builder interface, signatures, normalizer, equivalence check,
//!   template cache and the engine that drives them.
//! - [`store`]: SQLite executor for the prepared commands.

pub mod config;
pub mod errors;
pub mod lazy;
pub mod models;
pub mod query;
pub mod store;

pub use config::SubstituteConfig;
pub use errors::{PrepqError, PrepqResult};
pub use lazy::context::{empty_list_to_null, ContextScope, Preprocessor, ValueContext};
pub use lazy::proxy::{Arg, ProxyValue};
pub use models::{arguments, Arguments, ModelRef, ScalarKind, Value};
pub use query::builder::{BuildArgs, BuiltQuery, FnBuilder, Param, QueryBuilder, SelectBuilder};
pub use query::cache::{CacheStats, CachedTemplate, TemplateCache};
pub use query::engine::{Outcome, SubstituteCache};
pub use query::equivalence::MappingFailure;
pub use query::normalize::Prepared;
pub use query::signature::{CacheKey, KeyPart, Signature, Special};
pub use store::database::{Database, Row};
