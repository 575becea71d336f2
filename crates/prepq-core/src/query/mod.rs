pub mod builder;
pub mod cache;
pub mod engine;
pub mod equivalence;
pub mod normalize;
pub mod signature;
