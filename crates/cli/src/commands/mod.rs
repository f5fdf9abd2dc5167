//! CLI commands for the depth reconciliation loop.

pub mod cache;
pub mod run;
pub mod setup;

pub use cache::CacheArgs;
pub use run::RunArgs;
