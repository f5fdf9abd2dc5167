pub mod cache;
pub mod combiner;
pub mod manager;
pub mod registry;
pub mod sources;

pub use cache::{canonical_account, merge_aliases, AccountDepths, CacheError, DepthCache, DepthSnapshot};
pub use combiner::{combine, Combination};
pub use manager::{
    is_material_change, AccountPlan, SignalManager, SymbolTarget, UpdateSummary,
    ABS_DEPTH_TOLERANCE, REL_DEPTH_TOLERANCE,
};
pub use registry::SourceRegistry;
pub use sources::{parse_snapshot, FileSignalSource, HttpSignalSource, SourceError};
