pub mod bounded;
pub mod executor;
pub mod metadata_cache;
pub mod quantize;
pub mod reconciler;

pub use bounded::bounded;
pub use executor::{target_size, AccountReport, CycleReport, SymbolReport, TradeExecutor};
pub use metadata_cache::MetadataCache;
pub use quantize::{
    floor_to_step, quantize_price, quantize_size, split_chunks, MAX_ORDER_CHUNKS,
};
pub use reconciler::{
    size_tolerance, PositionReconciler, ReconcileAction, ReconcileError, ReconcileReport,
};
