pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod position;
pub mod signal;
pub mod traits;

pub use config::{AppConfig, CacheConfig, EngineConfig, PaperAccountConfig, SourceConfig, SourceKind};
pub use config_loader::{ConfigLoader, SymbolConfigStore};
pub use error::{AdapterError, AdapterResult};
pub use events::{CloseOutcome, OrderResult, Side, Ticker};
pub use position::{
    MarginMode, PositionDirection, ReconciliationTarget, SymbolMetadata, UnifiedPosition,
};
pub use signal::{RawSignal, SignalBatch, SourceWeight, SymbolConfig, WEIGHT_EPSILON};
pub use traits::{AccountAdapter, SignalSource};
