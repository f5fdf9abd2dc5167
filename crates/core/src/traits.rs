use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::AdapterResult;
use crate::events::{CloseOutcome, OrderResult, Side, Ticker};
use crate::position::{MarginMode, SymbolMetadata, UnifiedPosition};
use crate::signal::SignalBatch;

/// Unified capability surface of one exchange account.
///
/// One implementation exists per exchange; the reconciliation algorithm is
/// written once against this trait.
#[async_trait]
pub trait AccountAdapter: Send + Sync {
    /// Name used as the cache and display key.
    fn exchange_name(&self) -> &str;

    /// Disabled accounts are driven flat.
    fn enabled(&self) -> bool;

    /// Concurrent requests this account tolerates; sizes the per-account
    /// admission limiter.
    fn max_concurrency(&self) -> usize {
        4
    }

    /// Translates a signal symbol (e.g. `BTCUSDT`) to the venue's symbol.
    fn map_signal_symbol_to_exchange(&self, symbol: &str) -> String {
        symbol.to_string()
    }

    async fn fetch_balance(&self, instrument: &str) -> AdapterResult<Decimal>;

    async fn fetch_positions(&self, symbol: &str) -> AdapterResult<Vec<UnifiedPosition>>;

    async fn fetch_ticker(&self, symbol: &str) -> AdapterResult<Ticker>;

    async fn get_symbol_metadata(&self, symbol: &str) -> AdapterResult<SymbolMetadata>;

    async fn set_leverage(
        &self,
        symbol: &str,
        leverage: Decimal,
        margin_mode: MarginMode,
    ) -> AdapterResult<()>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        reduce_only: bool,
    ) -> AdapterResult<OrderResult>;

    async fn close_position(&self, symbol: &str) -> AdapterResult<CloseOutcome>;
}

/// A producer of per-symbol directional depth.
#[async_trait]
pub trait SignalSource: Send + Sync {
    fn name(&self) -> &str;

    fn enabled(&self) -> bool {
        true
    }

    async fn fetch_signals(&self) -> anyhow::Result<SignalBatch>;
}
