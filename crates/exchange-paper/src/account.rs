//! Simulated exchange account.
//!
//! `PaperAccount` implements [`AccountAdapter`] entirely in memory. Orders fill
//! immediately at the configured price. It models the venue rules the
//! reconciler has to cope with:
//!
//! - minimum size and maximum order size from [`SymbolMetadata`]
//! - reduce-only orders that may not grow or flip a position
//! - margin mode cannot change while a position is open
//! - optional native close support
//!
//! Failure injection hooks (`fail_orders_after`, `set_fail_balance`, ...) and
//! the order log make it usable as a test double.

use async_trait::async_trait;
use depthsync_core::{
    AccountAdapter, AdapterError, AdapterResult, CloseOutcome, MarginMode, OrderResult,
    PaperAccountConfig, Side, SymbolMetadata, Ticker, UnifiedPosition,
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug, Clone)]
struct PaperPosition {
    size: Decimal,
    entry_price: Decimal,
}

#[derive(Debug, Default)]
struct Failures {
    /// Orders that may still succeed before every further order fails.
    orders_remaining: Option<usize>,
    balance: bool,
    leverage: bool,
    close: bool,
    positions: bool,
    metadata: HashSet<String>,
}

#[derive(Debug, Default)]
struct PaperState {
    balance: Decimal,
    positions: HashMap<String, PaperPosition>,
    leverage: HashMap<String, (Decimal, MarginMode)>,
    metadata: HashMap<String, SymbolMetadata>,
    prices: HashMap<String, Decimal>,
    orders: Vec<OrderResult>,
    failures: Failures,
}

// =============================================================================
// Paper Account
// =============================================================================

pub struct PaperAccount {
    name: String,
    enabled: AtomicBool,
    max_concurrency: usize,
    native_close: bool,
    symbol_map: HashMap<String, String>,
    latency: Option<Duration>,
    state: Arc<RwLock<PaperState>>,
}

impl std::fmt::Debug for PaperAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperAccount")
            .field("name", &self.name)
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .field("native_close", &self.native_close)
            .finish_non_exhaustive()
    }
}

impl PaperAccount {
    #[must_use]
    pub fn new(name: impl Into<String>, balance: Decimal) -> Self {
        Self {
            name: name.into(),
            enabled: AtomicBool::new(true),
            max_concurrency: 4,
            native_close: true,
            symbol_map: HashMap::new(),
            latency: None,
            state: Arc::new(RwLock::new(PaperState {
                balance,
                ..PaperState::default()
            })),
        }
    }

    /// Builds an account from its configuration entry.
    #[must_use]
    pub fn from_config(config: &PaperAccountConfig) -> Self {
        let mut account = Self::new(&config.name, config.balance)
            .with_enabled(config.enabled)
            .with_native_close(config.supports_native_close);
        if config.latency_ms > 0 {
            account = account.with_latency(Duration::from_millis(config.latency_ms));
        }
        if let Some(limit) = config.max_concurrency {
            account = account.with_max_concurrency(limit);
        }
        for (signal_symbol, exchange_symbol) in &config.symbol_map {
            account = account.with_symbol_mapping(signal_symbol, exchange_symbol);
        }
        {
            let mut state = account.state.write();
            state.metadata.extend(config.symbol_metadata.clone());
            state.prices.extend(config.prices.clone());
        }
        account
    }

    #[must_use]
    pub fn with_enabled(self, enabled: bool) -> Self {
        self.enabled.store(enabled, Ordering::Relaxed);
        self
    }

    #[must_use]
    pub fn with_native_close(mut self, supported: bool) -> Self {
        self.native_close = supported;
        self
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Maps a signal symbol to a different venue symbol.
    #[must_use]
    pub fn with_symbol_mapping(mut self, signal_symbol: &str, exchange_symbol: &str) -> Self {
        self.symbol_map
            .insert(signal_symbol.to_string(), exchange_symbol.to_string());
        self
    }

    /// Lists a tradable instrument with its metadata and last price.
    #[must_use]
    pub fn with_symbol(self, symbol: &str, meta: SymbolMetadata, price: Decimal) -> Self {
        {
            let mut state = self.state.write();
            state.metadata.insert(symbol.to_string(), meta);
            state.prices.insert(symbol.to_string(), price);
        }
        self
    }

    /// Seeds an open position, as if traded out-of-band.
    #[must_use]
    pub fn with_position(
        self,
        symbol: &str,
        size: Decimal,
        leverage: Decimal,
        margin_mode: MarginMode,
    ) -> Self {
        self.set_position(symbol, size);
        self.state
            .write()
            .leverage
            .insert(symbol.to_string(), (leverage, margin_mode));
        self
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Overwrites a position without recording an order.
    pub fn set_position(&self, symbol: &str, size: Decimal) {
        let mut state = self.state.write();
        let price = state.prices.get(symbol).copied().unwrap_or_default();
        if size.is_zero() {
            state.positions.remove(symbol);
        } else {
            state.positions.insert(
                symbol.to_string(),
                PaperPosition {
                    size,
                    entry_price: price,
                },
            );
        }
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn position_size(&self, symbol: &str) -> Decimal {
        self.state
            .read()
            .positions
            .get(symbol)
            .map_or(Decimal::ZERO, |p| p.size)
    }

    #[must_use]
    pub fn leverage_of(&self, symbol: &str) -> Option<(Decimal, MarginMode)> {
        self.state.read().leverage.get(symbol).copied()
    }

    /// Every filled order, oldest first.
    #[must_use]
    pub fn orders(&self) -> Vec<OrderResult> {
        self.state.read().orders.clone()
    }

    // -------------------------------------------------------------------------
    // Failure injection
    // -------------------------------------------------------------------------

    /// Lets `n` more orders succeed, then rejects every order after them.
    pub fn fail_orders_after(&self, n: usize) {
        self.state.write().failures.orders_remaining = Some(n);
    }

    pub fn clear_order_failures(&self) {
        self.state.write().failures.orders_remaining = None;
    }

    pub fn set_fail_balance(&self, fail: bool) {
        self.state.write().failures.balance = fail;
    }

    pub fn set_fail_leverage(&self, fail: bool) {
        self.state.write().failures.leverage = fail;
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.state.write().failures.close = fail;
    }

    pub fn set_fail_positions(&self, fail: bool) {
        self.state.write().failures.positions = fail;
    }

    pub fn set_fail_metadata(&self, symbol: &str, fail: bool) {
        let mut state = self.state.write();
        if fail {
            state.failures.metadata.insert(symbol.to_string());
        } else {
            state.failures.metadata.remove(symbol);
        }
    }

    // -------------------------------------------------------------------------
    // Simulation
    // -------------------------------------------------------------------------

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn fill(
        &self,
        state: &mut PaperState,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        reduce_only: bool,
    ) -> OrderResult {
        let price = state.prices.get(symbol).copied().unwrap_or_default();
        let current = state.positions.get(symbol).map_or(Decimal::ZERO, |p| p.size);
        let next = current + side.sign() * quantity;

        if next.is_zero() {
            state.positions.remove(symbol);
        } else {
            let entry_price = match state.positions.get(symbol) {
                // same direction and growing: size-weighted entry
                Some(p) if p.size.is_sign_negative() == next.is_sign_negative()
                    && next.abs() > p.size.abs() =>
                {
                    (p.entry_price * p.size.abs() + price * quantity) / next.abs()
                }
                Some(p) if p.size.is_sign_negative() == next.is_sign_negative() => p.entry_price,
                _ => price,
            };
            state.positions.insert(
                symbol.to_string(),
                PaperPosition {
                    size: next,
                    entry_price,
                },
            );
        }

        let order = OrderResult {
            order_id: format!("paper-{}", Uuid::new_v4()),
            symbol: symbol.to_string(),
            side,
            quantity,
            reduce_only,
            avg_price: Some(price),
            timestamp: chrono::Utc::now(),
        };
        debug!(
            account = %self.name,
            symbol,
            side = %side,
            quantity = %quantity,
            reduce_only,
            position = %next,
            "Paper fill"
        );
        state.orders.push(order.clone());
        order
    }
}

// =============================================================================
// AccountAdapter
// =============================================================================

#[async_trait]
impl AccountAdapter for PaperAccount {
    fn exchange_name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    fn map_signal_symbol_to_exchange(&self, symbol: &str) -> String {
        self.symbol_map
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| symbol.to_string())
    }

    async fn fetch_balance(&self, _instrument: &str) -> AdapterResult<Decimal> {
        self.simulate_latency().await;
        let state = self.state.read();
        if state.failures.balance {
            return Err(AdapterError::Network("simulated balance outage".into()));
        }
        Ok(state.balance)
    }

    async fn fetch_positions(&self, symbol: &str) -> AdapterResult<Vec<UnifiedPosition>> {
        self.simulate_latency().await;
        let state = self.state.read();
        if state.failures.positions {
            return Err(AdapterError::Network("simulated position outage".into()));
        }
        let Some(position) = state.positions.get(symbol) else {
            return Ok(Vec::new());
        };
        let (leverage, margin_mode) = state
            .leverage
            .get(symbol)
            .copied()
            .unwrap_or((Decimal::ONE, MarginMode::Cross));
        Ok(vec![UnifiedPosition::new(
            &self.name,
            symbol,
            position.size,
            leverage,
            margin_mode,
        )
        .with_entry_price(position.entry_price)])
    }

    async fn fetch_ticker(&self, symbol: &str) -> AdapterResult<Ticker> {
        self.simulate_latency().await;
        let state = self.state.read();
        let Some(price) = state.prices.get(symbol).copied() else {
            return Err(AdapterError::rejected(format!("no market for {symbol}")));
        };
        Ok(Ticker {
            bid: price,
            ask: price,
            last: price,
            volume: Decimal::ZERO,
        })
    }

    async fn get_symbol_metadata(&self, symbol: &str) -> AdapterResult<SymbolMetadata> {
        self.simulate_latency().await;
        let state = self.state.read();
        if state.failures.metadata.contains(symbol) {
            return Err(AdapterError::api(503, "simulated metadata outage"));
        }
        state
            .metadata
            .get(symbol)
            .cloned()
            .ok_or_else(|| AdapterError::missing_metadata(symbol))
    }

    async fn set_leverage(
        &self,
        symbol: &str,
        leverage: Decimal,
        margin_mode: MarginMode,
    ) -> AdapterResult<()> {
        self.simulate_latency().await;
        let mut state = self.state.write();
        if state.failures.leverage {
            return Err(AdapterError::rejected("simulated leverage rejection"));
        }
        if leverage <= Decimal::ZERO {
            return Err(AdapterError::InvalidOrder(format!("leverage {leverage}")));
        }

        let open = state.positions.get(symbol).is_some_and(|p| !p.size.is_zero());
        let current_mode = state.leverage.get(symbol).map(|(_, m)| *m);
        if open && current_mode.is_some_and(|m| m != margin_mode) {
            return Err(AdapterError::rejected(
                "margin mode cannot change with an open position",
            ));
        }

        state
            .leverage
            .insert(symbol.to_string(), (leverage, margin_mode));
        Ok(())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        reduce_only: bool,
    ) -> AdapterResult<OrderResult> {
        self.simulate_latency().await;
        let mut state = self.state.write();

        if let Some(remaining) = state.failures.orders_remaining.as_mut() {
            if *remaining == 0 {
                return Err(AdapterError::rejected("simulated order rejection"));
            }
            *remaining -= 1;
        }

        let Some(meta) = state.metadata.get(symbol).cloned() else {
            return Err(AdapterError::missing_metadata(symbol));
        };
        if quantity <= Decimal::ZERO || quantity < meta.min_size {
            return Err(AdapterError::InvalidOrder(format!(
                "quantity {quantity} below minimum {}",
                meta.min_size
            )));
        }
        if meta.has_max_size() && quantity > meta.max_size {
            return Err(AdapterError::InvalidOrder(format!(
                "quantity {quantity} above maximum {}",
                meta.max_size
            )));
        }

        if reduce_only {
            let current = state.positions.get(symbol).map_or(Decimal::ZERO, |p| p.size);
            let reduces = !current.is_zero()
                && Side::for_delta(-current) == side
                && quantity <= current.abs();
            if !reduces {
                return Err(AdapterError::rejected(format!(
                    "reduce-only {side} {quantity} would not reduce position {current}"
                )));
            }
        }

        Ok(self.fill(&mut state, symbol, side, quantity, reduce_only))
    }

    async fn close_position(&self, symbol: &str) -> AdapterResult<CloseOutcome> {
        if !self.native_close {
            return Ok(CloseOutcome::NotSupported);
        }
        self.simulate_latency().await;
        let mut state = self.state.write();
        if state.failures.close {
            return Err(AdapterError::Network("simulated close failure".into()));
        }

        let current = state.positions.get(symbol).map_or(Decimal::ZERO, |p| p.size);
        if current.is_zero() {
            return Ok(CloseOutcome::NoPosition);
        }
        let order = self.fill(&mut state, symbol, Side::for_delta(-current), current.abs(), true);
        Ok(CloseOutcome::Closed(order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const BTC: &str = "BTCUSDT";

    fn account() -> PaperAccount {
        PaperAccount::new("paper", dec!(10000)).with_symbol(
            BTC,
            SymbolMetadata::new(dec!(0.001), dec!(0.001), dec!(0.1)).with_max_size(dec!(5)),
            dec!(50000),
        )
    }

    #[tokio::test]
    async fn market_order_moves_position() {
        let acct = account();
        acct.place_market_order(BTC, Side::Buy, dec!(0.5), false)
            .await
            .unwrap();
        acct.place_market_order(BTC, Side::Sell, dec!(0.8), false)
            .await
            .unwrap();

        assert_eq!(acct.position_size(BTC), dec!(-0.3));
        let positions = acct.fetch_positions(BTC).await.unwrap();
        assert_eq!(positions[0].size, dec!(-0.3));
        assert_eq!(acct.orders().len(), 2);
    }

    #[tokio::test]
    async fn reduce_only_cannot_grow_or_flip() {
        let acct = account();
        assert!(acct
            .place_market_order(BTC, Side::Sell, dec!(0.1), true)
            .await
            .is_err());

        acct.set_position(BTC, dec!(0.2));
        assert!(acct
            .place_market_order(BTC, Side::Sell, dec!(0.3), true)
            .await
            .is_err());
        assert!(acct
            .place_market_order(BTC, Side::Sell, dec!(0.2), true)
            .await
            .is_ok());
        assert!(acct.position_size(BTC).is_zero());
    }

    #[tokio::test]
    async fn rejects_sizes_outside_limits() {
        let acct = account();
        assert!(matches!(
            acct.place_market_order(BTC, Side::Buy, dec!(6), false).await,
            Err(AdapterError::InvalidOrder(_))
        ));
        assert!(matches!(
            acct.place_market_order(BTC, Side::Buy, dec!(0.0001), false).await,
            Err(AdapterError::InvalidOrder(_))
        ));
    }

    #[tokio::test]
    async fn margin_mode_locked_under_exposure() {
        let acct = account().with_position(BTC, dec!(1), dec!(3), MarginMode::Cross);
        assert!(acct
            .set_leverage(BTC, dec!(3), MarginMode::Isolated)
            .await
            .is_err());
        // leverage alone may change
        assert!(acct.set_leverage(BTC, dec!(5), MarginMode::Cross).await.is_ok());

        acct.set_position(BTC, Decimal::ZERO);
        assert!(acct
            .set_leverage(BTC, dec!(5), MarginMode::Isolated)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn native_close_outcomes() {
        let acct = account();
        assert_eq!(acct.close_position(BTC).await.unwrap(), CloseOutcome::NoPosition);

        acct.set_position(BTC, dec!(-1.5));
        let CloseOutcome::Closed(order) = acct.close_position(BTC).await.unwrap() else {
            panic!("expected a close order");
        };
        assert_eq!(order.side, Side::Buy);
        assert!(order.reduce_only);

        let no_close = account().with_native_close(false);
        assert_eq!(
            no_close.close_position(BTC).await.unwrap(),
            CloseOutcome::NotSupported
        );
    }

    #[tokio::test]
    async fn order_failure_injection() {
        let acct = account();
        acct.fail_orders_after(1);
        assert!(acct.place_market_order(BTC, Side::Buy, dec!(0.1), false).await.is_ok());
        assert!(acct.place_market_order(BTC, Side::Buy, dec!(0.1), false).await.is_err());
        acct.clear_order_failures();
        assert!(acct.place_market_order(BTC, Side::Buy, dec!(0.1), false).await.is_ok());
    }

    #[test]
    fn from_config_applies_metadata_prices_and_mapping() {
        let mut config = PaperAccountConfig {
            name: "Paper-A".into(),
            enabled: false,
            balance: dec!(2500),
            max_concurrency: Some(2),
            supports_native_close: false,
            symbol_metadata: HashMap::new(),
            prices: HashMap::new(),
            symbol_map: HashMap::new(),
            latency_ms: 5,
        };
        config.symbol_metadata.insert(
            "XBTUSDTM".into(),
            SymbolMetadata::new(dec!(1), dec!(1), dec!(0.1)).with_contract_value(dec!(0.001)),
        );
        config.prices.insert("XBTUSDTM".into(), dec!(60000));
        config.symbol_map.insert("BTCUSDT".into(), "XBTUSDTM".into());

        let acct = PaperAccount::from_config(&config);
        assert!(!acct.enabled());
        assert_eq!(acct.max_concurrency(), 2);
        assert_eq!(acct.map_signal_symbol_to_exchange("BTCUSDT"), "XBTUSDTM");
        assert_eq!(acct.map_signal_symbol_to_exchange("ETHUSDT"), "ETHUSDT");
        assert_eq!(acct.latency, Some(Duration::from_millis(5)));
    }
}
