//! Position reconciliation: drive one symbol on one account from its live
//! position to a target.
//!
//! Nothing here is persisted. Every call refetches the live position, so a
//! retried call after a partial failure picks up where the exchange actually
//! is.
//!
//! Decision order:
//!
//! 1. Target zero: close (native close, else a reduce-only order) unless the
//!    live size is already below `min_size`.
//! 2. Opposite signs: native close, then open from flat. Without a working
//!    native close, one order of `|current| + |target|` crosses zero.
//! 3. Open exposure with different leverage or margin mode: update it. A
//!    refused margin-mode change forces a full close and the symbol then
//!    reopens from flat.
//! 4. Same direction: one order for the difference, reduce-only when
//!    shrinking, skipped inside the tolerance band.
//!
//! Any order larger than `max_size` is split into paced chunks; a failed
//! chunk fails the whole call.

use depthsync_core::{
    AccountAdapter, AdapterError, CloseOutcome, OrderResult, ReconciliationTarget, Side,
    SymbolMetadata, UnifiedPosition,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bounded::bounded;
use crate::quantize::{floor_to_step, quantize_size, split_chunks, MAX_ORDER_CHUNKS};

/// Relative part of the same-direction tolerance band.
const RELATIVE_SIZE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("fetching position for {symbol} failed: {source}")]
    FetchPosition { symbol: String, source: AdapterError },

    #[error("setting leverage for {symbol} failed: {source}")]
    Leverage { symbol: String, source: AdapterError },

    #[error("order {chunk}/{of} for {symbol} failed: {source}")]
    Order {
        symbol: String,
        chunk: usize,
        of: usize,
        source: AdapterError,
    },

    #[error("closing {symbol} failed: {source}")]
    Close { symbol: String, source: AdapterError },

    #[error("{quantity} {symbol} needs more than {max_chunks} orders of at most {max_size}")]
    TooManyChunks {
        symbol: String,
        quantity: Decimal,
        max_size: Decimal,
        max_chunks: usize,
    },
}

impl ReconcileError {
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::FetchPosition { symbol, .. }
            | Self::Leverage { symbol, .. }
            | Self::Order { symbol, .. }
            | Self::Close { symbol, .. }
            | Self::TooManyChunks { symbol, .. } => symbol,
        }
    }

    /// True if the underlying adapter failure is likely to clear on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::FetchPosition { source, .. }
            | Self::Leverage { source, .. }
            | Self::Order { source, .. }
            | Self::Close { source, .. } => source.is_transient(),
            Self::TooManyChunks { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    /// Inside the tolerance band, or already flat.
    NoOp,
    Open,
    Increase,
    Reduce,
    Close,
    Flip,
}

impl std::fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoOp => "no-op",
            Self::Open => "open",
            Self::Increase => "increase",
            Self::Reduce => "reduce",
            Self::Close => "close",
            Self::Flip => "flip",
        };
        write!(f, "{s}")
    }
}

/// What one reconcile call did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub symbol: String,
    pub action: ReconcileAction,
    pub before: Decimal,
    /// Quantised target.
    pub target: Decimal,
    pub orders: Vec<OrderResult>,
    pub leverage_updated: bool,
    /// A refused margin-mode change closed the position first.
    pub forced_close: bool,
}

impl ReconcileReport {
    fn new(symbol: &str, before: Decimal, target: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            action: ReconcileAction::NoOp,
            before,
            target,
            orders: Vec::new(),
            leverage_updated: false,
            forced_close: false,
        }
    }

    /// Net signed quantity of all placed orders.
    #[must_use]
    pub fn filled(&self) -> Decimal {
        self.orders.iter().map(|o| o.side.sign() * o.quantity).sum()
    }
}

/// Same-direction band inside which no order is placed.
///
/// Both sides non-zero: `max(lot_size, 0.001 * min(|current|, |target|))`.
/// Closing to zero: `min_size`. Opening from zero: no band.
#[must_use]
pub fn size_tolerance(current: Decimal, target: Decimal, meta: &SymbolMetadata) -> Decimal {
    if current.is_zero() {
        return Decimal::ZERO;
    }
    if target.is_zero() {
        return meta.min_size;
    }
    meta.lot_size
        .max(RELATIVE_SIZE_TOLERANCE * current.abs().min(target.abs()))
}

#[derive(Debug, Clone)]
pub struct PositionReconciler {
    call_timeout: Duration,
    order_pacing: Duration,
}

impl Default for PositionReconciler {
    fn default() -> Self {
        Self::new(Duration::from_secs(8), Duration::from_millis(250))
    }
}

impl PositionReconciler {
    #[must_use]
    pub const fn new(call_timeout: Duration, order_pacing: Duration) -> Self {
        Self {
            call_timeout,
            order_pacing,
        }
    }

    /// Converges `target.symbol` on `adapter` to `target`.
    ///
    /// # Errors
    /// Returns the first failing step. Orders already placed are not undone;
    /// the next call starts again from the live position.
    pub async fn reconcile(
        &self,
        adapter: &dyn AccountAdapter,
        target: &ReconciliationTarget,
        meta: &SymbolMetadata,
    ) -> Result<ReconcileReport, ReconcileError> {
        let symbol = target.symbol.as_str();
        let account = adapter.exchange_name();

        let position = self.fetch_position(adapter, symbol).await?;
        let mut current = position.as_ref().map_or(Decimal::ZERO, |p| p.size);
        let desired = quantize_size(target.size, meta);
        let mut report = ReconcileReport::new(symbol, current, desired);

        debug!(
            account,
            symbol,
            current = %current,
            raw_target = %target.size,
            target = %desired,
            "Reconciling"
        );

        if desired.is_zero() {
            return self.close_to_zero(adapter, symbol, current, meta, report).await;
        }

        if !current.is_zero() && current.is_sign_negative() != desired.is_sign_negative() {
            report.action = ReconcileAction::Flip;
            match self.native_close(adapter, symbol).await {
                Some(order) => {
                    info!(account, symbol, from = %current, "Flip: native close done");
                    report.orders.extend(order);
                    current = Decimal::ZERO;
                }
                None => {
                    let quantity = floor_to_step(current.abs() + desired.abs(), meta.lot_size);
                    let side = Side::for_delta(desired);
                    info!(
                        account,
                        symbol,
                        from = %current,
                        to = %desired,
                        quantity = %quantity,
                        side = %side,
                        "Flip: single crossing order"
                    );
                    let orders = self
                        .place_chunked(adapter, symbol, side, quantity, false, meta)
                        .await?;
                    report.orders.extend(orders);
                    return Ok(report);
                }
            }
        }

        if !current.is_zero() {
            if let Some(p) = position.as_ref().filter(|p| needs_leverage_update(p, target)) {
                match self.set_leverage(adapter, target).await {
                    Ok(()) => report.leverage_updated = true,
                    Err(e) if p.margin_mode != target.margin_mode => {
                        warn!(
                            account,
                            symbol,
                            from = %p.margin_mode,
                            to = %target.margin_mode,
                            error = %e,
                            "Margin mode change refused under open position, forcing full close"
                        );
                        let orders = self.force_close(adapter, symbol, current, meta).await?;
                        report.orders.extend(orders);
                        report.forced_close = true;
                        current = Decimal::ZERO;
                    }
                    Err(e) => {
                        return Err(ReconcileError::Leverage {
                            symbol: symbol.to_string(),
                            source: e,
                        })
                    }
                }
            }
        }

        let remaining = desired - current;
        let tolerance = size_tolerance(current, desired, meta);
        if !current.is_zero() && remaining.abs() < tolerance {
            debug!(
                account,
                symbol,
                remaining = %remaining,
                tolerance = %tolerance,
                "Within tolerance, no order"
            );
            return Ok(report);
        }

        let quantity = floor_to_step(remaining.abs(), meta.lot_size);
        if quantity.is_zero() || quantity < meta.min_size {
            debug!(
                account,
                symbol,
                remaining = %remaining,
                quantity = %quantity,
                min_size = %meta.min_size,
                "Difference below exchange minimum, no order"
            );
            return Ok(report);
        }

        let opening = current.is_zero();
        if opening && !report.leverage_updated {
            self.set_leverage(adapter, target)
                .await
                .map_err(|source| ReconcileError::Leverage {
                    symbol: symbol.to_string(),
                    source,
                })?;
            report.leverage_updated = true;
        }

        let reduce_only = !opening && desired.abs() < current.abs();
        let side = Side::for_delta(remaining);
        if report.action != ReconcileAction::Flip {
            report.action = if opening {
                ReconcileAction::Open
            } else if reduce_only {
                ReconcileAction::Reduce
            } else {
                ReconcileAction::Increase
            };
        }

        info!(
            account,
            symbol,
            action = %report.action,
            from = %current,
            to = %desired,
            raw_quantity = %remaining.abs(),
            quantity = %quantity,
            side = %side,
            reduce_only,
            "Placing order"
        );
        let orders = self
            .place_chunked(adapter, symbol, side, quantity, reduce_only, meta)
            .await?;
        report.orders.extend(orders);
        Ok(report)
    }

    async fn fetch_position(
        &self,
        adapter: &dyn AccountAdapter,
        symbol: &str,
    ) -> Result<Option<UnifiedPosition>, ReconcileError> {
        let positions = bounded(
            "fetch_positions",
            self.call_timeout,
            adapter.fetch_positions(symbol),
        )
        .await
        .map_err(|source| ReconcileError::FetchPosition {
            symbol: symbol.to_string(),
            source,
        })?;

        let mut live = positions.into_iter().filter(|p| p.symbol == symbol);
        let Some(mut first) = live.next() else {
            return Ok(None);
        };
        // hedge-mode venues may report both legs
        for other in live {
            first.size += other.size;
        }
        Ok(Some(first))
    }

    async fn close_to_zero(
        &self,
        adapter: &dyn AccountAdapter,
        symbol: &str,
        current: Decimal,
        meta: &SymbolMetadata,
        mut report: ReconcileReport,
    ) -> Result<ReconcileReport, ReconcileError> {
        let account = adapter.exchange_name();
        if current.abs() < size_tolerance(current, Decimal::ZERO, meta) || current.is_zero() {
            debug!(account, symbol, current = %current, "Already flat");
            return Ok(report);
        }

        report.action = ReconcileAction::Close;
        info!(account, symbol, from = %current, "Closing position");
        if let Some(order) = self.native_close(adapter, symbol).await {
            report.orders.extend(order);
            return Ok(report);
        }

        let quantity = floor_to_step(current.abs(), meta.lot_size);
        let orders = self
            .place_chunked(adapter, symbol, Side::for_delta(-current), quantity, true, meta)
            .await?;
        report.orders.extend(orders);
        Ok(report)
    }

    /// `Some` when the venue closed the position (or found nothing open);
    /// `None` when the caller must fall back to a market order.
    async fn native_close(
        &self,
        adapter: &dyn AccountAdapter,
        symbol: &str,
    ) -> Option<Option<OrderResult>> {
        match bounded("close_position", self.call_timeout, adapter.close_position(symbol)).await {
            Ok(CloseOutcome::Closed(order)) => Some(Some(order)),
            Ok(CloseOutcome::NoPosition) | Err(AdapterError::NoPosition { .. }) => Some(None),
            Ok(CloseOutcome::NotSupported) | Err(AdapterError::NotSupported(_)) => {
                debug!(account = adapter.exchange_name(), symbol, "Native close not supported");
                None
            }
            Err(e) => {
                warn!(
                    account = adapter.exchange_name(),
                    symbol,
                    error = %e,
                    "Native close failed, falling back to market order"
                );
                None
            }
        }
    }

    async fn force_close(
        &self,
        adapter: &dyn AccountAdapter,
        symbol: &str,
        current: Decimal,
        meta: &SymbolMetadata,
    ) -> Result<Vec<OrderResult>, ReconcileError> {
        if let Some(order) = self.native_close(adapter, symbol).await {
            return Ok(order.into_iter().collect());
        }
        let quantity = floor_to_step(current.abs(), meta.lot_size);
        self.place_chunked(adapter, symbol, Side::for_delta(-current), quantity, true, meta)
            .await
            .map_err(|e| match e {
                ReconcileError::Order { source, .. } => ReconcileError::Close {
                    symbol: symbol.to_string(),
                    source,
                },
                other => other,
            })
    }

    async fn set_leverage(
        &self,
        adapter: &dyn AccountAdapter,
        target: &ReconciliationTarget,
    ) -> Result<(), AdapterError> {
        bounded(
            "set_leverage",
            self.call_timeout,
            adapter.set_leverage(&target.symbol, target.leverage, target.margin_mode),
        )
        .await?;
        debug!(
            account = adapter.exchange_name(),
            symbol = %target.symbol,
            leverage = %target.leverage,
            margin_mode = %target.margin_mode,
            "Leverage set"
        );
        Ok(())
    }

    async fn place_chunked(
        &self,
        adapter: &dyn AccountAdapter,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        reduce_only: bool,
        meta: &SymbolMetadata,
    ) -> Result<Vec<OrderResult>, ReconcileError> {
        let chunks =
            split_chunks(quantity, meta).ok_or_else(|| ReconcileError::TooManyChunks {
                symbol: symbol.to_string(),
                quantity,
                max_size: meta.max_size,
                max_chunks: MAX_ORDER_CHUNKS,
            })?;
        let of = chunks.len();
        let mut placed = Vec::with_capacity(of);

        for (i, chunk) in chunks.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.order_pacing).await;
            }
            let order = bounded(
                "place_market_order",
                self.call_timeout,
                adapter.place_market_order(symbol, side, chunk, reduce_only),
            )
            .await
            .map_err(|source| ReconcileError::Order {
                symbol: symbol.to_string(),
                chunk: i + 1,
                of,
                source,
            })?;

            info!(
                account = adapter.exchange_name(),
                symbol,
                chunk = i + 1,
                of,
                side = %side,
                quantity = %chunk,
                reduce_only,
                order_id = %order.order_id,
                "Order placed"
            );
            placed.push(order);
        }
        Ok(placed)
    }
}

fn needs_leverage_update(position: &UnifiedPosition, target: &ReconciliationTarget) -> bool {
    let leverage_differs = !position.leverage.is_zero() && position.leverage != target.leverage;
    leverage_differs || position.margin_mode != target.margin_mode
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthsync_core::MarginMode;
    use depthsync_paper::PaperAccount;
    use rust_decimal_macros::dec;

    const BTC: &str = "BTCUSDT";

    fn meta() -> SymbolMetadata {
        SymbolMetadata::new(dec!(0.001), dec!(0.001), dec!(0.1))
    }

    fn account(native_close: bool) -> PaperAccount {
        PaperAccount::new("paper", dec!(10000))
            .with_native_close(native_close)
            .with_symbol(BTC, meta(), dec!(50000))
    }

    fn target(size: Decimal) -> ReconciliationTarget {
        ReconciliationTarget {
            symbol: BTC.to_string(),
            size,
            leverage: dec!(5),
            margin_mode: MarginMode::Cross,
        }
    }

    fn reconciler() -> PositionReconciler {
        PositionReconciler::new(Duration::from_secs(1), Duration::from_millis(1))
    }

    #[test]
    fn tolerance_band() {
        let m = meta();
        assert_eq!(size_tolerance(dec!(10), dec!(12), &m), dec!(0.01));
        assert_eq!(size_tolerance(dec!(0.5), dec!(0.4), &m), dec!(0.001));
        assert_eq!(size_tolerance(dec!(0.5), Decimal::ZERO, &m), dec!(0.001));
        assert_eq!(size_tolerance(Decimal::ZERO, dec!(0.5), &m), Decimal::ZERO);
    }

    #[tokio::test]
    async fn difference_just_inside_band_places_nothing() {
        let acct = account(true).with_position(BTC, dec!(10), dec!(5), MarginMode::Cross);
        let report = reconciler()
            .reconcile(&acct, &target(dec!(10.009)), &meta())
            .await
            .unwrap();

        assert_eq!(report.action, ReconcileAction::NoOp);
        assert!(report.orders.is_empty());
        assert!(acct.orders().is_empty());
        assert_eq!(acct.position_size(BTC), dec!(10));
    }

    #[tokio::test]
    async fn difference_just_outside_band_places_one_order() {
        let acct = account(true).with_position(BTC, dec!(10), dec!(5), MarginMode::Cross);
        let report = reconciler()
            .reconcile(&acct, &target(dec!(10.011)), &meta())
            .await
            .unwrap();

        assert_eq!(report.action, ReconcileAction::Increase);
        assert_eq!(report.orders.len(), 1);
        assert_eq!(report.orders[0].side, Side::Buy);
        assert_eq!(report.orders[0].quantity, dec!(0.011));
        assert!(!report.orders[0].reduce_only);
        assert_eq!(acct.position_size(BTC), dec!(10.011));
    }

    #[tokio::test]
    async fn chunk_remainder_below_min_size_is_still_filled() {
        let meta = SymbolMetadata::new(dec!(0.001), dec!(0.01), dec!(0.1)).with_max_size(dec!(1));
        let acct = PaperAccount::new("paper", dec!(10000)).with_symbol(BTC, meta.clone(), dec!(50000));

        let report = reconciler()
            .reconcile(&acct, &target(dec!(1.005)), &meta)
            .await
            .unwrap();

        let quantities: Vec<Decimal> = report.orders.iter().map(|o| o.quantity).collect();
        assert_eq!(quantities, vec![dec!(0.995), dec!(0.010)]);
        assert_eq!(acct.position_size(BTC), dec!(1.005));
    }

    #[tokio::test]
    async fn too_many_chunks_fails_before_any_order() {
        let meta = meta().with_max_size(dec!(0.001));
        let acct = PaperAccount::new("paper", dec!(10000)).with_symbol(BTC, meta.clone(), dec!(50000));

        let err = reconciler()
            .reconcile(&acct, &target(dec!(1)), &meta)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::TooManyChunks { .. }));
        assert_eq!(err.symbol(), BTC);
        assert!(!err.is_transient());
        assert!(acct.orders().is_empty());
    }

    #[tokio::test]
    async fn opens_from_flat_and_sets_leverage() {
        let acct = account(true);
        let report = reconciler()
            .reconcile(&acct, &target(dec!(0.1004)), &meta())
            .await
            .unwrap();

        assert_eq!(report.action, ReconcileAction::Open);
        assert!(report.leverage_updated);
        assert_eq!(report.target, dec!(0.100));
        assert_eq!(acct.position_size(BTC), dec!(0.100));
        assert_eq!(acct.leverage_of(BTC), Some((dec!(5), MarginMode::Cross)));
    }

    #[tokio::test]
    async fn second_call_is_a_no_op() {
        let acct = account(true);
        let r = reconciler();
        r.reconcile(&acct, &target(dec!(0.25)), &meta()).await.unwrap();
        let second = r.reconcile(&acct, &target(dec!(0.25)), &meta()).await.unwrap();

        assert_eq!(second.action, ReconcileAction::NoOp);
        assert!(second.orders.is_empty());
        assert_eq!(acct.orders().len(), 1);
    }

    #[tokio::test]
    async fn reduce_is_reduce_only() {
        let acct = account(true).with_position(BTC, dec!(1.0), dec!(5), MarginMode::Cross);
        let report = reconciler()
            .reconcile(&acct, &target(dec!(0.4)), &meta())
            .await
            .unwrap();

        assert_eq!(report.action, ReconcileAction::Reduce);
        assert_eq!(report.orders.len(), 1);
        assert!(report.orders[0].reduce_only);
        assert_eq!(report.orders[0].side, Side::Sell);
        assert_eq!(report.orders[0].quantity, dec!(0.6));
    }

    #[tokio::test]
    async fn flip_without_native_close_is_one_order() {
        let meta = SymbolMetadata::new(dec!(1), dec!(1), dec!(0.01));
        let acct = PaperAccount::new("paper", dec!(10000))
            .with_native_close(false)
            .with_symbol(BTC, meta.clone(), dec!(100))
            .with_position(BTC, dec!(-50), dec!(5), MarginMode::Cross);

        let report = reconciler()
            .reconcile(&acct, &target(dec!(10)), &meta)
            .await
            .unwrap();

        assert_eq!(report.action, ReconcileAction::Flip);
        assert_eq!(report.orders.len(), 1);
        assert_eq!(report.orders[0].side, Side::Buy);
        assert_eq!(report.orders[0].quantity, dec!(60));
        assert_eq!(acct.position_size(BTC), dec!(10));
    }

    #[tokio::test]
    async fn flip_with_native_close_closes_then_opens() {
        let acct = account(true).with_position(BTC, dec!(0.3), dec!(5), MarginMode::Cross);
        let report = reconciler()
            .reconcile(&acct, &target(dec!(-0.2)), &meta())
            .await
            .unwrap();

        assert_eq!(report.action, ReconcileAction::Flip);
        assert_eq!(report.orders.len(), 2);
        assert_eq!(acct.position_size(BTC), dec!(-0.2));
    }

    #[tokio::test]
    async fn failed_native_close_on_flip_uses_one_crossing_order() {
        let acct = account(true).with_position(BTC, dec!(0.3), dec!(5), MarginMode::Cross);
        acct.set_fail_close(true);
        let report = reconciler()
            .reconcile(&acct, &target(dec!(-0.2)), &meta())
            .await
            .unwrap();

        assert_eq!(report.action, ReconcileAction::Flip);
        assert_eq!(report.orders.len(), 1);
        assert_eq!(report.orders[0].side, Side::Sell);
        assert_eq!(report.orders[0].quantity, dec!(0.5));
        assert_eq!(acct.position_size(BTC), dec!(-0.2));
    }

    #[tokio::test]
    async fn position_fetch_failure_is_transient_error() {
        let acct = account(true);
        acct.set_fail_positions(true);
        let err = reconciler()
            .reconcile(&acct, &target(dec!(0.2)), &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::FetchPosition { .. }));
        assert!(err.is_transient());
        assert!(acct.orders().is_empty());
    }

    #[tokio::test]
    async fn close_falls_back_to_reduce_only_order() {
        let acct = account(false).with_position(BTC, dec!(-0.3), dec!(5), MarginMode::Cross);
        let report = reconciler()
            .reconcile(&acct, &target(Decimal::ZERO), &meta())
            .await
            .unwrap();

        assert_eq!(report.action, ReconcileAction::Close);
        assert!(report.orders[0].reduce_only);
        assert_eq!(report.orders[0].side, Side::Buy);
        assert!(acct.position_size(BTC).is_zero());
    }

    #[tokio::test]
    async fn dust_below_min_size_is_left_alone() {
        let meta = SymbolMetadata::new(dec!(0.001), dec!(0.01), dec!(0.1));
        let acct = PaperAccount::new("paper", dec!(10000))
            .with_symbol(BTC, meta.clone(), dec!(50000))
            .with_position(BTC, dec!(0.005), dec!(5), MarginMode::Cross);

        let report = reconciler()
            .reconcile(&acct, &target(Decimal::ZERO), &meta)
            .await
            .unwrap();
        assert_eq!(report.action, ReconcileAction::NoOp);
        assert!(acct.orders().is_empty());
    }

    #[tokio::test]
    async fn oversized_order_is_chunked() {
        let meta = meta().with_max_size(dec!(1));
        let acct = PaperAccount::new("paper", dec!(10000)).with_symbol(BTC, meta.clone(), dec!(50000));

        let report = reconciler()
            .reconcile(&acct, &target(dec!(2.4)), &meta)
            .await
            .unwrap();

        let quantities: Vec<Decimal> = report.orders.iter().map(|o| o.quantity).collect();
        assert_eq!(quantities, vec![dec!(1), dec!(1), dec!(0.4)]);
        assert_eq!(report.filled(), dec!(2.4));
    }

    #[tokio::test]
    async fn failed_chunk_fails_reconciliation() {
        let meta = meta().with_max_size(dec!(1));
        let acct = PaperAccount::new("paper", dec!(10000)).with_symbol(BTC, meta.clone(), dec!(50000));
        acct.fail_orders_after(1);

        let err = reconciler()
            .reconcile(&acct, &target(dec!(2.4)), &meta)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Order { chunk: 2, of: 3, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn refused_margin_mode_change_forces_close_then_reopens() {
        let acct = account(true).with_position(BTC, dec!(0.5), dec!(5), MarginMode::Isolated);
        let report = reconciler()
            .reconcile(&acct, &target(dec!(0.5)), &meta())
            .await
            .unwrap();

        assert!(report.forced_close);
        assert_eq!(acct.position_size(BTC), dec!(0.5));
        assert_eq!(acct.leverage_of(BTC), Some((dec!(5), MarginMode::Cross)));
    }

    #[tokio::test]
    async fn leverage_failure_on_open_aborts() {
        let acct = account(true);
        acct.set_fail_leverage(true);
        let err = reconciler()
            .reconcile(&acct, &target(dec!(0.2)), &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Leverage { .. }));
        assert!(acct.orders().is_empty());
    }
}
