//! Size and price rounding to exchange increments.
//!
//! Magnitudes are rounded and the sign is reapplied, so a short never rounds
//! "up" towards a larger short.

use depthsync_core::SymbolMetadata;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::warn;

/// Most orders one chunked placement may produce.
pub const MAX_ORDER_CHUNKS: usize = 100;

/// Floors a non-negative `value` to a multiple of `step`. A non-positive step
/// leaves the value unchanged.
#[must_use]
pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).floor() * step
}

/// Rounds a signed size to a tradable quantity.
///
/// Magnitudes below `min_size` become zero. Anything at or above `min_size`
/// is floored to `lot_size` but never below `min_size`.
#[must_use]
pub fn quantize_size(size: Decimal, meta: &SymbolMetadata) -> Decimal {
    let magnitude = size.abs();
    if magnitude.is_zero() || magnitude < meta.min_size {
        return Decimal::ZERO;
    }

    let floored = floor_to_step(magnitude, meta.lot_size).max(meta.min_size);
    if floored.is_zero() {
        return Decimal::ZERO;
    }
    if size.is_sign_negative() {
        -floored
    } else {
        floored
    }
}

/// Floors a price to `tick_size`.
#[must_use]
pub fn quantize_price(price: Decimal, meta: &SymbolMetadata) -> Decimal {
    floor_to_step(price.abs(), meta.tick_size)
}

/// Splits `quantity` into `floor(quantity / max_size)` full orders plus one
/// remainder. With no `max_size` the order is returned whole.
///
/// A remainder below `min_size` borrows the shortfall from the last full
/// order. If that would leave the last order below `min_size` the remainder
/// is dropped.
///
/// Returns `None` if the split would need more than [`MAX_ORDER_CHUNKS`]
/// orders.
#[must_use]
pub fn split_chunks(quantity: Decimal, meta: &SymbolMetadata) -> Option<Vec<Decimal>> {
    if !meta.has_max_size() || quantity <= meta.max_size {
        return Some(vec![quantity]);
    }

    let full = quantity.checked_div(meta.max_size)?.floor();
    let count = full.to_usize().filter(|n| *n < MAX_ORDER_CHUNKS)?;
    let remainder = quantity - full * meta.max_size;

    let mut chunks = vec![meta.max_size; count];
    if remainder.is_zero() {
        return Some(chunks);
    }
    if remainder >= meta.min_size {
        chunks.push(remainder);
        return Some(chunks);
    }

    let borrowed = meta.max_size - (meta.min_size - remainder);
    match chunks.last_mut() {
        Some(last) if borrowed >= meta.min_size => {
            *last = borrowed;
            chunks.push(meta.min_size);
        }
        _ => warn!(
            quantity = %quantity,
            remainder = %remainder,
            min_size = %meta.min_size,
            "Dropping remainder below exchange minimum"
        ),
    }
    Some(chunks)
}
