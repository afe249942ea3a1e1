//! Pure, restartable functions over small in-memory candle buffers.
//!
//! Every window this system ever needs is bounded (<= 60 candles), so these
//! operate on ordinary slices rather than any streaming/iterator abstraction.

use rust_decimal::Decimal;

use crate::domain::market::candle::Candle;

/// True range of one candle against the prior close, per the GLOSSARY
/// definition: `max(high-low, |high-prev_close|, |low-prev_close|)`.
pub fn true_range(candle: &Candle, prev_close: Decimal) -> Decimal {
    let a = candle.high - candle.low;
    let b = (candle.high - prev_close).abs();
    let c = (candle.low - prev_close).abs();
    a.max(b).max(c)
}

/// Average True Range over the last `period` candles. Requires at least
/// `period + 1` candles (one extra for the seed previous close).
/// Returns `None` if the buffer is too short.
pub fn atr(candles: &[Candle], period: usize) -> Option<Decimal> {
    if candles.len() < period + 1 {
        return None;
    }
    let start = candles.len() - period;
    let mut sum = Decimal::ZERO;
    for i in start..candles.len() {
        sum += true_range(&candles[i], candles[i - 1].close);
    }
    Some(sum / Decimal::from(period))
}

/// Full EMA series with smoothing factor `2/(n+1)`, seeded with the first
/// close. The caller typically only needs the last one or two values (e.g.
/// crossover detection compares `ema[-2]` and `ema[-1]`), but the full
/// series is cheap to compute for these window sizes and keeps the function
/// trivially restartable.
pub fn ema_series(closes: &[Decimal], period: usize) -> Vec<Decimal> {
    if closes.is_empty() || period == 0 {
        return Vec::new();
    }
    let k = Decimal::TWO / Decimal::from(period + 1);
    let mut out = Vec::with_capacity(closes.len());
    out.push(closes[0]);
    for &close in &closes[1..] {
        let prev = *out.last().unwrap();
        out.push(close * k + prev * (Decimal::ONE - k));
    }
    out
}

/// Last value of an EMA series, or `None` if the input was empty.
pub fn ema_last(closes: &[Decimal], period: usize) -> Option<Decimal> {
    ema_series(closes, period).last().copied()
}
