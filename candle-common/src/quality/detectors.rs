// detectors.rs - Anomaly checks run over each candle of a cleaned batch

use rust_decimal::Decimal;

use super::config::QualityConfig;
use super::gap_detection::is_unexpected_gap;
use crate::data::{AnomalyKind, Candle};

/// Everything a single check may look at
pub struct CheckContext<'a> {
    pub candle: &'a Candle,
    /// Preceding candle in timestamp order, if any
    pub previous: Option<&'a Candle>,
    /// Median of the batch's non-zero volumes
    pub volume_median: Option<Decimal>,
    pub config: &'a QualityConfig,
}

/// A pure anomaly check; `true` raises the flag.
///
/// Ratios too large for `Decimal` count as over their threshold.
pub type Check = fn(&CheckContext<'_>) -> bool;

/// Checks in evaluation order, tagged by the flag they raise
pub const CHECKS: [(AnomalyKind, Check); 6] = [
    (AnomalyKind::PriceSpike, price_spike),
    (AnomalyKind::IntradayRange, intraday_range),
    (AnomalyKind::ReverseSplit, reverse_split),
    (AnomalyKind::VolumeAnomaly, volume_anomaly),
    (AnomalyKind::Gap, calendar_gap),
    (AnomalyKind::OffGrid, off_grid),
];

/// Run every check and return the raised flags.
///
/// A suspected reverse split explains the open-to-prev-close jump on the same
/// candle, so the organic spike flag is cleared when both fire.
pub fn detect(ctx: &CheckContext<'_>) -> Vec<AnomalyKind> {
    let mut flags: Vec<AnomalyKind> = CHECKS
        .iter()
        .filter(|(_, check)| check(ctx))
        .map(|(kind, _)| *kind)
        .collect();

    if flags.contains(&AnomalyKind::ReverseSplit) {
        flags.retain(|kind| *kind != AnomalyKind::PriceSpike);
    }
    flags
}

fn price_spike(ctx: &CheckContext<'_>) -> bool {
    let Some(previous) = ctx.previous else {
        return false;
    };
    if previous.close <= Decimal::ZERO {
        return false;
    }
    let change = (ctx.candle.open - previous.close).abs().checked_div(previous.close);
    change.map_or(true, |change| change > ctx.config.price_spike_threshold)
}

fn intraday_range(ctx: &CheckContext<'_>) -> bool {
    let candle = ctx.candle;
    if candle.low <= Decimal::ZERO {
        return false;
    }
    (candle.high - candle.low)
        .checked_div(candle.low)
        .map_or(true, |range| range > ctx.config.intraday_range_threshold)
}

fn reverse_split(ctx: &CheckContext<'_>) -> bool {
    let Some(previous) = ctx.previous else {
        return false;
    };
    if previous.close <= Decimal::ZERO {
        return false;
    }
    (ctx.candle.close - previous.close)
        .checked_div(previous.close)
        .map_or(true, |jump| jump >= ctx.config.reverse_split_threshold)
}

fn volume_anomaly(ctx: &CheckContext<'_>) -> bool {
    let Some(median) = ctx.volume_median else {
        return false;
    };
    let volume = Decimal::from(ctx.candle.volume);
    // An overflowing limit lies beyond any i64 volume
    let above = median
        .checked_mul(ctx.config.volume_high_multiple)
        .is_some_and(|limit| volume > limit);
    let below = median
        .checked_mul(ctx.config.volume_low_multiple)
        .map_or(true, |limit| volume < limit);
    above || below
}

fn calendar_gap(ctx: &CheckContext<'_>) -> bool {
    let Some(previous) = ctx.previous else {
        return false;
    };
    is_unexpected_gap(
        previous.timestamp,
        ctx.candle.timestamp,
        ctx.candle.timeframe,
        ctx.config.gap_threshold_business_days,
    )
}

fn off_grid(ctx: &CheckContext<'_>) -> bool {
    !ctx.candle.timeframe.is_aligned(ctx.candle.timestamp)
}

/// Median of the non-zero volumes, or `None` when there are none
pub fn median_nonzero_volume(candles: &[Candle]) -> Option<Decimal> {
    let mut volumes: Vec<i64> = candles
        .iter()
        .map(|c| c.volume)
        .filter(|v| *v > 0)
        .collect();

    if volumes.is_empty() {
        return None;
    }

    volumes.sort_unstable();
    let mid = volumes.len() / 2;
    if volumes.len() % 2 == 1 {
        Some(Decimal::from(volumes[mid]))
    } else {
        Some((Decimal::from(volumes[mid - 1]) + Decimal::from(volumes[mid])) / Decimal::TWO)
    }
}
