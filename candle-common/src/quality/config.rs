// config.rs - Thresholds and penalties used by the quality engine

use rust_decimal::Decimal;

use crate::data::AnomalyKind;

/// Quality engine configuration
///
/// Penalties are subtracted from a starting score of 1.0. All penalties must
/// be non-negative so that the score never rises when a flag is added.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityConfig {
    /// Score at or above which a candle counts as validated
    pub validated_threshold: Decimal,

    /// Penalty per null non-critical field
    pub missing_field_penalty: Decimal,

    /// Penalty per organic anomaly flag
    pub anomaly_penalty: Decimal,

    /// Penalty for a suspected reverse split
    pub reverse_split_penalty: Decimal,

    /// Max |open - prev_close| / prev_close before flagging a spike
    pub price_spike_threshold: Decimal,

    /// Max (high - low) / low before flagging the intraday range
    pub intraday_range_threshold: Decimal,

    /// Close-to-close jump treated as a likely reverse split (1.0 = +100%)
    pub reverse_split_threshold: Decimal,

    /// Volume above `median * volume_high_multiple` is anomalous
    pub volume_high_multiple: Decimal,

    /// Volume below `median * volume_low_multiple` is anomalous
    pub volume_low_multiple: Decimal,

    /// Missing business days between consecutive candles that count as a gap
    pub gap_threshold_business_days: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            validated_threshold: Decimal::new(85, 2),
            missing_field_penalty: Decimal::new(10, 2),
            anomaly_penalty: Decimal::new(15, 2),
            reverse_split_penalty: Decimal::new(5, 2),
            price_spike_threshold: Decimal::new(20, 2),
            intraday_range_threshold: Decimal::new(30, 2),
            reverse_split_threshold: Decimal::ONE,
            volume_high_multiple: Decimal::from(10),
            volume_low_multiple: Decimal::new(1, 1),
            gap_threshold_business_days: 3,
        }
    }
}

impl QualityConfig {
    /// Penalty applied when `kind` is flagged
    pub fn penalty_for(&self, kind: AnomalyKind) -> Decimal {
        match kind {
            AnomalyKind::ReverseSplit => self.reverse_split_penalty,
            _ => self.anomaly_penalty,
        }
    }

    pub fn with_validated_threshold(mut self, threshold: Decimal) -> Self {
        self.validated_threshold = threshold;
        self
    }
}
