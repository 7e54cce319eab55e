//! Threshold classification

use crate::prober::ProbeResult;
use serde::Serialize;

/// Where a probe result stands relative to the warning threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    BelowThreshold,
    AtOrAboveThreshold,
    /// The server gave no usable reading.
    Unavailable,
    /// The probe failed (credentials or transport).
    Errored,
}

/// Classify a probe result. The threshold is inclusive: a reading of
/// exactly `threshold_percent` is at-or-above.
#[must_use]
pub fn classify(result: &ProbeResult, threshold_percent: u8) -> Classification {
    match result {
        ProbeResult::Success(reading) => {
            if reading.percent_used() >= f64::from(threshold_percent) {
                Classification::AtOrAboveThreshold
            } else {
                Classification::BelowThreshold
            }
        }
        ProbeResult::Unavailable(_) => Classification::Unavailable,
        ProbeResult::AuthFailure(_) | ProbeResult::TransportError(_) => {
            Classification::Errored
        }
    }
}
