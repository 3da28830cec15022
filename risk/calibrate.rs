//! # Threshold-Anchored Risk Calibration
//!
//! The classifier's native decision boundary is a clinically tuned cutoff,
//! not 0.5. Displaying its raw probability would put "at the decision
//! boundary" at an unintuitive percentage, so the raw score is remapped with
//! a two-piece linear transform: the cutoff lands on exactly 50%, each side
//! keeps its rank ordering, and the full [0,1] range still covers [0,100].

/// The raw-probability decision threshold the classifier was tuned to.
/// After calibration this value displays as exactly 50.00%.
pub const DECISION_CUTOFF: f64 = 0.332_555_6;

/// Remaps a raw positive-class probability to the displayed risk percentage.
///
/// Scores at or above `cutoff` stretch linearly over [50, 100]; scores below
/// it stretch over [0, 50). Both pieces meet at exactly 0.5 when
/// `raw == cutoff`, so the transform is continuous and monotonic. The result
/// is rounded to two decimals.
///
/// `cutoff` must lie strictly inside (0, 1); the pipeline rejects any other
/// value at construction time, before a request can reach this function.
pub fn calibrate(raw: f64, cutoff: f64) -> f64 {
    debug_assert!(
        cutoff > 0.0 && cutoff < 1.0,
        "calibration cutoff {cutoff} must lie strictly inside (0, 1)"
    );
    let adjusted = if raw >= cutoff {
        // Clamps pin the displayed range even if the anchor constants drift.
        ((raw - cutoff) * (0.5 / (1.0 - cutoff)) + 0.5).clamp(0.5, 1.0)
    } else {
        (raw * (0.5 / cutoff)).clamp(0.0, 0.5)
    };
    round_to_two_decimals(adjusted * 100.0)
}

fn round_to_two_decimals(percent: f64) -> f64 {
    (percent * 100.0).round() / 100.0
}
