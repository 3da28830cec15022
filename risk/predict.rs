//! # Scoring One Observation
//!
//! The predictor is the only code that turns a validated observation into a
//! raw positive-class probability. It assembles the model input vector in
//! schema order, invokes the oracle, and refuses to pass along anything that
//! is not a probability.

use crate::model::{Oracle, OracleError};
use crate::observation::PatientObservation;

/// Asks the oracle for the positive-class probability of one observation.
///
/// The returned scalar is guaranteed to be a finite value in [0, 1]; a
/// malformed oracle output (NaN, infinity, or out of range) is surfaced as an
/// [`OracleError`] so the caller reports "scoring unavailable" instead of a
/// bogus score.
pub fn predict<O: Oracle + ?Sized>(
    oracle: &O,
    observation: &PatientObservation,
) -> Result<f64, OracleError> {
    let features = observation.features();
    let raw = oracle.predict_positive(&features)?;
    if !raw.is_finite() || !(0.0..=1.0).contains(&raw) {
        return Err(OracleError::InvalidProbability { value: raw });
    }
    log::debug!("raw positive-class probability: {raw}");
    Ok(raw)
}
