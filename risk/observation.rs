//! # Patient Observation and Input Validation
//!
//! This module is the exclusive entry point for per-patient input data. It
//! owns the fixed seven-feature schema the classifier was trained on —
//! names, order, units, and valid ranges — and validates one observation
//! against it before anything downstream may run.
//!
//! - Strict schema: feature names and their order are not configurable.
//!   They are the contract with the model artifact, and `features()`
//!   assembles the model's input vector in exactly that order.
//! - User-centric errors: a failed check names the offending field with its
//!   valid range, so the collection surface can report it verbatim.

use std::ops::RangeInclusive;
use thiserror::Error;

/// Number of features in the model schema.
pub const FEATURE_COUNT: usize = 7;

/// Feature names in the exact order the classifier was trained on.
///
/// This order is a collaborator contract with the model artifact; it is also
/// the order of [`PatientObservation::features`] and of every attribution
/// returned by the explainer.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "SBP",
    "DBP",
    "INR",
    "LOS_before_MV",
    "Antibiotic_counts",
    "Suctioning_counts",
    "Dysphagia",
];

/// Valid range for systolic blood pressure, in mmHg.
pub const SBP_RANGE: RangeInclusive<u16> = 60..=200;
/// Valid range for diastolic blood pressure, in mmHg.
pub const DBP_RANGE: RangeInclusive<u16> = 30..=120;
/// Valid range for the international normalized ratio.
pub const INR_RANGE: RangeInclusive<f64> = 0.5..=7.0;
/// Valid range for length of stay before mechanical ventilation, in days.
pub const LOS_BEFORE_MV_RANGE: RangeInclusive<u16> = 0..=31;
/// Valid range for the number of antibiotic uses.
pub const ANTIBIOTIC_COUNTS_RANGE: RangeInclusive<u16> = 0..=10;
/// Valid range for the number of suctioning procedures.
pub const SUCTIONING_COUNTS_RANGE: RangeInclusive<u16> = 0..=15;

/// One patient's clinical measurements at scoring time.
///
/// Created once per scoring request and never mutated. The dysphagia flag's
/// {0,1} domain from the training data is a type-level invariant here; it
/// enters the feature vector as 0.0/1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatientObservation {
    /// Systolic blood pressure (mmHg).
    pub sbp: u16,
    /// Diastolic blood pressure (mmHg).
    pub dbp: u16,
    /// International normalized ratio.
    pub inr: f64,
    /// Length of hospital stay before mechanical ventilation (days).
    pub los_before_mv: u16,
    /// Number of antibiotic uses.
    pub antibiotic_counts: u16,
    /// Number of suctioning procedures.
    pub suctioning_counts: u16,
    /// Whether dysphagia is present.
    pub dysphagia: bool,
}

/// A per-request input failure. The request is rejected before the model is
/// consulted; the message names the field and its valid range.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} = {value} is outside the valid range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{field} = {value} is not a finite number")]
    NonFinite { field: &'static str, value: f64 },
}

impl PatientObservation {
    /// Checks every field against its declared range, in schema order,
    /// returning the first failure.
    ///
    /// The collection surface is expected to pre-constrain these values;
    /// this re-check keeps an invalid observation from ever reaching the
    /// model regardless of how the observation was constructed.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range("SBP", self.sbp, &SBP_RANGE)?;
        check_range("DBP", self.dbp, &DBP_RANGE)?;
        if !self.inr.is_finite() {
            return Err(ValidationError::NonFinite {
                field: "INR",
                value: self.inr,
            });
        }
        check_range("INR", self.inr, &INR_RANGE)?;
        check_range("LOS_before_MV", self.los_before_mv, &LOS_BEFORE_MV_RANGE)?;
        check_range(
            "Antibiotic_counts",
            self.antibiotic_counts,
            &ANTIBIOTIC_COUNTS_RANGE,
        )?;
        check_range(
            "Suctioning_counts",
            self.suctioning_counts,
            &SUCTIONING_COUNTS_RANGE,
        )?;
        Ok(())
    }

    /// Assembles the model input vector in the schema order of
    /// [`FEATURE_NAMES`]: index `i` holds the value of feature `i`.
    pub fn features(&self) -> [f64; FEATURE_COUNT] {
        [
            f64::from(self.sbp),
            f64::from(self.dbp),
            self.inr,
            f64::from(self.los_before_mv),
            f64::from(self.antibiotic_counts),
            f64::from(self.suctioning_counts),
            f64::from(u8::from(self.dysphagia)),
        ]
    }
}

fn check_range<T>(
    field: &'static str,
    value: T,
    range: &RangeInclusive<T>,
) -> Result<(), ValidationError>
where
    T: PartialOrd + Copy + Into<f64>,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            value: value.into(),
            min: (*range.start()).into(),
            max: (*range.end()).into(),
        })
    }
}
