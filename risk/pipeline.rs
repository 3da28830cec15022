//! # The Scoring Pipeline
//!
//! This module is the orchestrator the embedding application talks to. It
//! owns the injected oracle and the calibration cutoff, validates both at
//! construction so that no request can be served against a broken
//! configuration, and runs each scoring request through the fixed sequence:
//! validate → predict → calibrate → explain → additivity check.
//!
//! No state is retained between calls. Every method takes `&self` and the
//! oracle is read-only, so one pipeline may serve any number of concurrent
//! callers without locking.

use crate::calibrate::{self, DECISION_CUTOFF};
use crate::explain::{self, Attribution};
use crate::model::{Forest, ModelError, Oracle, OracleError};
use crate::observation::{FEATURE_NAMES, PatientObservation, ValidationError};
use crate::predict;
use std::path::Path;
use thiserror::Error;

/// Largest allowed gap between the raw score and the attribution's
/// reconstruction of it (baseline plus contributions).
pub const ADDITIVITY_TOLERANCE: f64 = 1e-6;

/// Everything the rendering boundary needs for one scored patient, returned
/// as a single unit so a score is never displayed without its explanation.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    /// The model's positive-class probability, in [0, 1].
    pub raw_score: f64,
    /// The displayed risk percentage, in [0, 100] with two decimals.
    pub risk_percent: f64,
    /// Per-feature additive explanation of `raw_score`.
    pub attribution: Attribution,
}

/// A fatal startup failure. Nothing can be scored until the configuration is
/// fixed and the process restarted.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("calibration cutoff {0} must lie strictly inside (0, 1)")]
    CutoffOutOfRange(f64),
    #[error(
        "the oracle's feature schema {found:?} does not match the clinical schema {expected:?}"
    )]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
}

/// A per-request failure. The request is rejected without a score; other
/// requests are unaffected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoreError {
    #[error("invalid observation: {0}")]
    Validation(#[from] ValidationError),
    #[error("scoring unavailable: {0}")]
    Oracle(#[from] OracleError),
}

/// The scoring-and-explanation pipeline around one injected oracle.
pub struct RiskPipeline<O: Oracle> {
    oracle: O,
    cutoff: f64,
}

impl RiskPipeline<Forest> {
    /// Loads the model artifact and builds a pipeline around it with the
    /// clinical [`DECISION_CUTOFF`].
    ///
    /// This is the load-once startup path: call it one time per process and
    /// share the pipeline by reference thereafter.
    pub fn from_artifact(path: &Path) -> Result<Self, ConfigError> {
        let forest = Forest::load(path)?;
        Self::new(forest, DECISION_CUTOFF)
    }
}

impl<O: Oracle> RiskPipeline<O> {
    /// Builds a pipeline around an explicitly constructed oracle.
    ///
    /// Configuration is checked here, once, so requests never have to: the
    /// cutoff must lie strictly inside (0, 1) and the oracle's feature
    /// schema must match the clinical schema name-for-name, in order.
    pub fn new(oracle: O, cutoff: f64) -> Result<Self, ConfigError> {
        if !(cutoff > 0.0 && cutoff < 1.0) {
            return Err(ConfigError::CutoffOutOfRange(cutoff));
        }
        let names = oracle.feature_names();
        if names.len() != FEATURE_NAMES.len()
            || names.iter().zip(FEATURE_NAMES).any(|(got, want)| got != want)
        {
            return Err(ConfigError::SchemaMismatch {
                expected: FEATURE_NAMES.iter().map(|name| name.to_string()).collect(),
                found: names.to_vec(),
            });
        }
        Ok(Self { oracle, cutoff })
    }

    /// The cutoff this pipeline anchors 50% at.
    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    /// Scores one observation: validate → predict → calibrate → explain.
    ///
    /// Validation failures never reach the oracle. Oracle failures abort
    /// this request only and are logged as unexpected; a score and an
    /// explanation that disagree beyond [`ADDITIVITY_TOLERANCE`] are
    /// likewise rejected rather than displayed.
    pub fn score(&self, observation: &PatientObservation) -> Result<RiskAssessment, ScoreError> {
        observation.validate()?;

        let raw_score = predict::predict(&self.oracle, observation).map_err(log_oracle)?;
        let risk_percent = calibrate::calibrate(raw_score, self.cutoff);
        let attribution = explain::explain(&self.oracle, observation).map_err(log_oracle)?;

        let reconstructed = attribution.reconstructed();
        if (reconstructed - raw_score).abs() > ADDITIVITY_TOLERANCE {
            return Err(log_oracle(OracleError::InconsistentAttribution {
                raw_score,
                reconstructed,
                tolerance: ADDITIVITY_TOLERANCE,
            })
            .into());
        }

        log::debug!(
            "scored observation: raw {raw_score:.6}, displayed {risk_percent:.2}%"
        );
        Ok(RiskAssessment {
            raw_score,
            risk_percent,
            attribution,
        })
    }
}

fn log_oracle(error: OracleError) -> OracleError {
    log::error!("oracle failure: {error}");
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explain::FeatureContribution;

    fn schema() -> Vec<String> {
        FEATURE_NAMES.iter().map(|name| name.to_string()).collect()
    }

    fn observation() -> PatientObservation {
        PatientObservation {
            sbp: 100,
            dbp: 60,
            inr: 1.2,
            los_before_mv: 6,
            antibiotic_counts: 4,
            suctioning_counts: 10,
            dysphagia: true,
        }
    }

    /// Returns a fixed raw score with a self-consistent attribution: the
    /// baseline carries the whole score and every contribution is zero.
    struct ConsistentStub {
        names: Vec<String>,
        raw: f64,
    }

    impl ConsistentStub {
        fn returning(raw: f64) -> Self {
            Self {
                names: schema(),
                raw,
            }
        }
    }

    impl Oracle for ConsistentStub {
        fn feature_names(&self) -> &[String] {
            &self.names
        }

        fn predict_positive(&self, _features: &[f64]) -> Result<f64, OracleError> {
            Ok(self.raw)
        }

        fn explain_positive(&self, features: &[f64]) -> Result<Attribution, OracleError> {
            let entries = self
                .names
                .iter()
                .zip(features)
                .map(|(name, &observed)| FeatureContribution {
                    feature: name.clone(),
                    observed,
                    contribution: 0.0,
                })
                .collect();
            Ok(Attribution {
                baseline: self.raw,
                entries,
            })
        }
    }

    #[test]
    fn rejects_cutoff_outside_the_open_unit_interval() {
        for cutoff in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
            match RiskPipeline::new(ConsistentStub::returning(0.5), cutoff) {
                Err(ConfigError::CutoffOutOfRange(_)) => {}
                Ok(_) => panic!("cutoff {cutoff} should be rejected"),
                Err(other) => panic!("expected CutoffOutOfRange for {cutoff}, got {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_oracle_with_mismatched_schema() {
        let mut stub = ConsistentStub::returning(0.5);
        stub.names.swap(0, 1);
        match RiskPipeline::new(stub, DECISION_CUTOFF) {
            Err(ConfigError::SchemaMismatch { expected, found }) => {
                assert_eq!(expected, schema());
                assert_eq!(found[0], "DBP");
            }
            other => panic!("expected SchemaMismatch, got {:?}", other.err()),
        }
    }

    #[test]
    fn raw_score_at_cutoff_displays_as_fifty_percent() {
        let pipeline =
            RiskPipeline::new(ConsistentStub::returning(DECISION_CUTOFF), DECISION_CUTOFF)
                .expect("valid configuration");
        let assessment = pipeline.score(&observation()).expect("scorable");
        assert_eq!(assessment.risk_percent, 50.0);
    }

    #[test]
    fn rejects_attribution_that_does_not_reconstruct_the_score() {
        struct DriftingStub {
            names: Vec<String>,
        }

        impl Oracle for DriftingStub {
            fn feature_names(&self) -> &[String] {
                &self.names
            }

            fn predict_positive(&self, _features: &[f64]) -> Result<f64, OracleError> {
                Ok(0.4)
            }

            fn explain_positive(&self, features: &[f64]) -> Result<Attribution, OracleError> {
                // Baseline off by 0.1, far beyond the tolerance.
                let entries = self
                    .names
                    .iter()
                    .zip(features)
                    .map(|(name, &observed)| FeatureContribution {
                        feature: name.clone(),
                        observed,
                        contribution: 0.0,
                    })
                    .collect();
                Ok(Attribution {
                    baseline: 0.5,
                    entries,
                })
            }
        }

        let pipeline = RiskPipeline::new(DriftingStub { names: schema() }, DECISION_CUTOFF)
            .expect("valid configuration");
        match pipeline.score(&observation()) {
            Err(ScoreError::Oracle(OracleError::InconsistentAttribution {
                raw_score,
                reconstructed,
                ..
            })) => {
                assert_eq!(raw_score, 0.4);
                assert_eq!(reconstructed, 0.5);
            }
            other => panic!("expected InconsistentAttribution, got {other:?}"),
        }
    }

    #[test]
    fn surfaces_malformed_oracle_output_as_scoring_unavailable() {
        let pipeline = RiskPipeline::new(ConsistentStub::returning(f64::NAN), DECISION_CUTOFF)
            .expect("valid configuration");
        let err = pipeline.score(&observation()).unwrap_err();
        assert!(matches!(
            err,
            ScoreError::Oracle(OracleError::InvalidProbability { .. })
        ));
        assert!(err.to_string().starts_with("scoring unavailable"));
    }

    #[test]
    fn validation_failure_names_the_field() {
        let pipeline = RiskPipeline::new(ConsistentStub::returning(0.5), DECISION_CUTOFF)
            .expect("valid configuration");
        let mut obs = observation();
        obs.dbp = 10;
        let err = pipeline.score(&obs).unwrap_err();
        assert!(matches!(err, ScoreError::Validation(_)));
        assert!(err.to_string().contains("DBP"));
    }
}
