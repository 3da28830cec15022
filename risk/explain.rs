//! # Additive Attribution of Forest Predictions
//!
//! This module decomposes one forest prediction into a baseline plus one
//! signed contribution per feature, with the guarantee that the parts sum
//! back to the prediction. The contributions are exact Shapley values of the
//! path-dependent value function: a feature set "knows" its observed values
//! and follows them through each tree, while splits on unknown features
//! average both branches weighted by their training covers.
//!
//! With a seven-feature schema the full game has 2^7 = 128 coalitions, so
//! the Shapley sum is evaluated by direct enumeration rather than by any
//! sampling scheme. Two calls with the same forest and the same feature
//! vector therefore return bit-identical contributions, and the additivity
//! identity holds to floating-point accuracy rather than in expectation.

use crate::model::{Forest, Oracle, OracleError};
use crate::observation::PatientObservation;

/// Widest feature schema the exact enumeration accepts. Every extra feature
/// doubles the number of conditional expectations evaluated per tree, so the
/// cap keeps the worst case at 65536 walks per tree.
pub const MAX_EXACT_FEATURES: usize = 16;

/// One feature's share of a prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureContribution {
    /// Feature name, as declared by the model schema.
    pub feature: String,
    /// The observed value the contribution was computed for.
    pub observed: f64,
    /// Signed shift away from the baseline. Positive pushes the prediction
    /// toward the positive class.
    pub contribution: f64,
}

/// An additive decomposition of one prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    /// Expected model output before any feature is observed: the
    /// cover-weighted mean of the forest's leaves.
    pub baseline: f64,
    /// One entry per schema feature, in schema order.
    pub entries: Vec<FeatureContribution>,
}

impl Attribution {
    /// The prediction the decomposition reconstructs: baseline plus the sum
    /// of all contributions.
    pub fn reconstructed(&self) -> f64 {
        self.baseline
            + self
                .entries
                .iter()
                .map(|entry| entry.contribution)
                .sum::<f64>()
    }
}

/// Runs the oracle's explainer for one validated observation and checks the
/// shape of what comes back: one finite contribution per schema feature and
/// a finite baseline.
///
/// The additivity of the decomposition against the raw score is checked by
/// the pipeline, which holds both halves.
pub fn explain<O: Oracle + ?Sized>(
    oracle: &O,
    observation: &PatientObservation,
) -> Result<Attribution, OracleError> {
    let features = observation.features();
    let attribution = oracle.explain_positive(&features)?;
    let expected = oracle.feature_names().len();
    if attribution.entries.len() != expected {
        return Err(OracleError::AttributionArity {
            expected,
            found: attribution.entries.len(),
        });
    }
    let finite = attribution.baseline.is_finite()
        && attribution
            .entries
            .iter()
            .all(|entry| entry.contribution.is_finite());
    if !finite {
        return Err(OracleError::NonFiniteAttribution);
    }
    Ok(attribution)
}

/// Exact Shapley attribution of one forest prediction.
///
/// For every coalition mask the forest's conditional expectation is computed
/// (mean over trees of the cover-weighted walk), then each feature's value is
/// the weighted sum of its marginal contributions over all coalitions that
/// exclude it. The baseline is the empty coalition's expectation.
pub(crate) fn forest_attribution(forest: &Forest, features: &[f64]) -> Attribution {
    let n = features.len();
    debug_assert_eq!(n, forest.feature_names().len());
    debug_assert!(n <= MAX_EXACT_FEATURES);

    let coalition_count = 1usize << n;
    let tree_count = forest.trees().len() as f64;

    // values[mask] is the expected forest output when exactly the features
    // named in `mask` are fixed to their observed values.
    let mut values = vec![0.0f64; coalition_count];
    for tree in forest.trees() {
        for (mask, value) in values.iter_mut().enumerate() {
            *value += tree.expectation(features, mask as u32);
        }
    }
    for value in &mut values {
        *value /= tree_count;
    }

    let weights = shapley_weights(n);
    let mut contributions = vec![0.0f64; n];
    for mask in 0..coalition_count {
        let size = (mask as u32).count_ones() as usize;
        for (feature, contribution) in contributions.iter_mut().enumerate() {
            let bit = 1usize << feature;
            if mask & bit == 0 {
                *contribution += weights[size] * (values[mask | bit] - values[mask]);
            }
        }
    }

    let entries = forest
        .feature_names()
        .iter()
        .zip(features.iter().zip(contributions.iter()))
        .map(|(name, (&observed, &contribution))| FeatureContribution {
            feature: name.clone(),
            observed,
            contribution,
        })
        .collect();

    Attribution {
        baseline: values[0],
        entries,
    }
}

/// Shapley weight of a marginal contribution measured against a coalition of
/// `size` features, in an `n`-feature game: size! (n - 1 - size)! / n!,
/// indexed by `size`.
fn shapley_weights(n: usize) -> Vec<f64> {
    (0..n)
        .map(|size| 1.0 / (n as f64 * binomial(n - 1, size)))
        .collect()
}

/// Binomial coefficient as f64, exact for the schema widths the cap allows.
fn binomial(n: usize, k: usize) -> f64 {
    let k = k.min(n - k);
    let mut result = 1.0;
    for i in 0..k {
        result = result * (n - i) as f64 / (i + 1) as f64;
    }
    result
}
