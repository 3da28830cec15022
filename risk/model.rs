//! # The Model Artifact and the Oracle Seam
//!
//! This module owns the trained classifier: the `Forest` artifact that is
//! loaded once at process start, its on-disk TOML format, the structural
//! validation that makes a malformed artifact unrepresentable downstream,
//! and the [`Oracle`] trait through which the rest of the pipeline consumes
//! it. The pipeline never touches tree internals; it sees an oracle that
//! answers "probability of the positive class" and "attribution of one
//! prediction", which lets tests substitute stubs with controlled outputs.

use crate::explain::{self, Attribution};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// The artifact format version this build reads and writes.
pub const SUPPORTED_FORMAT_VERSION: u32 = 1;

// --- Public Data Structures ---
// These structs define the on-disk format of the trained forest when
// serialized to a TOML file, and its validated in-memory form.

/// One node of a decision tree. Node 0 of a tree is its root.
///
/// `samples` is the (possibly weighted) count of training observations that
/// reached the node; the explainer uses it to weight branches it must
/// marginalize over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    /// An internal decision: observations with `feature <= threshold`
    /// descend to `left`, the rest to `right`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        samples: f64,
    },
    /// A terminal node holding the positive-class probability among its
    /// training samples.
    Leaf { probability: f64, samples: f64 },
}

impl TreeNode {
    pub(crate) fn samples(&self) -> f64 {
        match self {
            TreeNode::Split { samples, .. } | TreeNode::Leaf { samples, .. } => *samples,
        }
    }
}

/// One tree of the ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Wraps a node list into a tree rooted at node 0. Structural validation
    /// happens when the forest is assembled, which is the only way a tree
    /// reaches the scoring path.
    pub fn new(nodes: Vec<TreeNode>) -> Self {
        Self { nodes }
    }

    /// Positive-class probability for one feature vector, following every
    /// split.
    pub(crate) fn predict(&self, features: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { probability, .. } => return *probability,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    index = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Conditional expectation of the tree's output when only the features
    /// whose bit is set in `known` are fixed to their observed values.
    ///
    /// Splits on known features follow `features[i]`; splits on unknown
    /// features average both children, weighted by their training-sample
    /// counts. With `known == 0`, `features` is never read and the result is
    /// the tree's expectation over its training distribution.
    pub(crate) fn expectation(&self, features: &[f64], known: u32) -> f64 {
        self.node_expectation(0, features, known)
    }

    fn node_expectation(&self, index: usize, features: &[f64], known: u32) -> f64 {
        match &self.nodes[index] {
            TreeNode::Leaf { probability, .. } => *probability,
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
                ..
            } => {
                if known & (1 << *feature) != 0 {
                    let child = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                    self.node_expectation(child, features, known)
                } else {
                    let left_weight = self.nodes[*left].samples();
                    let right_weight = self.nodes[*right].samples();
                    let left_value = self.node_expectation(*left, features, known);
                    let right_value = self.node_expectation(*right, features, known);
                    (left_weight * left_value + right_weight * right_value)
                        / (left_weight + right_weight)
                }
            }
        }
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// The top-level, self-contained, trained model artifact.
/// This is the structure that gets saved to and loaded from a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forest {
    format_version: u32,
    feature_names: Vec<String>,
    trees: Vec<DecisionTree>,
}

/// An artifact-level failure: the model file cannot be read, parsed, or
/// trusted. Always fatal at startup — no request can be served without a
/// valid oracle.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("failed to read model artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse model artifact: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize model artifact: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("model artifact has format version {found}, but this build reads version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("model artifact declares no feature names")]
    EmptySchema,
    #[error(
        "model artifact declares {features} features, which exceeds the {limit}-feature limit of exact attribution"
    )]
    SchemaTooWide { features: usize, limit: usize },
    #[error("model artifact declares feature '{0}' more than once")]
    DuplicateFeature(String),
    #[error("model artifact contains no trees")]
    EmptyForest,
    #[error("tree {tree} has no nodes")]
    EmptyTree { tree: usize },
    #[error("tree {tree}, node {node}: child index {child} is out of bounds for {nodes} nodes")]
    ChildOutOfBounds {
        tree: usize,
        node: usize,
        child: usize,
        nodes: usize,
    },
    #[error(
        "tree {tree}, node {node}: feature index {feature} is out of bounds for the {features}-feature schema"
    )]
    FeatureOutOfBounds {
        tree: usize,
        node: usize,
        feature: usize,
        features: usize,
    },
    #[error("tree {tree}, node {node}: split threshold {value} is not finite")]
    NonFiniteThreshold { tree: usize, node: usize, value: f64 },
    #[error("tree {tree}, node {node}: leaf probability {value} is outside [0, 1]")]
    LeafProbability { tree: usize, node: usize, value: f64 },
    #[error("tree {tree}, node {node}: sample count {value} is not positive and finite")]
    InvalidSampleCount { tree: usize, node: usize, value: f64 },
    #[error("tree {tree}: node {node} is reached by more than one path, so the artifact is not a tree")]
    NotATree { tree: usize, node: usize },
    #[error("tree {tree}: {unreachable} nodes are unreachable from the root")]
    UnreachableNodes { tree: usize, unreachable: usize },
}

/// A per-request oracle failure: the model call produced malformed output
/// (or was driven with a malformed input vector). Surfaced to the caller as
/// "scoring unavailable"; never silently defaulted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    #[error("the oracle was given {found} features, but its schema has {expected}")]
    FeatureArity { expected: usize, found: usize },
    #[error("the oracle returned {value}, which is not a probability in [0, 1]")]
    InvalidProbability { value: f64 },
    #[error("the attribution has {found} contributions for a {expected}-feature schema")]
    AttributionArity { expected: usize, found: usize },
    #[error("the attribution contains a non-finite baseline or contribution")]
    NonFiniteAttribution,
    #[error(
        "baseline plus contributions reconstruct {reconstructed}, but the model scored {raw_score} (tolerance {tolerance:e})"
    )]
    InconsistentAttribution {
        raw_score: f64,
        reconstructed: f64,
        tolerance: f64,
    },
}

/// Scoring surface of a loaded classifier.
///
/// An oracle is an explicitly constructed, explicitly passed dependency: the
/// embedding application loads it exactly once at startup, the pipeline
/// borrows it for its whole life, and tests substitute stubs with controlled
/// outputs. Every method is read-only, so one oracle may serve any number of
/// concurrent callers without locking.
pub trait Oracle: Send + Sync {
    /// Feature names in the exact order the model consumes them.
    fn feature_names(&self) -> &[String];

    /// Probability of the positive class for one feature vector in schema
    /// order.
    fn predict_positive(&self, features: &[f64]) -> Result<f64, OracleError>;

    /// Additive attribution of one prediction: a baseline plus one signed
    /// contribution per schema feature, which together reconstruct the
    /// positive-class probability.
    fn explain_positive(&self, features: &[f64]) -> Result<Attribution, OracleError>;
}

impl Forest {
    /// Assembles and validates a forest over the given feature schema.
    pub fn new(feature_names: Vec<String>, trees: Vec<DecisionTree>) -> Result<Self, ModelError> {
        let forest = Self {
            format_version: SUPPORTED_FORMAT_VERSION,
            feature_names,
            trees,
        };
        forest.validate()?;
        Ok(forest)
    }

    /// Loads and validates a model artifact.
    ///
    /// This is the load-once startup operation: call it one time, then share
    /// the forest by reference. A failure here is a configuration error for
    /// the whole process, not a per-request condition.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let text = fs::read_to_string(path)?;
        let forest: Self = toml::from_str(&text)?;
        forest.validate()?;
        log::info!(
            "loaded model artifact from {}: {} trees, {} nodes, {} features",
            path.display(),
            forest.tree_count(),
            forest.node_count(),
            forest.feature_names.len()
        );
        Ok(forest)
    }

    /// Saves the forest as a self-contained TOML artifact.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// The feature schema the forest was trained on.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub(crate) fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Number of trees in the ensemble.
    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Total number of nodes across all trees.
    pub fn node_count(&self) -> usize {
        self.trees.iter().map(DecisionTree::node_count).sum()
    }

    /// Expected positive-class probability over the training distribution
    /// (cover-weighted mean of the leaves). This is the explainer's baseline.
    pub fn expected_value(&self) -> f64 {
        let total: f64 = self
            .trees
            .iter()
            .map(|tree| tree.expectation(&[], 0))
            .sum();
        total / self.trees.len() as f64
    }

    fn check_arity(&self, features: &[f64]) -> Result<(), OracleError> {
        if features.len() == self.feature_names.len() {
            Ok(())
        } else {
            Err(OracleError::FeatureArity {
                expected: self.feature_names.len(),
                found: features.len(),
            })
        }
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.format_version != SUPPORTED_FORMAT_VERSION {
            return Err(ModelError::UnsupportedVersion {
                found: self.format_version,
                supported: SUPPORTED_FORMAT_VERSION,
            });
        }
        if self.feature_names.is_empty() {
            return Err(ModelError::EmptySchema);
        }
        if self.feature_names.len() > explain::MAX_EXACT_FEATURES {
            return Err(ModelError::SchemaTooWide {
                features: self.feature_names.len(),
                limit: explain::MAX_EXACT_FEATURES,
            });
        }
        for (index, name) in self.feature_names.iter().enumerate() {
            if self.feature_names[..index].contains(name) {
                return Err(ModelError::DuplicateFeature(name.clone()));
            }
        }
        if self.trees.is_empty() {
            return Err(ModelError::EmptyForest);
        }
        for (tree_index, tree) in self.trees.iter().enumerate() {
            validate_tree(tree_index, tree, self.feature_names.len())?;
        }
        Ok(())
    }
}

impl Oracle for Forest {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_positive(&self, features: &[f64]) -> Result<f64, OracleError> {
        self.check_arity(features)?;
        let total: f64 = self.trees.iter().map(|tree| tree.predict(features)).sum();
        Ok(total / self.trees.len() as f64)
    }

    fn explain_positive(&self, features: &[f64]) -> Result<Attribution, OracleError> {
        self.check_arity(features)?;
        Ok(explain::forest_attribution(self, features))
    }
}

/// Checks one tree: every node well-formed, every child index in bounds,
/// and the node list forming exactly one tree reachable from the root.
fn validate_tree(
    tree_index: usize,
    tree: &DecisionTree,
    feature_count: usize,
) -> Result<(), ModelError> {
    let nodes = &tree.nodes;
    if nodes.is_empty() {
        return Err(ModelError::EmptyTree { tree: tree_index });
    }
    for (node_index, node) in nodes.iter().enumerate() {
        let samples = node.samples();
        if !(samples.is_finite() && samples > 0.0) {
            return Err(ModelError::InvalidSampleCount {
                tree: tree_index,
                node: node_index,
                value: samples,
            });
        }
        match node {
            TreeNode::Leaf { probability, .. } => {
                if !(0.0..=1.0).contains(probability) {
                    return Err(ModelError::LeafProbability {
                        tree: tree_index,
                        node: node_index,
                        value: *probability,
                    });
                }
            }
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
                ..
            } => {
                if *feature >= feature_count {
                    return Err(ModelError::FeatureOutOfBounds {
                        tree: tree_index,
                        node: node_index,
                        feature: *feature,
                        features: feature_count,
                    });
                }
                if !threshold.is_finite() {
                    return Err(ModelError::NonFiniteThreshold {
                        tree: tree_index,
                        node: node_index,
                        value: *threshold,
                    });
                }
                for child in [*left, *right] {
                    if child >= nodes.len() {
                        return Err(ModelError::ChildOutOfBounds {
                            tree: tree_index,
                            node: node_index,
                            child,
                            nodes: nodes.len(),
                        });
                    }
                }
            }
        }
    }

    // Walk from the root: each node must be reached exactly once.
    let mut visited = vec![false; nodes.len()];
    let mut stack = vec![0usize];
    while let Some(index) = stack.pop() {
        if visited[index] {
            return Err(ModelError::NotATree {
                tree: tree_index,
                node: index,
            });
        }
        visited[index] = true;
        if let TreeNode::Split { left, right, .. } = &nodes[index] {
            stack.push(*left);
            stack.push(*right);
        }
    }
    let unreachable = visited.iter().filter(|&&seen| !seen).count();
    if unreachable > 0 {
        return Err(ModelError::UnreachableNodes {
            tree: tree_index,
            unreachable,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn two_feature_names() -> Vec<String> {
        vec!["x0".to_string(), "x1".to_string()]
    }

    /// A stump on feature 0 plus a constant tree, over a two-feature schema.
    fn small_forest() -> Forest {
        let stump = DecisionTree::new(vec![
            TreeNode::Split {
                feature: 0,
                threshold: 5.0,
                left: 1,
                right: 2,
                samples: 100.0,
            },
            TreeNode::Leaf {
                probability: 0.2,
                samples: 50.0,
            },
            TreeNode::Leaf {
                probability: 0.8,
                samples: 50.0,
            },
        ]);
        let constant = DecisionTree::new(vec![TreeNode::Leaf {
            probability: 0.6,
            samples: 100.0,
        }]);
        Forest::new(two_feature_names(), vec![stump, constant]).expect("valid forest")
    }

    #[test]
    fn predict_averages_per_tree_probabilities() {
        let forest = small_forest();
        let low = forest.predict_positive(&[3.0, 0.0]).unwrap();
        let high = forest.predict_positive(&[7.0, 0.0]).unwrap();
        assert_abs_diff_eq!(low, (0.2 + 0.6) / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(high, (0.8 + 0.6) / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn split_boundary_value_descends_left() {
        let forest = small_forest();
        let at_threshold = forest.predict_positive(&[5.0, 0.0]).unwrap();
        assert_abs_diff_eq!(at_threshold, (0.2 + 0.6) / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn expected_value_is_cover_weighted_mean_of_leaves() {
        let forest = small_forest();
        // Stump: (50 * 0.2 + 50 * 0.8) / 100 = 0.5; constant tree: 0.6.
        assert_abs_diff_eq!(forest.expected_value(), 0.55, epsilon = 1e-12);
    }

    #[test]
    fn rejects_wrong_arity_input() {
        let forest = small_forest();
        let err = forest.predict_positive(&[1.0]).unwrap_err();
        assert_eq!(
            err,
            OracleError::FeatureArity {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn save_and_load_round_trip_preserves_the_forest() {
        let forest = small_forest();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forest.toml");

        forest.save(&path).expect("save should succeed");
        let loaded = Forest::load(&path).expect("load should succeed");

        assert_eq!(loaded, forest);
        assert_abs_diff_eq!(
            loaded.predict_positive(&[7.0, 1.0]).unwrap(),
            forest.predict_positive(&[7.0, 1.0]).unwrap(),
            epsilon = 0.0
        );
    }

    #[test]
    fn load_rejects_unsupported_format_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forest.toml");
        let text = r#"
format_version = 99
feature_names = ["x0"]

[[trees]]
[[trees.nodes]]
kind = "leaf"
probability = 0.5
samples = 10.0
"#;
        std::fs::write(&path, text).unwrap();
        match Forest::load(&path) {
            Err(ModelError::UnsupportedVersion { found: 99, .. }) => {}
            other => panic!("expected UnsupportedVersion, got {other:?}"),
        }
    }

    #[test]
    fn load_rejects_unparseable_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forest.toml");
        std::fs::write(&path, "this is not a forest").unwrap();
        assert!(matches!(Forest::load(&path), Err(ModelError::Parse(_))));
    }

    #[test]
    fn load_reports_missing_artifact_as_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(Forest::load(&path), Err(ModelError::Io(_))));
    }

    #[test]
    fn rejects_empty_forest_and_empty_schema() {
        assert!(matches!(
            Forest::new(two_feature_names(), Vec::new()),
            Err(ModelError::EmptyForest)
        ));
        assert!(matches!(
            Forest::new(
                Vec::new(),
                vec![DecisionTree::new(vec![TreeNode::Leaf {
                    probability: 0.5,
                    samples: 1.0,
                }])]
            ),
            Err(ModelError::EmptySchema)
        ));
    }

    #[test]
    fn rejects_schema_wider_than_the_attribution_limit() {
        let names: Vec<String> = (0..17).map(|i| format!("f{i}")).collect();
        let trees = vec![DecisionTree::new(vec![TreeNode::Leaf {
            probability: 0.5,
            samples: 1.0,
        }])];
        assert!(matches!(
            Forest::new(names, trees),
            Err(ModelError::SchemaTooWide {
                features: 17,
                limit: 16
            })
        ));
    }

    #[test]
    fn rejects_duplicate_feature_names() {
        let names = vec!["x0".to_string(), "x0".to_string()];
        let trees = vec![DecisionTree::new(vec![TreeNode::Leaf {
            probability: 0.5,
            samples: 1.0,
        }])];
        match Forest::new(names, trees) {
            Err(ModelError::DuplicateFeature(name)) => assert_eq!(name, "x0"),
            other => panic!("expected DuplicateFeature, got {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_bounds_child_index() {
        let trees = vec![DecisionTree::new(vec![
            TreeNode::Split {
                feature: 0,
                threshold: 1.0,
                left: 1,
                right: 7,
                samples: 10.0,
            },
            TreeNode::Leaf {
                probability: 0.5,
                samples: 5.0,
            },
        ])];
        assert!(matches!(
            Forest::new(two_feature_names(), trees),
            Err(ModelError::ChildOutOfBounds { child: 7, .. })
        ));
    }

    #[test]
    fn rejects_out_of_bounds_feature_index() {
        let trees = vec![DecisionTree::new(vec![
            TreeNode::Split {
                feature: 2,
                threshold: 1.0,
                left: 1,
                right: 2,
                samples: 10.0,
            },
            TreeNode::Leaf {
                probability: 0.5,
                samples: 5.0,
            },
            TreeNode::Leaf {
                probability: 0.5,
                samples: 5.0,
            },
        ])];
        assert!(matches!(
            Forest::new(two_feature_names(), trees),
            Err(ModelError::FeatureOutOfBounds { feature: 2, .. })
        ));
    }

    #[test]
    fn rejects_leaf_probability_outside_unit_interval() {
        let trees = vec![DecisionTree::new(vec![TreeNode::Leaf {
            probability: 1.5,
            samples: 1.0,
        }])];
        assert!(matches!(
            Forest::new(two_feature_names(), trees),
            Err(ModelError::LeafProbability { value, .. }) if value == 1.5
        ));
    }

    #[test]
    fn rejects_non_positive_sample_count() {
        let trees = vec![DecisionTree::new(vec![TreeNode::Leaf {
            probability: 0.5,
            samples: 0.0,
        }])];
        assert!(matches!(
            Forest::new(two_feature_names(), trees),
            Err(ModelError::InvalidSampleCount { .. })
        ));
    }

    #[test]
    fn rejects_non_finite_threshold() {
        let trees = vec![DecisionTree::new(vec![
            TreeNode::Split {
                feature: 0,
                threshold: f64::NAN,
                left: 1,
                right: 2,
                samples: 10.0,
            },
            TreeNode::Leaf {
                probability: 0.5,
                samples: 5.0,
            },
            TreeNode::Leaf {
                probability: 0.5,
                samples: 5.0,
            },
        ])];
        assert!(matches!(
            Forest::new(two_feature_names(), trees),
            Err(ModelError::NonFiniteThreshold { .. })
        ));
    }

    #[test]
    fn rejects_cyclic_node_graph() {
        // The root's left child points back at the root.
        let trees = vec![DecisionTree::new(vec![
            TreeNode::Split {
                feature: 0,
                threshold: 1.0,
                left: 0,
                right: 1,
                samples: 10.0,
            },
            TreeNode::Leaf {
                probability: 0.5,
                samples: 5.0,
            },
        ])];
        assert!(matches!(
            Forest::new(two_feature_names(), trees),
            Err(ModelError::NotATree { node: 0, .. })
        ));
    }

    #[test]
    fn rejects_unreachable_nodes() {
        let trees = vec![DecisionTree::new(vec![
            TreeNode::Split {
                feature: 0,
                threshold: 1.0,
                left: 1,
                right: 2,
                samples: 10.0,
            },
            TreeNode::Leaf {
                probability: 0.2,
                samples: 5.0,
            },
            TreeNode::Leaf {
                probability: 0.8,
                samples: 5.0,
            },
            TreeNode::Leaf {
                probability: 0.5,
                samples: 5.0,
            },
        ])];
        assert!(matches!(
            Forest::new(two_feature_names(), trees),
            Err(ModelError::UnreachableNodes { unreachable: 1, .. })
        ));
    }
}
