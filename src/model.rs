//! Opaque fitted risk classifier and the threshold policy.
//!
//! The classifier is supplied externally as an already-fitted artifact;
//! nothing here trains or mutates it. Two model families are supported:
//!
//! - **Tree ensemble**: a forest whose leaves hold distress-class
//!   probabilities; the ensemble prediction is the mean over trees. Trees are
//!   stored as flat parallel arrays (feature/threshold/children/value/cover),
//!   the layout the exact attribution walk in [`crate::explain`] consumes.
//! - **Logistic**: `sigmoid(w · x + b)` over the normalized vector.
//!
//! The pipeline depends only on [`RiskModel::predict_proba`]; the family
//! probe [`RiskModel::tree_ensemble`] exists solely so the attribution
//! engine can pick its exact strategy.

use serde::{Deserialize, Serialize};

/// Probability cut separating Stable from HighRisk.
///
/// Deliberately below the naive 0.5 decision boundary: the training
/// population's distress base rate is low, and 0.40 trades precision for
/// recall on the distress class. Strict `>` comparison.
pub const RISK_THRESHOLD: f64 = 0.40;

/// Per-entity classification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskStatus {
    Stable,
    HighRisk,
}

impl RiskStatus {
    /// Apply the threshold policy to a probability.
    pub fn from_probability(p: f64) -> Self {
        if p > RISK_THRESHOLD {
            Self::HighRisk
        } else {
            Self::Stable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::HighRisk => "high_risk",
        }
    }

    pub fn is_high_risk(&self) -> bool {
        matches!(self, Self::HighRisk)
    }
}

/// One fitted decision tree in flat-array form.
///
/// Node `i` is internal when `feature[i] >= 0` (descend left when
/// `x[feature[i]] <= threshold[i]`) and a leaf when `feature[i] == -1`
/// (prediction in `value[i]`). `cover[i]` is the training sample weight that
/// reached node `i`; the attribution walk uses it to weight the paths a
/// missing feature could have taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub feature: Vec<i32>,
    pub threshold: Vec<f64>,
    pub left: Vec<i32>,
    pub right: Vec<i32>,
    pub value: Vec<f64>,
    pub cover: Vec<f64>,
}

impl DecisionTree {
    pub fn n_nodes(&self) -> usize {
        self.feature.len()
    }

    pub fn is_leaf(&self, node: usize) -> bool {
        self.feature[node] < 0
    }

    /// Structural validation: parallel arrays aligned, split features inside
    /// the schema, child indices in range, covers positive. Run at artifact
    /// load so the prediction and attribution walks can index unchecked.
    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        let n = self.n_nodes();
        if n == 0
            || self.threshold.len() != n
            || self.left.len() != n
            || self.right.len() != n
            || self.value.len() != n
            || self.cover.len() != n
        {
            return Err("tree node arrays are empty or misaligned".to_string());
        }
        for node in 0..n {
            if self.cover[node] <= 0.0 {
                return Err(format!("non-positive cover at node {node}"));
            }
            if self.is_leaf(node) {
                continue;
            }
            let f = self.feature[node];
            if f as usize >= n_features {
                return Err(format!("tree split on feature {f} outside schema"));
            }
            let (l, r) = (self.left[node], self.right[node]);
            if l < 0 || r < 0 || l as usize >= n || r as usize >= n {
                return Err(format!("tree child index out of range at node {node}"));
            }
        }
        Ok(())
    }

    /// Walk the tree for one sample.
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut node = 0usize;
        while !self.is_leaf(node) {
            let f = self.feature[node] as usize;
            node = if x[f] <= self.threshold[node] {
                self.left[node] as usize
            } else {
                self.right[node] as usize
            };
        }
        self.value[node]
    }

    /// Cover-weighted expected prediction over the training distribution.
    pub fn expected_value(&self) -> f64 {
        self.expected_at(0)
    }

    fn expected_at(&self, node: usize) -> f64 {
        if self.is_leaf(node) {
            return self.value[node];
        }
        let l = self.left[node] as usize;
        let r = self.right[node] as usize;
        let total = self.cover[l] + self.cover[r];
        (self.cover[l] * self.expected_at(l) + self.cover[r] * self.expected_at(r)) / total
    }
}

/// Probability-averaging forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub trees: Vec<DecisionTree>,
}

impl TreeEnsemble {
    pub fn predict(&self, x: &[f64]) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.predict(x)).sum();
        sum / self.trees.len() as f64
    }

    /// Ensemble expected value: the attribution baseline.
    pub fn expected_value(&self) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.expected_value()).sum();
        sum / self.trees.len() as f64
    }
}

/// Fitted logistic classifier over normalized features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub intercept: f64,
}

impl LogisticModel {
    pub fn predict(&self, x: &[f64]) -> f64 {
        let margin: f64 =
            self.weights.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + self.intercept;
        sigmoid(margin)
    }
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// The fitted classifier, tagged by model family in the artifact bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum RiskModel {
    TreeEnsemble(TreeEnsemble),
    Logistic(LogisticModel),
}

impl RiskModel {
    /// Distress-class probabilities for a batch of normalized rows.
    pub fn predict_proba(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|r| self.predict_one(r)).collect()
    }

    pub fn predict_one(&self, x: &[f64]) -> f64 {
        match self {
            Self::TreeEnsemble(e) => e.predict(x),
            Self::Logistic(m) => m.predict(x),
        }
    }

    /// Capability probe: present only for model families with an exact
    /// Shapley decomposition.
    pub fn tree_ensemble(&self) -> Option<&TreeEnsemble> {
        match self {
            Self::TreeEnsemble(e) => Some(e),
            Self::Logistic(_) => None,
        }
    }

    pub fn family_name(&self) -> &'static str {
        match self {
            Self::TreeEnsemble(_) => "tree_ensemble",
            Self::Logistic(_) => "logistic",
        }
    }
}
