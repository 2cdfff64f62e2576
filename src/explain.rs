//! Per-feature attribution of a risk score.
//!
//! Two strategies, selected by model-family capability:
//!
//! - **Exact** (tree ensembles): the polynomial-time exact Shapley
//!   decomposition for trees (Lundberg et al. 2018, "Consistent
//!   Individualized Feature Attribution for Tree Ensembles"). Contributions
//!   satisfy the efficiency property: they sum to
//!   `predict(x) − expected_value` per tree, and therefore over the
//!   probability-averaging ensemble as a whole.
//! - **Approximate** (any other family, or when the exact walk fails): a
//!   linear-deviation heuristic `impact = (raw − mean) * 0.1`, applied only
//!   to the features the caller explicitly supplied. Always tagged as
//!   approximate, never presented as exact.
//!
//! Attribution is best-effort: a failure here is reported as
//! [`Attribution::Unavailable`] and never blocks the scoring result.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{RiskModel, TreeEnsemble};
use crate::scaler::ScalerParams;
use crate::schema::FeatureSchema;

/// How many top drivers to report.
pub const TOP_K: usize = 5;

/// Weight for the linear-deviation fallback heuristic.
const APPROX_WEIGHT: f64 = 0.1;

/// One feature's contribution to the score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureImpact {
    pub feature: String,
    /// Raw (unnormalized) input value for the feature.
    pub value: f64,
    /// Signed contribution: positive pushes toward distress.
    pub impact: f64,
}

/// Attribution result, tagged by strategy so callers can distinguish
/// exact explanations from the heuristic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Attribution {
    /// Exact Shapley decomposition; `impacts` holds the top drivers by
    /// |impact| descending, `baseline` the ensemble expected value the
    /// contributions deviate from.
    Exact {
        baseline: f64,
        impacts: Vec<FeatureImpact>,
    },
    /// Linear-deviation heuristic over caller-supplied features only.
    Approximate { impacts: Vec<FeatureImpact> },
    /// Explanation failed; the scoring result is still valid.
    Unavailable { error: String },
}

/// Explain one scored entity. Never fails; degraded outcomes are encoded in
/// the [`Attribution`] tag.
pub fn explain(
    schema: &FeatureSchema,
    scaler: &ScalerParams,
    model: &RiskModel,
    supplied: &HashMap<String, f64>,
    raw_vector: &[f64],
    normalized: &[f64],
) -> Attribution {
    if let Some(ensemble) = model.tree_ensemble() {
        match exact_attribution(schema, ensemble, raw_vector, normalized) {
            Ok(attr) => return attr,
            Err(e) => {
                warn!(error = %e, "exact attribution failed, using linear-deviation fallback");
            }
        }
    }
    approximate_attribution(schema, scaler, supplied)
}

fn exact_attribution(
    schema: &FeatureSchema,
    ensemble: &TreeEnsemble,
    raw_vector: &[f64],
    normalized: &[f64],
) -> Result<Attribution, String> {
    let phi = shapley_values(ensemble, normalized)?;
    let baseline = ensemble.expected_value();

    let mut impacts: Vec<FeatureImpact> = phi
        .iter()
        .enumerate()
        .map(|(i, &impact)| FeatureImpact {
            feature: schema.name_at(i).to_string(),
            value: raw_vector[i],
            impact,
        })
        .collect();
    impacts.sort_by(|a, b| b.impact.abs().total_cmp(&a.impact.abs()));
    impacts.truncate(TOP_K);

    Ok(Attribution::Exact { baseline, impacts })
}

fn approximate_attribution(
    schema: &FeatureSchema,
    scaler: &ScalerParams,
    supplied: &HashMap<String, f64>,
) -> Attribution {
    let mut impacts = Vec::new();
    for (name, &value) in supplied {
        let Some(i) = schema.position(name) else {
            continue;
        };
        let impact = (value - scaler.mean[i]) * APPROX_WEIGHT;
        if !impact.is_finite() {
            return Attribution::Unavailable {
                error: format!("non-finite deviation for feature `{name}`"),
            };
        }
        impacts.push(FeatureImpact {
            feature: name.clone(),
            value,
            impact,
        });
    }
    impacts.sort_by(|a, b| b.impact.abs().total_cmp(&a.impact.abs()));
    impacts.truncate(TOP_K);
    Attribution::Approximate { impacts }
}

// ---------------------------------------------------------------------------
// Exact tree-ensemble Shapley values
// ---------------------------------------------------------------------------

/// Exact Shapley values for every feature, over the whole ensemble.
///
/// `sum(result) == ensemble.predict(x) − ensemble.expected_value()` up to
/// floating-point error.
pub fn shapley_values(ensemble: &TreeEnsemble, x: &[f64]) -> Result<Vec<f64>, String> {
    if ensemble.trees.is_empty() {
        return Err("ensemble has no trees".to_string());
    }
    let mut phi = vec![0.0; x.len()];
    for tree in &ensemble.trees {
        tree.validate(x.len())?;
        let mut tree_phi = vec![0.0; x.len()];
        recurse(tree, x, &mut tree_phi, 0, Vec::new(), 1.0, 1.0, -1);
        for (acc, p) in phi.iter_mut().zip(&tree_phi) {
            *acc += p / ensemble.trees.len() as f64;
        }
    }
    if phi.iter().any(|p| !p.is_finite()) {
        return Err("non-finite contribution in Shapley walk".to_string());
    }
    Ok(phi)
}

/// One element of the unique-feature path maintained by the walk.
#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature_index: i32,
    /// Fraction of "missing" subsets that flow down this branch.
    zero_fraction: f64,
    /// One when the sample's own value follows this branch, else zero.
    one_fraction: f64,
    /// Permutation weight accumulated for this path prefix length.
    pweight: f64,
}

/// Grow the path by one split, updating permutation weights.
fn extend(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature_index: i32) {
    let d = path.len();
    path.push(PathElement {
        feature_index,
        zero_fraction,
        one_fraction,
        pweight: if d == 0 { 1.0 } else { 0.0 },
    });
    for i in (0..d).rev() {
        path[i + 1].pweight += one_fraction * path[i].pweight * (i as f64 + 1.0) / (d as f64 + 1.0);
        path[i].pweight = zero_fraction * path[i].pweight * (d as f64 - i as f64) / (d as f64 + 1.0);
    }
}

/// Undo an [`extend`] for the split at `path_index`, removing it from the path.
fn unwind(path: &mut Vec<PathElement>, path_index: usize) {
    let d = path.len() - 1;
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let mut next_one_portion = path[d].pweight;
    for i in (0..d).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * (d as f64 + 1.0) / ((i as f64 + 1.0) * one_fraction);
            next_one_portion =
                tmp - path[i].pweight * zero_fraction * (d as f64 - i as f64) / (d as f64 + 1.0);
        } else {
            path[i].pweight =
                path[i].pweight * (d as f64 + 1.0) / (zero_fraction * (d as f64 - i as f64));
        }
    }
    for i in path_index..d {
        path[i].feature_index = path[i + 1].feature_index;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

/// Total permutation weight if the split at `path_index` were unwound,
/// without mutating the path.
fn unwound_path_sum(path: &[PathElement], path_index: usize) -> f64 {
    let d = path.len() - 1;
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let mut next_one_portion = path[d].pweight;
    let mut total = 0.0;
    for i in (0..d).rev() {
        if one_fraction != 0.0 {
            let tmp = next_one_portion * (d as f64 + 1.0) / ((i as f64 + 1.0) * one_fraction);
            total += tmp;
            next_one_portion =
                path[i].pweight - tmp * zero_fraction * (d as f64 - i as f64) / (d as f64 + 1.0);
        } else {
            total += path[i].pweight / (zero_fraction * (d as f64 - i as f64) / (d as f64 + 1.0));
        }
    }
    total
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    tree: &crate::model::DecisionTree,
    x: &[f64],
    phi: &mut [f64],
    node: usize,
    mut path: Vec<PathElement>,
    zero_fraction: f64,
    one_fraction: f64,
    feature_index: i32,
) {
    extend(&mut path, zero_fraction, one_fraction, feature_index);

    if tree.is_leaf(node) {
        // The root element (feature -1) carries no attribution.
        for i in 1..path.len() {
            let w = unwound_path_sum(&path, i);
            let el = path[i];
            phi[el.feature_index as usize] +=
                w * (el.one_fraction - el.zero_fraction) * tree.value[node];
        }
        return;
    }

    let split = tree.feature[node];
    let l = tree.left[node] as usize;
    let r = tree.right[node] as usize;
    let (hot, cold) = if x[split as usize] <= tree.threshold[node] {
        (l, r)
    } else {
        (r, l)
    };
    let hot_zero_fraction = tree.cover[hot] / tree.cover[node];
    let cold_zero_fraction = tree.cover[cold] / tree.cover[node];

    // A second split on a feature already on the path collapses into the
    // existing element rather than growing the path.
    let mut incoming_zero_fraction = 1.0;
    let mut incoming_one_fraction = 1.0;
    if let Some(k) = (1..path.len()).find(|&i| path[i].feature_index == split) {
        incoming_zero_fraction = path[k].zero_fraction;
        incoming_one_fraction = path[k].one_fraction;
        unwind(&mut path, k);
    }

    recurse(
        tree,
        x,
        phi,
        hot,
        path.clone(),
        hot_zero_fraction * incoming_zero_fraction,
        incoming_one_fraction,
        split,
    );
    recurse(
        tree,
        x,
        phi,
        cold,
        path,
        cold_zero_fraction * incoming_zero_fraction,
        0.0,
        split,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DecisionTree;

    /// Depth-2 tree over features {0, 1} with uneven covers.
    fn two_level_tree() -> DecisionTree {
        DecisionTree {
            feature: vec![0, 1, -1, -1, -1],
            threshold: vec![0.0, 0.5, 0.0, 0.0, 0.0],
            left: vec![1, 3, -1, -1, -1],
            right: vec![2, 4, -1, -1, -1],
            value: vec![0.0, 0.0, 0.9, 0.1, 0.6],
            cover: vec![100.0, 70.0, 30.0, 50.0, 20.0],
        }
    }

    /// Conditional expectation of the tree with only features in `s` known,
    /// unknown splits weighted by cover. Valuation function for brute force.
    fn cond_expect(tree: &DecisionTree, node: usize, x: &[f64], s: &[bool]) -> f64 {
        if tree.is_leaf(node) {
            return tree.value[node];
        }
        let f = tree.feature[node] as usize;
        let l = tree.left[node] as usize;
        let r = tree.right[node] as usize;
        if s[f] {
            let next = if x[f] <= tree.threshold[node] { l } else { r };
            cond_expect(tree, next, x, s)
        } else {
            let total = tree.cover[l] + tree.cover[r];
            (tree.cover[l] * cond_expect(tree, l, x, s)
                + tree.cover[r] * cond_expect(tree, r, x, s))
                / total
        }
    }

    fn factorial(n: usize) -> f64 {
        (1..=n).map(|i| i as f64).product()
    }

    /// Brute-force Shapley values by subset enumeration.
    fn brute_force_shapley(tree: &DecisionTree, x: &[f64]) -> Vec<f64> {
        let n = x.len();
        let mut phi = vec![0.0; n];
        for i in 0..n {
            for mask in 0..(1u32 << n) {
                if mask & (1 << i) != 0 {
                    continue;
                }
                let mut s = vec![false; n];
                let mut size = 0;
                for (j, slot) in s.iter_mut().enumerate() {
                    if mask & (1 << j) != 0 {
                        *slot = true;
                        size += 1;
                    }
                }
                let without = cond_expect(tree, 0, x, &s);
                s[i] = true;
                let with = cond_expect(tree, 0, x, &s);
                let weight = factorial(size) * factorial(n - size - 1) / factorial(n);
                phi[i] += weight * (with - without);
            }
        }
        phi
    }

    #[test]
    fn exact_walk_matches_brute_force_enumeration() {
        let tree = two_level_tree();
        let ensemble = TreeEnsemble { trees: vec![tree] };
        for x in [[-0.5, 0.2, 0.0], [0.5, 0.8, 1.0], [0.1, 0.5, -2.0]] {
            let fast = shapley_values(&ensemble, &x).unwrap();
            let slow = brute_force_shapley(&ensemble.trees[0], &x);
            for (a, b) in fast.iter().zip(&slow) {
                assert!((a - b).abs() < 1e-9, "fast {a} vs brute {b}");
            }
        }
    }

    #[test]
    fn efficiency_law_holds_for_ensemble() {
        let mut second = two_level_tree();
        second.feature = vec![2, 0, -1, -1, -1];
        second.value = vec![0.0, 0.0, 0.3, 0.7, 0.2];
        let ensemble = TreeEnsemble {
            trees: vec![two_level_tree(), second],
        };
        let x = [0.2, 0.9, -0.3];
        let phi = shapley_values(&ensemble, &x).unwrap();
        let total: f64 = phi.iter().sum();
        let expected = ensemble.predict(&x) - ensemble.expected_value();
        assert!(
            (total - expected).abs() <= 1e-6 * expected.abs().max(1.0),
            "sum {total} vs {expected}"
        );
    }

    #[test]
    fn repeated_feature_on_path_is_handled() {
        // Both levels split on feature 0.
        let tree = DecisionTree {
            feature: vec![0, 0, -1, -1, -1],
            threshold: vec![0.5, 0.2, 0.0, 0.0, 0.0],
            left: vec![1, 3, -1, -1, -1],
            right: vec![2, 4, -1, -1, -1],
            value: vec![0.0, 0.0, 0.8, 0.1, 0.4],
            cover: vec![100.0, 60.0, 40.0, 35.0, 25.0],
        };
        let ensemble = TreeEnsemble { trees: vec![tree] };
        for x in [[0.1, 0.0], [0.3, 0.0], [0.9, 0.0]] {
            let phi = shapley_values(&ensemble, &x).unwrap();
            let total: f64 = phi.iter().sum();
            let expected = ensemble.predict(&x) - ensemble.expected_value();
            assert!((total - expected).abs() < 1e-9);
            // Feature 1 never splits, so it gets exactly zero.
            assert_eq!(phi[1], 0.0);
        }
    }

    #[test]
    fn malformed_tree_is_rejected_not_panicked() {
        let tree = DecisionTree {
            feature: vec![7, -1, -1],
            threshold: vec![0.5, 0.0, 0.0],
            left: vec![1, -1, -1],
            right: vec![2, -1, -1],
            value: vec![0.0, 0.1, 0.9],
            cover: vec![10.0, 5.0, 5.0],
        };
        let ensemble = TreeEnsemble { trees: vec![tree] };
        let err = shapley_values(&ensemble, &[0.0, 0.0]).unwrap_err();
        assert!(err.contains("outside schema"));
    }
}
