//! Fitted artifact bundle and the immutable model context.
//!
//! One JSON artifact holds everything the scoring core consumes: the fitted
//! model (tagged by family), the fitted scaler statistics, and the ordered
//! feature name list. It is loaded exactly once at process start into a
//! [`ModelContext`] that is never mutated afterward; concurrent scoring
//! calls share it read-only behind an `Arc`. Replacing a model means
//! replacing the whole context, never editing fields in place.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::ScoreError;
use crate::model::{DecisionTree, RiskModel, TreeEnsemble};
use crate::scaler::ScalerParams;
use crate::schema::{FeatureSchema, FeatureSpec};

/// Version prefix for artifact fingerprints. Bump when the bundle format
/// changes.
const ARTIFACT_HASH_VERSION: &str = "v1";

/// Valid range for the standardized financial ratios. The upstream dataset
/// encodes every ratio into [0, 1].
const FEATURE_MIN: f64 = 0.0;
const FEATURE_MAX: f64 = 1.0;

/// On-disk artifact format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactBundle {
    pub feature_names: Vec<String>,
    pub scaler: ScalerParams,
    pub model: RiskModel,
}

/// Loaded, validated, immutable scoring context.
#[derive(Debug, Clone)]
pub struct ModelContext {
    pub schema: FeatureSchema,
    pub scaler: ScalerParams,
    pub model: RiskModel,
    /// `sha256:`-prefixed digest of the serialized bundle.
    pub fingerprint: String,
}

impl ModelContext {
    /// Load and validate an artifact bundle from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ScoreError> {
        let bytes = std::fs::read(path)?;
        let bundle: ArtifactBundle = serde_json::from_slice(&bytes)?;
        let ctx = Self::from_bundle(bundle)?;
        info!(
            path = %path.display(),
            features = ctx.schema.len(),
            family = ctx.model.family_name(),
            fingerprint = %ctx.fingerprint,
            "artifact loaded"
        );
        Ok(ctx)
    }

    /// Validate a bundle and build the context. All shape invariants are
    /// enforced here so the scoring paths never re-check them.
    pub fn from_bundle(bundle: ArtifactBundle) -> Result<Self, ScoreError> {
        let n = bundle.feature_names.len();
        if n == 0 {
            return Err(ScoreError::DegenerateArtifact(
                "empty feature name list".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for name in &bundle.feature_names {
            if !seen.insert(name) {
                return Err(ScoreError::DegenerateArtifact(format!(
                    "duplicate feature name `{name}`"
                )));
            }
        }
        if bundle.scaler.mean.len() != n || bundle.scaler.scale.len() != n {
            return Err(ScoreError::DegenerateArtifact(format!(
                "scaler arrays ({} mean, {} scale) do not match {n} features",
                bundle.scaler.mean.len(),
                bundle.scaler.scale.len()
            )));
        }
        for (i, (&m, &s)) in bundle
            .scaler
            .mean
            .iter()
            .zip(&bundle.scaler.scale)
            .enumerate()
        {
            if !m.is_finite() || !s.is_finite() || s == 0.0 {
                return Err(ScoreError::DegenerateArtifact(format!(
                    "bad scaler statistics for feature `{}` (mean {m}, scale {s})",
                    bundle.feature_names[i]
                )));
            }
        }
        match &bundle.model {
            RiskModel::Logistic(m) => {
                if m.weights.len() != n {
                    return Err(ScoreError::DegenerateArtifact(format!(
                        "logistic model has {} weights for {n} features",
                        m.weights.len()
                    )));
                }
            }
            RiskModel::TreeEnsemble(e) => {
                if e.trees.is_empty() {
                    return Err(ScoreError::DegenerateArtifact("ensemble has no trees".into()));
                }
                for (i, tree) in e.trees.iter().enumerate() {
                    tree.validate(n).map_err(|detail| {
                        ScoreError::DegenerateArtifact(format!("tree {i}: {detail}"))
                    })?;
                }
            }
        }

        let fingerprint = fingerprint(&bundle)?;
        let specs = bundle
            .feature_names
            .iter()
            .zip(&bundle.scaler.mean)
            .map(|(name, &mean)| FeatureSpec {
                name: name.clone(),
                default: mean,
                min: FEATURE_MIN,
                max: FEATURE_MAX,
            })
            .collect();

        Ok(Self {
            schema: FeatureSchema::new(specs),
            scaler: bundle.scaler,
            model: bundle.model,
            fingerprint,
        })
    }
}

fn fingerprint(bundle: &ArtifactBundle) -> Result<String, ScoreError> {
    let mut hasher = Sha256::new();
    hasher.update(ARTIFACT_HASH_VERSION.as_bytes());
    hasher.update(serde_json::to_vec(bundle)?);
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// Built-in demo artifact over the five headline ratios, for local trials
/// and tests. Statistics and splits are illustrative, not fitted.
pub fn demo_bundle() -> ArtifactBundle {
    let feature_names: Vec<String> = [
        "Borrowing dependency",
        "Continuous interest rate (after tax)",
        "Net worth/Assets",
        "Persistent EPS in the Last Four Seasons",
        "Liability to Equity",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    let scaler = ScalerParams {
        mean: vec![0.374, 0.410, 0.521, 0.229, 0.280],
        scale: vec![0.016, 0.014, 0.042, 0.012, 0.014],
    };

    // Splits are in normalized space (thresholds near zero = near the mean).
    // Leaves hold distress probabilities; high borrowing and low net worth
    // push toward distress.
    let trees = vec![
        DecisionTree {
            feature: vec![0, 2, -1, -1, -1],
            threshold: vec![0.5, -0.3, 0.0, 0.0, 0.0],
            left: vec![1, 3, -1, -1, -1],
            right: vec![2, 4, -1, -1, -1],
            value: vec![0.0, 0.0, 0.74, 0.52, 0.11],
            cover: vec![1000.0, 640.0, 360.0, 210.0, 430.0],
        },
        DecisionTree {
            feature: vec![2, 4, -1, -1, -1],
            threshold: vec![0.1, 0.6, 0.0, 0.0, 0.0],
            left: vec![1, 3, -1, -1, -1],
            right: vec![2, 4, -1, -1, -1],
            value: vec![0.0, 0.0, 0.09, 0.38, 0.81],
            cover: vec![1000.0, 520.0, 480.0, 390.0, 130.0],
        },
        DecisionTree {
            feature: vec![3, 1, -1, -1, -1],
            threshold: vec![-0.2, 0.4, 0.0, 0.0, 0.0],
            left: vec![1, 3, -1, -1, -1],
            right: vec![2, 4, -1, -1, -1],
            value: vec![0.0, 0.0, 0.13, 0.47, 0.69],
            cover: vec![1000.0, 310.0, 690.0, 180.0, 130.0],
        },
    ];

    ArtifactBundle {
        feature_names,
        scaler,
        model: RiskModel::TreeEnsemble(TreeEnsemble { trees }),
    }
}

/// Demo context, validated like any loaded artifact.
pub fn demo_context() -> ModelContext {
    ModelContext::from_bundle(demo_bundle()).expect("demo bundle is valid")
}
