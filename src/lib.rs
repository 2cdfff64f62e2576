//! riskaudit — corporate bankruptcy-risk scoring and attribution.
//!
//! Scores a company's bankruptcy risk from a partial or complete set of
//! standardized financial ratios using a pre-trained classifier, and explains
//! which input ratios drove the score. The pipeline:
//!
//! 1. [`schema`] merges partial input onto schema defaults into a complete,
//!    schema-ordered feature vector
//! 2. [`scaler`] standardizes it with fitted center/scale statistics
//! 3. [`model`] produces a calibrated distress probability and classifies it
//!    against the 0.40 policy threshold
//! 4. [`explain`] computes a ranked per-feature attribution (exact Shapley
//!    for tree ensembles, a tagged heuristic otherwise)
//!
//! [`batch`] fans the same pipeline out over a table of companies and
//! aggregates a portfolio summary. All fitted state lives in an immutable
//! [`artifact::ModelContext`] loaded once at startup; concurrent scoring
//! calls share it read-only.
//!
//! Uses structured logging via [`tracing`]. Set the `RUST_LOG` environment
//! variable to control log verbosity (e.g., `RUST_LOG=riskaudit=debug`).

pub mod artifact;
pub mod batch;
pub mod error;
pub mod explain;
pub mod model;
pub mod scaler;
pub mod schema;
pub mod server;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::artifact::ModelContext;
use crate::error::ScoreError;
use crate::explain::{explain, Attribution};
use crate::model::{RiskStatus, RISK_THRESHOLD};

/// Outcome of scoring one company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    pub probability: f64,
    pub is_high_risk: bool,
    pub status: RiskStatus,
    pub threshold: f64,
    pub attribution: Attribution,
}

/// Score a single company from a partial input map.
///
/// Missing features default to the fitted means (a neutral company); unknown
/// keys are ignored. Scoring and explanation are independent: an attribution
/// failure is carried in [`Attribution::Unavailable`] and never suppresses
/// the probability.
pub fn score_single(
    ctx: &ModelContext,
    raw: &HashMap<String, f64>,
) -> Result<ScoreResult, ScoreError> {
    let raw_vector = ctx.schema.build_vector(raw);
    let normalized = ctx.scaler.normalize(&raw_vector)?;
    let probability = ctx.model.predict_one(&normalized);
    let status = RiskStatus::from_probability(probability);

    let attribution = explain(
        &ctx.schema,
        &ctx.scaler,
        &ctx.model,
        raw,
        &raw_vector,
        &normalized,
    );

    tracing::debug!(
        probability,
        status = status.as_str(),
        supplied = raw.len(),
        "scored single company"
    );

    Ok(ScoreResult {
        probability,
        is_high_risk: status.is_high_risk(),
        status,
        threshold: RISK_THRESHOLD,
        attribution,
    })
}
