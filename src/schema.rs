//! Feature schema and vector builder.
//!
//! The schema is the ordered list of financial ratios the fitted model
//! expects, with per-feature defaults (the fitted scaler means) and valid
//! ranges. Order is fixed for the lifetime of a loaded artifact and defines
//! the column layout every downstream component assumes.
//!
//! [`FeatureSchema::build_vector`] is the only place column alignment
//! happens for the single-company path: partial, unordered input maps become
//! complete, schema-ordered dense vectors here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One financial ratio the model takes as input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    /// Neutral value used when the caller does not supply this feature.
    /// Equals the fitted scaler mean for the feature.
    pub default: f64,
    pub min: f64,
    pub max: f64,
}

/// Ordered, immutable feature layout of a loaded artifact.
#[derive(Debug, Clone)]
pub struct FeatureSchema {
    features: Vec<FeatureSpec>,
    by_name: HashMap<String, usize>,
}

impl FeatureSchema {
    /// Build a schema from ordered specs. Caller guarantees unique names
    /// (enforced during artifact validation).
    pub fn new(features: Vec<FeatureSpec>) -> Self {
        let by_name = features
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self { features, by_name }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn specs(&self) -> &[FeatureSpec] {
        &self.features
    }

    /// Schema position of a feature name, if known.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn name_at(&self, index: usize) -> &str {
        &self.features[index].name
    }

    /// Ordered feature names, used for input controls and CSV templates.
    pub fn template_columns(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    /// Merge a partial input map onto the schema defaults.
    ///
    /// Output length and order exactly match the schema. Unknown keys are
    /// ignored; missing keys take the feature default. Never fails.
    pub fn build_vector(&self, raw: &HashMap<String, f64>) -> Vec<f64> {
        self.features
            .iter()
            .map(|f| raw.get(&f.name).copied().unwrap_or(f.default))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_feature_schema() -> FeatureSchema {
        FeatureSchema::new(vec![
            FeatureSpec {
                name: "Net worth/Assets".into(),
                default: 0.5,
                min: 0.0,
                max: 1.0,
            },
            FeatureSpec {
                name: "Borrowing dependency".into(),
                default: 0.3,
                min: 0.0,
                max: 1.0,
            },
        ])
    }

    #[test]
    fn empty_input_yields_defaults() {
        let schema = two_feature_schema();
        let v = schema.build_vector(&HashMap::new());
        assert_eq!(v, vec![0.5, 0.3]);
    }

    #[test]
    fn supplied_values_override_defaults_in_schema_order() {
        let schema = two_feature_schema();
        // Insertion order deliberately reversed relative to schema order.
        let mut raw = HashMap::new();
        raw.insert("Borrowing dependency".to_string(), 0.9);
        raw.insert("Net worth/Assets".to_string(), 0.1);
        let v = schema.build_vector(&raw);
        assert_eq!(v, vec![0.1, 0.9]);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let schema = two_feature_schema();
        let mut raw = HashMap::new();
        raw.insert("Company Name".to_string(), 42.0);
        let v = schema.build_vector(&raw);
        assert_eq!(v, vec![0.5, 0.3]);
    }

    #[test]
    fn template_columns_match_schema_order() {
        let schema = two_feature_schema();
        assert_eq!(
            schema.template_columns(),
            vec!["Net worth/Assets", "Borrowing dependency"]
        );
        assert_eq!(schema.position("Borrowing dependency"), Some(1));
        assert_eq!(schema.position("nope"), None);
    }
}
