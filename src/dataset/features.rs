//! Tabular feature handling
//!
//! The tabular encoder was trained on features in a fixed column order.
//! [`FeatureSchema`] carries that order (the checkpoint's `tab_columns`) and
//! is the only way a [`FeatureVector`] is checked before inference.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::utils::error::{GeoCropError, Result};

/// Column order used by the bundled training data
/// (soil pH, nitrogen, phosphorus, potassium, rainfall, temperature, latitude, longitude)
pub const DEFAULT_TAB_COLUMNS: [&str; 8] = ["ph", "N", "P", "K", "rainfall", "temp", "lat", "lon"];

/// Ordered feature values for one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of a named column, if the schema knows it
    pub fn get(&self, schema: &FeatureSchema, column: &str) -> Option<f32> {
        schema
            .position(column)
            .and_then(|i| self.values.get(i).copied())
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Ordered column names a checkpoint's tabular encoder was trained on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    columns: Vec<String>,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::new(DEFAULT_TAB_COLUMNS.iter().map(|c| c.to_string()).collect())
    }
}

impl FeatureSchema {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Reject a feature vector that does not fit this schema
    ///
    /// The length must match exactly (no padding or truncation) and every
    /// value must be finite.
    pub fn validate(&self, features: &FeatureVector) -> Result<()> {
        if features.len() != self.len() {
            return Err(GeoCropError::InvalidFeatures(format!(
                "expected {} values ({}), got {}",
                self.len(),
                self.columns.join(", "),
                features.len()
            )));
        }

        for (column, value) in self.columns.iter().zip(features.values()) {
            if !value.is_finite() {
                return Err(GeoCropError::InvalidFeatures(format!(
                    "value for '{}' is not finite ({})",
                    column, value
                )));
            }
        }

        Ok(())
    }

    /// Build a feature vector from named values, in schema order
    ///
    /// Every schema column must be present; names outside the schema are ignored.
    pub fn vector_from_named(&self, named: &HashMap<String, f32>) -> Result<FeatureVector> {
        let values = self
            .columns
            .iter()
            .map(|column| {
                named.get(column).copied().ok_or_else(|| {
                    GeoCropError::InvalidFeatures(format!("missing value for '{}'", column))
                })
            })
            .collect::<Result<Vec<f32>>>()?;

        let features = FeatureVector::new(values);
        self.validate(&features)?;
        Ok(features)
    }
}

/// Plausible agronomic bounds for input sanitization
#[derive(Debug, Clone)]
pub struct FeatureRanges {
    ranges: HashMap<String, (f32, f32)>,
}

impl Default for FeatureRanges {
    fn default() -> Self {
        let mut ranges = HashMap::new();
        ranges.insert("ph".to_string(), (0.0, 14.0));
        ranges.insert("N".to_string(), (0.0, 500.0));
        ranges.insert("P".to_string(), (0.0, 500.0));
        ranges.insert("K".to_string(), (0.0, 500.0));
        ranges.insert("rainfall".to_string(), (0.0, 5000.0));
        ranges.insert("temp".to_string(), (-50.0, 60.0));
        Self { ranges }
    }
}

impl FeatureRanges {
    /// Range for a column, if one is defined
    pub fn range(&self, column: &str) -> Option<(f32, f32)> {
        self.ranges.get(column).copied()
    }

    /// Clamp every bounded column into its range
    ///
    /// Columns without a range (e.g. coordinates) pass through unchanged.
    /// The vector must already satisfy the schema.
    pub fn clamp(&self, schema: &FeatureSchema, features: &FeatureVector) -> Result<FeatureVector> {
        schema.validate(features)?;

        let values = schema
            .columns()
            .iter()
            .zip(features.values())
            .map(|(column, &value)| match self.range(column) {
                Some((min, max)) => value.clamp(min, max),
                None => value,
            })
            .collect();

        Ok(FeatureVector::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: [f32; 8] = [6.4, 25.0, 18.0, 14.0, 900.0, 30.1, 19.10, 73.80];

    #[test]
    fn test_validate_accepts_matching_vector() {
        let schema = FeatureSchema::default();
        assert!(schema.validate(&FeatureVector::new(SAMPLE.to_vec())).is_ok());
    }

    #[test]
    fn test_validate_rejects_short_vector() {
        let schema = FeatureSchema::default();
        let short = FeatureVector::new(SAMPLE[..7].to_vec());

        let err = schema.validate(&short).unwrap_err();
        assert!(matches!(err, GeoCropError::InvalidFeatures(_)));
        assert!(err.to_string().contains("got 7"));
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        let schema = FeatureSchema::default();
        let mut values = SAMPLE.to_vec();
        values[4] = f32::INFINITY;

        let err = schema.validate(&FeatureVector::new(values)).unwrap_err();
        assert!(err.to_string().contains("rainfall"));
    }

    #[test]
    fn test_vector_from_named_uses_schema_order() {
        let schema = FeatureSchema::new(vec!["temp".to_string(), "ph".to_string()]);
        let mut named = HashMap::new();
        named.insert("ph".to_string(), 6.5);
        named.insert("temp".to_string(), 21.0);
        named.insert("unused".to_string(), 1.0);

        let features = schema.vector_from_named(&named).unwrap();
        assert_eq!(features.values(), &[21.0, 6.5]);
        assert_eq!(features.get(&schema, "ph"), Some(6.5));
    }

    #[test]
    fn test_vector_from_named_rejects_missing_column() {
        let schema = FeatureSchema::default();
        let named = HashMap::from([("ph".to_string(), 6.5)]);
        assert!(schema.vector_from_named(&named).is_err());
    }

    #[test]
    fn test_clamp_bounds_known_columns_only() {
        let schema = FeatureSchema::default();
        let ranges = FeatureRanges::default();
        let raw = FeatureVector::new(vec![15.0, -3.0, 18.0, 900.0, 9000.0, -80.0, 95.0, 200.0]);

        let clamped = ranges.clamp(&schema, &raw).unwrap();
        assert_eq!(
            clamped.values(),
            &[14.0, 0.0, 18.0, 500.0, 5000.0, -50.0, 95.0, 200.0]
        );
    }
}
