//! Crop recommendation text and yield estimate

use serde::{Deserialize, Serialize};

use crate::dataset::features::{FeatureSchema, FeatureVector};
use crate::utils::round_to;

/// Tons per acre used when a crop has no entry in the table
pub const DEFAULT_YIELD_PER_ACRE: f64 = 1.5;

/// Rough yield per acre (tons) for a predicted class
pub fn yield_per_acre(crop: &str) -> f64 {
    match crop {
        "Rice" => 2.5,
        "Wheat" => 1.8,
        "Maize" => 3.5,
        "Forest" | "Pasture" => 0.0,
        "PermanentCrop" => 2.0,
        _ => DEFAULT_YIELD_PER_ACRE,
    }
}

/// Estimated harvest for a farm of a given size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldEstimate {
    pub area_acres: f64,
    pub estimated_yield_tons: f64,
    pub yield_per_acre: f64,
}

impl YieldEstimate {
    /// `None` unless the area is a positive, finite number
    pub fn for_area(crop: &str, area_acres: f64) -> Option<Self> {
        if !area_acres.is_finite() || area_acres <= 0.0 {
            return None;
        }

        let per_acre = yield_per_acre(crop);
        Some(Self {
            area_acres: round_to(area_acres, 2),
            estimated_yield_tons: round_to(area_acres * per_acre, 2),
            yield_per_acre: per_acre,
        })
    }
}

/// Short explanation for the predicted crop, quoting the relevant inputs
pub fn recommendation(crop: &str, features: &FeatureVector, schema: &FeatureSchema) -> String {
    let value = |column: &str| features.get(schema, column).unwrap_or(0.0);

    match crop {
        "Rice" => format!(
            "Recommended **Rice** due to high water availability (Rainfall: {}mm) \
             and suitable temperature ({}°C). Ensure field flooding is maintained.",
            value("rainfall"),
            value("temp")
        ),
        "Wheat" => format!(
            "Recommended **Wheat** as the conditions favor cool-season crops \
             (Temp: {}°C). Rainfall ({}mm) is moderate and suitable.",
            value("temp"),
            value("rainfall")
        ),
        "Maize" => format!(
            "Recommended **Maize** due to high nutrient levels (N: {}). \
             This crop requires well-drained soil and good fertility.",
            value("N")
        ),
        "Forest" => "The area appears to be a **Forest**. Conservation is recommended over \
                     cultivation."
            .to_string(),
        other => format!(
            "The model predicts **{}**. Please consult a local agronomist for specific advice.",
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features() -> FeatureVector {
        FeatureVector::new(vec![6.4, 25.0, 18.0, 14.0, 900.0, 30.1, 19.1, 73.8])
    }

    #[test]
    fn test_recommendation_quotes_inputs() {
        let schema = FeatureSchema::default();

        let rice = recommendation("Rice", &features(), &schema);
        assert!(rice.contains("Rainfall: 900mm"));
        assert!(rice.contains("30.1°C"));

        let maize = recommendation("Maize", &features(), &schema);
        assert!(maize.contains("N: 25"));

        let other = recommendation("Barley", &features(), &schema);
        assert!(other.contains("**Barley**"));
    }

    #[test]
    fn test_yield_estimate() {
        let estimate = YieldEstimate::for_area("Maize", 2.0).unwrap();
        assert_eq!(estimate.estimated_yield_tons, 7.0);
        assert_eq!(estimate.yield_per_acre, 3.5);

        let unknown = YieldEstimate::for_area("Barley", 3.333).unwrap();
        assert_eq!(unknown.area_acres, 3.33);
        assert_eq!(unknown.yield_per_acre, DEFAULT_YIELD_PER_ACRE);

        assert!(YieldEstimate::for_area("Rice", 0.0).is_none());
        assert!(YieldEstimate::for_area("Rice", f64::NAN).is_none());
    }
}
