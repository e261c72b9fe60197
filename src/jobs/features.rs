//! Crop recommendation covariates
//!
//! The seven numeric form fields are validated here, before anything is
//! staged, and forwarded to the worker as the text the client sent.

use std::collections::HashMap;

use crate::error::JobError;

/// A validated numeric field and the (trimmed) text it was parsed from
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureValue {
    raw: String,
    value: f64,
}

impl FeatureValue {
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Soil and climate readings for a crop recommendation
#[derive(Debug, Clone, PartialEq)]
pub struct CropFeatures {
    /// Nitrogen content
    pub n: FeatureValue,
    /// Phosphorus content
    pub p: FeatureValue,
    /// Potassium content
    pub k: FeatureValue,
    /// Degrees Celsius
    pub temperature: FeatureValue,
    /// Relative humidity in percent
    pub humidity: FeatureValue,
    pub ph: FeatureValue,
    /// Millimetres
    pub rainfall: FeatureValue,
}

#[derive(Clone, Copy)]
struct Bounds {
    min: Option<f64>,
    max: Option<f64>,
}

const ANY: Bounds = Bounds {
    min: None,
    max: None,
};
const NON_NEGATIVE: Bounds = Bounds {
    min: Some(0.0),
    max: None,
};
const PERCENT: Bounds = Bounds {
    min: Some(0.0),
    max: Some(100.0),
};
const PH_SCALE: Bounds = Bounds {
    min: Some(0.0),
    max: Some(14.0),
};

impl CropFeatures {
    /// Parse and validate the covariates from submitted form fields
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, JobError> {
        Ok(Self {
            n: parse_field(fields, "N", NON_NEGATIVE)?,
            p: parse_field(fields, "P", NON_NEGATIVE)?,
            k: parse_field(fields, "K", NON_NEGATIVE)?,
            temperature: parse_field(fields, "temperature", ANY)?,
            humidity: parse_field(fields, "humidity", PERCENT)?,
            ph: parse_field(fields, "ph", PH_SCALE)?,
            rainfall: parse_field(fields, "rainfall", NON_NEGATIVE)?,
        })
    }

    /// Worker arguments: N, P, K, temperature, humidity, ph, rainfall
    pub fn worker_args(&self) -> [&str; 7] {
        [
            self.n.as_str(),
            self.p.as_str(),
            self.k.as_str(),
            self.temperature.as_str(),
            self.humidity.as_str(),
            self.ph.as_str(),
            self.rainfall.as_str(),
        ]
    }
}

fn parse_field(
    fields: &HashMap<String, String>,
    field: &'static str,
    bounds: Bounds,
) -> Result<FeatureValue, JobError> {
    let invalid = |reason: String| JobError::InvalidField { field, reason };

    let raw = fields
        .get(field)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("missing".to_string()))?;

    let value: f64 = raw
        .parse()
        .map_err(|_| invalid(format!("'{}' is not a number", raw)))?;
    if !value.is_finite() {
        return Err(invalid(format!("'{}' is not a finite number", raw)));
    }

    match (bounds.min, bounds.max) {
        (Some(min), Some(max)) if value < min || value > max => {
            return Err(invalid(format!("must be between {} and {}", min, max)));
        }
        (Some(min), None) if value < min => {
            return Err(invalid(format!("must be at least {}", min)));
        }
        _ => {}
    }

    Ok(FeatureValue {
        raw: raw.to_string(),
        value,
    })
}
