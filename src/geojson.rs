//! # GeoJSON Segment Artifact
//!
//! The persisted output is a GeoJSON `FeatureCollection`: one `LineString`
//! feature per road segment with `{iri, color}` properties. The same file is
//! read back as the "old" segment set on the next run, so parsing is
//! deliberately lenient:
//!
//! - a missing or unreadable prior artifact means "no prior data", not an
//!   error;
//! - individual old features are kept as raw [`serde_json::Value`]s, so a
//!   malformed feature survives the merge unaltered instead of being lost.

use crate::iri::iri_color;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Properties carried by every roughness feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureProperties {
    pub iri: f64,
    pub color: String,
}

/// A GeoJSON `LineString` geometry, coordinates in `[lon, lat]` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineStringGeometry {
    #[serde(rename = "type")]
    pub geometry_type: String,
    pub coordinates: Vec<[f64; 2]>,
}

/// A GeoJSON feature produced by this pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub feature_type: String,
    pub geometry: LineStringGeometry,
    pub properties: FeatureProperties,
}

impl Feature {
    /// Build a feature from projected segment coordinates and an IRI value.
    ///
    /// Non-finite IRI values are normalized to 0.0 before they reach the
    /// artifact; a viewer should never see `NaN`.
    pub fn new(coordinates: Vec<[f64; 2]>, iri: f64) -> Self {
        let iri = safe_float(iri);
        Self {
            feature_type: "Feature".to_string(),
            geometry: LineStringGeometry {
                geometry_type: "LineString".to_string(),
                coordinates,
            },
            properties: FeatureProperties {
                iri,
                color: iri_color(iri).to_string(),
            },
        }
    }
}

/// The persisted `FeatureCollection`.
///
/// Features are raw values: a collection read from storage mixes this run's
/// typed features with whatever earlier runs (or earlier versions) wrote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub collection_type: String,
    pub features: Vec<Value>,
}

impl FeatureCollection {
    /// Wrap merged features into a collection ready for serialization.
    pub fn new(features: Vec<Value>) -> Self {
        Self {
            collection_type: "FeatureCollection".to_string(),
            features,
        }
    }
}

/// Read the features of a previously persisted collection.
///
/// Any read or parse failure is treated as "no prior data".
pub fn parse_feature_collection(text: &str) -> Vec<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(mut obj)) => match obj.remove("features") {
            Some(Value::Array(features)) => features,
            _ => {
                log::warn!("[GeoJSON] Prior artifact has no feature array, starting empty");
                Vec::new()
            }
        },
        Ok(_) => {
            log::warn!("[GeoJSON] Prior artifact is not an object, starting empty");
            Vec::new()
        }
        Err(e) => {
            log::warn!("[GeoJSON] Prior artifact unreadable ({}), starting empty", e);
            Vec::new()
        }
    }
}

/// Leniently extract LineString coordinates from a raw feature.
///
/// Returns `None` for anything that does not hold at least two `[lon, lat]`
/// pairs; the merge step keeps such features untouched (fail open).
pub fn geometry_coords(feature: &Value) -> Option<Vec<[f64; 2]>> {
    let coords = feature.get("geometry")?.get("coordinates")?.as_array()?;
    let mut out = Vec::with_capacity(coords.len());
    for pair in coords {
        let pair = pair.as_array()?;
        if pair.len() < 2 {
            return None;
        }
        let lon = pair[0].as_f64()?;
        let lat = pair[1].as_f64()?;
        out.push([lon, lat]);
    }
    if out.len() < 2 {
        return None;
    }
    Some(out)
}

pub(crate) fn safe_float(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
