//! Persisted priority curve segments.

use serde::{Deserialize, Serialize};

use super::ids::{CategoryId, GeoUnitId, SegmentId};
use crate::error::{Error, Result};
use crate::priority::curve::Segment;

/// System-wide curves used when no unit-specific curve applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultCurve {
    GeoUnit,
    Category,
    Identification,
}

/// Which curve a segment belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CurveScope {
    GeoUnit(GeoUnitId),
    Category(CategoryId),
    Default(DefaultCurve),
}

impl CurveScope {
    /// Split into (kind, reference) columns for storage.
    pub fn to_parts(&self) -> (&'static str, Option<&str>) {
        match self {
            CurveScope::GeoUnit(id) => ("geo_unit", Some(id.as_str())),
            CurveScope::Category(id) => ("category", Some(id.as_str())),
            CurveScope::Default(DefaultCurve::GeoUnit) => ("default_geo_unit", None),
            CurveScope::Default(DefaultCurve::Category) => ("default_category", None),
            CurveScope::Default(DefaultCurve::Identification) => ("default_identification", None),
        }
    }

    pub fn from_parts(kind: &str, reference: Option<&str>) -> Result<Self> {
        let require = |r: Option<&str>| {
            r.map(str::to_string)
                .ok_or_else(|| Error::Other(format!("curve scope {kind} requires a reference")))
        };
        Ok(match kind {
            "geo_unit" => CurveScope::GeoUnit(GeoUnitId(require(reference)?)),
            "category" => CurveScope::Category(CategoryId(require(reference)?)),
            "default_geo_unit" => CurveScope::Default(DefaultCurve::GeoUnit),
            "default_category" => CurveScope::Default(DefaultCurve::Category),
            "default_identification" => CurveScope::Default(DefaultCurve::Identification),
            other => return Err(Error::Other(format!("unknown curve scope: {other}"))),
        })
    }
}

impl std::fmt::Display for CurveScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_parts() {
            (kind, Some(reference)) => write!(f, "{kind}:{reference}"),
            (kind, None) => write!(f, "{kind}"),
        }
    }
}

impl std::str::FromStr for CurveScope {
    type Err = Error;

    /// Parses the `Display` form, e.g. `geo_unit:S12` or `default_category`.
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((kind, reference)) => CurveScope::from_parts(kind, Some(reference)),
            None => CurveScope::from_parts(s, None),
        }
    }
}

/// A segment as stored: the pure [`Segment`] plus identity and scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveSegment {
    pub id: SegmentId,
    pub scope: CurveScope,
    pub segment: Segment,
}

impl CurveSegment {
    pub fn new(scope: CurveScope, segment: Segment) -> Self {
        Self {
            id: SegmentId::new(),
            scope,
            segment,
        }
    }
}
