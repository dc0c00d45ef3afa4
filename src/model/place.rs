//! Polling places.

use serde::{Deserialize, Serialize};

use super::ids::{GeoUnitId, PlaceId};

/// A polling place. Belongs to exactly one geographic unit, which is the
/// grouping the scheduler balances coverage across.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub id: PlaceId,
    /// Human-facing code (e.g. "1234" or "S12-C3-M45").
    pub code: String,
    pub geo_unit: GeoUnitId,
}

impl Place {
    pub fn new(code: impl Into<String>, geo_unit: impl Into<GeoUnitId>) -> Self {
        Self {
            id: PlaceId::new(),
            code: code.into(),
            geo_unit: geo_unit.into(),
        }
    }
}
