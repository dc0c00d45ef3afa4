//! Engine settings: quorum sizes, scheduler tuning, anti-troll scoring and
//! the initial priority curves.
//!
//! One immutable value, shared by the engine as `Arc<Settings>`. Changing
//! settings means building a new engine.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{CategoryId, CurveScope, CurveSegment, DefaultCurve, GeoUnitId};
use crate::priority::{Curve, Segment};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub quorum: QuorumSettings,
    pub scheduler: SchedulerSettings,
    pub antitroll: AntiTrollSettings,
    pub curves: CurveSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumSettings {
    /// Matching identifications needed to identify an attachment.
    pub identification: u32,
    /// Problem reports needed to flag an attachment.
    pub identification_problem: u32,
    /// Matching count claims needed to confirm a work unit stage.
    pub count: u32,
}

impl Default for QuorumSettings {
    fn default() -> Self {
        Self {
            identification: 2,
            identification_problem: 2,
            count: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Identification tasks served per transcription task.
    pub interleave_ratio: u32,
    /// Hide an assigned replica from other reporters for this long.
    /// Unset means assignments are never hidden.
    pub task_lease_secs: Option<u64>,
    /// Period of the background consolidation and scheduling pass.
    pub pass_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interleave_ratio: 1,
            task_lease_secs: None,
            pass_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiTrollSettings {
    pub enabled: bool,
    /// Score at which a submitter is excluded.
    pub threshold: i64,
    pub identification_mismatch_penalty: i64,
    pub agreement_reward: i64,
}

impl Default for AntiTrollSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 150_000,
            identification_mismatch_penalty: 1,
            agreement_reward: 1,
        }
    }
}

/// Curves seeded into an empty store on first start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveSettings {
    pub geo_default: Vec<Segment>,
    pub category_default: Vec<Segment>,
    pub identification: Vec<Segment>,
    pub geo_unit: Vec<GeoUnitCurve>,
    pub category: Vec<CategoryCurve>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoUnitCurve {
    pub unit: GeoUnitId,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCurve {
    pub category: CategoryId,
    pub segments: Vec<Segment>,
}

fn flat(weight: u32) -> Segment {
    Segment {
        from: 0,
        to: 100,
        weight,
        max_rank: None,
    }
}

impl Default for CurveSettings {
    /// Geographic units ramp up sharply after their first few arrivals;
    /// categories and identification are flat.
    fn default() -> Self {
        Self {
            geo_default: vec![
                Segment {
                    from: 0,
                    to: 2,
                    weight: 4,
                    max_rank: None,
                },
                Segment {
                    from: 2,
                    to: 10,
                    weight: 40,
                    max_rank: None,
                },
                Segment {
                    from: 10,
                    to: 100,
                    weight: 200,
                    max_rank: None,
                },
            ],
            category_default: vec![flat(100)],
            identification: vec![flat(100)],
            geo_unit: Vec::new(),
            category: Vec::new(),
        }
    }
}

impl CurveSettings {
    /// Every configured segment, tagged with its scope.
    pub fn scoped_segments(&self) -> Vec<(CurveScope, Segment)> {
        let defaults = [
            (DefaultCurve::GeoUnit, &self.geo_default),
            (DefaultCurve::Category, &self.category_default),
            (DefaultCurve::Identification, &self.identification),
        ];
        let mut scoped: Vec<(CurveScope, Segment)> = defaults
            .into_iter()
            .flat_map(|(which, segments)| {
                segments
                    .iter()
                    .map(move |s| (CurveScope::Default(which), *s))
            })
            .collect();
        for curve in &self.geo_unit {
            scoped.extend(
                curve
                    .segments
                    .iter()
                    .map(|s| (CurveScope::GeoUnit(curve.unit.clone()), *s)),
            );
        }
        for curve in &self.category {
            scoped.extend(
                curve
                    .segments
                    .iter()
                    .map(|s| (CurveScope::Category(curve.category.clone()), *s)),
            );
        }
        scoped
    }

    /// Configured segments as storable records.
    pub fn initial_segments(&self) -> Vec<CurveSegment> {
        self.scoped_segments()
            .into_iter()
            .map(|(scope, segment)| CurveSegment::new(scope, segment))
            .collect()
    }
}

impl Settings {
    /// Read and validate a TOML settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(raw).map_err(|e| Error::Config(format!("invalid settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let quorums = [
            ("quorum.identification", self.quorum.identification),
            ("quorum.identification_problem", self.quorum.identification_problem),
            ("quorum.count", self.quorum.count),
        ];
        for (name, value) in quorums {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be at least 1")));
            }
        }
        if self.scheduler.interleave_ratio == 0 {
            return Err(Error::Config(
                "scheduler.interleave_ratio must be at least 1".to_string(),
            ));
        }
        if self.scheduler.pass_interval_secs == 0 {
            return Err(Error::Config(
                "scheduler.pass_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.antitroll.threshold <= 0 {
            return Err(Error::Config(
                "antitroll.threshold must be positive".to_string(),
            ));
        }

        let mut curves: std::collections::BTreeMap<CurveScope, Curve> = Default::default();
        for (scope, segment) in self.curves.scoped_segments() {
            curves
                .entry(scope.clone())
                .or_default()
                .insert(segment)
                .map_err(|e| Error::Config(format!("curve {scope}: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            [quorum]
            count = 3
            "#,
        )
        .unwrap();
        assert_eq!(settings.quorum.count, 3);
        assert_eq!(settings.quorum.identification, 2);
        assert_eq!(settings.scheduler.interleave_ratio, 1);
    }

    #[test]
    fn unit_curves_parse() {
        let settings = Settings::from_toml_str(
            r#"
            [[curves.geo_unit]]
            unit = "S12"
            segments = [
                { from = 0, to = 5, weight = 20, max_rank = 7 },
                { from = 5, to = 100, weight = 300 },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(settings.curves.geo_unit[0].unit.as_str(), "S12");
        assert_eq!(settings.curves.geo_unit[0].segments[0].max_rank, Some(7));
    }

    #[test]
    fn overlapping_configured_curve_is_rejected() {
        let err = Settings::from_toml_str(
            r#"
            [curves]
            category_default = [
                { from = 10, to = 25, weight = 20 },
                { from = 5, to = 15, weight = 50 },
            ]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("10% to 25%"), "got: {err}");
    }

    #[test]
    fn zero_quorum_is_rejected() {
        let err = Settings::from_toml_str("[quorum]\ncount = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
