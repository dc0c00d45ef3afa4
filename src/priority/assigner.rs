//! Priority assignment.
//!
//! Every eligible work unit has a standing in two groupings, its geographic
//! unit and its category: the 1-based order it became eligible in, and how
//! far along the grouping was at that moment. Each standing is looked up on
//! the grouping's curve and the two weights are multiplied into a scheduling
//! key. Early arrivals in a grouping get small keys, so work spreads across
//! groupings before any single one is exhausted.
//!
//! All functions here are pure over a snapshot; the engine persists results.

use std::collections::{BTreeMap, HashMap};

use crate::error::Result;
use crate::model::{
    Attachment, AttachmentId, CategoryId, CurveScope, CurveSegment, DefaultCurve, GeoUnitId,
    Scheduling, Standing, WorkUnit, WorkUnitId,
};

use super::curve::{Curve, PriorityMap, WithDefault, clamp_key, multiply};

/// All configured curves, indexed by scope.
#[derive(Debug, Clone, Default)]
pub struct CurveBook {
    geo: HashMap<GeoUnitId, Curve>,
    category: HashMap<CategoryId, Curve>,
    geo_default: Curve,
    category_default: Curve,
    identification_default: Curve,
    empty: Curve,
}

impl CurveBook {
    pub fn from_segments<'a>(segments: impl IntoIterator<Item = &'a CurveSegment>) -> Result<Self> {
        let mut book = Self::default();
        for stored in segments {
            let curve = match &stored.scope {
                CurveScope::GeoUnit(unit) => book.geo.entry(unit.clone()).or_default(),
                CurveScope::Category(category) => {
                    book.category.entry(category.clone()).or_default()
                }
                CurveScope::Default(DefaultCurve::GeoUnit) => &mut book.geo_default,
                CurveScope::Default(DefaultCurve::Category) => &mut book.category_default,
                CurveScope::Default(DefaultCurve::Identification) => {
                    &mut book.identification_default
                }
            };
            curve.insert(stored.segment)?;
        }
        Ok(book)
    }

    pub fn geo_map(&self, unit: &GeoUnitId) -> WithDefault<&Curve, &Curve> {
        WithDefault::new(self.geo.get(unit).unwrap_or(&self.empty), &self.geo_default)
    }

    pub fn category_map(&self, category: &CategoryId) -> WithDefault<&Curve, &Curve> {
        WithDefault::new(
            self.category.get(category).unwrap_or(&self.empty),
            &self.category_default,
        )
    }

    /// Identification uses the hinted geographic unit's own curve when one
    /// exists, and the identification default otherwise.
    pub fn identification_map(&self, hint: Option<&GeoUnitId>) -> WithDefault<&Curve, &Curve> {
        let primary = hint
            .and_then(|unit| self.geo.get(unit))
            .unwrap_or(&self.empty);
        WithDefault::new(primary, &self.identification_default)
    }
}

/// Completion of a grouping, in percent, when its `rank`-th unit arrived.
fn proportion(rank: u32, group_size: usize) -> f64 {
    if group_size == 0 {
        return 0.0;
    }
    100.0 * f64::from(rank.saturating_sub(1)) / group_size as f64
}

fn key_or_last(weight: Option<u64>) -> i32 {
    weight.map(clamp_key).unwrap_or(i32::MAX)
}

/// Compute scheduling fields for every work unit and return only those that
/// differ from what the unit currently carries.
///
/// Units that are not eligible yet get `None`.
pub fn plan_scheduling(
    units: &[WorkUnit],
    book: &CurveBook,
) -> Vec<(WorkUnitId, Option<Scheduling>)> {
    let mut geo_sizes: HashMap<&GeoUnitId, usize> = HashMap::new();
    let mut category_sizes: HashMap<&CategoryId, usize> = HashMap::new();
    for unit in units {
        *geo_sizes.entry(&unit.geo_unit).or_default() += 1;
        *category_sizes.entry(&unit.category).or_default() += 1;
    }

    let mut arrivals: Vec<&WorkUnit> = units.iter().filter(|u| u.is_eligible()).collect();
    arrivals.sort_by(|a, b| a.eligible_at.cmp(&b.eligible_at).then(a.id.cmp(&b.id)));

    let mut geo_ranks: HashMap<&GeoUnitId, u32> = HashMap::new();
    let mut category_ranks: HashMap<&CategoryId, u32> = HashMap::new();
    let mut planned: BTreeMap<WorkUnitId, Scheduling> = BTreeMap::new();

    for unit in arrivals {
        let geo_rank = geo_ranks.entry(&unit.geo_unit).or_default();
        *geo_rank += 1;
        let category_rank = category_ranks.entry(&unit.category).or_default();
        *category_rank += 1;

        let geo = Standing {
            rank: *geo_rank,
            proportion: proportion(*geo_rank, geo_sizes[&unit.geo_unit]),
        };
        let category = Standing {
            rank: *category_rank,
            proportion: proportion(*category_rank, category_sizes[&unit.category]),
        };
        let weight = multiply(
            book.geo_map(&unit.geo_unit).value_at(geo.proportion, geo.rank),
            book.category_map(&unit.category)
                .value_at(category.proportion, category.rank),
        );
        planned.insert(
            unit.id,
            Scheduling {
                geo,
                category,
                key: key_or_last(weight),
            },
        );
    }

    units
        .iter()
        .filter_map(|unit| {
            let next = planned.get(&unit.id).copied();
            (unit.scheduling != next).then_some((unit.id, next))
        })
        .collect()
}

/// Scheduling keys for identification work, over all attachments in
/// upload order.
pub fn attachment_keys(attachments: &[Attachment], book: &CurveBook) -> BTreeMap<AttachmentId, i32> {
    let mut ordered: Vec<&Attachment> = attachments.iter().collect();
    ordered.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then(a.id.cmp(&b.id)));

    let total = ordered.len();
    ordered
        .into_iter()
        .zip(1u32..)
        .map(|(attachment, rank)| {
            let weight = book
                .identification_map(attachment.geo_unit_hint.as_ref())
                .value_at(proportion(rank, total), rank);
            (attachment.id, key_or_last(weight))
        })
        .collect()
}
