//! Priority curves and their combinators.
//!
//! A curve maps (completion proportion, arrival rank) to a weight through a set
//! of non-overlapping segments. Curves compose: [`WithDefault`] fills gaps from
//! another curve, [`Product`] multiplies two independently configured curves.
//! Everything here is pure.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One piece of a curve: weight `weight` applies on `[from, to)` percent, and
/// additionally to the first `max_rank` arrivals wherever the proportion sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub from: u32,
    pub to: u32,
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rank: Option<u32>,
}

impl Segment {
    pub fn new(from: u32, to: u32, weight: u32) -> Result<Self> {
        let segment = Self {
            from,
            to,
            weight,
            max_rank: None,
        };
        segment.validate()?;
        Ok(segment)
    }

    pub fn with_max_rank(mut self, max_rank: u32) -> Self {
        self.max_rank = Some(max_rank);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.from >= self.to {
            return Err(Error::InvalidSegment(format!(
                "{}: lower bound must be below upper bound",
                self.range()
            )));
        }
        if self.to > 100 {
            return Err(Error::InvalidSegment(format!(
                "{}: bounds are percentages and cannot exceed 100",
                self.range()
            )));
        }
        Ok(())
    }

    /// The proportion range is half-open, except that a segment ending at
    /// 100% also covers exactly 100%.
    pub fn applies(&self, proportion: f64, rank: u32) -> bool {
        let from = f64::from(self.from);
        let to = f64::from(self.to);
        let in_range = from <= proportion && (proportion < to || (self.to == 100 && proportion <= to));
        in_range || self.max_rank.is_some_and(|max| rank <= max)
    }

    pub fn overlaps(&self, other: &Segment) -> bool {
        self.from < other.to && other.from < self.to
    }

    /// `"10% to 25%"`.
    pub fn range(&self) -> String {
        format!("{}% to {}%", self.from, self.to)
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} weight {}", self.range(), self.weight)?;
        if let Some(max_rank) = self.max_rank {
            write!(f, " (first {max_rank} arrivals)")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PriorityMap
// ---------------------------------------------------------------------------

/// Anything that yields a weight for a (proportion, rank) point.
/// `None` means the map is undefined there.
pub trait PriorityMap {
    fn value_at(&self, proportion: f64, rank: u32) -> Option<u64>;
}

impl<T: PriorityMap + ?Sized> PriorityMap for &T {
    fn value_at(&self, proportion: f64, rank: u32) -> Option<u64> {
        (**self).value_at(proportion, rank)
    }
}

/// A set of non-overlapping segments, kept sorted by lower bound.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Curve {
    segments: Vec<Segment>,
}

impl Curve {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: impl IntoIterator<Item = Segment>) -> Result<Self> {
        let mut curve = Self::new();
        for segment in segments {
            curve.insert(segment)?;
        }
        Ok(curve)
    }

    /// Would `segment` be accepted? Fails naming the first overlapping range.
    pub fn check(&self, segment: &Segment) -> Result<()> {
        segment.validate()?;
        match self.segments.iter().find(|existing| existing.overlaps(segment)) {
            Some(existing) => Err(Error::ConfigurationConflict {
                requested: segment.range(),
                existing: existing.range(),
            }),
            None => Ok(()),
        }
    }

    /// Add a segment. On conflict the curve is left untouched.
    pub fn insert(&mut self, segment: Segment) -> Result<()> {
        self.check(&segment)?;
        let at = self.segments.partition_point(|s| s.from < segment.from);
        self.segments.insert(at, segment);
        Ok(())
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// First applicable segment in ascending lower-bound order.
    pub fn segment_at(&self, proportion: f64, rank: u32) -> Option<&Segment> {
        self.segments.iter().find(|s| s.applies(proportion, rank))
    }
}

impl PriorityMap for Curve {
    fn value_at(&self, proportion: f64, rank: u32) -> Option<u64> {
        self.segment_at(proportion, rank).map(|s| u64::from(s.weight))
    }
}

/// Delegates to `default` wherever `primary` is undefined.
#[derive(Debug, Clone)]
pub struct WithDefault<P, D> {
    primary: P,
    default: D,
}

impl<P: PriorityMap, D: PriorityMap> WithDefault<P, D> {
    pub fn new(primary: P, default: D) -> Self {
        Self { primary, default }
    }
}

impl<P: PriorityMap, D: PriorityMap> PriorityMap for WithDefault<P, D> {
    fn value_at(&self, proportion: f64, rank: u32) -> Option<u64> {
        // A primary weight of 0 is a real value, not a gap.
        self.primary
            .value_at(proportion, rank)
            .or_else(|| self.default.value_at(proportion, rank))
    }
}

/// Product of two maps. Undefined wherever either factor is.
#[derive(Debug, Clone)]
pub struct Product<A, B> {
    first: A,
    second: B,
}

impl<A: PriorityMap, B: PriorityMap> Product<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: PriorityMap, B: PriorityMap> PriorityMap for Product<A, B> {
    fn value_at(&self, proportion: f64, rank: u32) -> Option<u64> {
        multiply(
            self.first.value_at(proportion, rank),
            self.second.value_at(proportion, rank),
        )
    }
}

/// Saturating product of two optional weights.
pub fn multiply(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    Some(a?.saturating_mul(b?))
}

/// Scheduling keys are stored as 32-bit signed integers downstream.
pub fn clamp_key(weight: u64) -> i32 {
    i32::try_from(weight).unwrap_or(i32::MAX)
}
