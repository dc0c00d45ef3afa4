//! Scheduling priorities: curves, combinators and the assigner that turns
//! grouping progress into scheduling keys.

pub mod assigner;
pub mod curve;

pub use assigner::{CurveBook, attachment_keys, plan_scheduling};
pub use curve::{Curve, PriorityMap, Product, Segment, WithDefault, clamp_key, multiply};
