//! Presence tracking services - zoning, dwell, check-in lifecycle, aggregates

pub mod aggregation;
pub mod dwell;
pub mod presence;
pub mod tracker;
pub mod zone;

pub use tracker::{new_shared_core, PresenceCore, SharedCore, Tracker};
