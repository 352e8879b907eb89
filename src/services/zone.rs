//! Spatial zone classification
//!
//! The frame width is divided into equal-width vertical bands; a marker's
//! horizontal position selects the band. Horizontal zoning approximates a
//! visitor's left-to-right progression past a linear exhibit.

use crate::domain::types::ZoneIndex;

/// Default number of vertical bands
pub const DEFAULT_ZONE_COUNT: u8 = 3;

/// Classify a pixel x-position into a 1-based zone index
///
/// Positions outside the frame clamp to the nearest edge band; any finite
/// input yields a valid index.
pub fn classify(x: f64, frame_width: u32, zone_count: u8) -> ZoneIndex {
    if zone_count <= 1 || frame_width == 0 {
        return ZoneIndex(1);
    }
    if x.is_nan() || x <= 0.0 {
        return ZoneIndex(1);
    }

    let band = (x * zone_count as f64 / frame_width as f64).floor();
    let band = band.min((zone_count - 1) as f64) as u8;
    ZoneIndex(band + 1)
}
