/// Geographic helpers for proximity filtering
///
/// This module handles:
/// - The `Position` type shared by tour items, sessions and snapshots
/// - Great-circle distance between two positions (haversine)
/// - The candidate filter that narrows a tour to nearby items

use serde::{Deserialize, Serialize};

use crate::state::data::TourItem;

/// Mean Earth radius in meters (IUGG)
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A point on the Earth's surface, in decimal degrees
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

impl Position {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance to `other` in meters
    pub fn distance_to(&self, other: &Position) -> f64 {
        haversine_distance(self, other)
    }
}

/// Haversine distance between two positions in meters
pub fn haversine_distance(a: &Position, b: &Position) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Clamp guards against h drifting just above 1.0 for antipodal points
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Narrow `items` to the ones plausibly in view from `position`
///
/// Items without a recorded location are always kept, since there is nothing
/// to measure. Items with a location are kept when strictly closer than
/// `threshold_m`. The result preserves catalog order.
pub fn filter_candidates<'a>(
    items: &'a [TourItem],
    position: &Position,
    threshold_m: f64,
) -> Vec<&'a TourItem> {
    items
        .iter()
        .filter(|item| match item.location() {
            None => true,
            Some(location) => {
                let distance = position.distance_to(location);
                tracing::debug!(item = %item.name(), distance_m = distance, "distance to tour item");
                distance < threshold_m
            }
        })
        .collect()
}
