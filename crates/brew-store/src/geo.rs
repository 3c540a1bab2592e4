use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the haversine formula.
const EARTH_RADIUS_METRES: f64 = 6_371_008.8;

/// A WGS84 point, longitude first.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub long: f64,
    pub lat: f64,
}

impl Location {
    pub fn new(long: f64, lat: f64) -> Self {
        Self { long, lat }
    }

    /// Great-circle distance in metres.
    pub fn distance_metres(&self, other: &Location) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_long = (other.long - self.long).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_long / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METRES * a.sqrt().min(1.0).asin()
    }

    /// Finite, with latitude in `[-90, 90]` and longitude in `[-180, 180]`.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.long.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.long)
    }

    pub fn is_within(&self, other: &Location, metres: u32) -> bool {
        self.distance_metres(other) <= f64::from(metres)
    }
}
