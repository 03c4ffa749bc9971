//! Great-circle distances between duo locations.
//!
//! Every distance in the service is in kilometres, computed with the
//! haversine formula on a sphere of radius [`EARTH_RADIUS_KM`].

use serde::{Deserialize, Serialize};

/// Mean Earth radius.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// `None` unless both parts are present, finite and in range.
    pub fn new(latitude: Option<f64>, longitude: Option<f64>) -> Option<Coordinates> {
        let (latitude, longitude) = (latitude?, longitude?);
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);

        valid.then_some(Coordinates { latitude, longitude })
    }
}

/// Distance in kilometres, or `None` when either end has no usable location.
pub fn distance_km(origin: Option<Coordinates>, target: Option<Coordinates>) -> Option<f64> {
    let (origin, target) = (origin?, target?);

    let lat1 = origin.latitude.to_radians();
    let lat2 = target.latitude.to_radians();
    let d_lat = (target.latitude - origin.latitude).to_radians();
    let d_lon = (target.longitude - origin.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    Some(EARTH_RADIUS_KM * c)
}

pub fn format_distance(km: Option<f64>) -> String {
    match km {
        None => "Unknown".to_owned(),
        Some(km) if km < 1.0 => format!("{}m", (km * 1000.0).round()),
        Some(km) if km < 10.0 => format!("{km:.1}km"),
        Some(km) => format!("{}km", km.round()),
    }
}
