//! Geospatial `near` searches.
//!
//! A `near` value (`latitude|longitude|distance|units`) is turned into one or
//! more latitude/longitude rectangles. A rectangle that would cross the
//! antimeridian is split in two, and one that reaches a pole covers every
//! longitude.

use serde::{Deserialize, Serialize};

use crate::error::LocationError;
use crate::types::SearchPrefix;

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Distance used when the value gives none.
pub const DEFAULT_DISTANCE_KM: f64 = 10.0;

/// A parsed `near` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NearParameter {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Search radius in kilometres.
    pub distance_km: f64,
}

impl NearParameter {
    /// Parses `[eq]latitude|longitude[|distance[|units]]`.
    pub fn parse(value: &str) -> Result<Self, LocationError> {
        let (prefix, rest) = SearchPrefix::extract(value);
        if prefix != SearchPrefix::Eq {
            return Err(LocationError::BadPrefix {
                prefix: prefix.to_string(),
            });
        }

        let malformed = |message: &str| LocationError::Malformed {
            value: value.to_string(),
            message: message.to_string(),
        };

        let parts: Vec<&str> = rest.split('|').collect();
        if parts.len() < 2 || parts.len() > 4 {
            return Err(malformed("expected latitude|longitude[|distance[|units]]"));
        }

        let parse_f64 = |s: &str, name: &str| {
            s.trim()
                .parse::<f64>()
                .map_err(|_| malformed(&format!("invalid {}: {}", name, s)))
        };

        let latitude = parse_f64(parts[0], "latitude")?;
        let longitude = parse_f64(parts[1], "longitude")?;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(LocationError::OutOfRange {
                latitude,
                longitude,
            });
        }

        let distance = match parts.get(2).filter(|s| !s.is_empty()) {
            Some(s) => parse_f64(s, "distance")?,
            None => DEFAULT_DISTANCE_KM,
        };
        if distance < 0.0 || !distance.is_finite() {
            return Err(malformed("distance must be a non-negative number"));
        }

        let units = parts.get(3).copied().unwrap_or("km");
        let distance_km = match units {
            "km" | "" => distance,
            "m" => distance / 1000.0,
            "mi" | "[mi_i]" | "[mi_us]" => distance * 1.60934,
            other => {
                return Err(LocationError::BadUnits {
                    units: other.to_string(),
                });
            }
        };

        Ok(Self {
            latitude,
            longitude,
            distance_km,
        })
    }

    /// The rectangles covering the search circle.
    pub fn bounding_boxes(&self) -> Vec<BoundingBox> {
        let delta_lat = (self.distance_km / EARTH_RADIUS_KM).to_degrees();
        let min_lat = self.latitude - delta_lat;
        let max_lat = self.latitude + delta_lat;

        // the circle reaches a pole: every longitude is in range
        if min_lat <= -90.0 || max_lat >= 90.0 {
            return vec![BoundingBox {
                min_latitude: min_lat.max(-90.0),
                max_latitude: max_lat.min(90.0),
                min_longitude: -180.0,
                max_longitude: 180.0,
            }];
        }

        let delta_lng = delta_lat / self.latitude.to_radians().cos();
        if delta_lng >= 180.0 {
            return vec![BoundingBox {
                min_latitude: min_lat,
                max_latitude: max_lat,
                min_longitude: -180.0,
                max_longitude: 180.0,
            }];
        }

        let min_lng = self.longitude - delta_lng;
        let max_lng = self.longitude + delta_lng;
        let strip = |min_longitude: f64, max_longitude: f64| BoundingBox {
            min_latitude: min_lat,
            max_latitude: max_lat,
            min_longitude,
            max_longitude,
        };

        if min_lng < -180.0 {
            vec![strip(min_lng + 360.0, 180.0), strip(-180.0, max_lng)]
        } else if max_lng > 180.0 {
            vec![strip(min_lng, 180.0), strip(-180.0, max_lng - 360.0)]
        } else {
            vec![strip(min_lng, max_lng)]
        }
    }
}

/// A latitude/longitude rectangle, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Southern edge.
    pub min_latitude: f64,
    /// Northern edge.
    pub max_latitude: f64,
    /// Western edge.
    pub min_longitude: f64,
    /// Eastern edge.
    pub max_longitude: f64,
}

impl BoundingBox {
    /// Returns true if the point lies inside the box.
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&latitude)
            && (self.min_longitude..=self.max_longitude).contains(&longitude)
    }
}

/// Parses every value of a `near` clause into its bounding boxes.
pub fn bounding_areas<'a, I>(values: I) -> Result<Vec<BoundingBox>, LocationError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut boxes = Vec::new();
    for value in values {
        boxes.extend(NearParameter::parse(value)?.bounding_boxes());
    }
    Ok(boxes)
}
