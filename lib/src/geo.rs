use serde::{Deserialize, Serialize};

/// Geolocation of a pass or a product: a center point and the bounding box. Each coordinate is
/// independently optional.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Footprint {
    pub center_latitude: Option<f64>,
    pub center_longitude: Option<f64>,
    pub north_latitude: Option<f64>,
    pub south_latitude: Option<f64>,
    pub east_longitude: Option<f64>,
    pub west_longitude: Option<f64>,
}

impl Footprint {
    pub fn with_center(self, latitude: f64, longitude: f64) -> Self {
        Self {
            center_latitude: Some(latitude),
            center_longitude: Some(longitude),
            ..self
        }
    }

    pub fn with_bounds(self, north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north_latitude: Some(north),
            south_latitude: Some(south),
            east_longitude: Some(east),
            west_longitude: Some(west),
            ..self
        }
    }
}
