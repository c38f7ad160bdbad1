use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LedgerConfig;

/// One position report from the location source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl GeoFix {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m: None,
            timestamp,
        }
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }
}

/// Great-circle distance in km between two fixes.
pub fn haversine_km(a: &GeoFix, b: &GeoFix, radius_km: f64) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());
    radius_km * c
}

/// Running distance over a stream of fixes.
///
/// Each fix is compared only with the one before it. Deltas at or below the
/// noise floor count as zero, but the fix still becomes the reference point.
/// Large jumps are taken as real movement; there is no speed or age check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistanceAccumulator {
    last: Option<GeoFix>,
    total_km: f64,
}

impl DistanceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next fix, returning the distance it contributes.
    pub fn offer(&mut self, fix: GeoFix, config: &LedgerConfig) -> f64 {
        let delta = match self.last.as_ref() {
            Some(prev) => {
                let d = haversine_km(prev, &fix, config.earth_radius_km);
                if d > config.noise_floor_km {
                    d
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        self.last = Some(fix);
        self.total_km += delta;
        delta
    }

    pub fn total_km(&self) -> f64 {
        self.total_km
    }

    pub fn last_fix(&self) -> Option<&GeoFix> {
        self.last.as_ref()
    }
}
