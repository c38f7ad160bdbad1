use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::Car;

/// Fixes closer than this to the previous one are GPS jitter (5 m).
pub const NOISE_FLOOR_KM: f64 = 0.005;
pub const EARTH_RADIUS_KM: f64 = 6371.0;
/// Used when the vehicle has no efficiency configured.
pub const DEFAULT_KM_PER_LITER: f64 = 10.0;
/// Used for ride fuel cost until the first refuel is logged.
pub const DEFAULT_FUEL_PRICE: f64 = 6.0;
/// Maintenance reserve per km when no maintenance tasks exist.
pub const DEFAULT_MAINTENANCE_RATE_PER_KM: f64 = 0.12;
pub const MAINTENANCE_WARNING_KM: f64 = 3000.0;
pub const ROLLING_WINDOW_DAYS: u32 = 30;

/// Numeric defaults and file locations for the ledger.
///
/// Every field has a default so a partial JSON file is enough to override
/// a single value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub noise_floor_km: f64,
    pub earth_radius_km: f64,
    pub default_km_per_liter: f64,
    pub default_fuel_price: f64,
    pub default_maintenance_rate_per_km: f64,
    pub maintenance_warning_km: f64,
    pub rolling_window_days: u32,
    /// Seconds between live status writes while tracking
    pub live_status_interval_secs: u64,
    /// Seconds between simulated fixes
    pub simulated_fix_interval_secs: u64,
    /// Timeout for the tank capacity lookup
    pub oracle_timeout_secs: u64,
    pub data_dir: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            noise_floor_km: NOISE_FLOOR_KM,
            earth_radius_km: EARTH_RADIUS_KM,
            default_km_per_liter: DEFAULT_KM_PER_LITER,
            default_fuel_price: DEFAULT_FUEL_PRICE,
            default_maintenance_rate_per_km: DEFAULT_MAINTENANCE_RATE_PER_KM,
            maintenance_warning_km: MAINTENANCE_WARNING_KM,
            rolling_window_days: ROLLING_WINDOW_DAYS,
            live_status_interval_secs: 2,
            simulated_fix_interval_secs: 2,
            oracle_timeout_secs: 5,
            data_dir: PathBuf::from("drive_ledger_data"),
        }
    }
}

impl LedgerConfig {
    /// Load from a JSON file, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                log::debug!("No config at {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Ignoring malformed config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("ledger.json")
    }

    pub fn live_status_path(&self) -> PathBuf {
        self.data_dir.join("live_status.json")
    }

    /// Vehicle efficiency with a floor against zero or unset values.
    pub fn km_per_liter(&self, car: &Car) -> f64 {
        match car.km_per_liter {
            Some(v) if v > 0.0 => v,
            _ => self.default_km_per_liter.max(f64::EPSILON),
        }
    }
}
