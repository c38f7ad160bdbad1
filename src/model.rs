use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::geo::DistanceAccumulator;
use crate::phase::Phase;
use crate::settlement::RideBreakdown;

/// Vehicle driven for work
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Car {
    pub brand: String,
    pub model: String,
    pub year: Option<u16>,
    pub tank_capacity_l: f64,
    /// Average efficiency; unset means the configured default
    pub km_per_liter: Option<f64>,
}

/// Driver, vehicle and the two live gauges (fuel and odometer).
///
/// Rates are fractions of gross: 0.05 is 5 %.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub name: String,
    pub car: Car,
    pub maintenance_reserve_rate: f64,
    pub emergency_reserve_rate: f64,
    pub default_app_profile: Option<String>,
    /// Liters, kept within `[0, car.tank_capacity_l]`
    pub current_fuel_level: f64,
    pub last_odometer: f64,
}

/// Commission setup of one ride-hailing app
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppProfile {
    pub id: String,
    pub name: String,
    pub commission_rate: f64,
    /// Flat fare used when a ride is finished without a gross amount
    #[serde(default)]
    pub fixed_gross: Option<f64>,
}

/// Closed ride. Never edited after close-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub id: String,
    pub app_profile_id: Option<String>,
    pub accepted_at: DateTime<Utc>,
    pub boarded_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub en_route_km: f64,
    pub passenger_km: f64,
    pub fuel_price: f64,
    #[serde(flatten)]
    pub breakdown: RideBreakdown,
}

/// Ride between acceptance and close-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenRide {
    pub id: String,
    pub accepted_at: DateTime<Utc>,
    pub boarded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: String,
    pub date: DateTime<Utc>,
    pub category: String,
    pub amount: f64,
    #[serde(default)]
    pub description: Option<String>,
    pub work_expense: bool,
    /// Shift the expense was deducted from, if any
    #[serde(default)]
    pub shift_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefuelEntry {
    pub id: String,
    pub date: DateTime<Utc>,
    pub price_per_liter: f64,
    pub amount_spent: f64,
    pub liters: f64,
    pub odometer: f64,
    pub full_tank: bool,
    #[serde(default)]
    pub station: Option<String>,
}

impl RefuelEntry {
    /// Liters pumped, derived from the amount when the field was left empty.
    pub fn liters_added(&self) -> f64 {
        if self.liters > 0.0 {
            self.liters
        } else if self.price_per_liter > 0.0 {
            self.amount_spent.max(0.0) / self.price_per_liter
        } else {
            0.0
        }
    }
}

/// Last price seen at a station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationPrice {
    pub price_per_liter: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceTask {
    pub id: String,
    pub service: String,
    pub interval_km: f64,
    pub last_service_odometer: f64,
    pub last_cost: f64,
}

/// Closed shift, appended to history and never changed afterwards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub date: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub app_profile_id: Option<String>,
    pub start_odometer: f64,
    pub end_odometer: f64,
    pub off_duty_km: f64,
    pub rides: Vec<Ride>,
    pub expenses: Vec<Expense>,
    pub total_gross: f64,
    pub total_net: f64,
}

impl Session {
    /// Distance tracked by GPS across all buckets.
    pub fn tracked_km(&self) -> f64 {
        self.off_duty_km
            + self
                .rides
                .iter()
                .map(|r| r.en_route_km + r.passenger_km)
                .sum::<f64>()
    }

    /// Odometer difference when the readings make sense, tracked km otherwise.
    pub fn driven_km(&self) -> f64 {
        let odo = self.end_odometer - self.start_odometer;
        if odo > 0.0 {
            odo
        } else {
            self.tracked_km()
        }
    }

    pub fn total_expenses(&self) -> f64 {
        self.expenses.iter().map(|e| e.amount).sum()
    }
}

/// The open shift and its live accumulators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveShift {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub start_odometer: f64,
    pub app_profile_id: Option<String>,
    pub off_duty_km: f64,
    pub en_route_km: f64,
    pub passenger_km: f64,
    pub ride: Option<OpenRide>,
    pub rides: Vec<Ride>,
    pub expenses: Vec<Expense>,
    pub distance: DistanceAccumulator,
}

impl LiveShift {
    pub fn new(
        id: String,
        started_at: DateTime<Utc>,
        start_odometer: f64,
        app_profile_id: Option<String>,
    ) -> Self {
        Self {
            id,
            started_at,
            start_odometer,
            app_profile_id,
            off_duty_km: 0.0,
            en_route_km: 0.0,
            passenger_km: 0.0,
            ride: None,
            rides: Vec::new(),
            expenses: Vec::new(),
            distance: DistanceAccumulator::new(),
        }
    }

    pub fn ride_km(&self) -> f64 {
        self.en_route_km + self.passenger_km
    }
}

/// Everything the ledger knows, persisted as one snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppState {
    pub profile: UserProfile,
    pub app_profiles: Vec<AppProfile>,
    pub phase: Phase,
    pub shift: Option<LiveShift>,
    pub sessions: Vec<Session>,
    pub refuels: Vec<RefuelEntry>,
    pub expenses: Vec<Expense>,
    pub maintenance: Vec<MaintenanceTask>,
    pub station_prices: BTreeMap<String, StationPrice>,
    pub id_seq: u64,
}

impl AppState {
    /// `<prefix>_<millis>_<seq>`; the counter keeps ids unique within a millisecond.
    pub fn next_id(&mut self, prefix: &str, now: DateTime<Utc>) -> String {
        self.id_seq += 1;
        format!("{}_{}_{}", prefix, now.timestamp_millis(), self.id_seq)
    }

    pub fn app_profile(&self, id: &str) -> Option<&AppProfile> {
        self.app_profiles.iter().find(|p| p.id == id)
    }

    /// App profile of the open shift, if one was selected.
    pub fn active_app_profile(&self) -> Option<&AppProfile> {
        self.shift
            .as_ref()
            .and_then(|s| s.app_profile_id.as_deref())
            .and_then(|id| self.app_profile(id))
    }

    /// Price of the most recent refuel.
    pub fn last_fuel_price(&self) -> Option<f64> {
        self.refuels
            .iter()
            .filter(|r| r.price_per_liter > 0.0)
            .max_by_key(|r| r.date)
            .map(|r| r.price_per_liter)
    }

    pub fn is_shift_open(&self) -> bool {
        self.shift.is_some()
    }
}
