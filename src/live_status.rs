use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::config::LedgerConfig;
use crate::fuel;
use crate::model::AppState;
use crate::phase::Phase;
use crate::settlement::{settle_ride, RideBreakdown, RideInputs};

/// Running figures of the current ride, as if it were closed now
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RideProjection {
    pub ride_id: String,
    pub accepted_at: DateTime<Utc>,
    pub en_route_km: f64,
    pub passenger_km: f64,
    pub fuel_cost_so_far: f64,
}

/// Snapshot of the tracker for the status file and dashboard
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub shift_id: Option<String>,
    pub shift_minutes: i64,
    pub off_duty_km: f64,
    pub en_route_km: f64,
    pub passenger_km: f64,
    pub rides_closed: usize,
    pub shift_gross: f64,
    /// Net of closed rides minus work expenses so far
    pub shift_net: f64,
    pub ride: Option<RideProjection>,
    pub fuel_level_l: f64,
    pub fuel_percent: f64,
    pub range_km: f64,
    pub fuel_price: f64,
    pub last_fix_at: Option<DateTime<Utc>>,
    pub gps_fixes: u64,
    pub gps_errors: u64,
}

impl LiveStatus {
    pub fn from_state(state: &AppState, config: &LedgerConfig, now: DateTime<Utc>) -> Self {
        let km_per_liter = config.km_per_liter(&state.profile.car);
        let fuel_price = state.last_fuel_price().unwrap_or(config.default_fuel_price);
        let level = state.profile.current_fuel_level;

        let mut status = LiveStatus {
            timestamp: now,
            phase: state.phase,
            shift_id: None,
            shift_minutes: 0,
            off_duty_km: 0.0,
            en_route_km: 0.0,
            passenger_km: 0.0,
            rides_closed: 0,
            shift_gross: 0.0,
            shift_net: 0.0,
            ride: None,
            fuel_level_l: level,
            fuel_percent: fuel::fill_ratio(level, state.profile.car.tank_capacity_l) * 100.0,
            range_km: fuel::estimated_range_km(level, km_per_liter),
            fuel_price,
            last_fix_at: None,
            gps_fixes: 0,
            gps_errors: 0,
        };

        if let Some(shift) = state.shift.as_ref() {
            let expenses: f64 = shift.expenses.iter().map(|e| e.amount).sum();
            status.shift_id = Some(shift.id.clone());
            status.shift_minutes = (now - shift.started_at).num_minutes().max(0);
            status.off_duty_km = shift.off_duty_km;
            status.en_route_km = shift.en_route_km;
            status.passenger_km = shift.passenger_km;
            status.rides_closed = shift.rides.len();
            status.shift_gross = shift.rides.iter().map(|r| r.breakdown.gross).sum();
            status.shift_net =
                shift.rides.iter().map(|r| r.breakdown.net_profit).sum::<f64>() - expenses;
            status.last_fix_at = shift.distance.last_fix().map(|f| f.timestamp);

            if let Some(open) = shift.ride.as_ref() {
                status.ride = Some(RideProjection {
                    ride_id: open.id.clone(),
                    accepted_at: open.accepted_at,
                    en_route_km: shift.en_route_km,
                    passenger_km: shift.passenger_km,
                    fuel_cost_so_far: fuel::liters_for(shift.ride_km(), km_per_liter) * fuel_price,
                });
            }
        }

        status
    }

    /// What the open ride would settle to if finished with `gross`.
    pub fn quote(state: &AppState, gross: Option<f64>, config: &LedgerConfig) -> Option<RideBreakdown> {
        if !state.phase.in_ride() {
            return None;
        }
        let shift = state.shift.as_ref()?;
        let commission_rate = state.active_app_profile().map(|p| p.commission_rate).unwrap_or(0.0);

        Some(settle_ride(&RideInputs {
            gross: state.ride_gross(gross),
            en_route_km: shift.en_route_km,
            passenger_km: shift.passenger_km,
            km_per_liter: config.km_per_liter(&state.profile.car),
            fuel_price: state.last_fuel_price().unwrap_or(config.default_fuel_price),
            commission_rate,
            maintenance_reserve_rate: state.profile.maintenance_reserve_rate,
            emergency_reserve_rate: state.profile.emergency_reserve_rate,
        }))
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn summary_line(&self) -> String {
        let ride = match self.ride.as_ref() {
            Some(r) => format!(
                " | ride {:.2}+{:.2} km, fuel {:.2}",
                r.en_route_km, r.passenger_km, r.fuel_cost_so_far
            ),
            None => String::new(),
        };
        format!(
            "{:?} | {} rides, gross {:.2}, net {:.2} | off-duty {:.2} km | fuel {:.1} L ({:.0}%, ~{:.0} km){}",
            self.phase,
            self.rides_closed,
            self.shift_gross,
            self.shift_net,
            self.off_duty_km,
            self.fuel_level_l,
            self.fuel_percent,
            self.range_km,
            ride
        )
    }
}
