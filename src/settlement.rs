//! Ride and shift close-out.
//!
//! Both are pure: the same inputs always give the same record, and neither
//! touches state outside its arguments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fuel;
use crate::model::{LiveShift, Session};

/// Everything a ride close-out depends on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RideInputs {
    pub gross: f64,
    pub en_route_km: f64,
    pub passenger_km: f64,
    pub km_per_liter: f64,
    pub fuel_price: f64,
    /// Fractions of gross
    pub commission_rate: f64,
    pub maintenance_reserve_rate: f64,
    pub emergency_reserve_rate: f64,
}

/// Money split of one ride
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RideBreakdown {
    pub gross: f64,
    pub total_km: f64,
    pub fuel_cost: f64,
    pub app_tax: f64,
    pub maintenance_reserve: f64,
    pub emergency_reserve: f64,
    pub net_profit: f64,
    /// No distance was tracked, so fuel and reserves rest on gross alone
    #[serde(default)]
    pub low_confidence: bool,
}

impl RideBreakdown {
    pub fn reserves(&self) -> f64 {
        self.maintenance_reserve + self.emergency_reserve
    }
}

/// Missing, negative or non-finite amounts count as zero.
pub fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

pub fn settle_ride(inputs: &RideInputs) -> RideBreakdown {
    let gross = non_negative(inputs.gross);
    let total_km = non_negative(inputs.en_route_km) + non_negative(inputs.passenger_km);

    let fuel_cost = fuel::liters_for(total_km, inputs.km_per_liter) * non_negative(inputs.fuel_price);
    let app_tax = gross * non_negative(inputs.commission_rate);
    let maintenance_reserve = gross * non_negative(inputs.maintenance_reserve_rate);
    let emergency_reserve = gross * non_negative(inputs.emergency_reserve_rate);
    let net_profit = gross - app_tax - fuel_cost - maintenance_reserve - emergency_reserve;

    RideBreakdown {
        gross,
        total_km,
        fuel_cost,
        app_tax,
        maintenance_reserve,
        emergency_reserve,
        net_profit,
        low_confidence: total_km == 0.0,
    }
}

/// Close an open shift into an immutable session record.
///
/// Only work expenses are deducted from the net.
pub fn settle_shift(live: LiveShift, end_odometer: f64, ended_at: DateTime<Utc>) -> Session {
    let total_gross: f64 = live.rides.iter().map(|r| r.breakdown.gross).sum();
    let rides_net: f64 = live.rides.iter().map(|r| r.breakdown.net_profit).sum();

    let expenses: Vec<_> = live.expenses.into_iter().filter(|e| e.work_expense).collect();
    let total_expenses: f64 = expenses.iter().map(|e| e.amount).sum();

    Session {
        id: live.id,
        date: live.started_at,
        ended_at,
        app_profile_id: live.app_profile_id,
        start_odometer: live.start_odometer,
        end_odometer: non_negative(end_odometer),
        off_duty_km: live.off_duty_km,
        rides: live.rides,
        expenses,
        total_gross,
        total_net: rides_net - total_expenses,
    }
}
