//! State transitions.
//!
//! `AppState::apply` takes the current state and one driver action and
//! returns the next state. A rejected action returns an error and the
//! caller keeps the state it had. Location fixes go through
//! `AppState::record_fix`, which updates in place because it runs for every
//! fix while a shift is open.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::fuel;
use crate::geo::GeoFix;
use crate::model::{
    AppProfile, AppState, Expense, LiveShift, MaintenanceTask, OpenRide, RefuelEntry, Ride,
    StationPrice, UserProfile,
};
use crate::phase::{DistanceBucket, Phase, PhaseCommand};
use crate::settlement::{self, non_negative, RideInputs};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefuelInput {
    pub price_per_liter: f64,
    pub amount_spent: f64,
    pub liters: f64,
    pub odometer: f64,
    pub full_tank: bool,
    pub station: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpenseInput {
    pub category: String,
    pub amount: f64,
    pub description: Option<String>,
    pub work_expense: bool,
}

/// Everything the driver can do to the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    StartShift {
        start_odometer: f64,
        app_profile_id: Option<String>,
    },
    AcceptRide,
    BoardPassenger,
    /// `None` or a non-positive amount falls back to the app's fixed fare, then zero
    FinishRide { gross: Option<f64> },
    CancelRide,
    EndShift { end_odometer: f64 },
    Refuel(RefuelInput),
    LogExpense(ExpenseInput),
    DeleteExpense { id: String },
    DeleteRide { id: String },
    UpsertMaintenance(MaintenanceTask),
    DeleteMaintenance { id: String },
    UpsertAppProfile(AppProfile),
    UpdateProfile(UserProfile),
}

impl Action {
    /// Phase command carried by this action, if it moves the phase.
    pub fn command(&self) -> Option<PhaseCommand> {
        match self {
            Action::StartShift { .. } => Some(PhaseCommand::StartShift),
            Action::AcceptRide => Some(PhaseCommand::AcceptRide),
            Action::BoardPassenger => Some(PhaseCommand::BoardPassenger),
            Action::FinishRide { .. } => Some(PhaseCommand::FinishRide),
            Action::CancelRide => Some(PhaseCommand::CancelRide),
            Action::EndShift { .. } => Some(PhaseCommand::EndShift),
            _ => None,
        }
    }
}

fn check_rate(name: &str, rate: f64) -> LedgerResult<()> {
    if rate.is_finite() && (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(LedgerError::InvalidInput(format!(
            "{} must be between 0 and 1, got {}",
            name, rate
        )))
    }
}

impl AppState {
    /// Apply one action and return the resulting state.
    pub fn apply(&self, action: Action, now: DateTime<Utc>, config: &LedgerConfig) -> LedgerResult<AppState> {
        let mut next = self.clone();

        if let Some(command) = action.command() {
            next.phase = self.phase.transition(command)?;
        }

        match action {
            Action::StartShift {
                start_odometer,
                app_profile_id,
            } => next.start_shift(start_odometer, app_profile_id, now)?,
            Action::AcceptRide => {
                let id = next.next_id("ride", now);
                let shift = next.shift.as_mut().ok_or(LedgerError::NoOpenShift)?;
                shift.en_route_km = 0.0;
                shift.passenger_km = 0.0;
                shift.ride = Some(OpenRide {
                    id,
                    accepted_at: now,
                    boarded_at: None,
                });
            }
            Action::BoardPassenger => {
                let shift = next.shift.as_mut().ok_or(LedgerError::NoOpenShift)?;
                if let Some(ride) = shift.ride.as_mut() {
                    ride.boarded_at = Some(now);
                }
            }
            Action::FinishRide { gross } => next.finish_ride(gross, now, config)?,
            Action::CancelRide => {
                let shift = next.shift.as_mut().ok_or(LedgerError::NoOpenShift)?;
                // Driven distance stays on the books as off-duty driving
                shift.off_duty_km += shift.ride_km();
                shift.en_route_km = 0.0;
                shift.passenger_km = 0.0;
                shift.ride = None;
                log::info!("Ride cancelled");
            }
            Action::EndShift { end_odometer } => next.end_shift(end_odometer, now)?,
            Action::Refuel(input) => next.refuel(input, now),
            Action::LogExpense(input) => next.log_expense(input, now),
            Action::DeleteExpense { id } => next.delete_expense(&id)?,
            Action::DeleteRide { id } => {
                let shift = next.shift.as_mut().ok_or(LedgerError::NoOpenShift)?;
                let before = shift.rides.len();
                shift.rides.retain(|r| r.id != id);
                if shift.rides.len() == before {
                    return Err(LedgerError::UnknownId { kind: "ride", id });
                }
            }
            Action::UpsertMaintenance(mut task) => {
                if task.id.is_empty() {
                    task.id = next.next_id("maint", now);
                }
                task.interval_km = non_negative(task.interval_km);
                task.last_cost = non_negative(task.last_cost);
                match next.maintenance.iter_mut().find(|t| t.id == task.id) {
                    Some(existing) => *existing = task,
                    None => next.maintenance.push(task),
                }
            }
            Action::DeleteMaintenance { id } => {
                let before = next.maintenance.len();
                next.maintenance.retain(|t| t.id != id);
                if next.maintenance.len() == before {
                    return Err(LedgerError::UnknownId { kind: "maintenance", id });
                }
            }
            Action::UpsertAppProfile(mut profile) => {
                check_rate("commission_rate", profile.commission_rate)?;
                if profile.id.is_empty() {
                    profile.id = next.next_id("app", now);
                }
                match next.app_profiles.iter_mut().find(|p| p.id == profile.id) {
                    Some(existing) => *existing = profile,
                    None => next.app_profiles.push(profile),
                }
            }
            Action::UpdateProfile(mut profile) => {
                check_rate("maintenance_reserve_rate", profile.maintenance_reserve_rate)?;
                check_rate("emergency_reserve_rate", profile.emergency_reserve_rate)?;
                profile.car.tank_capacity_l = non_negative(profile.car.tank_capacity_l);
                profile.current_fuel_level =
                    non_negative(profile.current_fuel_level).min(profile.car.tank_capacity_l);
                next.profile = profile;
            }
        }

        Ok(next)
    }

    fn start_shift(
        &mut self,
        start_odometer: f64,
        app_profile_id: Option<String>,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        let app_profile_id = app_profile_id.or_else(|| self.profile.default_app_profile.clone());
        if let Some(id) = app_profile_id.as_deref() {
            if self.app_profile(id).is_none() {
                return Err(LedgerError::UnknownId {
                    kind: "app profile",
                    id: id.to_string(),
                });
            }
        }

        let id = self.next_id("shift", now);
        log::info!("Shift {} started at odometer {:.1}", id, start_odometer);
        self.shift = Some(LiveShift::new(id, now, non_negative(start_odometer), app_profile_id));
        Ok(())
    }

    fn finish_ride(&mut self, gross: Option<f64>, now: DateTime<Utc>, config: &LedgerConfig) -> LedgerResult<()> {
        let (commission_rate, app_profile_id) = match self.active_app_profile() {
            Some(p) => (p.commission_rate, Some(p.id.clone())),
            None => (0.0, None),
        };
        let gross = self.ride_gross(gross);
        let fuel_price = self.last_fuel_price().unwrap_or(config.default_fuel_price);
        let km_per_liter = config.km_per_liter(&self.profile.car);
        let maintenance_reserve_rate = self.profile.maintenance_reserve_rate;
        let emergency_reserve_rate = self.profile.emergency_reserve_rate;
        let fallback_id = self.next_id("ride", now);

        let shift = self.shift.as_mut().ok_or(LedgerError::NoOpenShift)?;
        let open = shift.ride.take().unwrap_or(OpenRide {
            id: fallback_id,
            accepted_at: now,
            boarded_at: None,
        });

        let breakdown = settlement::settle_ride(&RideInputs {
            gross,
            en_route_km: shift.en_route_km,
            passenger_km: shift.passenger_km,
            km_per_liter,
            fuel_price,
            commission_rate,
            maintenance_reserve_rate,
            emergency_reserve_rate,
        });

        if breakdown.low_confidence {
            log::warn!("Ride {} closed with no tracked distance; reserves are less reliable", open.id);
        }
        log::info!(
            "Ride {} closed: gross {:.2}, net {:.2} over {:.2} km",
            open.id,
            breakdown.gross,
            breakdown.net_profit,
            breakdown.total_km
        );

        shift.rides.push(Ride {
            id: open.id,
            app_profile_id,
            accepted_at: open.accepted_at,
            boarded_at: open.boarded_at,
            finished_at: now,
            en_route_km: shift.en_route_km,
            passenger_km: shift.passenger_km,
            fuel_price,
            breakdown,
        });
        shift.en_route_km = 0.0;
        shift.passenger_km = 0.0;
        Ok(())
    }

    fn end_shift(&mut self, end_odometer: f64, now: DateTime<Utc>) -> LedgerResult<()> {
        let live = self.shift.take().ok_or(LedgerError::NoOpenShift)?;
        let session = settlement::settle_shift(live, end_odometer, now);

        self.profile.last_odometer = session.end_odometer;
        log::info!(
            "Shift {} closed: {} rides, gross {:.2}, net {:.2}",
            session.id,
            session.rides.len(),
            session.total_gross,
            session.total_net
        );
        self.sessions.push(session);
        Ok(())
    }

    fn refuel(&mut self, input: RefuelInput, now: DateTime<Utc>) {
        let entry = RefuelEntry {
            id: self.next_id("refuel", now),
            date: now,
            price_per_liter: non_negative(input.price_per_liter),
            amount_spent: non_negative(input.amount_spent),
            liters: non_negative(input.liters),
            // Zero means the odometer was not read at the pump
            odometer: if input.odometer > 0.0 {
                input.odometer
            } else {
                self.profile.last_odometer
            },
            full_tank: input.full_tank,
            station: input.station.filter(|s| !s.trim().is_empty()),
        };

        self.profile.current_fuel_level = fuel::refuel(
            self.profile.current_fuel_level,
            self.profile.car.tank_capacity_l,
            entry.liters_added(),
            entry.full_tank,
        );
        self.profile.last_odometer = self.profile.last_odometer.max(entry.odometer);

        if let Some(station) = entry.station.clone() {
            if entry.price_per_liter > 0.0 {
                self.station_prices.insert(
                    station,
                    StationPrice {
                        price_per_liter: entry.price_per_liter,
                        updated_at: now,
                    },
                );
            }
        }

        log::info!(
            "Refuel: {:.2} L at {:.2}/L, gauge now {:.1} L",
            entry.liters_added(),
            entry.price_per_liter,
            self.profile.current_fuel_level
        );
        self.refuels.push(entry);
    }

    fn log_expense(&mut self, input: ExpenseInput, now: DateTime<Utc>) {
        let shift_id = match (&self.shift, input.work_expense) {
            (Some(shift), true) => Some(shift.id.clone()),
            _ => None,
        };
        let expense = Expense {
            id: self.next_id("expense", now),
            date: now,
            category: input.category,
            amount: non_negative(input.amount),
            description: input.description,
            work_expense: input.work_expense,
            shift_id: shift_id.clone(),
        };

        // Work expenses logged while idle are kept but never deducted
        if shift_id.is_some() {
            if let Some(shift) = self.shift.as_mut() {
                shift.expenses.push(expense.clone());
            }
        }
        self.expenses.push(expense);
    }

    fn delete_expense(&mut self, id: &str) -> LedgerResult<()> {
        let before = self.expenses.len();
        self.expenses.retain(|e| e.id != id);
        if let Some(shift) = self.shift.as_mut() {
            shift.expenses.retain(|e| e.id != id);
        }
        if self.expenses.len() == before {
            return Err(LedgerError::UnknownId {
                kind: "expense",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Gross for closing the current ride: the entered amount when positive,
    /// else the app's fixed fare, else zero.
    pub fn ride_gross(&self, gross: Option<f64>) -> f64 {
        gross
            .filter(|g| g.is_finite() && *g > 0.0)
            .or_else(|| self.active_app_profile().and_then(|p| p.fixed_gross))
            .unwrap_or(0.0)
    }

    /// Book one fix against the current phase and burn the matching fuel.
    ///
    /// Returns the distance added. Fixes while idle are ignored.
    pub fn record_fix(&mut self, fix: GeoFix, config: &LedgerConfig) -> f64 {
        let Some(bucket) = self.phase.bucket() else {
            return 0.0;
        };
        let km_per_liter = config.km_per_liter(&self.profile.car);
        let Some(shift) = self.shift.as_mut() else {
            return 0.0;
        };

        let delta = shift.distance.offer(fix, config);
        if delta <= 0.0 {
            return 0.0;
        }

        match bucket {
            DistanceBucket::OffDuty => shift.off_duty_km += delta,
            DistanceBucket::EnRoute => shift.en_route_km += delta,
            DistanceBucket::Passenger => shift.passenger_km += delta,
        }
        self.profile.current_fuel_level = fuel::deplete(self.profile.current_fuel_level, delta, km_per_liter);

        log::debug!("{:?} +{:.4} km, fuel {:.2} L", bucket, delta, self.profile.current_fuel_level);
        delta
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}
