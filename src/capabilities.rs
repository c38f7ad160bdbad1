//! Device capabilities used while tracking: keeping the screen awake,
//! haptic feedback, and the optional tank size lookup. None of them may
//! stop the ledger from working when they fail.

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

use crate::error::{LedgerError, LedgerResult};
use crate::model::Car;
use crate::phase::PhaseCommand;

/// Keeps the display on while a shift is tracked
pub trait WakeLock: Send {
    fn acquire(&mut self) -> LedgerResult<()>;
    fn release(&mut self);
    fn is_held(&self) -> bool;
}

/// Wake lock for hosts without a display; only records the state
#[derive(Debug, Default)]
pub struct NoopWakeLock {
    held: bool,
}

impl WakeLock for NoopWakeLock {
    fn acquire(&mut self) -> LedgerResult<()> {
        self.held = true;
        log::debug!("Wake lock acquired");
        Ok(())
    }

    fn release(&mut self) {
        if self.held {
            log::debug!("Wake lock released");
        }
        self.held = false;
    }

    fn is_held(&self) -> bool {
        self.held
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HapticCue {
    ShiftStarted,
    RideAccepted,
    PassengerBoarded,
    RideFinished,
    RideCancelled,
    ShiftEnded,
}

impl From<PhaseCommand> for HapticCue {
    fn from(command: PhaseCommand) -> Self {
        match command {
            PhaseCommand::StartShift => HapticCue::ShiftStarted,
            PhaseCommand::AcceptRide => HapticCue::RideAccepted,
            PhaseCommand::BoardPassenger => HapticCue::PassengerBoarded,
            PhaseCommand::FinishRide => HapticCue::RideFinished,
            PhaseCommand::CancelRide => HapticCue::RideCancelled,
            PhaseCommand::EndShift => HapticCue::ShiftEnded,
        }
    }
}

pub trait Haptics: Send {
    fn pulse(&mut self, cue: HapticCue);
}

/// Rings the terminal bell
#[derive(Debug, Default)]
pub struct TerminalBell;

impl Haptics for TerminalBell {
    fn pulse(&mut self, cue: HapticCue) {
        log::debug!("Haptic {:?}", cue);
        eprint!("\x07");
    }
}

/// Estimates a vehicle's fuel tank size
pub trait TankCapacityOracle {
    fn tank_capacity(&self, car: &Car) -> impl Future<Output = LedgerResult<f64>> + Send;
}

#[derive(Debug, Deserialize)]
struct TankCapacityResponse {
    tank_capacity_l: f64,
}

/// Oracle backed by an HTTP endpoint answering
/// `GET <base_url>?brand=..&model=..&year=..` with `{"tank_capacity_l": 50.0}`.
pub struct HttpTankOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTankOracle {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("drive_ledger/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl TankCapacityOracle for HttpTankOracle {
    async fn tank_capacity(&self, car: &Car) -> LedgerResult<f64> {
        let year = car.year.map(|y| y.to_string()).unwrap_or_default();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("brand", car.brand.as_str()),
                ("model", car.model.as_str()),
                ("year", year.as_str()),
            ])
            .send()
            .await
            .map_err(|e| LedgerError::Oracle(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Oracle(format!("HTTP {}", status.as_u16())));
        }

        let body: TankCapacityResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Oracle(format!("bad response: {}", e)))?;

        if body.tank_capacity_l.is_finite() && body.tank_capacity_l > 0.0 {
            Ok(body.tank_capacity_l)
        } else {
            Err(LedgerError::Oracle(format!(
                "implausible capacity {}",
                body.tank_capacity_l
            )))
        }
    }
}

/// Ask the oracle, giving up quietly on error or timeout.
pub async fn lookup_tank_capacity<O: TankCapacityOracle>(
    oracle: &O,
    car: &Car,
    timeout: Duration,
) -> Option<f64> {
    match tokio::time::timeout(timeout, oracle.tank_capacity(car)).await {
        Ok(Ok(liters)) => {
            log::info!("Estimated tank for {} {}: {:.0} L", car.brand, car.model, liters);
            Some(liters)
        }
        Ok(Err(e)) => {
            log::warn!("Tank lookup failed: {}", e);
            None
        }
        Err(_) => {
            log::warn!("Tank lookup timed out after {:?}", timeout);
            None
        }
    }
}

/// Tank size for onboarding: the manual value when given, else the
/// oracle's answer, else 0 to be filled in later.
pub async fn resolve_tank_capacity<O: TankCapacityOracle>(
    manual: Option<f64>,
    oracle: Option<&O>,
    car: &Car,
    timeout: Duration,
) -> f64 {
    if let Some(liters) = manual.filter(|l| l.is_finite() && *l > 0.0) {
        return liters;
    }
    let looked_up = match oracle {
        Some(oracle) => lookup_tank_capacity(oracle, car, timeout).await,
        None => None,
    };
    looked_up.unwrap_or_else(|| {
        log::warn!("Tank capacity for {} {} unknown, left for manual entry", car.brand, car.model);
        0.0
    })
}
