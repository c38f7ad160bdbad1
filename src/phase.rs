use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Driving phase state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// No shift open, location is not sampled
    #[default]
    Idle,
    /// Shift open, driving without a ride
    OnShift,
    /// Ride accepted, heading to pickup
    Accepting,
    /// Passenger aboard
    Boarding,
}

/// Driver commands that move the phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseCommand {
    StartShift,
    AcceptRide,
    BoardPassenger,
    FinishRide,
    CancelRide,
    EndShift,
}

/// Where a distance increment is booked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceBucket {
    OffDuty,
    EnRoute,
    Passenger,
}

impl Phase {
    /// Transition table. Any pair not listed is rejected.
    pub fn transition(self, command: PhaseCommand) -> LedgerResult<Phase> {
        use Phase::*;
        use PhaseCommand::*;

        match (self, command) {
            (Idle, StartShift) => Ok(OnShift),
            (OnShift, AcceptRide) => Ok(Accepting),
            (Accepting, BoardPassenger) => Ok(Boarding),
            (Boarding, FinishRide) => Ok(OnShift),
            (Accepting | Boarding, CancelRide) => Ok(OnShift),
            (OnShift, EndShift) => Ok(Idle),
            (from, command) => Err(LedgerError::IllegalTransition { from, command }),
        }
    }

    /// Bucket that receives distance driven in this phase.
    pub fn bucket(self) -> Option<DistanceBucket> {
        match self {
            Phase::Idle => None,
            Phase::OnShift => Some(DistanceBucket::OffDuty),
            Phase::Accepting => Some(DistanceBucket::EnRoute),
            Phase::Boarding => Some(DistanceBucket::Passenger),
        }
    }

    /// Location is sampled in every phase except Idle.
    pub fn is_tracking(self) -> bool {
        self != Phase::Idle
    }

    pub fn in_ride(self) -> bool {
        matches!(self, Phase::Accepting | Phase::Boarding)
    }
}
