// Drive Ledger
// Shift, ride, fuel and maintenance bookkeeping for ride-hailing drivers

pub mod capabilities;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod fuel;
pub mod geo;
pub mod live_status;
pub mod maintenance;
pub mod model;
pub mod phase;
pub mod report;
pub mod sampler;
pub mod settlement;
pub mod storage;
pub mod store;
pub mod tracker;

pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult};
pub use geo::{DistanceAccumulator, GeoFix};
pub use model::{AppState, Ride, Session, UserProfile};
pub use phase::{DistanceBucket, Phase, PhaseCommand};
pub use store::Action;
pub use tracker::{Tracker, TrackerHandle};
