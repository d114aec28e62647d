pub mod calibration;
pub mod config;
mod constants;
pub mod controller;
pub mod error;
pub mod events;
pub mod gs232;
pub mod pelco;
pub mod transport;
pub mod types;
pub mod wrap_guard;

pub use calibration::{Recalibration, TurnLimit, WrapState};
pub use config::AppConfig;
pub use controller::{ControllerHandle, PositionSnapshot};
pub use error::ControllerError;
pub use events::{ControllerEvent, ControllerState, EventSink, EventStream, LogLevel};
pub use types::{Direction, Request};
pub use wrap_guard::{Decision, WrapGuard};

// Re-export commonly used items
pub use constants::{DEFAULT_ADDRESS, DEFAULT_SPEED, MAX_SPEED};
