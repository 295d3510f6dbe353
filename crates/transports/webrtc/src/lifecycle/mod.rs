//! Session lifecycle: start/stop, negotiation, heartbeat expiry

pub mod controller;
pub mod sweeper;

pub use controller::{StartedStream, StopOutcome, StreamLifecycleController, SweepReport};
pub use sweeper::HeartbeatSweeper;
