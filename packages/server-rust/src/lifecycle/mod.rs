//! Transport lifecycle state and process shutdown sequencing.

pub mod controller;
pub mod coordinator;

pub use controller::{InFlightGuard, LifecycleState, ShutdownController};
pub use coordinator::{
    ShutdownConfig, ShutdownCoordinator, ShutdownReport, ShutdownSignal, ShutdownTrigger,
    SignalSource, StepOutcome, Transport, EXIT_CODE,
};
