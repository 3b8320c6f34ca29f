//! Mission lifecycle and simulation workers.

pub mod machine;
mod worker;

pub use machine::{MissionStateMachine, ProgressOutcome, WorkerSettings};
