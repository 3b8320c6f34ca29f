//! Telemetry fan-out to observers.

pub mod channel;
pub mod observer;

pub use channel::{ChannelStats, MissionObservers, TelemetryChannel};
pub use observer::{ObserverId, Subscription};
