//! Persistence layer for the mission server.
//!
//! SQLite-backed storage for missions, waypoints, telemetry, mission logs and
//! insights. Status transitions write synchronously; telemetry and progress
//! go through the batched writer in `loops::persist_loop`.

pub mod db;
pub mod insights;
pub mod logs;
pub mod missions;
pub mod telemetry;
pub mod writer;

pub use db::{init_database, Database};
pub use missions::ProgressUpdate;
pub use writer::{PersistItem, PersistQueue};
