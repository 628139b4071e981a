//! Long-running services on top of a [`MasterCommunicator`](crate::link::MasterCommunicator).

mod maintenance;
mod passthrough;

pub use maintenance::{MaintenanceSession, DEFAULT_MAINTENANCE_TIMEOUT};
pub use passthrough::PassthroughService;
