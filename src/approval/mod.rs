pub mod queue;
pub mod server;
pub mod types;
pub mod ui;

pub use queue::{ApprovalQueue, QueueEvent};
pub use types::{CommandResolution, DomainResolution, Kind, PendingRequest, Resolution};
