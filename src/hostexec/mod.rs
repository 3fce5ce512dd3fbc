pub mod client;
pub mod daemon;
pub mod protocol;
pub mod service;

pub use client::DaemonClient;
pub use daemon::ExecutorDaemon;
pub use protocol::{DaemonRequest, DaemonResponse, DaemonState, ExecRequest, ExecResponse, ExecuteRequest, ExecuteResponse};
pub use service::{HostExecConfig, HostExecService};
