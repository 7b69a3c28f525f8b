//! Process supervision for uploaded Node.js projects: entry-point resolution,
//! dependency install, the process registry and the log fan-out.

pub mod error;
pub mod installer;
pub mod log_hub;
pub mod project_fs;
pub mod registry;
pub mod resolver;
pub mod support;

pub use error::RunnerError;
pub use log_hub::{LogHub, LogSink, Subscription};
pub use registry::{ProcessRegistry, Reservation, StopOutcome};
pub use resolver::Toolchain;
