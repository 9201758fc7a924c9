//! Process-wide `tracing` subscriber setup shared by the workspace binaries.

mod subscriber;

pub use subscriber::{LogFormat, init, init_with_defaults};
pub use tracing_subscriber::filter::LevelFilter;
pub use tracing_subscriber::util::TryInitError;
