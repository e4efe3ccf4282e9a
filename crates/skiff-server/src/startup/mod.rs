//! Application startup utilities module.
//!
//! Logging, shutdown, the resource file source and the debug server used by
//! the `skiffd` binary.

mod debug;
mod logging;
mod shutdown;
mod source;

pub use debug::{DebugState, debug_server, routes as debug_routes, spawn_debug_server};
pub use logging::{LoggingConfig, LoggingGuard, init_logging};
pub use shutdown::{ShutdownSignal, join_with_timeout, wait_for_shutdown_signal};
pub use source::FileSource;
