//! Task management for the sidecar's long-running services.
//!
//! Every top-level service runs as one critical task.  The first task that
//! fails or panics takes the whole group down, which is what lets invariant
//! violations abort the process instead of limping along.

mod manager;
mod shutdown;

pub use manager::{CriticalTaskError, TaskExecutor, TaskManager};
pub use shutdown::{test_guard, Shutdown, ShutdownGuard, ShutdownSignal};
