//! Sequencer-mode executor: windows incoming pool transactions, orders
//! them by fee, and commits the ordered set to the engine.

pub mod executor;
pub mod orderer;
pub mod pool;

pub use executor::{executor_task, Executor};
pub use orderer::{FeeOrderer, Orderer, OrdererError};
pub use pool::PendingPoolBackend;
