//! Page level strict two phase locking for a disk oriented storage engine.
//!
//! Transactions reach pages through the [`storage::BufferPool`], which takes
//! a shared or exclusive page lock from the [`concurrency::LockManager`]
//! before handing a page out. Locks are held until the transaction commits
//! or aborts. Deadlocks are broken by a randomized per request timeout that
//! aborts the waiting transaction.

pub mod concurrency;
pub mod config;
pub mod error;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
