#![deny(warnings)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Tock Concurrency
//!
//! Delayed task scheduling and the execution plumbing around it.
//!
//! This crate provides:
//!
//! - The delayed task manager, which holds tasks until their run window
//!   opens and then hands them off
//! - Task runners: a dedicated service thread and a manually driven runner
//!   for deterministic tests
//! - Tasks with delay windows, precision policies and weak owner binding
//! - Synchronization primitives: flags, sequence numbers, a contention
//!   tracking mutex and a sequence checker
//!
//! ## Integration with Other Tock Crates
//!
//! - **tock_core**: time, clocks, errors and scheduler feature configuration

/// Task runners and cancelable delayed posting
pub mod runner;

/// Delayed task queue and manager
pub mod scheduler;

/// Synchronization primitives used across the crate
pub mod sync;

/// Task definitions
pub mod task;

// Re-export key types for easier access
pub use runner::{ManualTaskRunner, SequencedTaskRunner, ServiceThread, TaskRunner};
pub use scheduler::DelayedTaskManager;
pub use task::{DelayPolicy, Task};
