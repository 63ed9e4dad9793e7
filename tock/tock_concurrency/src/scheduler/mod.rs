//! Delayed task scheduling.
//!
//! - A queue of delayed tasks ordered by latest acceptable run time
//! - The delayed task manager, which drains that queue on a service runner

/// Delayed task queue entries and ordering
pub mod delayed_task;

/// The delayed task manager
pub mod delayed_task_manager;

pub use delayed_task::PostTaskNowCallback;
pub use delayed_task_manager::DelayedTaskManager;
