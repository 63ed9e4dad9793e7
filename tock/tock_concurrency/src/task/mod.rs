//! Task definitions.

/// Tasks with delay windows and owner binding
pub mod pending;

pub use pending::{Closure, DelayPolicy, Task, TaskBuilder};
