//! Tasks and projects.

pub mod model;

pub use model::{Project, Task, TaskPriority, TaskStatus};
