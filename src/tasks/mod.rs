//! Task coordination layer — records, heartbeats, termination, blobs.

pub mod model;
pub mod registry;
pub mod terminate;

pub use model::{LOG_FILENAME, TaskContent, TaskRecord, TaskStatus, generate_task_id};
pub use registry::TaskRegistry;
pub use terminate::terminate;
