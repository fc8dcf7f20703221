//! dispatchd — control plane for launching and supervising remote jobs.
//!
//! Task state lives in a shared key-value store; per-task leases serialize
//! status transitions across any number of concurrent callers. Execution,
//! scheduling, and container management are external collaborators.

pub mod api;
pub mod config;
pub mod error;
pub mod lock;
pub mod services;
pub mod store;
pub mod tasks;
