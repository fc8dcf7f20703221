//! Persistence layer — shared key-value store behind a backend trait.

pub mod memory;
pub mod redis_backend;
pub mod traits;

pub use memory::MemoryStore;
pub use redis_backend::RedisStore;
pub use traits::KvStore;
