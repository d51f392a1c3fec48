//! Shared configuration types for coordination components.

mod base;
mod conduit;
mod pool;
mod service;
mod stage;

pub use base::ValidationError;
pub use conduit::ConduitConfig;
pub use pool::PoolConfig;
pub use service::ServiceConfig;
pub use stage::StageConfig;
