//! Configuration for the conduit workspace.
//!
//! Configuration is read from `configuration/base.*`, an optional environment-specific file and
//! `APP_`-prefixed environment variables, then validated section by section.

mod environment;
pub mod load;
pub mod shared;

pub use environment::{APP_ENVIRONMENT_ENV_NAME, Environment};
