//! rowcc-common — shared error, configuration and metrics types.

pub mod config;
pub mod error;
pub mod metrics;

pub use config::Config;
pub use error::{Error, Result};
