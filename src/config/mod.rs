pub mod central_config;

pub use central_config::{CentralConfig, ConfigError};
