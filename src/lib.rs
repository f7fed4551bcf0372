// Core modules
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod launch;
pub mod platform;
pub mod registration;
pub mod token;
pub mod trust;
pub mod types;

#[cfg(test)]
mod test_keys;

// Re-export key types and functions
pub use api::{AppState, DefaultCallbacks, LaunchCallbacks, ResponseDirective, create_router};
pub use config::{ToolConfig, load_tool_config, load_tool_config_from};
pub use db::connection::{Db, DatabaseConfig, create_connection, ensure_schema};
pub use error::{LtiError, LtiResult};
pub use launch::{LaunchContext, LaunchEngine, LaunchOutcome};
pub use platform::PlatformRegistry;
pub use registration::DynamicRegistration;
pub use token::TokenValidator;
pub use trust::KeyStore;
