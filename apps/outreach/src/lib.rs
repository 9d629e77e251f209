//! The `outreach` binary: CLI, config loading, the driver adapter and the
//! command implementations on top of `outreach-core`.

pub mod commands;
pub mod config;
pub mod driver;

pub use commands::AppContext;
pub use config::{AppConfig, DriverConfig, GroupConfig};
pub use driver::DriverAdapter;
