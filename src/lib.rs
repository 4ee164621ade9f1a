pub mod applier;
pub mod config;
pub mod controller;
pub mod corpus;
pub mod error;
pub mod oracle;
pub mod output;
pub mod process;
pub mod revert;
pub mod session;

pub use config::DriverConfig;
pub use controller::{RunController, RunReport, RunStats};
pub use error::DriverError;
pub use process::{ProcessRunner, SystemRunner};
