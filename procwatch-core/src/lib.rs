pub mod config;
pub mod error;
pub mod models;

pub use config::ProcwatchConfig;
pub use error::{ConfigError, ErrorKind, ExecError, Result, WaitError};
pub use models::*;
