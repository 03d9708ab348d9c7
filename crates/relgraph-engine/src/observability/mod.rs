//! Logging setup for the engine process.

mod logging;

pub use logging::{init_logging, LoggingConfig};
