//! Configuration and progress reporting

pub mod config;
pub mod progress;

pub use config::{ConfigError, ConfigurationManager, NavAdjustConfig};
pub use progress::{LogProgress, NullProgress, ProgressSink};
