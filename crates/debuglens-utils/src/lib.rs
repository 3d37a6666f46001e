//! # Debuglens Utilities
//!
//! Logging bootstrap shared by programs that embed `debuglens-core`.

pub mod logging;

pub use logging::{init_logging, init_logging_with_level, LogFormat, LogLevel, LoggingError};
pub use tracing::{debug, error, info, trace, warn};
