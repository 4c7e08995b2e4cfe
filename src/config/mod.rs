/// Configuration types for docpath
///
/// This module contains the client configuration, parsed from camelCase
/// JSON and validated before use.

mod logging;
mod root;

pub use logging::{LogFormat, LoggingConfig};
pub use root::{BatchConfig, ClientConfig, ConfigError, ListPutMode};
