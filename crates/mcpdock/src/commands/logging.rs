//! Logging initialization.

use mcpdock_util::{LogConfig, LogLevel};
use std::path::PathBuf;

/// Initialize logging to stderr, or to `file` when configured.
///
/// `--verbose` raises the configured level to `debug`; `RUST_LOG` still
/// overrides both.
pub fn init_logging(verbose: bool, configured: LogLevel, file: Option<PathBuf>) {
    let level = if verbose && configured != LogLevel::Trace {
        LogLevel::Debug
    } else {
        configured
    };

    mcpdock_util::log::init(LogConfig {
        print: true,
        level,
        include_location: verbose,
        file,
    });
}
