// file: src/logging/logger.rs
// version: 1.2.0
// guid: b4c19e75-38da-4f20-a6b1-5e90d3c7f812

//! Logger initialization and configuration

use crate::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system.
///
/// `--debug` and `--verbose` both lower the filter to debug; `--quiet`
/// suppresses everything below errors. The flags are validated as mutually
/// exclusive before this is called.
pub fn init_logger(debug: bool, verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose || debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init()
        .map_err(|e| {
            crate::error::ImageBuildError::WorkspaceIO(format!(
                "Failed to initialize logger: {}",
                e
            ))
        })?;

    Ok(())
}
