//! Tracing initialization.
//!
//! The scheduler logs every window rebuild, dropped read, and stream
//! transition at debug level. Embedding applications call [`init_tracing`]
//! once at startup; tests call [`init_test_tracing`], which respects
//! `RUST_LOG` and writes through the capture-aware test writer.

use std::fs::File;
use std::path::Path;
use std::sync::Once;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Console output at `console_level` (overridable via `RUST_LOG`), plus a
/// full debug trace to `<logs_dir>/slipstream.log` when a directory is
/// given.
///
/// # Errors
///
/// - `std::io::Error` - The logs directory or log file cannot be created
pub fn init_tracing(console_level: Level, logs_dir: Option<&Path>) -> std::io::Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));
    let console_layer = fmt::layer().with_target(true).with_filter(console_filter);

    let file_layer = match logs_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file = File::create(dir.join("slipstream.log"))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_line_number(true)
                    .with_writer(file)
                    .with_filter(EnvFilter::new("trace")),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();
    Ok(())
}

/// One-time tracing init for tests, driven by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs the
/// subscriber, and an already-installed global subscriber is tolerated.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
