//! Logging setup.
//!
//! One-time `env_logger` initialization. Level comes from
//! `SKETCHFLOW_LOG` (falling back to the conventional `RUST_LOG`), default
//! `info`. Rotation and shipping are deployment concerns and stay outside
//! this crate.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize process-wide logging. Safe to call more than once; only the
/// first call configures the logger.
pub fn setup_logging() {
    INIT.call_once(|| {
        let level = std::env::var("SKETCHFLOW_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());
        let mut builder = env_logger::Builder::new();
        builder.parse_filters(&level);
        // Tests and embedders may have installed a logger already; ignore
        // the conflict instead of panicking.
        let _ = builder.try_init();
        log::info!("Logging initialized (level={})", level);
    });
}
