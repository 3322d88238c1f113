//! Logging initialization for the driver
//!
//! Installs a `tracing-subscriber` formatter filtered by `RUST_LOG`. When the variable is unset a
//! default is chosen per build profile. With the `profiling` feature, `profiling` scopes are
//! emitted as tracing spans and show up in the same output.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

const DEBUG_FILTER: &str =
    "debug,curtain_tiles_lib::request=info,hyper_util=info,reqwest::connect=info";
const RELEASE_FILTER: &str = "info,hyper_util=warn,reqwest=warn";

/// Filter used when `RUST_LOG` is not set
pub fn default_filter() -> &'static str {
    if cfg!(debug_assertions) {
        DEBUG_FILTER
    } else {
        RELEASE_FILTER
    }
}

pub fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter()));
    let from_env = std::env::var("RUST_LOG").is_ok();

    let fmt_layer = fmt::layer().with_target(true).with_filter(filter);
    // A second init (tests) keeps the first subscriber
    if tracing_subscriber::registry().with(fmt_layer).try_init().is_err() {
        return;
    }

    if from_env {
        tracing::info!("Logging initialized from RUST_LOG");
    } else {
        tracing::info!(filter = default_filter(), "Logging initialized with default filter");
    }
}
