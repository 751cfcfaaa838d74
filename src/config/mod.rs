//! Pipeline Configuration Module
//!
//! Worker timing, insight thresholds, storage location and server address,
//! loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `CONSENT_PIPELINE_CONFIG` environment variable (path to TOML file)
//! 2. `pipeline.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! ## Usage
//!
//! ```ignore
//! // In main():
//! config::init(PipelineConfig::load());
//!
//! // Anywhere else:
//! let every = config::get().workers.poll_interval(Stage::Validator);
//! ```

mod pipeline_config;
pub mod defaults;

pub use pipeline_config::*;

use std::sync::OnceLock;

static PIPELINE_CONFIG: OnceLock<PipelineConfig> = OnceLock::new();

/// Initialize the global configuration. Later calls are ignored.
pub fn init(config: PipelineConfig) {
    if PIPELINE_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get the global configuration.
///
/// Panics if `init()` has not been called; that is a startup bug.
#[allow(clippy::expect_used)]
pub fn get() -> &'static PipelineConfig {
    PIPELINE_CONFIG
        .get()
        .expect("config::get() called before config::init()")
}
