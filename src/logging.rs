//! Log output for the watcher.
//!
//! `RUST_LOG` takes precedence over the configured levels:
//! ```bash
//! RUST_LOG=docwatch=debug my-service
//! ```

use std::sync::Once;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Builds the filter directive string from config, e.g. `warn,docwatch::store=debug`.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = config.default.clone();
    for (module, level) in &config.modules {
        directives.push_str(&format!(",{module}={level}"));
    }
    directives
}

/// Installs a global fmt subscriber. Only the first call has an effect, and a
/// subscriber installed elsewhere is left in place.
pub fn init(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(config))
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}
