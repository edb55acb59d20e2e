use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use octofhir_ingest::config::LoggingConfig;

pub fn init_tracing(logging: &LoggingConfig) {
    // RUST_LOG wins unless --debug asked for more.
    let filter = if logging.debug {
        EnvFilter::new("debug")
    } else {
        std::env::var("RUST_LOG")
            .ok()
            .and_then(|_| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new(logging.effective_level()))
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
