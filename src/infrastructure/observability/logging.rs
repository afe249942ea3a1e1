//! Tracing-subscriber setup for the binary entrypoint, grounded in the
//! teacher's `src/bin/server.rs` (`EnvFilter::from_default_env` plus a
//! single `fmt` layer). `log_format` selects between the teacher's
//! human-readable pretty layer and a JSON layer for log-aggregator
//! ingestion; neither form is hard-wired into the binary.
use tracing::Level;
use tracing_subscriber::prelude::*;

pub fn init(log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into());

    if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false).pretty())
            .init();
    }
}
