//! Tracing subscriber for the `sluice` binary.
//!
//! Library crates only emit events; the subscriber lives here. Everything
//! goes to stderr so stdout stays free for command output (`--json`).

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// `verbosity`: 0 = INFO, 1 = DEBUG, 2+ = TRACE for sluice crates. `RUST_LOG`
/// sets the baseline for everything else (default `warn`).
///
/// With `json`, each event is one JSON object per line:
/// ```json
/// {"timestamp":"...","level":"INFO","fields":{"message":"dev server listening","url":"http://localhost:8081"},"target":"sluice_core::dev::server"}
/// ```
pub fn init(verbosity: u8, json: bool) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    for target in ["sluice", "sluice_core", "sluice_util"] {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
