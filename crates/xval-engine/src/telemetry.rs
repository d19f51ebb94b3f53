//! Centralised tracing initialisation for xval binaries.
//!
//! Call [`init_tracing`] once at program start to configure the global
//! subscriber with an `EnvFilter` and optional JSON formatting. Later calls
//! are ignored.
//!
//! Every event goes to stderr. stdout belongs to command output: the
//! `PASS`/`FAIL` line per pair and the totals printed by `xval validate`, and
//! the tables printed by `xval list`. Scripts can pipe stdout and still get
//! `--json` log lines on stderr without the two interleaving.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON (for CI log aggregation).
/// * `level`: default verbosity when `RUST_LOG` is not set.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .ok();
    }
}
