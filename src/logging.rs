//! Logging setup shared by both binaries.
//!
//! Logs go to stderr; stdout is reserved for the report.

use tracing::{debug, trace};
use tracing_subscriber::EnvFilter;

fn default_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the `-v` count.
pub fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .with_thread_ids(verbose >= 3)
        .with_line_number(verbose >= 3)
        .init();

    debug!("started with verbosity level: {}", verbose);
    trace!("full CLI args: {:?}", std::env::args().collect::<Vec<_>>());
}
