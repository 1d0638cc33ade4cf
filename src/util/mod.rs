pub mod backoff;
pub mod random;

use tracing::Level;

/// Installs the process-wide log subscriber: INFO by default, DEBUG with `-v`, TRACE with
///  `--very-verbose`
pub fn init_logging(verbose: bool, very_verbose: bool) {
    let level = match (verbose, very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();
}
