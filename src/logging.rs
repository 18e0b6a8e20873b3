use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global tracing subscriber. Logs go to stderr so command output
/// on stdout stays clean. `RUST_LOG` takes precedence over `verbose`.
pub fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "bankledger=debug,info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        let layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr);
        let _ = registry.with(layer).try_init();
    } else {
        let layer = fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr);
        let _ = registry.with(layer).try_init();
    }
}
