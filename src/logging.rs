use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "DESKCTL_LOG";

/// Installs the stderr subscriber. `DESKCTL_LOG` wins over `verbose`.
pub fn init(verbose: bool) {
    let default_filter = if verbose {
        "deskctl=debug,deskhost=debug,warn"
    } else {
        "deskctl=info,deskhost=info,warn"
    };
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter));
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .compact();
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init();
}
