use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DEFAULT_FILTER: &str = "info";

/// Installs the process-wide log subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Each line carries a
/// local `YYYY-MM-DD HH:MM:SS` timestamp and its level.
///
/// Returns `false` if a subscriber was already installed, leaving it in place.
pub fn setup_logging() -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
                .with_target(false),
        )
        .try_init()
        .is_ok()
}
