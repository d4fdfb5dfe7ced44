use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "ferry=info";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Fails if a subscriber is already
/// installed, which tests that each call this can ignore.
pub fn init_telemetry(
    default_filter: Option<&str>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter.unwrap_or(DEFAULT_FILTER))?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_thread_names(true)))
        .with((!json).then(|| fmt::layer().with_thread_names(true)))
        .try_init()?;

    tracing::debug!(json, "Tracing initialized");
    Ok(())
}

pub fn shutdown_telemetry() {
    tracing::debug!("Telemetry shutdown");
}
