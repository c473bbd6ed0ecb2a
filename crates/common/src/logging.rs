use crate::config::Environment;
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// `RUST_LOG` if set and valid, otherwise `info`.
pub(crate) fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// JSON lines in production, pretty multi-line output in development.
pub(crate) fn fmt_layer<S>(environment: Environment) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    match environment {
        Environment::Production => tracing_subscriber::fmt::layer()
            .json()
            .with_level(true)
            .with_thread_names(true)
            .boxed(),
        Environment::Development => tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(true)
            .with_thread_names(true)
            .boxed(),
    }
}

/// Install the global subscriber for processes that do not export telemetry.
///
/// Fails if a global subscriber is already installed, e.g. by
/// [`TelemetryGuard::init`](crate::TelemetryGuard::init).
pub fn setup_logging(environment: Environment) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer::<tracing_subscriber::layer::Layered<EnvFilter, Registry>>(environment))
        .try_init()?;
    Ok(())
}
