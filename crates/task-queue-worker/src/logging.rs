use crate::config::{LogFormat, LoggingSettings};
use crate::error::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` takes precedence over the configured level.
pub fn init(settings: &LoggingSettings) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    let subscriber = tracing_subscriber::registry().with(filter);

    match settings.format {
        LogFormat::Json => subscriber.with(fmt::layer().json()).try_init()?,
        LogFormat::Text => subscriber.with(fmt::layer().with_target(false)).try_init()?,
    }

    Ok(())
}
