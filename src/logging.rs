//! Tracing subscriber setup
//!
//! The library itself only emits `tracing` events. Binaries and tests that
//! want to see them call [`init_tracing`] once with [`LogProperties`].

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{Level, Subscriber};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log level: {0}")]
    Level(#[from] tracing::metadata::ParseLevelError),

    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("failed to install subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogProperties {
    /// Verbosity of the default filter, `debughttp=<level>`.
    /// Exchange records are emitted at `DEBUG`.
    pub level: String,
    /// Custom `EnvFilter` directives, overriding `level`
    pub filter: Option<String>,
    /// Log format. Available options are "COMPACT" and "JSON"
    pub format: LogFormat,
}

impl Default for LogProperties {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            filter: None,
            format: LogFormat::Compact,
        }
    }
}

/// Filter directives for `properties`
pub fn directives(properties: &LogProperties) -> Result<String, LoggingError> {
    match &properties.filter {
        Some(filter) => Ok(filter.clone()),
        None => {
            let level = Level::from_str(&properties.level)?;
            Ok(format!("debughttp={}", level))
        }
    }
}

fn format_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let f = fmt::layer().with_thread_ids(true).with_thread_names(true);
    match format {
        LogFormat::Compact => f.compact().boxed(),
        LogFormat::Json => f.json().boxed(),
    }
}

/// Install the global subscriber
pub fn init_tracing(properties: &LogProperties) -> Result<(), LoggingError> {
    let filter_layer = EnvFilter::builder().parse(directives(properties)?)?;

    Registry::default()
        .with(filter_layer)
        .with(format_layer(properties.format))
        .try_init()?;

    Ok(())
}
