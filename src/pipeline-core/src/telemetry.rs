use crate::{Error, Result};

use std::str::FromStr;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::InvalidConfig(format!("unknown log format: {other}"))),
        }
    }
}

/// Initialize tracing. `RUST_LOG` takes precedence over `level`.
///
/// Logs are written to stderr; stdout is reserved for command output.
pub fn init(level: &str, format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|err| Error::InvalidConfig(format!("log level {level}: {err}")))?;

    let collector = Registry::default().with(env_filter);
    let result = match format {
        LogFormat::Text => collector
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => collector
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };

    result.map_err(|err| Error::InvalidConfig(format!("telemetry already initialized: {err}")))
}

#[cfg(test)]
mod tests {
    use super::LogFormat;

    #[test]
    fn parses_log_formats() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("yaml".parse::<LogFormat>().is_err());
    }
}
