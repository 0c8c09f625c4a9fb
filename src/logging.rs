//! Tracing subscriber setup for the binary.
//!
//! Logs go to stderr so `call`/`list` output on stdout stays machine-readable.
//! The filter comes from `SKILLGATE_LOG` when set, else from the caller.

use std::io;

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable that overrides the log filter.
pub const LOG_ENV: &str = "SKILLGATE_LOG";

/// Filter used when neither the flag nor the environment sets one.
pub const DEFAULT_DIRECTIVE: &str = "skillgate=info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Multi-line, human oriented
    Pretty,
    /// One line per event
    #[default]
    Compact,
    /// Newline-delimited JSON
    Json,
}

/// Build the filter: `SKILLGATE_LOG` wins over `directive`.
pub fn env_filter(directive: &str) -> Result<EnvFilter> {
    match std::env::var(LOG_ENV) {
        Ok(value) if !value.trim().is_empty() => {
            EnvFilter::try_new(&value).with_context(|| format!("invalid {LOG_ENV} filter: {value}"))
        }
        _ => EnvFilter::try_new(directive)
            .with_context(|| format!("invalid log filter: {directive}")),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(directive: &str, format: LogFormat) -> Result<()> {
    let filter = env_filter(directive)?;
    let registry = tracing_subscriber::registry().with(filter);
    let layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    let installed = match format {
        LogFormat::Pretty => registry.with(layer.pretty()).try_init(),
        LogFormat::Compact => registry.with(layer.compact()).try_init(),
        LogFormat::Json => registry.with(layer.json()).try_init(),
    };
    installed.context("failed to install tracing subscriber")
}
