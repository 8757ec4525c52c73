use crate::layers::BoxedLayer;
use clap::ValueEnum;
use std::fmt;
use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Output format of a logging layer.
#[derive(Debug, Copy, Clone, ValueEnum, Eq, PartialEq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// `key=value` pairs.
    #[value(name = "logfmt")]
    LogFmt,
    /// Human readable output.
    Terminal,
}

impl LogFormat {
    /// Builds a layer in this format, writing to stdout or to `file_writer` if set.
    pub(crate) fn apply(
        &self,
        filter: EnvFilter,
        color: Option<String>,
        file_writer: Option<NonBlocking>,
    ) -> BoxedLayer<Registry> {
        let ansi = use_ansi(color.as_deref());
        let target = show_target(&filter);

        match (self, file_writer) {
            (LogFormat::Json, Some(writer)) => tracing_subscriber::fmt::layer()
                .json()
                .with_target(target)
                .with_writer(writer)
                .with_filter(filter)
                .boxed(),
            (LogFormat::Json, None) => tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(ansi)
                .with_target(target)
                .with_filter(filter)
                .boxed(),
            (LogFormat::LogFmt, Some(writer)) => tracing_logfmt::builder()
                .with_target(target)
                .layer()
                .with_writer(writer)
                .with_filter(filter)
                .boxed(),
            (LogFormat::LogFmt, None) => {
                tracing_logfmt::builder().with_target(target).layer().with_filter(filter).boxed()
            }
            (LogFormat::Terminal, Some(writer)) => tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(target)
                .with_writer(writer)
                .with_filter(filter)
                .boxed(),
            (LogFormat::Terminal, None) => tracing_subscriber::fmt::layer()
                .with_ansi(ansi)
                .with_target(target)
                .with_filter(filter)
                .boxed(),
        }
    }
}

/// Colors are used unless disabled through `RUST_LOG_STYLE` or the `color` setting.
fn use_ansi(color: Option<&str>) -> bool {
    let Some(color) = color else { return false };
    match std::env::var("RUST_LOG_STYLE") {
        Ok(style) => style != "never",
        Err(_) => color != "never",
    }
}

/// Targets (`downloaders::queue`, `sync::fetcher`) are printed when `RUST_LOG_TARGET` is set to
/// anything but `0`, or by default when the filter enables DEBUG or TRACE.
fn show_target(filter: &EnvFilter) -> bool {
    match std::env::var("RUST_LOG_TARGET") {
        Ok(val) => val != "0",
        Err(_) => filter.max_level_hint().map_or(true, |level| level > tracing::Level::INFO),
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogFormat::Json => "json",
            LogFormat::LogFmt => "logfmt",
            LogFormat::Terminal => "terminal",
        };
        f.write_str(name)
    }
}
