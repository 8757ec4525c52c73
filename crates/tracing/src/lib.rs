//! Logging setup for the sync engines.
//!
//! Every engine logs through [`tracing`] with a fixed target (`downloaders::queue`,
//! `sync::fetcher`, `sync::import`). This crate only decides where those events go: a stdout
//! layer that is always present and an optional non-blocking file layer.
//!
//! # Examples
//!
//! ```
//! use chainsync_tracing::{tracing::level_filters::LevelFilter, LayerInfo, LogFormat, SyncTracer, Tracer};
//!
//! fn main() -> eyre::Result<()> {
//!     let tracer = SyncTracer::new().with_stdout(LayerInfo::new(
//!         LogFormat::LogFmt,
//!         LevelFilter::INFO.to_string(),
//!         "downloaders::queue=debug,sync::fetcher=debug".to_string(),
//!         None,
//!     ));
//!
//!     let _handle = tracer.init()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

// Re-export tracing crates
pub use tracing;
pub use tracing_appender;
pub use tracing_subscriber;

// Re-export our types
pub use formatter::LogFormat;
pub use layers::{FileInfo, FileWorkerGuard};
pub use test_tracer::TestTracer;

mod formatter;
mod layers;
mod test_tracer;
mod throttle;

#[doc(hidden)]
pub mod __private {
    pub use super::throttle::*;
}

use crate::layers::Layers;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tracer for the sync engines.
///
/// Logs to stdout and, if configured, to a daily rotated file.
#[derive(Debug, Clone)]
pub struct SyncTracer {
    stdout: LayerInfo,
    file: Option<(LayerInfo, FileInfo)>,
}

impl SyncTracer {
    /// Constructs a new tracer with the default stdout layer and no file layer.
    pub fn new() -> Self {
        Self { stdout: LayerInfo::default(), file: None }
    }

    /// Sets a custom configuration for the stdout layer.
    pub fn with_stdout(mut self, config: LayerInfo) -> Self {
        self.stdout = config;
        self
    }

    /// Sets the file layer configuration and associated file info.
    pub fn with_file(mut self, config: LayerInfo, file_info: FileInfo) -> Self {
        self.file = Some((config, file_info));
        self
    }
}

impl Default for SyncTracer {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for a logging layer.
#[derive(Debug, Clone)]
pub struct LayerInfo {
    format: LogFormat,
    default_directive: String,
    filters: String,
    color: Option<String>,
}

impl LayerInfo {
    /// Constructs a new `LayerInfo`.
    ///
    /// * `format` - output format of the layer
    /// * `default_directive` - directive used when `RUST_LOG` is unset, e.g. `info`
    /// * `filters` - additional comma separated directives, e.g. `sync::fetcher=trace`
    /// * `color` - `always`, `never` or `None` to disable ANSI codes
    pub const fn new(
        format: LogFormat,
        default_directive: String,
        filters: String,
        color: Option<String>,
    ) -> Self {
        Self { format, default_directive, filters, color }
    }
}

impl Default for LayerInfo {
    /// Terminal format at INFO with colors.
    fn default() -> Self {
        Self {
            format: LogFormat::Terminal,
            default_directive: LevelFilter::INFO.to_string(),
            filters: String::new(),
            color: Some("always".to_string()),
        }
    }
}

/// Handle returned by [`Tracer::init`].
///
/// Dropping it flushes and stops the file writer, so it must be kept alive for as long as the
/// process logs.
#[derive(Debug, Default)]
pub struct TracerHandle {
    /// Guard for the file layer, if any
    pub file_guard: Option<FileWorkerGuard>,
}

/// A general interface for installing the global subscriber.
pub trait Tracer {
    /// Initialize the logging configuration.
    fn init(self) -> eyre::Result<TracerHandle>;
}

impl Tracer for SyncTracer {
    fn init(self) -> eyre::Result<TracerHandle> {
        let mut layers = Layers::new();

        layers.stdout(
            self.stdout.format,
            self.stdout.default_directive.parse()?,
            &self.stdout.filters,
            self.stdout.color,
        )?;

        let file_guard = if let Some((config, file_info)) = self.file {
            Some(layers.file(config.format, &config.filters, file_info)?)
        } else {
            None
        };

        // The error is returned if the global default subscriber is already set,
        // so it's safe to ignore it
        let _ = tracing_subscriber::registry().with(layers.into_inner()).try_init().inspect_err(
            |e| tracing::warn!(%e, "Tracing subscriber could not be initialized"),
        );
        Ok(TracerHandle { file_guard })
    }
}

/// Initializes a tracing subscriber for tests.
///
/// The filter is configurable via `RUST_LOG`.
///
/// # Note
///
/// The subscriber will silently fail if it could not be installed.
pub fn init_test_tracing() {
    let _ = TestTracer::default().init();
}
