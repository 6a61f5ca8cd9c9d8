// ============================================================================
// logger.rs
// ============================================================================
//! Centralized logging configuration and initialization manager.
//!
//! The `LoggerManager` validates logging configuration and initializes
//! the global `tracing` subscriber with console and/or systemd journald
//! layers. `RUST_LOG` takes precedence over the configured level.

use std::io;

use thiserror::Error;
use tracing::instrument;
use tracing_subscriber::{fmt, fmt::format::FmtSpan, prelude::*, EnvFilter, Layer};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{ConsoleConfig, JournaldConfig, LogFormat, LoggerConfig, TimestampFormat},
    print_info, print_warn,
};

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Logger initialization error: {0}")]
    InitializationError(String),

    #[error("Logger configuration validation error: {0}")]
    ValidationError(#[from] ValidationErrors),

    /// IO error, typically while connecting to the journald socket.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("No logging layers were configured or successfully initialized")]
    NoLayersConfigured,

    /// Journald was requested alongside the console and could not be reached.
    #[error("Failed to initialize journald logger while console logging is enabled; check the [logger.journald] section")]
    JournaldFailedWithConsoleEnabled,
}

/// Applies the configured timestamp style and filter, then boxes the layer.
macro_rules! finish_layer {
    ($layer:expr, $timestamp:expr, $filter:expr) => {
        match $timestamp {
            TimestampFormat::Rfc3339 => $layer.with_filter($filter).boxed(),
            TimestampFormat::Uptime => $layer
                .with_timer(fmt::time::uptime())
                .with_filter($filter)
                .boxed(),
            TimestampFormat::None => $layer.without_time().with_filter($filter).boxed(),
        }
    };
}

pub struct LoggerManager {
    config: LoggerConfig,
}

impl LoggerManager {
    /// Validates `config` and keeps it for [`LoggerManager::init`].
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;

        Ok(LoggerManager { config })
    }

    /// Installs the global subscriber. Call once, before anything logs.
    ///
    /// Journald failing is fatal only when it is the sole output requested
    /// alongside an enabled console, so a misconfigured unit does not run
    /// half-blind without anyone noticing.
    #[instrument(skip(self))]
    pub fn init(&mut self) -> Result<(), LoggerError> {
        let mut layers: Vec<BoxedLayer> = Vec::new();

        if let Some(console_config) = self.config.console.as_ref().filter(|c| c.enabled) {
            layers.push(self.init_console_logger(console_config, self.filter())?);
        }

        if let Some(journald_config) = self.config.journald.as_ref().filter(|j| j.enabled) {
            match self.init_journald_logger(journald_config, self.filter()) {
                Ok(journald_layer) => {
                    layers.push(journald_layer);
                    print_info!(
                        "Systemd journald logger initialized with identifier: {}",
                        journald_config.identifier
                    );
                }
                Err(e) => {
                    print_warn!("Failed to initialize systemd journald logger: {}", e);
                    if self.config.console.as_ref().is_some_and(|c| c.enabled) {
                        return Err(LoggerError::JournaldFailedWithConsoleEnabled);
                    }
                }
            }
        }

        if layers.is_empty() {
            print_warn!("No logging layers were initialized. Please check your configuration.");
            return Err(LoggerError::NoLayersConfigured);
        }

        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| LoggerError::InitializationError(e.to_string()))
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.config.level))
    }

    fn init_console_logger(
        &self,
        config: &ConsoleConfig,
        filter: EnvFilter,
    ) -> Result<BoxedLayer, LoggerError> {
        let span_events = if config.show_spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let base = fmt::layer()
            .with_target(config.show_target)
            .with_thread_ids(config.show_thread_ids)
            .with_span_events(span_events)
            .with_ansi(config.ansi_colors)
            .with_writer(io::stdout);
        let timestamp = &self.config.timestamp_format;

        let layer = match config.format {
            LogFormat::Json => finish_layer!(base.json(), timestamp, filter),
            LogFormat::Pretty => finish_layer!(base.pretty(), timestamp, filter),
            LogFormat::Compact => finish_layer!(base.compact(), timestamp, filter),
        };

        Ok(layer)
    }

    fn init_journald_logger(
        &self,
        config: &JournaldConfig,
        filter: EnvFilter,
    ) -> Result<BoxedLayer, LoggerError> {
        let journald_layer =
            tracing_journald::layer()?.with_syslog_identifier(config.identifier.clone());
        Ok(journald_layer.with_filter(filter).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_level() {
        let config = LoggerConfig {
            level: "loud".into(),
            ..Default::default()
        };
        assert!(matches!(
            LoggerManager::new(config),
            Err(LoggerError::ValidationError(_))
        ));
    }

    #[test]
    fn test_console_layer_for_every_format() {
        for format in [LogFormat::Compact, LogFormat::Pretty, LogFormat::Json] {
            for timestamp_format in [
                TimestampFormat::Rfc3339,
                TimestampFormat::Uptime,
                TimestampFormat::None,
            ] {
                let config = LoggerConfig {
                    timestamp_format,
                    ..Default::default()
                };
                let manager = LoggerManager::new(config).unwrap();
                let console = ConsoleConfig {
                    format,
                    ..Default::default()
                };
                assert!(manager
                    .init_console_logger(&console, EnvFilter::new("info"))
                    .is_ok());
            }
        }
    }

    #[test]
    fn test_no_outputs_is_an_error() {
        let config = LoggerConfig {
            console: None,
            journald: None,
            ..Default::default()
        };
        let mut manager = LoggerManager::new(config).unwrap();
        assert!(matches!(
            manager.init(),
            Err(LoggerError::NoLayersConfigured)
        ));
    }
}
