//! Logging setup.
//!
//! Engine events are mirrored into `tracing`; this module installs the
//! subscriber that renders them on stderr, for humans or as one JSON
//! object per line. `PHASEFLOW_LOG_LEVEL` replaces the computed filter
//! with a full `EnvFilter` directive.

use std::io::IsTerminal;

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

use crate::cli::args::{Cli, ColorChoice};

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_LEVEL_ENV: &str = "PHASEFLOW_LOG_LEVEL";

/// Dependencies that stay at `warn` unless tracing is requested.
const QUIET_DEPENDENCIES: [&str; 2] = ["metrics_exporter_prometheus", "hyper"];

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable, colored when stderr is a terminal.
    #[default]
    Human,
    /// One JSON object per line.
    Json,
}

/// Everything the subscriber needs, resolved from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    /// Output format
    pub format: LogFormat,
    /// `-v` count
    pub verbosity: u8,
    /// `--quiet`: errors only
    pub quiet: bool,
    /// ANSI color policy
    pub color: ColorChoice,
}

impl LogSettings {
    /// Reads the global logging flags.
    #[must_use]
    pub const fn from_cli(cli: &Cli) -> Self {
        Self {
            format: cli.log_format,
            verbosity: cli.verbose,
            quiet: cli.quiet,
            color: cli.color,
        }
    }

    /// Level for `phaseflow` itself: `--quiet` → error, then warn, info,
    /// debug and trace for 0, 1, 2 and 3+ `-v`.
    #[must_use]
    pub const fn level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Filter directive built from the flags alone.
    #[must_use]
    pub fn directive(&self) -> String {
        let level = self.level();
        if level == "trace" {
            return level.to_string();
        }
        let mut directive = level.to_string();
        for dependency in QUIET_DEPENDENCIES {
            directive.push_str(&format!(",{dependency}=warn"));
        }
        directive
    }

    fn ansi(&self) -> bool {
        match self.color {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => {
                std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
            }
        }
    }

    /// Installs the global subscriber. Later calls are ignored.
    pub fn init(self) {
        let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV)
            .unwrap_or_else(|_| EnvFilter::new(self.directive()));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(self.verbosity >= 2)
            .with_writer(std::io::stderr);

        let _ = match self.format {
            LogFormat::Human => builder.with_ansi(self.ansi()).try_init(),
            LogFormat::Json => builder.json().try_init(),
        };
    }
}
