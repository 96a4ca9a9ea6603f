//! Command-line interface for chapterflow
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Inspect and simulate chapter-streamed sessions
#[derive(Parser, Debug)]
#[command(
    name = "chapterflow",
    version,
    about = "Inspect and simulate chapter-streamed sessions"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the global word timeline from a recorded session and print it
    Timeline {
        /// JSON Lines file of server frames
        file: PathBuf,
    },

    /// Show the word under the playhead at a position
    Locate {
        /// JSON Lines file of server frames
        file: PathBuf,

        /// Global position. Examples: 12.5, 90s, 1m30s, 1500ms
        #[arg(long, value_name = "POSITION", value_parser = parse_position)]
        at: f64,
    },

    /// Simulate playback of a recorded session on a virtual clock
    Replay {
        /// JSON Lines file of server frames
        file: PathBuf,

        /// Virtual time between position ticks
        #[arg(long, value_name = "DURATION", default_value = "100ms", value_parser = parse_tick)]
        tick: Duration,

        /// Force a stall when playback reaches this position
        #[arg(long, value_name = "POSITION", value_parser = parse_position)]
        stall_at: Option<f64>,
    },

    /// Inspect configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (file + environment) as TOML
    Show,
    /// Print the default configuration file path
    Path,
}

/// Parse a playback position into seconds.
///
/// Bare numbers are seconds and may be fractional; anything else goes
/// through `humantime` (`90s`, `1m30s`, `1500ms`).
pub fn parse_position(s: &str) -> Result<f64, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 {
            return Ok(secs);
        }
        return Err(format!("position must be a non-negative number, got {s}"));
    }
    humantime::parse_duration(s)
        .map(|d| d.as_secs_f64())
        .map_err(|e| e.to_string())
}

/// Parse the tick interval. Must be non-zero.
fn parse_tick(s: &str) -> Result<Duration, String> {
    let tick = match s.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Duration::from_secs_f64(secs),
        Ok(_) => return Err(format!("tick must be a non-negative number, got {s}")),
        Err(_) => humantime::parse_duration(s.trim()).map_err(|e| e.to_string())?,
    };
    if tick.is_zero() {
        return Err("tick must be greater than zero".to_string());
    }
    Ok(tick)
}

/// Default log filter for the given verbosity flags.
pub fn log_filter(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}
