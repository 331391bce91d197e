//! Command-line arguments and process setup shared by the two binaries.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, Parser};
use serde::Serialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{self, parse_ports, RecorderConfig, ReplayConfig};
use crate::error::Result;

/// Record ZeroMQ traffic to a binary file.
#[derive(Debug, Clone, Parser)]
#[command(name = "zmq-recorder", version, about)]
pub struct RecorderArgs {
    /// Capture mode: sub, rcv (request-reply server) or pull
    #[arg(long, default_value = config::DEFAULT_RECORDER_MODE)]
    pub mode: String,

    /// Source IPv4 address
    #[arg(long, default_value = "127.0.0.1")]
    pub src: Ipv4Addr,

    /// Source port, or several joined by ','
    #[arg(long, default_value = "9090")]
    pub port: String,

    /// Topic filter for sub mode
    #[arg(long, default_value = "")]
    pub topic: String,

    /// Directory the recording is written to
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Write buffer size in bytes
    #[arg(long, default_value_t = crate::writer::DEFAULT_BUFFER_CAPACITY)]
    pub buffer_capacity: usize,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl RecorderArgs {
    /// Build and validate the engine configuration.
    pub fn into_config(self) -> Result<RecorderConfig> {
        let config = RecorderConfig::new()
            .mode(self.mode)
            .source(self.src)
            .ports(parse_ports(&self.port)?)
            .topic_filter(self.topic)
            .output_dir(self.output_dir)
            .buffer_capacity(self.buffer_capacity);
        config.validate()?;
        Ok(config)
    }
}

/// Replay a recording produced by zmq-recorder.
#[derive(Debug, Clone, Parser)]
#[command(name = "zmq-replayer", version, about)]
pub struct ReplayerArgs {
    /// Recording to replay
    #[arg(long, default_value = config::DEFAULT_REPLAY_FILE)]
    pub file: PathBuf,

    /// Replay mode: pub or req
    #[arg(long, default_value = config::DEFAULT_REPLAY_MODE)]
    pub mode: String,

    /// Scheduler tick in milliseconds
    #[arg(long, default_value_t = config::DEFAULT_TICK_MS)]
    pub tick_ms: u64,

    /// Exit once the whole recording has been sent
    #[arg(long)]
    pub exit_at_eof: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl ReplayerArgs {
    /// Build and validate the engine configuration.
    pub fn into_config(self) -> Result<ReplayConfig> {
        let config = ReplayConfig::new()
            .file(self.file)
            .mode(self.mode)
            .tick(Duration::from_millis(self.tick_ms))
            .exit_at_eof(self.exit_at_eof);
        config.validate()?;
        Ok(config)
    }
}

/// Parse process arguments.
///
/// On failure (including `--help`) the message and usage are printed and
/// `None` is returned; callers exit with status 0.
pub fn parse_args<T: Parser>() -> Option<T> {
    parse_args_from::<T, _, _>(std::env::args_os())
}

/// Parse arguments from an explicit list. See [`parse_args`].
pub fn parse_args_from<T, I, S>(args: I) -> Option<T>
where
    T: Parser,
    I: IntoIterator<Item = S>,
    S: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            let _ = e.print();
            None
        }
    }
}

/// Print an error followed by the usage of `T`.
pub fn print_usage_error<T: CommandFactory>(error: &dyn std::fmt::Display) {
    eprintln!("error: {}", error);
    eprintln!();
    let _ = T::command().print_help();
}

/// Install the fmt subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}

/// Print a labelled configuration as pretty JSON.
pub fn print_config<T: Serialize>(label: &str, config: &T) -> Result<()> {
    println!("{} config:", label);
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BagError;

    #[test]
    fn test_recorder_defaults() {
        let args = parse_args_from::<RecorderArgs, _, _>(["zmq-recorder"]).unwrap();
        let config = args.into_config().unwrap();
        assert_eq!(config, RecorderConfig::default());
    }

    #[test]
    fn test_recorder_port_list() {
        let args = parse_args_from::<RecorderArgs, _, _>([
            "zmq-recorder",
            "--mode",
            "rcv",
            "--src",
            "10.0.0.5",
            "--port",
            "9090,9091",
            "--topic",
            "cam",
        ])
        .unwrap();
        let config = args.into_config().unwrap();

        assert_eq!(config.mode, "rcv");
        assert_eq!(config.source, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(config.ports, vec![9090, 9091]);
        assert_eq!(config.topic_filter, "cam");
    }

    #[test]
    fn test_recorder_bad_port_is_config_error() {
        let args =
            parse_args_from::<RecorderArgs, _, _>(["zmq-recorder", "--port", "90x"]).unwrap();
        assert!(args.into_config().is_err());
    }

    #[test]
    fn test_bad_address_is_rejected() {
        assert!(parse_args_from::<RecorderArgs, _, _>(["zmq-recorder", "--src", "nowhere"]).is_none());
    }

    #[test]
    fn test_replayer_args() {
        let args = parse_args_from::<ReplayerArgs, _, _>([
            "zmq-replayer",
            "--file",
            "run.bin",
            "--mode",
            "req",
            "--tick-ms",
            "10",
            "--exit-at-eof",
        ])
        .unwrap();
        let config = args.into_config().unwrap();

        assert_eq!(config.file, PathBuf::from("run.bin"));
        assert_eq!(config.mode, "req");
        assert_eq!(config.tick_ms, 10);
        assert!(config.exit_at_eof);
    }

    #[test]
    fn test_replayer_defaults() {
        let args = parse_args_from::<ReplayerArgs, _, _>(["zmq-replayer"]).unwrap();
        assert_eq!(args.into_config().unwrap(), ReplayConfig::default());
    }

    #[test]
    fn test_zero_tick_is_config_error() {
        let args =
            parse_args_from::<ReplayerArgs, _, _>(["zmq-replayer", "--tick-ms", "0"]).unwrap();
        assert!(matches!(args.into_config(), Err(BagError::Config(_))));
    }

    #[test]
    fn test_small_buffer_is_config_error() {
        for capacity in ["0", "13"] {
            let args = parse_args_from::<RecorderArgs, _, _>([
                "zmq-recorder",
                "--buffer-capacity",
                capacity,
            ])
            .unwrap();
            assert!(matches!(args.into_config(), Err(BagError::Config(_))));
        }
    }
}
