use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use farming_tonic_core::types::{READING_INTERVAL, READINGS_PER_STREAM};

/// Runtime configuration for the `farming-tonic-server` binary.
///
/// These settings control where the server listens and how its streaming
/// sessions behave. All values are parsed from CLI arguments or environment
/// variables (a `.env` file is honored). By default a temperature stream sends
/// ten readings one second apart and no stream deadline applies.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "farming-tonic-server",
    version,
    about = "A gRPC service demonstrating every call shape for smart farming"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/farming.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Capacity of the channel between a session and its gRPC response stream.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Milliseconds between two temperature readings.
    ///
    /// Environment variable: `READING_INTERVAL_MS`
    #[arg(long, env = "READING_INTERVAL_MS", default_value_t = READING_INTERVAL.as_millis() as u64)]
    pub reading_interval_ms: u64,

    /// Number of readings a temperature stream emits before it ends.
    ///
    /// Environment variable: `READINGS_PER_STREAM`
    #[arg(long, env = "READINGS_PER_STREAM", default_value_t = READINGS_PER_STREAM)]
    pub readings_per_stream: usize,

    /// Upper bound on the lifetime of any streaming call, in seconds.
    ///
    /// `0` disables the limit: streams run until they complete or are
    /// cancelled.
    ///
    /// Environment variable: `STREAM_TIMEOUT_SECS`
    #[arg(long, env = "STREAM_TIMEOUT_SECS", default_value_t = 0)]
    pub stream_timeout_secs: u64,

    /// Seconds to wait for in-flight streams to finish on shutdown before
    /// they are cancelled.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 3)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub stream_buffer_size: usize,
    pub reading_interval: Duration,
    pub readings_per_stream: usize,
    pub stream_timeout: Option<Duration>,
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: String::from("0.0.0.0:50051"),
            uds: false,
            stream_buffer_size: 8,
            reading_interval: READING_INTERVAL,
            readings_per_stream: READINGS_PER_STREAM,
            stream_timeout: None,
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        if args.reading_interval_ms == 0 {
            bail!("READING_INTERVAL_MS must be greater than 0");
        }

        if args.readings_per_stream == 0 {
            bail!("READINGS_PER_STREAM must be greater than 0");
        }

        let stream_timeout =
            (args.stream_timeout_secs > 0).then(|| Duration::from_secs(args.stream_timeout_secs));

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            stream_buffer_size: args.stream_buffer_size,
            reading_interval: Duration::from_millis(args.reading_interval_ms),
            readings_per_stream: args.readings_per_stream,
            stream_timeout,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let mut argv = vec!["farming-tonic-server"];
        argv.extend_from_slice(args);
        ServerConfig::try_from(CliArgs::try_parse_from(argv)?)
    }

    #[test]
    fn defaults_send_ten_readings_a_second_apart() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.reading_interval, Duration::from_secs(1));
        assert_eq!(config.readings_per_stream, 10);
        assert_eq!(config.stream_timeout, None);
        assert!(!config.uds);
    }

    #[test]
    fn timeout_is_opt_in() {
        let config = parse(&["--stream-timeout-secs", "30"]).unwrap();
        assert_eq!(config.stream_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn rejects_zero_sizes() {
        assert!(parse(&["--stream-buffer-size", "0"]).is_err());
        assert!(parse(&["--reading-interval-ms", "0"]).is_err());
        assert!(parse(&["--readings-per-stream", "0"]).is_err());
    }
}
