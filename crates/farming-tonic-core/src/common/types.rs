//! # Shared call types and stream constants
//!
//! Constants that define the default shape of the streaming calls, shared by
//! the server (which enforces them) and the client (which displays them).
//!
//! ## Constants
//!
//! - [`INITIAL_TEMPERATURE`] - Starting point of every synthetic sensor walk
//! - [`MAX_TEMPERATURE_DELTA`] - Bound of the per-tick random step
//! - [`READINGS_PER_STREAM`] - Readings a temperature stream emits by default
//! - [`READING_INTERVAL`] - Default period between two readings

use core::fmt;
use core::time::Duration;

/// Temperature (°C) a sensor walk starts from.
pub const INITIAL_TEMPERATURE: f64 = 20.0;

/// Each tick moves the temperature by a delta drawn uniformly from
/// `[-MAX_TEMPERATURE_DELTA, MAX_TEMPERATURE_DELTA]`.
pub const MAX_TEMPERATURE_DELTA: f64 = 2.0;

/// Number of readings after which a temperature stream ends.
pub const READINGS_PER_STREAM: usize = 10;

/// Period of the temperature stream timer.
pub const READING_INTERVAL: Duration = Duration::from_secs(1);

/// The four RPCs of `FarmService`, one per gRPC call shape.
///
/// Used to label logs and metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Rpc {
    /// Unary.
    Calculate,
    /// Server streaming.
    TemperatureStream,
    /// Client streaming.
    ComputeAverage,
    /// Bidirectional streaming.
    FindOptimum,
}

impl Rpc {
    /// Method name as it appears on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Rpc::Calculate => "Calculate",
            Rpc::TemperatureStream => "TemperatureStream",
            Rpc::ComputeAverage => "ComputeAverage",
            Rpc::FindOptimum => "FindOptimum",
        }
    }

    pub const fn is_streaming(self) -> bool {
        !matches!(self, Rpc::Calculate)
    }
}

impl fmt::Display for Rpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
