pub mod calc;
pub mod error;
pub mod types;

pub use error::{Error, Result};

/// gRPC service and message definitions generated from `proto/farming.proto`.
///
/// ## Service
///
/// - `Calculate` - unary fertilizer calculation.
/// - `TemperatureStream` - server-streamed synthetic sensor readings.
/// - `ComputeAverage` - client-streamed soil samples, one averaged reply.
/// - `FindOptimum` - bidirectional moisture queries and watering
///   recommendations.
pub mod proto {
    tonic::include_proto!("farming");

    /// Encoded `FileDescriptorSet` used to serve gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("farming_descriptor");
}
