//! gRPC service implementation for the farming RPCs.
//!
//! This module defines [`FarmingService`], the concrete implementation of the
//! [`FarmService`] gRPC service generated from `proto/farming.proto`. It
//! routes each call shape to its handler:
//!
//! - `Calculate` runs the fertilizer formula once.
//! - `TemperatureStream` spawns a [`TemperatureSession`] that writes into a
//!   bounded response channel backing the response stream.
//! - `ComputeAverage` drives an [`AverageSession`] inline until the client
//!   half-closes.
//! - `FindOptimum` spawns an [`OptimumSession`] reading the inbound stream and
//!   writing into the response channel.
//!
//! Every transport-facing method delegates to a transport-independent entry
//! point taking plain messages or any [`Stream`], so the same code paths are
//! reachable without a network.

use crate::server::{
    config::ServerConfig,
    session::{SessionTracker, Termination},
    streaming::{
        ResponseStream, SessionReport, response_channel,
        moisture::AverageSession,
        temperature::{RandomWalk, TemperatureSession},
        watering::OptimumSession,
    },
    telemetry::{increment_requests, increment_session_errors},
};
use core::pin::Pin;
use farming_tonic_core::{
    Error,
    calc::fertilizer_nitrogen_kg,
    proto::{
        FertilizerRequest, FertilizerResponse, MoistureAverage, SoilSample, TemperatureReading,
        TemperatureRequest, WateringQuery, WateringRecommendation,
        farm_service_server::FarmService,
    },
    types::Rpc,
};
use std::sync::Arc;
use tokio_stream::Stream;
use tonic::{Request, Response, Status, Streaming};

/// Response stream of `TemperatureStream`.
pub type ReadingStream = ResponseStream<TemperatureReading>;

/// Response stream of `FindOptimum`.
pub type RecommendationStream = ResponseStream<WateringRecommendation>;

/// gRPC dispatcher for the farming service.
///
/// Cheap to clone: clones share the [`SessionTracker`], nothing else. Each
/// call builds its own session, so concurrent calls of any shape do not
/// interfere.
#[derive(Clone)]
pub struct FarmingService {
    config: ServerConfig,
    sessions: Arc<SessionTracker>,
}

impl FarmingService {
    pub fn new(config: ServerConfig) -> Self {
        let sessions = SessionTracker::new(config.stream_timeout, config.shutdown_timeout);
        Self {
            config,
            sessions: Arc::new(sessions),
        }
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    /// Refuses new calls, drains in-flight sessions, then cancels the rest.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.sessions.shutdown().await
    }

    /// Unary fertilizer calculation.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for a NaN or infinite acreage. Negative and
    /// zero acreage are computed as given.
    pub fn calculate_fertilizer(&self, req: FertilizerRequest) -> Result<FertilizerResponse, Error> {
        self.sessions.ensure_accepting()?;
        increment_requests(Rpc::Calculate);

        if !req.acres.is_finite() {
            increment_session_errors(Rpc::Calculate);
            return Err(Error::InvalidRequest {
                reason: format!("acres must be a finite number, got {}", req.acres),
            });
        }

        Ok(FertilizerResponse {
            total_nitrogen_needed_kg: fertilizer_nitrogen_kg(req.acres),
        })
    }

    /// Starts a temperature stream for `req.sensor_id`.
    ///
    /// The session runs on its own task; readings arrive on the returned
    /// stream, which ends when the session closes. A deadline or shutdown ends
    /// it with a status. Dropping the stream closes the session.
    pub fn start_temperature_stream(&self, req: TemperatureRequest) -> Result<ReadingStream, Error> {
        let ctx = self.sessions.open(Rpc::TemperatureStream)?;
        increment_requests(Rpc::TemperatureStream);

        let (tx, rx) = response_channel(self.config.stream_buffer_size);
        let mut session = TemperatureSession::new(req.sensor_id, RandomWalk::default(), &self.config);

        let fut = async move {
            let report = session.run(tx, ctx).await;
            record_report(Rpc::TemperatureStream, report);
        };
        spawn_session(fut);

        Ok(rx)
    }

    /// Averages the moisture of every valid sample in `inbound`.
    ///
    /// Feed samples through any stream and end the
    /// stream to get the single result.
    pub async fn average_moisture<S>(&self, inbound: S) -> Result<MoistureAverage, Error>
    where
        S: Stream<Item = Result<SoilSample, Status>> + Unpin,
    {
        let ctx = self.sessions.open(Rpc::ComputeAverage)?;
        increment_requests(Rpc::ComputeAverage);

        let mut session = AverageSession::new();
        let result = session.run(inbound, ctx).await;

        if let Err(_e) = &result {
            increment_session_errors(Rpc::ComputeAverage);
            #[cfg(feature = "tracing")]
            tracing::warn!("ComputeAverage failed: {_e}");
        }
        result
    }

    /// Starts answering watering queries from `inbound`.
    pub fn start_find_optimum<S>(&self, inbound: S) -> Result<RecommendationStream, Error>
    where
        S: Stream<Item = Result<WateringQuery, Status>> + Send + Unpin + 'static,
    {
        let ctx = self.sessions.open(Rpc::FindOptimum)?;
        increment_requests(Rpc::FindOptimum);

        let (tx, rx) = response_channel(self.config.stream_buffer_size);
        let fut = async move {
            let report = OptimumSession::new().run(inbound, tx, ctx).await;
            record_report(Rpc::FindOptimum, report);
        };
        spawn_session(fut);

        Ok(rx)
    }
}

fn spawn_session<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    #[cfg(feature = "tracing")]
    let fut = {
        use tracing::Instrument;
        fut.instrument(tracing::info_span!("session"))
    };

    tokio::spawn(fut);
}

fn record_report(rpc: Rpc, report: SessionReport) {
    match report.termination {
        Termination::Completed | Termination::Disconnected | Termination::Cancelled => {}
        Termination::TimedOut | Termination::Failed => increment_session_errors(rpc),
    }

    #[cfg(feature = "tracing")]
    tracing::info!(
        %rpc,
        emitted = report.emitted,
        termination = ?report.termination,
        "session closed"
    );
}

#[tonic::async_trait]
impl FarmService for FarmingService {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(acres = req.get_ref().acres)))]
    async fn calculate(
        &self,
        req: Request<FertilizerRequest>,
    ) -> Result<Response<FertilizerResponse>, Status> {
        let resp = self.calculate_fertilizer(req.into_inner())?;
        Ok(Response::new(resp))
    }

    type TemperatureStreamStream =
        Pin<Box<dyn Stream<Item = Result<TemperatureReading, Status>> + Send>>;

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(sensor_id = %req.get_ref().sensor_id)))]
    async fn temperature_stream(
        &self,
        req: Request<TemperatureRequest>,
    ) -> Result<Response<Self::TemperatureStreamStream>, Status> {
        let stream = self.start_temperature_stream(req.into_inner())?;
        Ok(Response::new(Box::pin(stream)))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn compute_average(
        &self,
        req: Request<Streaming<SoilSample>>,
    ) -> Result<Response<MoistureAverage>, Status> {
        let average = self.average_moisture(req.into_inner()).await?;
        Ok(Response::new(average))
    }

    type FindOptimumStream =
        Pin<Box<dyn Stream<Item = Result<WateringRecommendation, Status>> + Send>>;

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn find_optimum(
        &self,
        req: Request<Streaming<WateringQuery>>,
    ) -> Result<Response<Self::FindOptimumStream>, Status> {
        let stream = self.start_find_optimum(req.into_inner())?;
        Ok(Response::new(Box::pin(stream)))
    }
}
