//! Server-push session behind `TemperatureStream`.
//!
//! A session owns a periodic timer and a synthetic sensor. On every tick it
//! takes one bounded random-walk step from the previous temperature and emits
//! a [`TemperatureReading`]. After the configured number of readings the timer
//! is dropped and the response stream ends.

use super::{ResponseSender, SessionReport};
use crate::server::{
    config::ServerConfig,
    session::{SessionContext, SessionState, Termination},
    telemetry::increment_messages_emitted,
};
use chrono::{SecondsFormat, Utc};
use core::time::Duration;
use farming_tonic_core::{
    proto::TemperatureReading,
    types::{INITIAL_TEMPERATURE, MAX_TEMPERATURE_DELTA},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::time::{self, Instant, MissedTickBehavior};

/// Produces the temperature change applied on each tick.
pub trait DeltaSource: Send {
    fn next_delta(&mut self) -> f64;
}

/// Uniform deltas in `[-bound, bound]`.
#[derive(Debug, Clone)]
pub struct RandomWalk {
    rng: StdRng,
    bound: f64,
}

impl RandomWalk {
    pub fn new(bound: f64) -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            bound: bound.abs(),
        }
    }

    /// Reproducible walk: the same seed yields the same deltas.
    pub fn seeded(bound: f64, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            bound: bound.abs(),
        }
    }
}

impl Default for RandomWalk {
    fn default() -> Self {
        Self::new(MAX_TEMPERATURE_DELTA)
    }
}

impl DeltaSource for RandomWalk {
    fn next_delta(&mut self) -> f64 {
        self.rng.random_range(-self.bound..=self.bound)
    }
}

/// Current UTC time as RFC 3339 with millisecond precision, e.g.
/// `2024-04-24T10:15:30.123Z`.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug)]
pub struct TemperatureSession<D> {
    sensor_id: String,
    temperature: f64,
    emitted: usize,
    max_readings: usize,
    period: Duration,
    deltas: D,
    state: SessionState,
    termination: Option<Termination>,
}

impl<D: DeltaSource> TemperatureSession<D> {
    pub fn new(sensor_id: impl Into<String>, deltas: D, config: &ServerConfig) -> Self {
        Self::with_schedule(
            sensor_id,
            deltas,
            config.readings_per_stream,
            config.reading_interval,
        )
    }

    pub fn with_schedule(
        sensor_id: impl Into<String>,
        deltas: D,
        max_readings: usize,
        period: Duration,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            temperature: INITIAL_TEMPERATURE,
            emitted: 0,
            max_readings,
            period,
            deltas,
            state: SessionState::Open,
            termination: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    fn next_reading(&mut self) -> TemperatureReading {
        self.temperature += self.deltas.next_delta();
        TemperatureReading {
            sensor_id: self.sensor_id.clone(),
            temperature: self.temperature,
            timestamp: timestamp_now(),
        }
    }

    /// Emits readings into `tx` until the reading limit, cancellation, a
    /// closed receiver or the deadline ends the session.
    ///
    /// The first reading is sent one period after the call starts. The timer
    /// lives only inside this call, so it is gone by the time the session is
    /// `Closed`. A deadline or a service-side cancellation is reported to the
    /// caller as the stream's final status; a caller that went away is not.
    /// Running an already closed session returns its final report.
    pub async fn run(
        &mut self,
        mut tx: ResponseSender<TemperatureReading>,
        ctx: SessionContext,
    ) -> SessionReport {
        if let Some(termination) = self.termination {
            return self.report(termination);
        }
        self.state = SessionState::Active;

        let mut ticker = time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let termination = loop {
            if self.emitted >= self.max_readings {
                break Termination::Completed;
            }

            tokio::select! {
                biased;
                () = ctx.cancelled() => break Termination::Cancelled,
                () = tx.closed() => break Termination::Disconnected,
                () = ctx.expired() => break Termination::TimedOut,
                _ = ticker.tick() => {}
            }

            // A full buffer must not outlive the deadline.
            let reading = self.next_reading();
            tokio::select! {
                biased;
                () = ctx.cancelled() => break Termination::Cancelled,
                () = ctx.expired() => break Termination::TimedOut,
                sent = tx.send(reading) => {
                    if sent.is_err() {
                        break Termination::Disconnected;
                    }
                }
            }

            self.emitted += 1;
            increment_messages_emitted(ctx.rpc());
        };

        drop(ticker);
        if let Some(err) = ctx.termination_error(termination) {
            tx.fail(err.into());
        }
        self.close(termination)
    }

    fn close(&mut self, termination: Termination) -> SessionReport {
        self.state = SessionState::Closed;
        self.termination = Some(termination);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            sensor_id = %self.sensor_id,
            emitted = self.emitted,
            ?termination,
            "temperature session closed"
        );

        self.report(termination)
    }

    fn report(&self, termination: Termination) -> SessionReport {
        SessionReport {
            termination,
            emitted: self.emitted,
        }
    }
}
