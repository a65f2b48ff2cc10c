//! Client-push session behind `ComputeAverage`.
//!
//! Each inbound [`SoilSample`] is turned into a moisture percentage and folded
//! into a [`MoistureAccumulator`]. Samples with a zero dry weight are dropped
//! without ending the call. When the client half-closes, the accumulator is
//! consumed into the single [`MoistureAverage`] response.

use crate::server::{
    session::{SessionContext, SessionState, Termination},
    telemetry::increment_samples_skipped,
};
use farming_tonic_core::{
    Error,
    calc::moisture_percentage,
    proto::{MoistureAverage, SoilSample},
};
use futures::{Stream, StreamExt};
use tonic::Status;

/// Why a sample did not count towards the average.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// `dry_soil_weight == 0`.
    ZeroDryWeight,
    /// Inputs produced a NaN or infinite percentage.
    NonFinite,
}

/// Running sum of moisture percentages for one session.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MoistureAccumulator {
    sum_percentage: f64,
    count: u64,
}

impl MoistureAccumulator {
    /// Folds one sample in, or reports why it was skipped.
    pub fn fold(&mut self, sample: &SoilSample) -> Result<f64, SkipReason> {
        let pct = moisture_percentage(sample.wet_soil_weight, sample.dry_soil_weight)
            .ok_or(SkipReason::ZeroDryWeight)?;
        if !pct.is_finite() {
            return Err(SkipReason::NonFinite);
        }
        self.sum_percentage += pct;
        self.count += 1;
        Ok(pct)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Average over folded samples; `0.0` when nothing was folded.
    pub fn finish(self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_percentage / self.count as f64
        }
    }
}

#[derive(Debug)]
pub struct AverageSession {
    accumulator: Option<MoistureAccumulator>,
    skipped: u64,
    state: SessionState,
    termination: Option<Termination>,
}

impl Default for AverageSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AverageSession {
    pub fn new() -> Self {
        Self {
            accumulator: Some(MoistureAccumulator::default()),
            skipped: 0,
            state: SessionState::Open,
            termination: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    /// Samples dropped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Consumes `inbound` until the client half-closes and returns the
    /// average moisture percentage.
    ///
    /// # Errors
    ///
    /// - [`Error::Transport`] if the inbound stream fails.
    /// - [`Error::RequestCancelled`] if the call is cancelled.
    /// - [`Error::SessionTimeout`] if the deadline passes first.
    ///
    /// The accumulator is released on every path, so a session can produce at
    /// most one response. Running a closed session returns
    /// [`Error::RequestCancelled`].
    pub async fn run<S>(&mut self, mut inbound: S, ctx: SessionContext) -> Result<MoistureAverage, Error>
    where
        S: Stream<Item = Result<SoilSample, Status>> + Unpin,
    {
        let Some(mut accumulator) = self.accumulator.take() else {
            return Err(Error::RequestCancelled);
        };
        self.state = SessionState::Active;

        let outcome = loop {
            let next = tokio::select! {
                biased;
                () = ctx.cancelled() => break Err(Error::RequestCancelled),
                () = ctx.expired() => break Err(ctx.timeout_error()),
                next = inbound.next() => next,
            };

            match next {
                Some(Ok(sample)) => {
                    if let Err(_reason) = accumulator.fold(&sample) {
                        self.skipped += 1;
                        increment_samples_skipped();
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            wet = sample.wet_soil_weight,
                            dry = sample.dry_soil_weight,
                            reason = ?_reason,
                            "skipping soil sample"
                        );
                    }
                }
                Some(Err(status)) => break Err(Error::from(status)),
                None => break Ok(accumulator.finish()),
            }
        };

        self.state = SessionState::Closed;
        self.termination = Some(match &outcome {
            Ok(_) => Termination::Completed,
            Err(Error::SessionTimeout { .. }) => Termination::TimedOut,
            Err(Error::RequestCancelled) => Termination::Cancelled,
            Err(_) => Termination::Failed,
        });

        outcome.map(|soil_moisture_percentage| MoistureAverage {
            soil_moisture_percentage,
        })
    }
}
