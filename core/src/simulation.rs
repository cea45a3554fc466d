//! The traffic simulation loop.
//!
//! PER-RECORD PROTOCOL (fixed, never reordered):
//!   1. Generate a UserRecord.
//!   2. Evaluate the flag for that user.
//!   3. Compute the tracking probability.
//!   4. Bernoulli draw; emit tracking events if selected and enabled.
//!   5. Log the record.
//!   6. Sleep the configured delay.
//!   7. Every progress_interval records, log cumulative progress.
//!
//! RULES:
//!   - Single-threaded and sequential. The delay is the only pause.
//!   - A failing record never aborts the run. Its failure is captured as
//!     an IterationOutcome and fed to RunMetrics like any success.
//!   - Only an oracle that is not ready stops the run from starting.

use crate::{
    attributes::UserGenerator,
    config::{SimulationConfig, PROGRESS_INTERVAL},
    error::{SimError, SimResult},
    events::EventSink,
    flag::{FlagDecision, FlagOracle},
    logging::RunReporter,
    policy::tracking_probability,
    rng::StreamRng,
    types::RecordIndex,
    user::UserRecord,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimPhase {
    Idle,
    Running { index: RecordIndex },
    Completed,
}

/// What happened to the tracking draw of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Emission {
    Tracked,
    NotSelected,
    TrackingDisabled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordOutcome {
    pub index: RecordIndex,
    pub user: UserRecord,
    pub decision: FlagDecision,
    pub probability: f64,
    pub emission: Emission,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationFailure {
    pub index: RecordIndex,
    pub message: String,
}

pub type IterationOutcome = Result<RecordOutcome, IterationFailure>;

/// Running tallies of a simulation, for progress and completion lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunMetrics {
    pub processed: u64,
    pub tracked: u64,
    pub not_selected: u64,
    pub tracking_disabled: u64,
    /// Tracking events sent, counting extra conversion events. Only
    /// records whose every event was accepted contribute.
    pub events_emitted: u64,
    pub failures: Vec<IterationFailure>,
}

impl RunMetrics {
    pub fn observe(&mut self, outcome: &IterationOutcome) {
        self.processed += 1;
        match outcome {
            Ok(record) => match record.emission {
                Emission::Tracked => self.tracked += 1,
                Emission::NotSelected => self.not_selected += 1,
                Emission::TrackingDisabled => self.tracking_disabled += 1,
            },
            Err(failure) => self.failures.push(failure.clone()),
        }
    }

    pub fn failed(&self) -> u64 {
        self.failures.len() as u64
    }

    pub fn succeeded(&self) -> u64 {
        self.processed - self.failed()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub seed: u64,
    pub phase: SimPhase,
    pub metrics: RunMetrics,
}

/// Called with every iteration outcome, in order. Tests use it to inspect
/// individual records; the binary leaves it unset.
pub type OutcomeObserver<'a> = Box<dyn FnMut(&IterationOutcome) + 'a>;

pub struct Simulation<'a> {
    config: SimulationConfig,
    seed: u64,
    generator: UserGenerator,
    tracking_rng: StreamRng,
    oracle: &'a mut dyn FlagOracle,
    sink: &'a mut dyn EventSink,
    reporter: RunReporter,
    phase: SimPhase,
    metrics: RunMetrics,
    observer: Option<OutcomeObserver<'a>>,
}

impl<'a> Simulation<'a> {
    /// A zero progress interval falls back to the default.
    pub fn new(
        mut config: SimulationConfig,
        seed: u64,
        generator: UserGenerator,
        tracking_rng: StreamRng,
        oracle: &'a mut dyn FlagOracle,
        sink: &'a mut dyn EventSink,
        reporter: RunReporter,
    ) -> Self {
        if config.progress_interval == 0 {
            config.progress_interval = PROGRESS_INTERVAL;
        }
        Self {
            config,
            seed,
            generator,
            tracking_rng,
            oracle,
            sink,
            reporter,
            phase: SimPhase::Idle,
            metrics: RunMetrics::default(),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: impl FnMut(&IterationOutcome) + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn phase(&self) -> SimPhase {
        self.phase
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Drive all configured records. Fails only if the oracle is not
    /// ready before the first record.
    pub fn run(mut self) -> SimResult<RunSummary> {
        if !self.oracle.is_ready() {
            return Err(SimError::OracleNotReady);
        }
        self.reporter
            .started(&self.config.flag_key, self.config.num_records, self.seed);

        for index in 0..self.config.num_records {
            self.phase = SimPhase::Running { index };
            let outcome = self.step(index);
            match &outcome {
                Ok(record) => self.reporter.record(index, record),
                Err(failure) => self.reporter.failure(failure),
            }
            self.metrics.observe(&outcome);
            if let Some(observer) = self.observer.as_mut() {
                observer(&outcome);
            }

            if !self.config.delay.is_zero() {
                std::thread::sleep(self.config.delay);
            }
            if (index + 1) % self.config.progress_interval == 0 {
                self.reporter.progress(index + 1);
            }
        }

        if let Err(e) = self.sink.flush() {
            log::warn!("event flush failed: {e}");
        }
        self.oracle.close();
        self.phase = SimPhase::Completed;
        self.reporter.completed(&self.metrics);

        Ok(RunSummary {
            seed: self.seed,
            phase: self.phase,
            metrics: self.metrics,
        })
    }

    /// One record, start to finish. Errors are folded into the outcome.
    pub fn step(&mut self, index: RecordIndex) -> IterationOutcome {
        self.try_step(index).map_err(|e| IterationFailure {
            index,
            message: e.to_string(),
        })
    }

    fn try_step(&mut self, index: RecordIndex) -> SimResult<RecordOutcome> {
        let user = self.generator.generate();

        let decision =
            self.oracle
                .evaluate(&self.config.flag_key, &user, &self.config.default_value)?;

        let probability = tracking_probability(
            &user,
            decision.is_treatment(),
            self.config.control_prob,
            self.config.treatment_prob,
            self.config.targeting.as_ref(),
        );

        // Always draw, so the stream does not depend on the tracking switch.
        let roll = self.tracking_rng.next_f64();
        let emission = if !self.config.tracking_enabled {
            Emission::TrackingDisabled
        } else if roll < probability {
            self.emit(&user)?;
            Emission::Tracked
        } else {
            Emission::NotSelected
        };

        Ok(RecordOutcome {
            index,
            user,
            decision,
            probability,
            emission,
        })
    }

    fn emit(&mut self, user: &UserRecord) -> SimResult<()> {
        let metric_value = self
            .config
            .metric_attribute
            .as_deref()
            .and_then(|attr| user.get(attr))
            .and_then(|v| v.as_f64());
        self.sink
            .track(&self.config.metric_event_name(), user, metric_value)?;
        for extra in &self.config.extra_events {
            self.sink.track(extra, user, None)?;
        }
        self.metrics.events_emitted += 1 + self.config.extra_events.len() as u64;
        Ok(())
    }
}
