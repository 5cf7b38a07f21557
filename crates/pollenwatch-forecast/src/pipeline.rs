//! Location → fetch → normalize → classify, as one observable state machine.
//!
//! ```text
//! Idle ──start──► Locating ──ok──► Fetching(coord) ──ok──► Ready
//!                    │                   │                   │
//!                    └──err──► Failed ◄──┘                refresh
//!                                │                           │
//!                                └────────retry──────► Locating
//! ```
//!
//! Only `Idle`, `Failed` (retry) and `Ready` (refresh) may enter `Locating`.
//! After [`PipelineController::dispose`] late stage results are dropped and
//! the state is never written again.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::ForecastClient;
use crate::location::{LocationProvider, DEFAULT_MAX_CACHE_AGE, DEFAULT_TIMEOUT};
use crate::normalize::{normalize, NormalizedForecast};
use crate::risk::{overall_tier, RiskTier};
use crate::types::{AnomalousValue, Coordinate, DailyForecast, FailureReason};

/// Current pipeline state. Exactly one is current at a time.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Locating,
    Fetching(Coordinate),
    Ready {
        forecast: DailyForecast,
        overall_tier: RiskTier,
    },
    Failed(FailureReason),
}

impl PipelineState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Locating => "locating",
            Self::Fetching(_) => "fetching",
            Self::Ready { .. } => "ready",
            Self::Failed(_) => "failed",
        }
    }

    /// True while a location or fetch stage is running.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Locating | Self::Fetching(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready { .. } | Self::Failed(_))
    }
}

/// Presentation contract: turn a state into output by dispatching on its tag.
pub trait Render {
    type Output;

    fn render(&self, state: &PipelineState) -> Self::Output;
}

/// Caller-triggered transitions into `Locating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Start,
    Retry,
    Refresh,
}

impl Trigger {
    fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Retry => "retry",
            Self::Refresh => "refresh",
        }
    }

    fn allowed_from(self, state: &PipelineState) -> bool {
        matches!(
            (self, state),
            (Self::Start, PipelineState::Idle)
                | (Self::Retry, PipelineState::Failed(_))
                | (Self::Refresh, PipelineState::Ready { .. })
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {action} while {from}")]
    NotAllowed {
        from: &'static str,
        action: &'static str,
    },
    #[error("pipeline has been disposed")]
    Disposed,
}

/// Per-session knobs.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub days: u32,
    pub location_timeout: Duration,
    pub max_cache_age: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            days: 1,
            location_timeout: DEFAULT_TIMEOUT,
            max_cache_age: DEFAULT_MAX_CACHE_AGE,
        }
    }
}

/// Drives one session through the pipeline.
pub struct PipelineController {
    locator: Arc<LocationProvider>,
    client: ForecastClient,
    settings: PipelineSettings,
    state_tx: watch::Sender<PipelineState>,
    generation: AtomicU64,
    cancel: CancellationToken,
    anomalies: Mutex<Vec<AnomalousValue>>,
}

impl PipelineController {
    pub fn new(
        locator: Arc<LocationProvider>,
        client: ForecastClient,
        settings: PipelineSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(PipelineState::Idle);
        Self {
            locator,
            client,
            settings,
            state_tx,
            generation: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            anomalies: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> PipelineState {
        self.state_tx.borrow().clone()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state_tx.subscribe()
    }

    /// Values clamped while normalizing the last successful forecast.
    pub fn last_anomalies(&self) -> Vec<AnomalousValue> {
        self.anomalies
            .lock()
            .map(|a| a.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// `Idle → Locating`, then run to `Ready` or `Failed`.
    ///
    /// # Errors
    ///
    /// `NotAllowed` unless idle; `Disposed` if disposed before finishing.
    pub async fn start(&self) -> Result<PipelineState, TransitionError> {
        self.run(Trigger::Start).await
    }

    /// `Failed → Locating`, then run again.
    ///
    /// # Errors
    ///
    /// `NotAllowed` unless failed; `Disposed` if disposed before finishing.
    pub async fn retry(&self) -> Result<PipelineState, TransitionError> {
        self.run(Trigger::Retry).await
    }

    /// `Ready → Locating`, then run again.
    ///
    /// # Errors
    ///
    /// `NotAllowed` unless ready; `Disposed` if disposed before finishing.
    pub async fn refresh(&self) -> Result<PipelineState, TransitionError> {
        self.run(Trigger::Refresh).await
    }

    /// Abandon the session. Any stage still running is cancelled and its
    /// result discarded.
    pub fn dispose(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(state = self.state().name(), "Pipeline disposed");
            self.cancel.cancel();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn run(&self, trigger: Trigger) -> Result<PipelineState, TransitionError> {
        let generation = self.begin(trigger)?;

        let located = self
            .guarded(
                self.locator
                    .acquire_location(self.settings.location_timeout, self.settings.max_cache_age),
            )
            .await?;

        let coord = match located {
            Ok(coord) => coord,
            Err(err) => return self.fail(generation, err.into()),
        };

        self.apply(generation, PipelineState::Fetching(coord))?;

        let fetched = self
            .guarded(self.client.fetch_forecast(coord, self.settings.days))
            .await?;

        let payload = match fetched {
            Ok(payload) => payload,
            Err(err) => return self.fail(generation, err.into()),
        };

        match normalize(&payload) {
            Ok(normalized) => self.finish(generation, normalized),
            Err(err) => self.fail(generation, err.into()),
        }
    }

    /// Publish `Ready` and keep the anomalies only if this run still owns the
    /// state.
    fn finish(
        &self,
        generation: u64,
        normalized: NormalizedForecast,
    ) -> Result<PipelineState, TransitionError> {
        let tier = overall_tier(&normalized.forecast.pollen_types);
        if !normalized.anomalies.is_empty() {
            tracing::warn!(
                count = normalized.anomalies.len(),
                "Forecast contained out-of-range pollen indices"
            );
        }
        tracing::info!(
            date = %normalized.forecast.date,
            pollen_types = normalized.forecast.pollen_types.len(),
            plants = normalized.forecast.plants.len(),
            tier = ?tier,
            "Pollen forecast ready"
        );

        let ready = PipelineState::Ready {
            forecast: normalized.forecast,
            overall_tier: tier,
        };
        self.apply(generation, ready.clone())?;
        self.set_anomalies(normalized.anomalies);
        Ok(ready)
    }

    /// Validate the trigger and enter `Locating`, returning the new generation.
    fn begin(&self, trigger: Trigger) -> Result<u64, TransitionError> {
        if self.is_disposed() {
            return Err(TransitionError::Disposed);
        }

        let mut outcome = Err(TransitionError::Disposed);
        self.state_tx.send_if_modified(|state| {
            if !trigger.allowed_from(state) {
                outcome = Err(TransitionError::NotAllowed {
                    from: state.name(),
                    action: trigger.name(),
                });
                return false;
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::info!(from = state.name(), trigger = trigger.name(), "Pipeline -> locating");
            *state = PipelineState::Locating;
            outcome = Ok(generation);
            true
        });
        outcome
    }

    /// Write `next` unless this run was disposed or superseded.
    fn apply(&self, generation: u64, next: PipelineState) -> Result<(), TransitionError> {
        let mut applied = false;
        self.state_tx.send_if_modified(|state| {
            if self.cancel.is_cancelled() || self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            tracing::debug!(from = state.name(), to = next.name(), "Pipeline transition");
            *state = next.clone();
            applied = true;
            true
        });

        if applied {
            Ok(())
        } else {
            tracing::debug!(to = next.name(), "Discarding late pipeline result");
            Err(TransitionError::Disposed)
        }
    }

    fn fail(&self, generation: u64, reason: FailureReason) -> Result<PipelineState, TransitionError> {
        tracing::warn!(kind = ?reason.kind(), error = %reason, "Pipeline failed");
        let failed = PipelineState::Failed(reason);
        self.apply(generation, failed.clone())?;
        Ok(failed)
    }

    /// Run a stage unless the session is disposed first.
    async fn guarded<F: Future>(&self, stage: F) -> Result<F::Output, TransitionError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransitionError::Disposed),
            output = stage => Ok(output),
        }
    }

    fn set_anomalies(&self, anomalies: Vec<AnomalousValue>) {
        match self.anomalies.lock() {
            Ok(mut guard) => *guard = anomalies,
            Err(poisoned) => *poisoned.into_inner() = anomalies,
        }
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
