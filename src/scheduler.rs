//! Repeats discovery cycles on a fixed interval.
//!
//! ```text
//!            tick                 tick                 tick
//!   Idle ─────────▶ RunningCycle ─────▶ Sleeping ───────────▶ Idle
//!     │                  │                 │
//!     └──── stop ────────┴───── stop ──────┴──▶ Stopping ──▶ Stopped
//! ```
//!
//! Every [`Scheduler::tick`] performs exactly one transition. A stop request
//! is observed before a cycle starts, between the queries of a running cycle
//! and while sleeping, where it wakes the scheduler immediately.

use crate::config::MonitorConfig;
use crate::cycle::{CycleError, DiscoveryCycle};
use crate::fetcher::VideoSource;
use crate::models::RunSummary;
use crate::outputs::ReportHook;
use crate::store::VideoStore;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    RunningCycle,
    Sleeping,
    Stopping,
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::RunningCycle => "running_cycle",
            SchedulerState::Sleeping => "sleeping",
            SchedulerState::Stopping => "stopping",
            SchedulerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub struct Scheduler<F, S, R> {
    cycle: DiscoveryCycle<F, S, R>,
    config: MonitorConfig,
    cancel: CancellationToken,
    state: SchedulerState,
    cycles_run: usize,
    last_summary: Option<RunSummary>,
}

impl<F, S, R> Scheduler<F, S, R>
where
    F: VideoSource,
    S: VideoStore + Send + Sync + 'static,
    R: ReportHook,
{
    pub fn new(cycle: DiscoveryCycle<F, S, R>, config: MonitorConfig, cancel: CancellationToken) -> Self {
        Self {
            cycle,
            config,
            cancel,
            state: SchedulerState::Idle,
            cycles_run: 0,
            last_summary: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Cycles attempted so far, failed ones included.
    pub fn cycles_run(&self) -> usize {
        self.cycles_run
    }

    /// Summary of the most recent successful cycle.
    pub fn last_summary(&self) -> Option<&RunSummary> {
        self.last_summary.as_ref()
    }

    pub fn cycle(&self) -> &DiscoveryCycle<F, S, R> {
        &self.cycle
    }

    /// Run exactly one cycle and return its summary.
    pub async fn run_once(&mut self) -> Result<RunSummary, CycleError> {
        self.state = SchedulerState::RunningCycle;
        let result = self.run_cycle().await;
        self.state = if self.cancel.is_cancelled() {
            SchedulerState::Stopped
        } else {
            SchedulerState::Idle
        };
        result
    }

    /// Perform one state transition and return the new state.
    pub async fn tick(&mut self) -> SchedulerState {
        let current = self.state;
        let next = match current {
            SchedulerState::Stopped => SchedulerState::Stopped,
            SchedulerState::Stopping => SchedulerState::Stopped,
            _ if self.cancel.is_cancelled() => SchedulerState::Stopping,
            SchedulerState::Idle => SchedulerState::RunningCycle,
            SchedulerState::RunningCycle => {
                if let Err(e) = self.run_cycle().await {
                    error!(error = %e, "Discovery cycle failed; will retry next interval");
                }
                if self.cancel.is_cancelled() {
                    SchedulerState::Stopping
                } else {
                    SchedulerState::Sleeping
                }
            }
            SchedulerState::Sleeping => {
                let interval = self.config.interval();
                info!(?interval, "Sleeping until next cycle");
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => SchedulerState::Stopping,
                    _ = tokio::time::sleep(interval) => SchedulerState::Idle,
                }
            }
        };
        if next != current {
            info!(from = %current, to = %next, "Scheduler transition");
        }
        self.state = next;
        next
    }

    /// Run cycles until stopped. The first cycle starts immediately.
    #[instrument(level = "info", skip_all, fields(interval_hours = self.config.interval_hours))]
    pub async fn run_continuous(&mut self) {
        info!("Continuous monitoring started");
        while self.tick().await != SchedulerState::Stopped {}
        info!(cycles = self.cycles_run, "Continuous monitoring stopped");
    }

    async fn run_cycle(&mut self) -> Result<RunSummary, CycleError> {
        self.cycles_run += 1;
        let summary = self.cycle.run(&self.config, &self.cancel).await?;
        self.last_summary = Some(summary.clone());
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::test_support::{FakeSource, FlakyStore, RecordingHook, config, harness, video};
    use crate::models::Query;
    use crate::store::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn scheduler(
        source: FakeSource,
        cancel: CancellationToken,
    ) -> Scheduler<FakeSource, MemoryStore, RecordingHook> {
        let q = Query::search("claude programming");
        let source = source.with(&q, Ok(vec![video("abc", "Claude AI coding tutorial")]));
        Scheduler::new(harness(source, Arc::new(MemoryStore::new())), config(vec![q]), cancel)
    }

    #[tokio::test]
    async fn test_run_once() {
        let mut scheduler = scheduler(FakeSource::default(), CancellationToken::new());
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        let summary = scheduler.run_once().await.unwrap();
        assert_eq!(summary.new_count, 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.cycles_run(), 1);
        assert_eq!(scheduler.last_summary(), Some(&summary));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_walk_the_state_machine() {
        let cancel = CancellationToken::new();
        let mut scheduler = scheduler(FakeSource::default(), cancel.clone());

        assert_eq!(scheduler.tick().await, SchedulerState::RunningCycle);
        assert_eq!(scheduler.cycles_run(), 0);
        assert_eq!(scheduler.tick().await, SchedulerState::Sleeping);
        assert_eq!(scheduler.cycles_run(), 1);

        let before = Instant::now();
        assert_eq!(scheduler.tick().await, SchedulerState::Idle);
        assert!(before.elapsed() >= Duration::from_secs(6 * 3600));

        cancel.cancel();
        assert_eq!(scheduler.tick().await, SchedulerState::Stopping);
        assert_eq!(scheduler.tick().await, SchedulerState::Stopped);
        assert_eq!(scheduler.tick().await, SchedulerState::Stopped);
        assert_eq!(scheduler.cycles_run(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_repeats_until_stopped() {
        let cancel = CancellationToken::new();
        let source = FakeSource {
            cancel_after: Some((3, cancel.clone())),
            ..Default::default()
        };
        let mut scheduler = scheduler(source, cancel);

        let started = Instant::now();
        scheduler.run_continuous().await;

        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(scheduler.cycles_run(), 3);
        assert_eq!(scheduler.cycle().store().len(), 1);
        // Two full sleeps between three cycles, none after the last.
        assert_eq!(started.elapsed().as_secs() / 3600, 12);
        assert!(scheduler.last_summary().unwrap().duplicate_count == 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_sleep_is_prompt() {
        let cancel = CancellationToken::new();
        let mut scheduler = scheduler(FakeSource::default(), cancel.clone());
        let started = Instant::now();

        let stopper = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            cancel.cancel();
        };
        tokio::join!(scheduler.run_continuous(), stopper);

        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(scheduler.cycles_run(), 1);
        assert!(started.elapsed() < Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_does_not_stop_the_loop() {
        let cancel = CancellationToken::new();
        let source = FakeSource {
            cancel_after: Some((2, cancel.clone())),
            ..Default::default()
        };
        let store = Arc::new(FlakyStore {
            fail_flush: true,
            ..Default::default()
        });
        let mut scheduler = Scheduler::new(
            harness(source, store),
            config(vec![Query::search("ai coding")]),
            cancel,
        );

        scheduler.run_continuous().await;
        assert_eq!(scheduler.cycles_run(), 2);
        assert!(scheduler.last_summary().is_none());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_run_once_after_stop() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut scheduler = scheduler(FakeSource::default(), cancel);

        let summary = scheduler.run_once().await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.queries_issued, 0);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }
}
