//! Periodic SMS poller.
//!
//! - `Idle` until `start()` succeeds; at most one poll task exists
//! - Each tick: fetch → dedup → keyword filter → forward, in ascending id order
//! - The high-water mark is persisted once per tick, after the whole batch
//! - `stop()` only prevents future ticks; a tick in flight runs to completion
//! - Ticks never overlap, even across a `stop()`/`start()` pair

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Local};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::ChatId,
    errors::Error,
    filter,
    forwarder::Forwarder,
    source::SourceClient,
    store::{ConfigPatch, ConfigStore},
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

#[derive(Clone, Debug)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub last_tick_at: Option<DateTime<Local>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    NotConfigured,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub fresh: usize,
    pub forwarded: usize,
    pub filtered: usize,
    pub failed: usize,
    pub high_water_mark: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    SourceFailed,
    Processed(TickReport),
}

#[derive(Clone)]
pub struct PollScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    store: Arc<ConfigStore>,
    source: Arc<dyn SourceClient>,
    forwarder: Forwarder,
    state: tokio::sync::Mutex<TaskState>,
    // Held for a whole tick so two ticks never read the same mark.
    tick_lock: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct TaskState {
    job: Option<PollJob>,
    last_tick_at: Option<DateTime<Local>>,
}

struct PollJob {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollJob {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

impl PollScheduler {
    pub fn new(store: Arc<ConfigStore>, source: Arc<dyn SourceClient>, forwarder: Forwarder) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                source,
                forwarder,
                state: tokio::sync::Mutex::new(TaskState::default()),
                tick_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Enable forwarding and make sure the poll task is running.
    ///
    /// Returns `Ok(false)` when a task was already running (nothing new is
    /// spawned). Fails with [`Error::PreconditionNotMet`] and changes nothing
    /// if the active token or destination is missing.
    pub async fn start(&self) -> Result<bool> {
        let mut st = self.inner.state.lock().await;

        let interval = self
            .inner
            .store
            .mutate(|cfg| {
                if cfg.active_source_token.is_none() {
                    return Err(Error::PreconditionNotMet(
                        "no active SMS token configured".to_string(),
                    ));
                }
                if cfg.destination.is_none() {
                    return Err(Error::PreconditionNotMet(
                        "no destination chat configured".to_string(),
                    ));
                }
                cfg.forwarding_enabled = true;
                Ok(cfg.poll_interval())
            })
            .await?;

        if st.job.as_ref().is_some_and(PollJob::is_live) {
            return Ok(false);
        }

        let cancel = CancellationToken::new();
        let scheduler = self.clone();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move {
            scheduler.poll_loop(interval, cancel_clone).await;
        });
        st.job = Some(PollJob { cancel, handle });

        tracing::info!(interval_secs = interval.as_secs(), "forwarding started");
        Ok(true)
    }

    /// Disable forwarding and cancel the poll task. Returns whether a task was running.
    pub async fn stop(&self) -> Result<bool> {
        let was_running = self.cancel_job().await;
        self.inner
            .store
            .update(ConfigPatch {
                forwarding_enabled: Some(false),
                ..Default::default()
            })
            .await?;
        tracing::info!(was_running, "forwarding stopped");
        Ok(was_running)
    }

    /// Restart polling after a process restart if the record says forwarding was on.
    pub async fn resume(&self) -> Result<bool> {
        let cfg = self.inner.store.read().await;
        if !cfg.forwarding_enabled {
            return Ok(false);
        }
        if !cfg.is_ready() {
            tracing::warn!("forwarding was enabled but token/destination are missing; not resuming");
            return Ok(false);
        }
        self.start().await
    }

    /// Cancel the poll task without touching the persisted forwarding flag.
    pub async fn shutdown(&self) {
        if self.cancel_job().await {
            tracing::info!("poll task cancelled for shutdown");
        }
    }

    pub async fn status(&self) -> SchedulerStatus {
        let st = self.inner.state.lock().await;
        let state = if st.job.as_ref().is_some_and(PollJob::is_live) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        };
        SchedulerStatus {
            state,
            last_tick_at: st.last_tick_at,
        }
    }

    async fn cancel_job(&self) -> bool {
        let mut st = self.inner.state.lock().await;
        match st.job.take() {
            Some(job) => {
                let was_live = job.is_live();
                job.cancel.cancel();
                was_live
            }
            None => false,
        }
    }

    async fn poll_loop(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                TickOutcome::Processed(report) if report.fresh > 0 => {
                    tracing::info!(
                        fresh = report.fresh,
                        forwarded = report.forwarded,
                        filtered = report.filtered,
                        failed = report.failed,
                        high_water_mark = ?report.high_water_mark,
                        "poll tick processed"
                    );
                }
                outcome => tracing::debug!(?outcome, "poll tick"),
            }
        }
    }

    /// Run one poll → dedup → filter → forward pass.
    ///
    /// Waits for any tick already in flight, then works on a fresh snapshot.
    pub async fn tick(&self) -> TickOutcome {
        let _serial = self.inner.tick_lock.lock().await;
        let cfg = self.inner.store.read().await;
        if !cfg.forwarding_enabled {
            return TickOutcome::Skipped(SkipReason::Disabled);
        }
        let (Some(token), Some(destination)) = (cfg.active_source_token.as_deref(), cfg.destination)
        else {
            return TickOutcome::Skipped(SkipReason::NotConfigured);
        };

        let messages = match self.inner.source.fetch(token).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch SMS");
                return TickOutcome::SourceFailed;
            }
        };

        let fetched = messages.len();
        let (fresh, mark) = filter::select(messages, cfg.high_water_mark);
        let mut report = TickReport {
            fetched,
            fresh: fresh.len(),
            high_water_mark: mark,
            ..Default::default()
        };

        let destination = ChatId(destination);
        for message in &fresh {
            if !filter::matches(&message.content, &cfg.keywords) {
                report.filtered += 1;
                continue;
            }
            match self.inner.forwarder.forward(message, destination).await {
                Ok(()) => {
                    report.forwarded += 1;
                    tracing::info!(id = ?message.id, chat_id = destination.0, "forwarded SMS");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(id = ?message.id, chat_id = destination.0, error = %e, "failed to forward SMS");
                }
            }
        }

        if let Some(new_mark) = mark.filter(|m| Some(*m) != cfg.high_water_mark) {
            let patch = ConfigPatch {
                high_water_mark: Some(new_mark),
                ..Default::default()
            };
            if let Err(e) = self.inner.store.update(patch).await {
                tracing::error!(error = %e, "failed to record high-water mark");
            }
        }

        self.inner.state.lock().await.last_tick_at = Some(Local::now());
        TickOutcome::Processed(report)
    }
}
