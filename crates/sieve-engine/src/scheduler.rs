//! Resizable worker pool that fans a script out over the input records.
//!
//! A dispatcher task claims record indices one at a time under a semaphore
//! permit and runs each claimed record on its own task. The semaphore's
//! permit count is the degree of parallelism; it can be changed at any time
//! without interrupting in-flight records. Next to the dispatcher run a
//! checkpoint persister and the proxy health monitor.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sieve_types::{CheckpointRecord, Result, SieveError};
use tokio::sync::{broadcast, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointStore;
use crate::events::{EventEmitter, SchedulerEvent};
use crate::interpreter::Interpreter;
use crate::output::{format_line, OutputSink};
use crate::proxy::ProxyPool;
use crate::stats::{RunStats, StatsSnapshot};

const CPM_WINDOW: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub script_name: String,
    /// Identifies the record list in the checkpoint store, usually its path.
    pub input_source: String,
    /// Records to skip; `None` resumes from the stored checkpoint.
    pub skip: Option<usize>,
    pub parallelism: usize,
    pub max_parallelism: usize,
    pub checkpoint_interval: Duration,
    pub proxy_health_interval: Duration,
}

impl SchedulerConfig {
    pub fn new(script_name: impl Into<String>, input_source: impl Into<String>) -> Self {
        Self {
            script_name: script_name.into(),
            input_source: input_source.into(),
            skip: None,
            parallelism: 1,
            max_parallelism: 200,
            checkpoint_interval: Duration::from_secs(1),
            proxy_health_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
    Paused,
    Stopping,
    Aborting,
    Completed,
    Aborted,
}

impl SchedulerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SchedulerState::Completed | SchedulerState::Aborted)
    }
}

/// Live view of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerMetrics {
    pub state: SchedulerState,
    pub total: usize,
    /// Percentage of the non-skipped records that have been classified.
    pub progress: f64,
    pub elapsed: Duration,
    /// Records classified in the last minute.
    pub cpm: usize,
    pub parallelism: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub stats: StatsSnapshot,
}

/// Result of a finished run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub state: SchedulerState,
    pub stats: StatsSnapshot,
    pub elapsed: Duration,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

struct Shared {
    config: SchedulerConfig,
    skip: usize,
    interpreter: Arc<Interpreter>,
    records: Arc<Vec<String>>,
    pool: Arc<ProxyPool>,
    sink: Arc<OutputSink>,
    store: Arc<dyn CheckpointStore>,
    stats: Arc<RunStats>,
    events: EventEmitter,
    semaphore: Arc<Semaphore>,
    parallelism: AtomicUsize,
    next_index: AtomicUsize,
    state: watch::Sender<SchedulerState>,
    /// Fired by `abort`; in-flight attempts stop at their next await.
    abort: CancellationToken,
    /// Stops the persister, the health monitor and pending shrinks.
    background: CancellationToken,
    persister: Mutex<Option<JoinHandle<()>>>,
    completions: Mutex<VecDeque<Instant>>,
    started: Mutex<Option<(Instant, DateTime<Utc>)>>,
    ended: Mutex<Option<(Instant, DateTime<Utc>)>>,
}

impl Scheduler {
    /// Build a scheduler. The checkpoint store is read here, once, when
    /// `config.skip` is `None`.
    pub async fn new(
        config: SchedulerConfig,
        interpreter: Arc<Interpreter>,
        records: Vec<String>,
        pool: Arc<ProxyPool>,
        sink: Arc<OutputSink>,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Self> {
        if config.max_parallelism == 0 {
            return Err(SieveError::Config("max parallelism must be at least 1".into()));
        }

        let skip = match config.skip {
            Some(skip) => skip,
            None => match store.get(&config.script_name, &config.input_source).await {
                Ok(Some(record)) => {
                    tracing::info!(progress = record.progress, "Resuming from checkpoint");
                    usize::try_from(record.progress).unwrap_or(usize::MAX)
                }
                Ok(None) => 0,
                Err(e) => {
                    tracing::warn!(error = %e, "Could not read checkpoint, starting from the beginning");
                    0
                }
            },
        }
        .min(records.len());

        let parallelism = config.parallelism.clamp(1, config.max_parallelism);
        let (state, _) = watch::channel(SchedulerState::Idle);

        Ok(Self {
            shared: Arc::new(Shared {
                skip,
                interpreter,
                records: Arc::new(records),
                pool,
                sink,
                store,
                stats: Arc::new(RunStats::new(skip as u64)),
                events: EventEmitter::default(),
                semaphore: Arc::new(Semaphore::new(parallelism)),
                parallelism: AtomicUsize::new(parallelism),
                next_index: AtomicUsize::new(skip),
                state,
                abort: CancellationToken::new(),
                background: CancellationToken::new(),
                persister: Mutex::new(None),
                completions: Mutex::new(VecDeque::new()),
                started: Mutex::new(None),
                ended: Mutex::new(None),
                config,
            }),
        })
    }

    pub fn state(&self) -> SchedulerState {
        *self.shared.state.borrow()
    }

    pub fn skip(&self) -> usize {
        self.shared.skip
    }

    pub fn total(&self) -> usize {
        self.shared.records.len()
    }

    pub fn parallelism(&self) -> usize {
        self.shared.parallelism.load(Ordering::SeqCst)
    }

    pub fn max_parallelism(&self) -> usize {
        self.shared.config.max_parallelism
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.shared.events.subscribe()
    }

    /// Begin processing at the skip offset. Does nothing unless idle.
    pub fn start(&self) {
        let shared = &self.shared;
        if !shared.transition(&[SchedulerState::Idle], SchedulerState::Running) {
            return;
        }
        *lock(&shared.started) = Some((Instant::now(), Utc::now()));

        let parallelism = self.parallelism();
        tracing::info!(
            script = %shared.config.script_name,
            total = shared.records.len(),
            skip = shared.skip,
            parallelism,
            "Run started"
        );
        shared.events.emit(SchedulerEvent::Started {
            total: shared.records.len(),
            skip: shared.skip,
            parallelism,
        });

        shared
            .pool
            .spawn_health_monitor(shared.config.proxy_health_interval, shared.background.clone());
        let persister = tokio::spawn(persist_loop(Arc::clone(shared)));
        *lock(&shared.persister) = Some(persister);
        tokio::spawn(dispatch_loop(Arc::clone(shared)));
    }

    /// Stop claiming new records until [`resume`](Self::resume).
    pub fn pause(&self) {
        if self
            .shared
            .transition(&[SchedulerState::Running], SchedulerState::Paused)
        {
            tracing::info!("Run paused");
            self.shared.events.emit(SchedulerEvent::Paused);
        }
    }

    pub fn resume(&self) {
        if self
            .shared
            .transition(&[SchedulerState::Paused], SchedulerState::Running)
        {
            tracing::info!("Run resumed");
            self.shared.events.emit(SchedulerEvent::Resumed);
        }
    }

    /// Claim no more records; completes once in-flight records finish.
    pub fn stop(&self) {
        if self.shared.transition(
            &[SchedulerState::Running, SchedulerState::Paused],
            SchedulerState::Stopping,
        ) {
            tracing::info!("Run stopping");
            self.shared.events.emit(SchedulerEvent::Stopping);
        }
    }

    /// Cancel in-flight records and finish as soon as they unwind.
    pub fn abort(&self) {
        if self.shared.transition(
            &[
                SchedulerState::Running,
                SchedulerState::Paused,
                SchedulerState::Stopping,
            ],
            SchedulerState::Aborting,
        ) {
            tracing::info!("Run aborting");
            self.shared.events.emit(SchedulerEvent::Aborting);
            self.shared.abort.cancel();
        }
    }

    /// Set the number of concurrent workers, clamped to
    /// `[1, max_parallelism]`. Returns the value applied.
    pub fn change_degree_of_parallelism(&self, requested: usize) -> usize {
        let shared = &self.shared;
        let target = requested.clamp(1, shared.config.max_parallelism);
        let previous = shared.parallelism.swap(target, Ordering::SeqCst);
        if target == previous {
            return target;
        }

        if target > previous {
            shared.semaphore.add_permits(target - previous);
        } else {
            let surplus = previous - target;
            let forgotten = shared.semaphore.forget_permits(surplus);
            let outstanding = surplus - forgotten;
            if outstanding > 0 {
                let semaphore = Arc::clone(&shared.semaphore);
                let background = shared.background.clone();
                tokio::spawn(async move {
                    let Ok(outstanding) = u32::try_from(outstanding) else {
                        return;
                    };
                    tokio::select! {
                        _ = background.cancelled() => {}
                        permits = semaphore.acquire_many_owned(outstanding) => {
                            if let Ok(permits) = permits {
                                permits.forget();
                            }
                        }
                    }
                });
            }
        }

        tracing::info!(from = previous, to = target, "Parallelism changed");
        shared.events.emit(SchedulerEvent::ParallelismChanged {
            from: previous,
            to: target,
        });
        target
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        let shared = &self.shared;
        let stats = shared.stats.snapshot();
        let remaining = shared.records.len().saturating_sub(shared.skip);
        let progress = if remaining == 0 {
            100.0
        } else {
            stats.checked as f64 / remaining as f64 * 100.0
        };
        let (elapsed, started_at, ended_at) = shared.timing();
        SchedulerMetrics {
            state: self.state(),
            total: shared.records.len(),
            progress,
            elapsed,
            cpm: shared.cpm(),
            parallelism: self.parallelism(),
            started_at,
            ended_at,
            stats,
        }
    }

    /// Resolve once the run reaches `Completed` or `Aborted`.
    pub async fn wait(&self) -> RunSummary {
        let mut state = self.shared.state.subscribe();
        let _ = state.wait_for(SchedulerState::is_terminal).await;
        let (elapsed, started_at, ended_at) = self.shared.timing();
        RunSummary {
            state: self.state(),
            stats: self.shared.stats.snapshot(),
            elapsed,
            started_at,
            ended_at,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    /// Move to `to` if the current state is one of `from`.
    fn transition(&self, from: &[SchedulerState], to: SchedulerState) -> bool {
        self.state.send_if_modified(|state| {
            if from.contains(state) {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn cpm(&self) -> usize {
        let mut completions = lock(&self.completions);
        let now = Instant::now();
        while completions
            .front()
            .is_some_and(|t| now.duration_since(*t) > CPM_WINDOW)
        {
            completions.pop_front();
        }
        completions.len()
    }

    fn timing(&self) -> (Duration, Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let started = *lock(&self.started);
        let ended = *lock(&self.ended);
        let elapsed = match (started, ended) {
            (Some((start, _)), Some((end, _))) => end.duration_since(start),
            (Some((start, _)), None) => start.elapsed(),
            _ => Duration::ZERO,
        };
        (elapsed, started.map(|s| s.1), ended.map(|e| e.1))
    }

    fn progress_record(&self) -> CheckpointRecord {
        CheckpointRecord::new(
            self.config.script_name.clone(),
            self.config.input_source.clone(),
            self.skip as u64 + self.stats.checked(),
        )
    }

    async fn save_checkpoint(&self) {
        let record = self.progress_record();
        let progress = record.progress;
        match self.store.upsert(record).await {
            Ok(()) => self.events.emit(SchedulerEvent::CheckpointSaved { progress }),
            Err(e) => tracing::warn!(error = %e, progress, "Checkpoint save failed"),
        }
    }

    /// Wait for a permit while the run is `Running`. `None` means stop
    /// dispatching.
    async fn next_permit(
        &self,
        state: &mut watch::Receiver<SchedulerState>,
    ) -> Option<OwnedSemaphorePermit> {
        loop {
            let current = *state.borrow_and_update();
            match current {
                SchedulerState::Running => {
                    tokio::select! {
                        _ = self.abort.cancelled() => return None,
                        changed = state.changed() => {
                            if changed.is_err() {
                                return None;
                            }
                        }
                        permit = Arc::clone(&self.semaphore).acquire_owned() => {
                            let permit = permit.ok()?;
                            if *state.borrow() == SchedulerState::Running {
                                return Some(permit);
                            }
                        }
                    }
                }
                SchedulerState::Paused | SchedulerState::Idle => {
                    tokio::select! {
                        _ = self.abort.cancelled() => return None,
                        changed = state.changed() => {
                            if changed.is_err() {
                                return None;
                            }
                        }
                    }
                }
                _ => return None,
            }
        }
    }
}

async fn dispatch_loop(shared: Arc<Shared>) {
    let mut state = shared.state.subscribe();
    let mut workers = JoinSet::new();

    while let Some(permit) = shared.next_permit(&mut state).await {
        let index = shared.next_index.fetch_add(1, Ordering::SeqCst);
        if index >= shared.records.len() {
            break;
        }
        workers.spawn(run_record(Arc::clone(&shared), index, permit));
        while workers.try_join_next().is_some() {}
    }

    while workers.join_next().await.is_some() {}
    finish(&shared).await;
}

async fn run_record(shared: Arc<Shared>, index: usize, permit: OwnedSemaphorePermit) {
    let record = &shared.records[index];
    let outcome = shared
        .interpreter
        .run_once(record, &shared.pool, &shared.stats, &shared.abort)
        .await;
    let Some(outcome) = outcome else {
        drop(permit);
        return;
    };

    let line = format_line(record, &outcome.captures, shared.sink.separator());
    if let Err(e) = shared
        .sink
        .write(&shared.config.script_name, &outcome.status, &line)
        .await
    {
        tracing::warn!(error = %e, status = %outcome.status, "Could not write result");
    }
    shared.stats.record(&outcome.status);
    lock(&shared.completions).push_back(Instant::now());
    tracing::debug!(index, status = %outcome.status, attempts = outcome.attempts, "Record classified");
    shared.events.emit(SchedulerEvent::RecordCompleted {
        status: outcome.status,
        line,
        attempts: outcome.attempts,
    });
    drop(permit);
}

async fn persist_loop(shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(shared.config.checkpoint_interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = shared.background.cancelled() => break,
            _ = ticker.tick() => shared.save_checkpoint().await,
        }
    }
}

async fn finish(shared: &Shared) {
    *lock(&shared.ended) = Some((Instant::now(), Utc::now()));
    shared.background.cancel();
    // The final offset must be the last write.
    let persister = lock(&shared.persister).take();
    if let Some(persister) = persister {
        if let Err(e) = persister.await {
            tracing::warn!(error = %e, "Checkpoint persister failed");
        }
    }
    shared.save_checkpoint().await;

    let checked = shared.stats.checked();
    let aborted = shared.abort.is_cancelled();
    if aborted {
        tracing::info!(checked, "Run aborted");
        shared.events.emit(SchedulerEvent::Aborted { checked });
    } else {
        let (elapsed, _, _) = shared.timing();
        tracing::info!(checked, elapsed_ms = elapsed.as_millis() as u64, "Run completed");
        shared.events.emit(SchedulerEvent::Completed {
            checked,
            duration_ms: elapsed.as_millis() as u64,
        });
    }
    shared.state.send_replace(if aborted {
        SchedulerState::Aborted
    } else {
        SchedulerState::Completed
    });
}
