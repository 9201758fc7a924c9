use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::MonitoringExecutor;
use super::types::CheckResult;
use crate::database::models::{Monitor, UserId};

/// Receives classified results from the scheduler.
///
/// `submit` is called from the dispatch loop and must not block.
pub trait ResultSink: Send + Sync {
    fn submit(&self, result: CheckResult);
}

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Upper bound on probes in flight across all monitors
    pub max_concurrency: usize,
    /// How long `stop` waits for in-flight probes
    pub shutdown_grace: Duration,
    /// Pause a monitor after this many consecutive failed checks
    pub auto_pause_after_failures: Option<u32>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { max_concurrency: 64, shutdown_grace: Duration::from_secs(30), auto_pause_after_failures: None }
    }
}

/// Status changes the scheduler derives on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    AutoPaused { monitor_id: Uuid, user_id: UserId, consecutive_failures: u32 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Scheduler dispatch loop has exited")]
    Stopped,
}

enum Command {
    AddOrUpdate(Arc<Monitor>),
    Remove(Uuid),
    Stop,
}

struct Running {
    commands: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
}

/// Monitoring scheduler - decides when each active monitor is probed
pub struct MonitoringScheduler {
    executor: Arc<MonitoringExecutor>,
    sink: Arc<dyn ResultSink>,
    settings: SchedulerSettings,
    events: broadcast::Sender<SchedulerEvent>,
    running: Mutex<Option<Running>>,
}

impl MonitoringScheduler {
    /// Create a new monitoring scheduler
    pub fn new(executor: Arc<MonitoringExecutor>, sink: Arc<dyn ResultSink>, settings: SchedulerSettings) -> Self {
        let (events, _) = broadcast::channel(64);
        Self { executor, sink, settings, events, running: Mutex::new(None) }
    }

    /// Subscribe to scheduler-derived status changes
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Begin scheduling `monitors`. Non-active monitors are ignored.
    pub async fn start(&self, monitors: Vec<Monitor>) -> Result<(), SchedulerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let (command_tx, command_rx) = mpsc::channel(256);
        let mut dispatch = DispatchLoop::new(
            self.executor.clone(),
            self.sink.clone(),
            self.settings.clone(),
            self.events.clone(),
            command_rx,
        );
        for monitor in monitors {
            dispatch.upsert(Arc::new(monitor));
        }

        info!(
            monitors = dispatch.entries.len(),
            max_concurrency = self.settings.max_concurrency,
            "Starting monitoring scheduler"
        );
        let handle = tokio::spawn(dispatch.run());
        *running = Some(Running { commands: command_tx, handle });
        Ok(())
    }

    /// Insert or replace the schedule entry for a monitor
    pub async fn add_or_update(&self, monitor: Monitor) -> Result<(), SchedulerError> {
        self.send(Command::AddOrUpdate(Arc::new(monitor))).await
    }

    /// Cancel any pending or future dispatch for a monitor
    pub async fn remove(&self, monitor_id: Uuid) -> Result<(), SchedulerError> {
        self.send(Command::Remove(monitor_id)).await
    }

    /// Stop dispatching and wait (bounded by the grace period) for in-flight
    /// probes
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let Some(running) = self.running.lock().await.take() else {
            return Err(SchedulerError::NotRunning);
        };

        // A closed channel means the loop is already gone; joining is enough
        let _ = running.commands.send(Command::Stop).await;
        if let Err(e) = running.handle.await {
            error!("Scheduler dispatch loop ended abnormally: {}", e);
        }

        info!("Monitoring scheduler stopped");
        Ok(())
    }

    async fn send(&self, command: Command) -> Result<(), SchedulerError> {
        let commands = match self.running.lock().await.as_ref() {
            Some(running) => running.commands.clone(),
            None => return Err(SchedulerError::NotRunning),
        };
        commands.send(command).await.map_err(|_| SchedulerError::Stopped)
    }
}

/// Per-monitor scheduling state, owned by the dispatch loop
struct ScheduleEntry {
    monitor: Arc<Monitor>,
    next_due: Instant,
    in_flight: bool,
    queued: bool,
    consecutive_failures: u32,
    generation: u64,
}

impl ScheduleEntry {
    fn interval(&self) -> Duration {
        Duration::from_secs(self.monitor.interval_seconds)
    }
}

struct InFlight {
    monitor_id: Uuid,
    abort: AbortHandle,
}

struct Completion {
    dispatch_id: u64,
    monitor_id: Uuid,
    generation: u64,
    /// `None` when the worker died before producing a result
    result: Option<CheckResult>,
}

/// Reports back to the loop when dropped, so a panicking probe still frees
/// its concurrency slot
struct CompletionReport {
    tx: mpsc::UnboundedSender<Completion>,
    dispatch_id: u64,
    monitor_id: Uuid,
    generation: u64,
    result: Option<CheckResult>,
}

impl Drop for CompletionReport {
    fn drop(&mut self) {
        let _ = self.tx.send(Completion {
            dispatch_id: self.dispatch_id,
            monitor_id: self.monitor_id,
            generation: self.generation,
            result: self.result.take(),
        });
    }
}

/// The single writer of scheduling state.
///
/// Workers only see an immutable monitor snapshot and answer through the
/// completion channel.
struct DispatchLoop {
    executor: Arc<MonitoringExecutor>,
    sink: Arc<dyn ResultSink>,
    settings: SchedulerSettings,
    events: broadcast::Sender<SchedulerEvent>,
    commands: mpsc::Receiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    entries: HashMap<Uuid, ScheduleEntry>,
    /// Due monitors waiting for a concurrency slot, oldest due first
    pending: VecDeque<Uuid>,
    in_flight: HashMap<u64, InFlight>,
    next_dispatch_id: u64,
    next_generation: u64,
}

impl DispatchLoop {
    fn new(
        executor: Arc<MonitoringExecutor>,
        sink: Arc<dyn ResultSink>,
        settings: SchedulerSettings,
        events: broadcast::Sender<SchedulerEvent>,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            executor,
            sink,
            settings,
            events,
            commands,
            completions_tx,
            completions_rx,
            entries: HashMap::new(),
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            next_dispatch_id: 0,
            next_generation: 0,
        }
    }

    async fn run(mut self) {
        loop {
            self.dispatch_due();
            let wake = self.next_wake();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::AddOrUpdate(monitor)) => self.upsert(monitor),
                    Some(Command::Remove(monitor_id)) => self.remove(monitor_id),
                    Some(Command::Stop) | None => break,
                },
                Some(completion) = self.completions_rx.recv() => self.complete(completion),
                _ = sleep_until_deadline(wake) => {}
            }
        }

        self.shutdown().await;
    }

    fn upsert(&mut self, monitor: Arc<Monitor>) {
        if !monitor.status.is_schedulable() {
            self.remove(monitor.id);
            return;
        }

        let now = Instant::now();
        match self.entries.get_mut(&monitor.id) {
            Some(entry) => {
                if entry.monitor.interval_seconds != monitor.interval_seconds {
                    // New cadence starts from now; the old phase is not kept
                    entry.next_due = now + Duration::from_secs(monitor.interval_seconds);
                }
                debug!(monitor = %monitor.id, "Updated schedule entry");
                entry.monitor = monitor;
            }
            None => {
                let generation = self.next_generation;
                self.next_generation += 1;
                // A check started before a remove may still be running; it
                // holds the monitor's slot until it reports back
                let still_running = self.in_flight.values().any(|running| running.monitor_id == monitor.id);
                debug!(
                    monitor = %monitor.id,
                    interval = monitor.interval_seconds,
                    still_running,
                    "Scheduled monitor"
                );
                self.entries.insert(
                    monitor.id,
                    ScheduleEntry {
                        monitor,
                        next_due: now,
                        in_flight: still_running,
                        queued: false,
                        consecutive_failures: 0,
                        generation,
                    },
                );
            }
        }
    }

    fn remove(&mut self, monitor_id: Uuid) {
        let Some(entry) = self.entries.remove(&monitor_id) else {
            return;
        };

        if entry.queued {
            self.pending.retain(|id| *id != monitor_id);
        }
        debug!(monitor = %monitor_id, in_flight = entry.in_flight, "Removed monitor from schedule");
    }

    /// Queue every due monitor and dispatch as many as the budget allows
    fn dispatch_due(&mut self) {
        let now = Instant::now();

        let mut due: Vec<(Instant, Uuid)> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.queued && entry.next_due <= now)
            .map(|(id, entry)| (entry.next_due, *id))
            .collect();
        due.sort_unstable();

        for (_, monitor_id) in due {
            let Some(entry) = self.entries.get_mut(&monitor_id) else {
                continue;
            };

            if entry.in_flight {
                // Coalesce: skip this run and move on as if it had happened
                entry.next_due = now + entry.interval();
                debug!(monitor = %monitor_id, "Previous probe still running, skipping this cycle");
                continue;
            }

            entry.queued = true;
            self.pending.push_back(monitor_id);
        }

        let budget = self.settings.max_concurrency.max(1);
        while self.in_flight.len() < budget {
            let Some(monitor_id) = self.pending.pop_front() else {
                break;
            };
            self.dispatch(monitor_id, now);
        }

        if !self.pending.is_empty() {
            debug!(queued = self.pending.len(), in_flight = self.in_flight.len(), "Concurrency budget exhausted");
        }
    }

    fn dispatch(&mut self, monitor_id: Uuid, now: Instant) {
        let Some(entry) = self.entries.get_mut(&monitor_id) else {
            return;
        };

        entry.queued = false;
        entry.in_flight = true;
        // Set before the probe runs so a slow endpoint cannot hold back its
        // own next cycle
        entry.next_due = now + entry.interval();

        let dispatch_id = self.next_dispatch_id;
        self.next_dispatch_id += 1;

        let monitor = Arc::clone(&entry.monitor);
        let generation = entry.generation;
        let executor = Arc::clone(&self.executor);
        let tx = self.completions_tx.clone();

        let handle = tokio::spawn(async move {
            let mut report = CompletionReport { tx, dispatch_id, monitor_id: monitor.id, generation, result: None };
            report.result = Some(executor.execute_check(&monitor).await);
        });

        self.in_flight.insert(dispatch_id, InFlight { monitor_id, abort: handle.abort_handle() });
    }

    fn complete(&mut self, completion: Completion) {
        if self.in_flight.remove(&completion.dispatch_id).is_none() {
            return;
        }

        let Some(entry) = self.entries.get_mut(&completion.monitor_id) else {
            debug!(monitor = %completion.monitor_id, "Discarding result for removed monitor");
            return;
        };
        if entry.generation != completion.generation {
            // At most one check per monitor runs, so this was the one
            // blocking the re-added entry
            entry.in_flight = false;
            debug!(monitor = %completion.monitor_id, "Discarding result from a previous schedule entry");
            return;
        }
        entry.in_flight = false;

        let Some(result) = completion.result else {
            warn!(monitor = %completion.monitor_id, "Probe task ended without a result");
            return;
        };

        if result.is_success() {
            entry.consecutive_failures = 0;
        } else {
            entry.consecutive_failures += 1;
        }

        let tripped = self
            .settings
            .auto_pause_after_failures
            .is_some_and(|limit| limit > 0 && entry.consecutive_failures >= limit);
        let user_id = entry.monitor.user_id;
        let consecutive_failures = entry.consecutive_failures;

        self.sink.submit(result);

        if tripped {
            self.remove(completion.monitor_id);
            info!(
                target: "monitor_bee::audit",
                monitor = %completion.monitor_id,
                consecutive_failures,
                "Auto-pausing monitor after consecutive failures"
            );
            // No subscribers is fine
            let _ = self.events.send(SchedulerEvent::AutoPaused {
                monitor_id: completion.monitor_id,
                user_id,
                consecutive_failures,
            });
        }
    }

    /// Soonest due time among monitors not already waiting for a slot
    fn next_wake(&self) -> Option<Instant> {
        self.entries.values().filter(|entry| !entry.queued).map(|entry| entry.next_due).min()
    }

    async fn shutdown(mut self) {
        self.pending.clear();

        if self.in_flight.is_empty() {
            return;
        }

        info!(in_flight = self.in_flight.len(), "Waiting for in-flight probes to finish");
        let deadline = Instant::now() + self.settings.shutdown_grace;

        while !self.in_flight.is_empty() {
            tokio::select! {
                Some(completion) = self.completions_rx.recv() => self.complete(completion),
                _ = sleep_until(deadline) => {
                    warn!(abandoned = self.in_flight.len(), "Grace period elapsed, abandoning in-flight probes");
                    for (_, probe) in self.in_flight.drain() {
                        debug!(monitor = %probe.monitor_id, "Abandoning probe");
                        probe.abort.abort();
                    }
                    break;
                }
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
