use std::fmt;
use std::iter;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::config::SchedulerConfig;
use crate::heap::MinBinaryHeap;
use crate::runtime_util::{lock_unpoisoned, wait_until, MonotonicClock};
use crate::task::{BoundTask, Execution, ScheduledTask, TaskHandle};
use crate::PhysicsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    NotStarted,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub executed: u64,
    pub rescheduled: u64,
    pub skipped: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    executed: AtomicU64,
    rescheduled: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl StatCounters {
    fn record(&self, execution: &Execution) {
        let counter = match execution {
            Execution::Completed => &self.executed,
            Execution::Reschedule(_) => {
                self.executed.fetch_add(1, Ordering::Relaxed);
                &self.rescheduled
            }
            Execution::Skipped(_) => &self.skipped,
            Execution::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            executed: self.executed.load(Ordering::Relaxed),
            rescheduled: self.rescheduled.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

struct QueueState {
    tasks: MinBinaryHeap<ScheduledTask>,
    stop: bool,
}

/// State shared between producers and the worker. The heap and the stop flag
/// are the wait predicate; every change to either happens under `queue` and
/// is followed by a notify on `wake`.
struct SchedulerShared {
    queue: Mutex<QueueState>,
    wake: Condvar,
    stop_requested: AtomicBool,
}

impl SchedulerShared {
    fn new() -> Self {
        Self {
            queue: Mutex::new(QueueState {
                tasks: MinBinaryHeap::new(),
                stop: false,
            }),
            wake: Condvar::new(),
            stop_requested: AtomicBool::new(false),
        }
    }
}

struct Worker {
    thread: JoinHandle<()>,
    done_rx: mpsc::Receiver<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerExit {
    Joined,
    // stop() ran inside a task body; the worker drains its queue on return.
    OwnThread,
    Abandoned,
}

/// Due-time ordered task runner with one dedicated worker thread.
///
/// Producers call [`PhysicsScheduler::add_task`] from any thread; the worker
/// pops tasks as they come due and runs them under their world's lock.
pub struct PhysicsScheduler {
    world_name: String,
    config: SchedulerConfig,
    clock: MonotonicClock,
    shared: Mutex<Arc<SchedulerShared>>,
    state: Mutex<SchedulerState>,
    // Held for the whole of start/stop so transitions never interleave.
    worker: Mutex<Option<Worker>>,
    stats: Arc<StatCounters>,
}

impl fmt::Debug for PhysicsScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicsScheduler")
            .field("world_name", &self.world_name)
            .field("config", &self.config)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl PhysicsScheduler {
    pub fn new(world_name: impl Into<String>, config: SchedulerConfig) -> Self {
        Self {
            world_name: world_name.into(),
            config,
            clock: MonotonicClock::start(),
            shared: Mutex::new(Arc::new(SchedulerShared::new())),
            state: Mutex::new(SchedulerState::NotStarted),
            worker: Mutex::new(None),
            stats: Arc::new(StatCounters::default()),
        }
    }

    pub fn world_name(&self) -> &str {
        &self.world_name
    }

    pub fn state(&self) -> SchedulerState {
        *lock_unpoisoned(&self.state)
    }

    pub fn started(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.snapshot()
    }

    /// Queued entries, including ones already marked deleted.
    pub fn pending_count(&self) -> usize {
        let shared = self.shared();
        let queue = lock_unpoisoned(&shared.queue);
        queue.tasks.len()
    }

    /// Milliseconds since this scheduler was constructed.
    pub fn now_ms(&self) -> i64 {
        self.clock.elapsed_ms()
    }

    /// Spawns the worker. Calling it while already running only logs.
    pub fn start(&self) -> Result<(), PhysicsError> {
        let mut worker_slot = lock_unpoisoned(&self.worker);
        if self.started() {
            log::warn!(
                "physics scheduler for world {} is already running",
                self.world_name
            );
            return Ok(());
        }

        let shared = self.shared();
        let pending = {
            let mut queue = lock_unpoisoned(&shared.queue);
            queue.stop = false;
            shared.stop_requested.store(false, Ordering::SeqCst);
            queue.tasks.len()
        };

        let (done_tx, done_rx) = mpsc::channel::<()>();
        let worker_shared = Arc::clone(&shared);
        let stats = Arc::clone(&self.stats);
        let clock = self.clock;
        let world_name = self.world_name.clone();
        let thread = thread::Builder::new()
            .name(format!("{}-{}", self.config.worker_name_prefix, self.world_name))
            .spawn(move || {
                let _done = done_tx;
                process_tasks(&worker_shared, clock, &stats, &world_name);
            })
            .map_err(|err| PhysicsError::ThreadSpawnFailed {
                world: self.world_name.clone(),
                reason: err.to_string(),
            })?;

        if pending > 0 {
            shared.wake.notify_one();
        }
        *worker_slot = Some(Worker { thread, done_rx });
        *lock_unpoisoned(&self.state) = SchedulerState::Running;
        log::info!(
            "physics scheduler for world {} started with {} pending task(s)",
            self.world_name,
            pending
        );
        Ok(())
    }

    /// Signals the worker to stop and waits up to the configured shutdown
    /// timeout. Pending tasks are dropped; the worker runs their `on_dropped`
    /// hooks under the world lock first, so do not call this while holding
    /// that lock from another thread. Calling it while not running only logs.
    pub fn stop(&self) {
        let mut worker_slot = lock_unpoisoned(&self.worker);
        if !self.started() {
            log::warn!(
                "physics scheduler for world {} is not running",
                self.world_name
            );
            return;
        }
        *lock_unpoisoned(&self.state) = SchedulerState::Stopped;

        let shared = self.shared();
        {
            let mut queue = lock_unpoisoned(&shared.queue);
            queue.stop = true;
            shared.stop_requested.store(true, Ordering::SeqCst);
        }
        shared.wake.notify_all();

        let exit = match worker_slot.take() {
            Some(worker) => self.join_worker(worker),
            None => WorkerExit::Joined,
        };

        let dropped = {
            let mut queue = lock_unpoisoned(&shared.queue);
            let dropped = queue.tasks.len();
            if exit != WorkerExit::OwnThread {
                queue.tasks.clear();
            }
            dropped
        };
        if exit != WorkerExit::Joined {
            // The old queue stays stopped for whatever still runs on it.
            *lock_unpoisoned(&self.shared) = Arc::new(SchedulerShared::new());
        }
        log::info!(
            "physics scheduler for world {} stopped, dropped {} pending task(s)",
            self.world_name,
            dropped
        );
    }

    /// Queues `task` to run `delay_ms` from now and returns its deletion handle.
    pub fn add_task(&self, task: BoundTask, delay_ms: u32) -> TaskHandle {
        let handle = task.handle();
        let due_time = self.clock.elapsed_ms() + i64::from(delay_ms);
        let shared = self.shared();
        let became_head = {
            let mut queue = lock_unpoisoned(&shared.queue);
            queue.tasks.add(ScheduledTask { due_time, task });
            queue
                .tasks
                .head()
                .is_some_and(|head| head.due_time == due_time)
        };
        if became_head {
            shared.wake.notify_one();
        }
        handle
    }

    fn shared(&self) -> Arc<SchedulerShared> {
        Arc::clone(&lock_unpoisoned(&self.shared))
    }

    fn join_worker(&self, worker: Worker) -> WorkerExit {
        if worker.thread.thread().id() == thread::current().id() {
            // Stopped from inside a task body; the loop exits once it returns.
            log::debug!(
                "physics scheduler for world {} stopped from its own worker",
                self.world_name
            );
            return WorkerExit::OwnThread;
        }

        match worker.done_rx.recv_timeout(self.config.shutdown_timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if worker.thread.join().is_err() {
                    log::error!(
                        "physics worker for world {} terminated by panic",
                        self.world_name
                    );
                }
                WorkerExit::Joined
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::error!(
                    "physics worker for world {} did not stop within {:?}; abandoning it, \
                     it may still hold the world lock",
                    self.world_name,
                    self.config.shutdown_timeout
                );
                WorkerExit::Abandoned
            }
        }
    }
}

impl Drop for PhysicsScheduler {
    fn drop(&mut self) {
        if self.started() {
            self.stop();
        }
    }
}

fn process_tasks(
    shared: &SchedulerShared,
    clock: MonotonicClock,
    stats: &StatCounters,
    world_name: &str,
) {
    log::debug!("physics worker for world {} running", world_name);
    loop {
        let mut task = {
            let mut queue = lock_unpoisoned(&shared.queue);
            loop {
                if queue.stop {
                    let leftover: Vec<_> = iter::from_fn(|| queue.tasks.remove_head()).collect();
                    drop(queue);
                    for mut task in leftover {
                        task.discard(world_name, &shared.stop_requested);
                    }
                    log::debug!("physics worker for world {} exiting", world_name);
                    return;
                }
                let now = clock.elapsed_ms();
                let next_due = queue.tasks.head().map(|head| head.due_time);
                match next_due {
                    None => {
                        queue = shared
                            .wake
                            .wait(queue)
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                    }
                    Some(due_time) if due_time <= now => {
                        if let Some(task) = queue.tasks.remove_head() {
                            break task;
                        }
                    }
                    Some(due_time) => {
                        let timeout = wait_until(due_time, now);
                        queue = shared
                            .wake
                            .wait_timeout(queue, timeout)
                            .map(|(guard, _)| guard)
                            .unwrap_or_else(|poisoned| poisoned.into_inner().0);
                    }
                }
            }
        };

        let execution = task.perform(world_name, &shared.stop_requested);
        stats.record(&execution);

        if let Execution::Reschedule(delay) = execution {
            task.due_time = clock.elapsed_ms() + i64::from(delay);
            let stopped = {
                let mut queue = lock_unpoisoned(&shared.queue);
                if queue.stop {
                    Some(task)
                } else {
                    queue.tasks.add(task);
                    None
                }
            };
            if let Some(mut task) = stopped {
                task.discard(world_name, &shared.stop_requested);
            }
        }
    }
}
