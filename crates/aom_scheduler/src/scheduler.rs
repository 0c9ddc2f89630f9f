//! The tick loop.
//!
//! Producers on any thread push into a lock-free intake ("dirty") queue. The
//! loop thread alone owns the ready heap: every iteration it drains the intake,
//! pops the tasks whose due tick has arrived, hands asynchronous bodies to the
//! worker pool and runs the synchronous ones in FIFO order on itself.
//!
//! A tick is one millisecond of scheduler uptime. Repeating tasks are
//! re-submitted with `due = now + period` after each run, measured from the
//! moment the body finished. Under sustained load the period therefore drifts;
//! this is intentional and not corrected.

use crate::error::SchedulerError;
use crate::task::{Task, TaskCallback, TaskId};
use crate::{Owner, TaskPriority};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SECOND: Duration = Duration::from_secs(1);

/// Entry of the ready heap.
struct Scheduled {
    due: u64,
    deferred: u32,
    seq: u64,
    task: Arc<Task>,
}

impl Scheduled {
    fn key(&self) -> (u64, u32, u64) {
        (self.due, self.deferred, self.seq)
    }
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key().cmp(&other.key())
    }
}

/// State reachable from producers, workers and the loop thread.
struct Shared {
    epoch: Instant,
    active: AtomicBool,
    overloaded: AtomicBool,
    next_id: AtomicU64,
    next_seq: AtomicU64,
    dirty: SegQueue<Scheduled>,
    pending: DashMap<TaskId, Arc<Task>>,
}

impl Shared {
    fn now(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn submit(&self, task: Arc<Task>, delay: u64) {
        let entry = Scheduled {
            due: self.now().saturating_add(delay),
            deferred: task.priority().deferred_time(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            task,
        };
        self.dirty.push(entry);
    }

    fn forget(&self, task: &Task) {
        self.pending.remove(&task.id());
    }

    /// Runs a popped task and re-submits it if it repeats and is still alive.
    fn execute(&self, task: Arc<Task>) {
        task.execute();
        match task.period() {
            Some(period) if task.is_alive() => self.submit(task, period),
            _ => self.forget(&task),
        }
    }
}

/// Cooperative, tick driven task scheduler.
///
/// `run` blocks the calling thread until `stop` is called from elsewhere;
/// the engine gives it a dedicated thread. Everything else is safe to call
/// from any thread at any time, including before `run`.
pub struct Scheduler {
    shared: Arc<Shared>,
    desired_ticks: u32,
    workers: ThreadPool,
}

impl Scheduler {
    /// Creates a scheduler aiming for `desired_ticks` loop iterations per
    /// second, with `workers` threads for asynchronous tasks (0 picks the
    /// number of CPUs).
    pub fn new(desired_ticks: u32, workers: usize) -> Result<Self, SchedulerError> {
        let threads = if workers == 0 { num_cpus::get() } else { workers };
        let workers = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("aom-worker-{index}"))
            .build()
            .map_err(|e| SchedulerError::WorkerPool(e.to_string()))?;

        Ok(Self {
            shared: Arc::new(Shared {
                epoch: Instant::now(),
                active: AtomicBool::new(false),
                overloaded: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                next_seq: AtomicU64::new(0),
                dirty: SegQueue::new(),
                pending: DashMap::new(),
            }),
            desired_ticks: desired_ticks.max(1),
            workers,
        })
    }

    /// Runs the tick loop on the calling thread until [`Scheduler::stop`].
    ///
    /// Fails immediately if the loop is already running. When the loop exits
    /// both queues are cleared and every pending task is released.
    pub fn run(&self) -> Result<(), SchedulerError> {
        if self.shared.active.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyStarted);
        }
        info!("⏱️ Scheduler started at {} ticks per second", self.desired_ticks);

        let frame = SECOND / self.desired_ticks;
        let mut ready: BinaryHeap<Reverse<Scheduled>> = BinaryHeap::new();
        let mut batch: VecDeque<Arc<Task>> = VecDeque::new();
        let mut postponed: Vec<Scheduled> = Vec::new();
        let mut iterations: u32 = 0;
        let mut second_started = Instant::now();
        let mut next_frame = Instant::now();

        while self.shared.active.load(Ordering::Acquire) {
            while let Some(entry) = self.shared.dirty.pop() {
                if entry.task.is_alive() {
                    ready.push(Reverse(entry));
                } else {
                    self.shared.forget(&entry.task);
                }
            }

            let now = self.shared.now();
            let overloaded = self.shared.overloaded.load(Ordering::Relaxed);
            while ready.peek().is_some_and(|Reverse(entry)| entry.due <= now) {
                let Some(Reverse(entry)) = ready.pop() else {
                    break;
                };
                if !entry.task.is_alive() {
                    self.shared.forget(&entry.task);
                    continue;
                }
                if entry.task.is_asynchronous() {
                    let shared = Arc::clone(&self.shared);
                    self.workers.spawn(move || shared.execute(entry.task));
                } else if overloaded && is_deferrable(&entry, now) {
                    postponed.push(entry);
                } else {
                    batch.push_back(entry.task);
                }
            }
            ready.extend(postponed.drain(..).map(Reverse));

            while let Some(task) = batch.pop_front() {
                self.shared.execute(task);
            }

            iterations += 1;
            if second_started.elapsed() >= SECOND {
                let now_overloaded = is_overloaded_after(iterations, self.desired_ticks);
                let was_overloaded = self.shared.overloaded.swap(now_overloaded, Ordering::Relaxed);
                if now_overloaded && !was_overloaded {
                    warn!(
                        "🐢 Scheduler overloaded: {} of {} ticks in the last second",
                        iterations, self.desired_ticks
                    );
                } else if !now_overloaded && was_overloaded {
                    info!("✅ Scheduler recovered from overload");
                }
                iterations = 0;
                second_started = Instant::now();
                let shared = &self.shared;
                ready.retain(|Reverse(entry)| {
                    let alive = entry.task.is_alive();
                    if !alive {
                        shared.forget(&entry.task);
                    }
                    alive
                });
            }

            next_frame += frame;
            let current = Instant::now();
            if next_frame > current {
                thread::sleep(next_frame - current);
            } else if current - next_frame > SECOND {
                // Too far behind to catch up; restart pacing from here.
                next_frame = current;
            }
        }

        ready.clear();
        while self.shared.dirty.pop().is_some() {}
        self.shared.pending.clear();
        self.shared.overloaded.store(false, Ordering::Relaxed);
        info!("⏹️ Scheduler stopped");
        Ok(())
    }

    /// Asks the loop to exit after the current iteration.
    pub fn stop(&self) -> Result<(), SchedulerError> {
        if !self.shared.active.swap(false, Ordering::AcqRel) {
            return Err(SchedulerError::NotStarted);
        }
        debug!("Scheduler stop requested");
        Ok(())
    }

    /// Submits a task. Always succeeds and never runs the body inline.
    ///
    /// `delay` and `period` are in ticks. A `period` of `None` makes a
    /// one-shot task; `Some(p)` repeats every `p` ticks after completion.
    pub fn invoke<F>(
        &self,
        owner: Owner,
        priority: TaskPriority,
        delay: u64,
        period: Option<u64>,
        asynchronous: bool,
        callback: F,
    ) -> Arc<Task>
    where
        F: FnMut(&Task) + Send + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: TaskCallback = Box::new(callback);
        let task = Arc::new(Task::new(id, owner, priority, asynchronous, period, callback));
        self.shared.pending.insert(id, Arc::clone(&task));
        self.shared.submit(Arc::clone(&task), delay);
        task
    }

    /// One-shot task on the loop thread.
    pub fn invoke_sync<F>(&self, owner: Owner, priority: TaskPriority, delay: u64, callback: F) -> Arc<Task>
    where
        F: FnMut(&Task) + Send + 'static,
    {
        self.invoke(owner, priority, delay, None, false, callback)
    }

    /// One-shot task on the worker pool.
    pub fn invoke_async<F>(&self, owner: Owner, priority: TaskPriority, delay: u64, callback: F) -> Arc<Task>
    where
        F: FnMut(&Task) + Send + 'static,
    {
        self.invoke(owner, priority, delay, None, true, callback)
    }

    /// Repeating task on the loop thread.
    pub fn invoke_repeating<F>(
        &self,
        owner: Owner,
        priority: TaskPriority,
        delay: u64,
        period: u64,
        callback: F,
    ) -> Arc<Task>
    where
        F: FnMut(&Task) + Send + 'static,
    {
        self.invoke(owner, priority, delay, Some(period), false, callback)
    }

    pub fn cancel_task(&self, task: &Task) {
        task.cancel();
        self.shared.forget(task);
    }

    /// Cancels every pending task registered under `owner`.
    pub fn cancel_all_tasks_by(&self, owner: &Owner) {
        self.shared.pending.retain(|_, task| {
            if task.owner() == owner {
                task.cancel();
                false
            } else {
                true
            }
        });
    }

    pub fn cancel_all_tasks(&self) {
        self.shared.pending.retain(|_, task| {
            task.cancel();
            false
        });
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn is_overloaded(&self) -> bool {
        self.shared.overloaded.load(Ordering::Relaxed)
    }

    pub fn desired_ticks(&self) -> u32 {
        self.desired_ticks
    }

    /// Milliseconds elapsed since the scheduler was created.
    pub fn current_tick(&self) -> u64 {
        self.shared.now()
    }

    /// Number of live tasks that are queued or about to be re-submitted.
    pub fn pending_tasks(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn is_pending(&self, id: TaskId) -> bool {
        self.shared.pending.contains_key(&id)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("desired_ticks", &self.desired_ticks)
            .field("active", &self.is_active())
            .field("overloaded", &self.is_overloaded())
            .field("pending", &self.pending_tasks())
            .finish()
    }
}

/// A second with fewer iterations than the target, allowing one for jitter.
fn is_overloaded_after(iterations: u32, desired_ticks: u32) -> bool {
    iterations + 1 < desired_ticks
}

/// Whether a due task may still wait while overloaded. Critical tasks never do.
fn is_deferrable(entry: &Scheduled, now: u64) -> bool {
    now.saturating_sub(entry.due) < u64::from(entry.deferred)
}
