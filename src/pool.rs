//! Process-wide worker pools for write and delete traffic.
//!
//! The remote endpoints cap concurrent writes and deletes differently, so each
//! operation kind gets its own pool, created on first use and kept for the life
//! of the process. Callers may ask for less parallelism than a pool offers,
//! never more.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, OnceLock};
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, error};

/// Hard ceiling on concurrent upsert requests.
pub const MAX_WRITE_WORKERS: usize = 4;
/// Hard ceiling on concurrent delete requests.
pub const MAX_DELETE_WORKERS: usize = 2;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of named threads pulling jobs from a shared queue.
pub struct WorkerPool {
    name: &'static str,
    sender: Mutex<Sender<Job>>,
    workers: usize,
}

impl WorkerPool {
    /// Spawns up to `size` workers named `{name}-{n}`.
    ///
    /// Threads that fail to spawn are logged and skipped; a pool without any
    /// worker runs jobs on the submitting thread.
    pub fn new(name: &'static str, size: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = 0;
        for idx in 0..size.max(1) {
            let queue = Arc::clone(&receiver);
            let spawned = thread::Builder::new()
                .name(format!("{name}-{idx}"))
                .spawn(move || worker_loop(queue));
            match spawned {
                Ok(_) => workers += 1,
                Err(err) => error!(pool = name, %err, "failed to spawn worker thread"),
            }
        }
        debug!(pool = name, workers, "worker pool started");
        Self {
            name,
            sender: Mutex::new(sender),
            workers,
        }
    }

    /// Number of live worker threads.
    pub fn size(&self) -> usize {
        self.workers
    }

    /// Pool name, also the worker thread prefix.
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn submit(&self, job: Job) {
        if self.workers == 0 {
            job();
            return;
        }
        if let Err(mpsc::SendError(job)) = self.sender.lock().send(job) {
            error!(pool = self.name, "worker queue closed; running job inline");
            job();
        }
    }
}

fn worker_loop(queue: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = queue.lock().recv();
        match job {
            Ok(job) => {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("job panicked on worker thread");
                }
            }
            Err(_) => break,
        }
    }
}

/// Where the dispatcher runs its jobs.
#[derive(Clone, Copy)]
pub enum TaskExecutor {
    /// A shared bounded pool.
    Pool(&'static WorkerPool),
    /// The calling thread, one job at a time.
    Inline,
}

impl TaskExecutor {
    /// Runs `job` on the pool, or right away when inline.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        match self {
            TaskExecutor::Pool(pool) => pool.submit(Box::new(job)),
            TaskExecutor::Inline => job(),
        }
    }

    /// Most jobs this executor runs at once.
    pub fn ceiling(&self) -> usize {
        match self {
            TaskExecutor::Pool(pool) => pool.size().max(1),
            TaskExecutor::Inline => 1,
        }
    }

    /// Effective parallelism for a caller asking for `requested` workers.
    pub fn effective_workers(&self, requested: usize) -> usize {
        requested.clamp(1, self.ceiling())
    }
}

static CONCURRENCY_ENABLED: OnceLock<AtomicBool> = OnceLock::new();
static WRITE_POOL: OnceLock<WorkerPool> = OnceLock::new();
static DELETE_POOL: OnceLock<WorkerPool> = OnceLock::new();

fn concurrency_flag() -> &'static AtomicBool {
    CONCURRENCY_ENABLED
        .get_or_init(|| AtomicBool::new(std::env::var_os("GRAPHBULK_SEQUENTIAL").is_none()))
}

/// Whether calls use the worker pools (`false` runs everything inline).
pub fn concurrency_enabled() -> bool {
    concurrency_flag().load(Ordering::Relaxed)
}

/// Switches between pooled and inline execution for subsequent calls.
pub fn set_concurrency_enabled(enabled: bool) {
    concurrency_flag().store(enabled, Ordering::Relaxed);
}

/// Executor for upserts.
pub fn write_executor() -> TaskExecutor {
    if !concurrency_enabled() {
        return TaskExecutor::Inline;
    }
    TaskExecutor::Pool(
        WRITE_POOL.get_or_init(|| WorkerPool::new("graphbulk-write", MAX_WRITE_WORKERS)),
    )
}

/// Executor for deletes.
pub fn delete_executor() -> TaskExecutor {
    if !concurrency_enabled() {
        return TaskExecutor::Inline;
    }
    TaskExecutor::Pool(
        DELETE_POOL.get_or_init(|| WorkerPool::new("graphbulk-delete", MAX_DELETE_WORKERS)),
    )
}
