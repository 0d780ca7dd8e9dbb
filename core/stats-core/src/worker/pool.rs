//! FILENAME: core/stats-core/src/worker/pool.rs
//! Fixed-size worker pool with a bounded FIFO queue and crash supervision.
//!
//! Long-lived worker threads pull jobs from one shared bounded channel, so
//! dispatch order is FIFO and at most `max_workers` jobs run at once. Each
//! submission gets a `Ticket` resolving to that job's result; completion order
//! across workers is unordered.
//!
//! A panic inside the handler fails only the job that caused it. The worker
//! thread exits and the supervisor starts a replacement; jobs still queued
//! stay in the shared channel and are picked up by the remaining workers.
//!
//! Dropping the pool closes the queue, lets queued jobs drain and joins every
//! thread.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel as chan;

use crate::error::{EngineResult, WorkerError};
use crate::{log_debug, log_error, log_info, log_warn};

type Handler<J, R> = Arc<dyn Fn(J) -> R + Send + Sync + 'static>;
type Reply<R> = Result<R, WorkerError>;

struct Job<J, R> {
    payload: J,
    reply: chan::Sender<Reply<R>>,
    seq: u64,
}

/// Counters shared by the pool handle, the workers and the supervisor.
#[derive(Default)]
struct PoolShared {
    busy: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicU64,
    crashed: AtomicU64,
    restarts: AtomicU64,
    next_seq: AtomicU64,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_workers: usize,
    /// Jobs currently executing.
    pub busy: usize,
    /// Jobs waiting in the queue.
    pub queued: usize,
    pub completed: u64,
    pub crashed: u64,
    pub restarts: u64,
}

// ============================================================================
// TICKET
// ============================================================================

/// Pending result of one submitted job.
#[must_use = "a ticket does nothing unless waited on"]
pub struct Ticket<R> {
    receiver: chan::Receiver<Reply<R>>,
    seq: u64,
}

impl<R> Ticket<R> {
    /// Submission sequence number, increasing in submission order.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Blocks until the job finishes.
    pub fn wait(self) -> Result<R, WorkerError> {
        self.receiver
            .recv()
            .unwrap_or(Err(WorkerError::Disconnected))
    }

    /// Returns the result if the job already finished.
    pub fn try_wait(&self) -> Option<Result<R, WorkerError>> {
        match self.receiver.try_recv() {
            Ok(reply) => Some(reply),
            Err(chan::TryRecvError::Empty) => None,
            Err(chan::TryRecvError::Disconnected) => Some(Err(WorkerError::Disconnected)),
        }
    }
}

// ============================================================================
// POOL
// ============================================================================

pub struct WorkerPool<J: Send + 'static, R: Send + 'static> {
    max_workers: usize,
    job_tx: Option<chan::Sender<Job<J, R>>>,
    shutdown_tx: Option<chan::Sender<()>>,
    supervisor: Option<JoinHandle<()>>,
    shared: Arc<PoolShared>,
}

impl<J: Send + 'static, R: Send + 'static> WorkerPool<J, R> {
    /// Starts `max_workers` workers (at least one) behind a queue holding up
    /// to `queue_capacity` waiting jobs.
    pub fn new<F>(max_workers: usize, queue_capacity: usize, handler: F) -> EngineResult<Self>
    where
        F: Fn(J) -> R + Send + Sync + 'static,
    {
        let max_workers = max_workers.max(1);
        let handler: Handler<J, R> = Arc::new(handler);
        let shared = Arc::new(PoolShared::default());

        let (job_tx, job_rx) = chan::bounded::<Job<J, R>>(queue_capacity.max(1));
        let (crash_tx, crash_rx) = chan::unbounded::<usize>();
        let (shutdown_tx, shutdown_rx) = chan::bounded::<()>(0);

        let mut workers = Vec::with_capacity(max_workers);
        for id in 0..max_workers {
            let handle = spawn_worker(
                id,
                job_rx.clone(),
                Arc::clone(&handler),
                Arc::clone(&shared),
                crash_tx.clone(),
            )?;
            workers.push(Some(handle));
        }

        let supervisor = Supervisor {
            workers,
            job_rx,
            handler,
            shared: Arc::clone(&shared),
            crash_tx,
            crash_rx,
            shutdown_rx,
        };
        let supervisor = thread::Builder::new()
            .name("stats-supervisor".into())
            .spawn(move || supervisor.run())?;

        log_info!("POOL", "started {} worker(s), queue capacity {}", max_workers, queue_capacity);

        Ok(WorkerPool {
            max_workers,
            job_tx: Some(job_tx),
            shutdown_tx: Some(shutdown_tx),
            supervisor: Some(supervisor),
            shared,
        })
    }

    /// Queues a job. Blocks while the queue is full.
    pub fn submit(&self, payload: J) -> Result<Ticket<R>, WorkerError> {
        let job_tx = self.job_tx.as_ref().ok_or(WorkerError::Disconnected)?;
        let (reply, receiver) = chan::bounded(1);
        let seq = self.shared.next_seq.fetch_add(1, Ordering::SeqCst);

        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        if job_tx.send(Job { payload, reply, seq }).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(WorkerError::Disconnected);
        }

        Ok(Ticket { receiver, seq })
    }

    /// Submits every payload, then waits for all of them. Results are in
    /// submission order.
    pub fn run_all<I>(&self, payloads: I) -> Vec<Result<R, WorkerError>>
    where
        I: IntoIterator<Item = J>,
    {
        let tickets: Vec<Result<Ticket<R>, WorkerError>> =
            payloads.into_iter().map(|p| self.submit(p)).collect();
        tickets
            .into_iter()
            .map(|ticket| ticket.and_then(Ticket::wait))
            .collect()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_workers: self.max_workers,
            busy: self.shared.busy.load(Ordering::SeqCst),
            queued: self.shared.queued.load(Ordering::SeqCst),
            completed: self.shared.completed.load(Ordering::SeqCst),
            crashed: self.shared.crashed.load(Ordering::SeqCst),
            restarts: self.shared.restarts.load(Ordering::SeqCst),
        }
    }
}

impl<J: Send + 'static, R: Send + 'static> Drop for WorkerPool<J, R> {
    fn drop(&mut self) {
        // Closing the queue lets workers drain it and exit.
        self.job_tx.take();
        self.shutdown_tx.take();
        if let Some(handle) = self.supervisor.take() {
            if handle.join().is_err() {
                log_error!("POOL", "supervisor panicked during shutdown");
            }
        }
        log_debug!("POOL", "shut down");
    }
}

// ============================================================================
// WORKERS
// ============================================================================

fn spawn_worker<J: Send + 'static, R: Send + 'static>(
    id: usize,
    jobs: chan::Receiver<Job<J, R>>,
    handler: Handler<J, R>,
    shared: Arc<PoolShared>,
    crash_tx: chan::Sender<usize>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("stats-worker-{}", id))
        .spawn(move || worker_loop(id, jobs, handler, shared, crash_tx))
}

fn worker_loop<J, R>(
    id: usize,
    jobs: chan::Receiver<Job<J, R>>,
    handler: Handler<J, R>,
    shared: Arc<PoolShared>,
    crash_tx: chan::Sender<usize>,
) {
    for Job { payload, reply, seq } in jobs.iter() {
        shared.queued.fetch_sub(1, Ordering::SeqCst);
        shared.busy.fetch_add(1, Ordering::SeqCst);

        let result = panic::catch_unwind(AssertUnwindSafe(|| (handler)(payload)));

        shared.busy.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(value) => {
                shared.completed.fetch_add(1, Ordering::SeqCst);
                // The caller may have dropped its ticket.
                let _ = reply.send(Ok(value));
            }
            Err(panic) => {
                shared.crashed.fetch_add(1, Ordering::SeqCst);
                let message = panic_message(panic.as_ref());
                log_warn!("POOL", "worker {} crashed on job {}: {}", id, seq, message);
                let _ = reply.send(Err(WorkerError::Crashed { worker: id, message }));
                let _ = crash_tx.send(id);
                return;
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Restarts crashed workers until shutdown, then joins them all.
struct Supervisor<J: Send + 'static, R: Send + 'static> {
    workers: Vec<Option<JoinHandle<()>>>,
    job_rx: chan::Receiver<Job<J, R>>,
    handler: Handler<J, R>,
    shared: Arc<PoolShared>,
    crash_tx: chan::Sender<usize>,
    crash_rx: chan::Receiver<usize>,
    shutdown_rx: chan::Receiver<()>,
}

impl<J: Send + 'static, R: Send + 'static> Supervisor<J, R> {
    fn run(mut self) {
        let crash_rx = self.crash_rx.clone();
        let shutdown_rx = self.shutdown_rx.clone();
        loop {
            chan::select! {
                recv(crash_rx) -> msg => match msg {
                    Ok(id) => self.restart(id),
                    Err(_) => break,
                },
                recv(shutdown_rx) -> _ => break,
            }
        }

        for handle in self.workers.iter_mut().filter_map(Option::take) {
            let _ = handle.join();
        }
    }

    fn restart(&mut self, id: usize) {
        if let Some(old) = self.workers.get_mut(id).and_then(Option::take) {
            let _ = old.join();
        }

        match spawn_worker(
            id,
            self.job_rx.clone(),
            Arc::clone(&self.handler),
            Arc::clone(&self.shared),
            self.crash_tx.clone(),
        ) {
            Ok(handle) => {
                if let Some(slot) = self.workers.get_mut(id) {
                    *slot = Some(handle);
                }
                self.shared.restarts.fetch_add(1, Ordering::SeqCst);
                log_info!("POOL", "restarted worker {}", id);
            }
            Err(e) => log_error!("POOL", "failed to restart worker {}: {}", id, e),
        }
    }
}
