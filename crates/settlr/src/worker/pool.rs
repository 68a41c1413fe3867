use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError, TrySendError};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::job::SettlementJob;
use crate::worker::processor::SettlementProcessor;

/// Default number of workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default capacity of the shared job queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// The pool-wide stop signal is the disconnection of a channel nobody sends on.
fn stop_requested(stop: &Receiver<()>) -> bool {
    !matches!(stop.try_recv(), Err(TryRecvError::Empty))
}

/// Cloneable handle for enqueueing job descriptors.
#[derive(Clone)]
pub struct JobSubmitter {
    sender: Sender<SettlementJob>,
    stop: Receiver<()>,
}

impl JobSubmitter {
    /// Enqueues without blocking. A full queue hands the descriptor back.
    pub fn try_submit(&self, job: SettlementJob) -> Result<(), TrySendError<SettlementJob>> {
        if stop_requested(&self.stop) {
            return Err(TrySendError::Disconnected(job));
        }
        self.sender.try_send(job)
    }

    /// Blocks until the descriptor is queued or the pool stops.
    pub fn submit(&self, job: SettlementJob) -> Result<(), WorkerError> {
        if stop_requested(&self.stop) {
            return Err(WorkerError::ChannelClosed);
        }
        select! {
            send(self.sender, job) -> res => res.map_err(|_| WorkerError::ChannelClosed),
            recv(self.stop) -> _ => Err(WorkerError::ChannelClosed),
        }
    }
}

/// Fixed set of worker threads sharing one bounded job queue.
///
/// Workers run each job to a terminal status before taking the next one.
/// Stopping the pool makes running jobs finish at their next page boundary
/// (finalized FAILED) and leaves undequeued descriptors QUEUED.
pub struct WorkerPool {
    processor: SettlementProcessor,
    worker_count: usize,
    job_sender: Sender<SettlementJob>,
    job_receiver: Receiver<SettlementJob>,
    stop_sender: Mutex<Option<Sender<()>>>,
    stop_receiver: Receiver<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl WorkerPool {
    pub fn new(processor: SettlementProcessor, worker_count: usize, queue_capacity: usize) -> Self {
        let (job_sender, job_receiver) = bounded::<SettlementJob>(queue_capacity.max(1));
        let (stop_sender, stop_receiver) = bounded::<()>(0);

        Self {
            processor,
            worker_count: worker_count.max(1),
            job_sender,
            job_receiver,
            stop_sender: Mutex::new(Some(stop_sender)),
            stop_receiver,
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Descriptors waiting in the queue.
    pub fn queued(&self) -> usize {
        self.job_receiver.len()
    }

    pub fn submitter(&self) -> JobSubmitter {
        JobSubmitter {
            sender: self.job_sender.clone(),
            stop: self.stop_receiver.clone(),
        }
    }

    /// Blocking enqueue; a full queue applies backpressure to the caller.
    pub fn add_job(&self, job: SettlementJob) -> Result<(), WorkerError> {
        self.submitter().submit(job)
    }

    /// Spawns the worker threads. May only be called once.
    pub fn start(&self) -> Result<(), WorkerError> {
        if self.is_stopped() {
            return Err(WorkerError::ChannelClosed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyStarted);
        }

        let mut workers = lock_recovering(&self.workers);
        for worker_id in 0..self.worker_count {
            let job_rx = self.job_receiver.clone();
            let stop_rx = self.stop_receiver.clone();
            let processor = self.processor.clone();

            let handle = thread::Builder::new()
                .name(format!("settlr-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, job_rx, stop_rx, processor))
                .map_err(WorkerError::SpawnFailed)?;
            workers.push(handle);
        }

        info!("Started {} workers", self.worker_count);
        Ok(())
    }

    /// Signals every worker to stop. Idempotent.
    pub fn stop(&self) {
        if lock_recovering(&self.stop_sender).take().is_some() {
            info!("Shutting down worker pool...");
        }
    }

    pub fn is_stopped(&self) -> bool {
        stop_requested(&self.stop_receiver)
    }

    /// Joins all worker threads. Returns once every worker has exited.
    pub fn wait(&self) {
        let workers: Vec<JoinHandle<()>> = lock_recovering(&self.workers).drain(..).collect();
        if workers.is_empty() {
            return;
        }
        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
        self.wait();
    }
}

fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("Worker pool lock poisoned, recovering");
        poisoned.into_inner()
    })
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<SettlementJob>,
    stop: Receiver<()>,
    processor: SettlementProcessor,
) {
    debug!("Worker {} started", worker_id);

    loop {
        select! {
            recv(job_receiver) -> msg => match msg {
                Ok(job) => {
                    if stop_requested(&stop) {
                        info!("Worker {} leaving job {} queued at shutdown", worker_id, job.id);
                        break;
                    }
                    info!("Worker {} picked up job {}", worker_id, job.id);
                    let outcome = processor.process(&job, &|| stop_requested(&stop));
                    debug!("Worker {} finished job {}: {:?}", worker_id, job.id, outcome);
                }
                Err(_) => {
                    debug!("Worker {} job channel disconnected", worker_id);
                    break;
                }
            },
            recv(stop) -> _ => {
                debug!("Worker {} received shutdown signal", worker_id);
                break;
            }
        }
    }

    info!("Worker {} stopped", worker_id);
}
