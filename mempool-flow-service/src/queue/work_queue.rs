use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// The single processing function a [`WorkQueue`] applies to every job.
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    type Job: Send + 'static;
    type Output: Send + 'static;
    type Error: Send + 'static;

    async fn process(&self, job: Self::Job) -> Result<Self::Output, Self::Error>;
}

/// Errors raised when submitting to the queue
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("work queue is not running")]
    Closed,
}

/// Ways a submitted job can fail to produce an output
#[derive(Error, Debug)]
pub enum JobError<E> {
    #[error("job failed: {0}")]
    Failed(E),

    #[error("job panicked: {0}")]
    Panicked(String),

    #[error("job cancelled before completion")]
    Cancelled,
}

type JobResult<P> = Result<<P as JobProcessor>::Output, JobError<<P as JobProcessor>::Error>>;
type Envelope<P> = (<P as JobProcessor>::Job, oneshot::Sender<JobResult<P>>);
type SharedReceiver<P> = Arc<tokio::sync::Mutex<mpsc::Receiver<Envelope<P>>>>;

/// Completion handle for one enqueued job.
///
/// Resolves exactly once: with the processor's output, its error, or
/// [`JobError::Cancelled`] if the queue stopped before the job finished.
pub struct JobHandle<T, E> {
    receiver: oneshot::Receiver<Result<T, JobError<E>>>,
}

impl<T, E> JobHandle<T, E> {
    /// Waits for the job to finish
    pub async fn join(self) -> Result<T, JobError<E>> {
        self.await
    }
}

impl<T, E> Future for JobHandle<T, E> {
    type Output = Result<T, JobError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(JobError::Cancelled)))
    }
}

struct QueueState<P: JobProcessor> {
    sender: Option<mpsc::Sender<Envelope<P>>>,
    workers: Vec<JoinHandle<()>>,
}

/// Asynchronous work queue running a fixed pool of workers that apply one
/// processor to every enqueued job.
///
/// Jobs are dequeued in FIFO order from a bounded channel; `enqueue` waits
/// while the channel is full. Completion order is not guaranteed.
pub struct WorkQueue<P: JobProcessor> {
    processor: Arc<P>,
    capacity: usize,
    worker_count: usize,
    state: Mutex<QueueState<P>>,
}

impl<P: JobProcessor> WorkQueue<P> {
    /// Creates a stopped queue. Call [`WorkQueue::start`] before enqueueing.
    pub fn new(processor: P, capacity: usize, worker_count: usize) -> Self {
        Self {
            processor: Arc::new(processor),
            capacity: capacity.max(1),
            worker_count: worker_count.max(1),
            state: Mutex::new(QueueState {
                sender: None,
                workers: Vec::new(),
            }),
        }
    }

    /// Starts all workers. Does nothing if already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut state = self.lock_state();
        if state.sender.is_some() {
            return;
        }

        let (sender, receiver) = mpsc::channel(self.capacity);
        let receiver: SharedReceiver<P> = Arc::new(tokio::sync::Mutex::new(receiver));

        state.workers = (0..self.worker_count)
            .map(|worker_id| {
                tokio::spawn(Self::work(
                    worker_id,
                    Arc::clone(&self.processor),
                    Arc::clone(&receiver),
                ))
            })
            .collect();
        state.sender = Some(sender);

        info!(
            "Work queue started with {} workers (capacity {})",
            self.worker_count, self.capacity
        );
    }

    /// Stops all workers.
    ///
    /// Running and still-queued jobs resolve as [`JobError::Cancelled`];
    /// later calls to [`WorkQueue::enqueue`] fail with [`QueueError::Closed`].
    pub async fn stop(&self) {
        let workers = {
            let mut state = self.lock_state();
            state.sender = None;
            std::mem::take(&mut state.workers)
        };

        for worker in &workers {
            worker.abort();
        }
        for worker in workers {
            // Aborted workers report a cancellation error, which is the expected outcome
            let _ = worker.await;
        }

        debug!("Work queue stopped");
    }

    /// Returns true if the workers are currently running.
    pub fn is_running(&self) -> bool {
        self.lock_state().sender.is_some()
    }

    /// Enqueues a job, waiting while the queue is full.
    ///
    /// Returns a handle to await the job's result later.
    pub async fn enqueue(
        &self,
        job: P::Job,
    ) -> Result<JobHandle<P::Output, P::Error>, QueueError> {
        let sender = self.lock_state().sender.clone().ok_or(QueueError::Closed)?;
        let (reply, receiver) = oneshot::channel();

        sender
            .send((job, reply))
            .await
            .map_err(|_| QueueError::Closed)?;

        Ok(JobHandle { receiver })
    }

    /// Processing loop of a worker.
    async fn work(worker_id: usize, processor: Arc<P>, receiver: SharedReceiver<P>) {
        loop {
            let next = receiver.lock().await.recv().await;
            let Some((job, reply)) = next else {
                break;
            };

            let outcome = match AssertUnwindSafe(processor.process(job)).catch_unwind().await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(JobError::Failed(e)),
                Err(panic) => Err(JobError::Panicked(panic_message(panic.as_ref()))),
            };

            if reply.send(outcome).is_err() {
                debug!(worker_id, "Job handle dropped before completion");
            }
        }

        debug!(worker_id, "Worker exiting, queue closed");
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P: JobProcessor> Drop for WorkQueue<P> {
    fn drop(&mut self) {
        for worker in &self.lock_state().workers {
            worker.abort();
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};
    use tokio::time::timeout;

    /// Doubles numbers, fails on negatives, panics on zero
    struct Doubler;

    #[async_trait]
    impl JobProcessor for Doubler {
        type Job = i64;
        type Output = i64;
        type Error = String;

        async fn process(&self, job: i64) -> Result<i64, String> {
            if job == 0 {
                panic!("zero is not allowed");
            }
            if job < 0 {
                return Err(format!("negative input {job}"));
            }
            Ok(job * 2)
        }
    }

    /// Records every job, signals when it starts, and waits for a permit before finishing
    struct Gated {
        started: Arc<Notify>,
        gate: Arc<Semaphore>,
        seen: Arc<Mutex<Vec<u32>>>,
    }

    #[async_trait]
    impl JobProcessor for Gated {
        type Job = u32;
        type Output = u32;
        type Error = ();

        async fn process(&self, job: u32) -> Result<u32, ()> {
            self.seen.lock().unwrap().push(job);
            self.started.notify_one();
            let _permit = self.gate.acquire().await.map_err(|_| ())?;
            Ok(job)
        }
    }

    type GatedQueue = (WorkQueue<Gated>, Arc<Notify>, Arc<Semaphore>, Arc<Mutex<Vec<u32>>>);

    fn gated(workers: usize, capacity: usize) -> GatedQueue {
        let started = Arc::new(Notify::new());
        let gate = Arc::new(Semaphore::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let queue = WorkQueue::new(
            Gated {
                started: Arc::clone(&started),
                gate: Arc::clone(&gate),
                seen: Arc::clone(&seen),
            },
            capacity,
            workers,
        );
        (queue, started, gate, seen)
    }

    #[tokio::test]
    async fn test_jobs_resolve_with_output() {
        let queue = WorkQueue::new(Doubler, 10, 4);
        queue.start();

        let mut handles = Vec::new();
        for i in 1..=20 {
            handles.push(queue.enqueue(i).await.unwrap());
        }
        for (i, handle) in (1..=20).zip(handles) {
            assert_eq!(handle.join().await.unwrap(), i * 2);
        }

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_processor_error_is_delivered() {
        let queue = WorkQueue::new(Doubler, 10, 2);
        queue.start();

        let handle = queue.enqueue(-3).await.unwrap();
        match handle.await {
            Err(JobError::Failed(message)) => assert_eq!(message, "negative input -3"),
            other => panic!("unexpected result: {other:?}"),
        }

        // The worker survives and keeps processing
        assert_eq!(queue.enqueue(4).await.unwrap().await.unwrap(), 8);
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        let queue = WorkQueue::new(Doubler, 10, 1);
        queue.start();

        let handle = queue.enqueue(0).await.unwrap();
        match handle.await {
            Err(JobError::Panicked(message)) => assert!(message.contains("zero")),
            other => panic!("unexpected result: {other:?}"),
        }

        assert_eq!(queue.enqueue(5).await.unwrap().await.unwrap(), 10);
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_enqueue_blocks_when_full() {
        let (queue, started, gate, _) = gated(1, 1);
        queue.start();

        // The only worker picks up job 1 and waits on the gate
        let first = queue.enqueue(1).await.unwrap();
        started.notified().await;

        // Job 2 fills the channel, job 3 has to wait
        let second = queue.enqueue(2).await.unwrap();
        assert!(timeout(Duration::from_millis(50), queue.enqueue(3)).await.is_err());

        gate.add_permits(10);
        assert_eq!(first.await.unwrap(), 1);
        assert_eq!(second.await.unwrap(), 2);
        assert_eq!(queue.enqueue(3).await.unwrap().await.unwrap(), 3);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_fifo_dequeue_order() {
        let (queue, _, gate, seen) = gated(1, 100);
        gate.add_permits(1_000);
        queue.start();

        let mut handles = Vec::new();
        for i in 0..50 {
            handles.push(queue.enqueue(i).await.unwrap());
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_stop_cancels_running_and_queued_jobs() {
        let (queue, started, _gate, _) = gated(1, 10);
        queue.start();

        let running = queue.enqueue(1).await.unwrap();
        started.notified().await;
        let queued = queue.enqueue(2).await.unwrap();

        queue.stop().await;

        assert!(matches!(running.await, Err(JobError::Cancelled)));
        assert!(matches!(queued.await, Err(JobError::Cancelled)));
        assert!(!queue.is_running());
        assert!(matches!(queue.enqueue(3).await, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn test_enqueue_before_start_fails() {
        let queue = WorkQueue::new(Doubler, 10, 1);
        assert!(matches!(queue.enqueue(1).await, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let queue = WorkQueue::new(Doubler, 10, 2);
        queue.start();
        queue.stop().await;

        queue.start();
        assert!(queue.is_running());
        assert_eq!(queue.enqueue(21).await.unwrap().await.unwrap(), 42);
        queue.stop().await;
    }
}
