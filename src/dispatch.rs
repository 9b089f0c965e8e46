//! Background execution of pool work.
//!
//! A [`Dispatcher`] owns a multi-thread runtime with one worker per pool
//! slot and a semaphore with as many permits, so no more units than
//! connections ever run at once. A submitted unit yields either a
//! [`Pending`] value or, with [`Dispatcher::submit_with`], a callback that
//! is posted to a [`CompletionContext`] once the unit is done.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{Semaphore, mpsc, oneshot};

/// Completion job handed to a [`CompletionContext`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The unit panicked or the dispatcher shut down before it finished.
    #[error("worker stopped before completing the unit of work")]
    WorkerLost,
}

/// Where completion callbacks run.
pub trait CompletionContext: Send + 'static {
    fn post(&self, job: Job);
}

/// Runs callbacks right away on the worker that finished the unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl CompletionContext for Inline {
    fn post(&self, job: Job) {
        job();
    }
}

/// Sending side of a [`CompletionQueue`].
#[derive(Clone)]
pub struct CompletionSender {
    sender: mpsc::UnboundedSender<Job>,
}

impl CompletionContext for CompletionSender {
    fn post(&self, job: Job) {
        if self.sender.send(job).is_err() {
            tracing::warn!("Completion queue is gone, dropping callback.");
        }
    }
}

impl std::fmt::Debug for CompletionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSender")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

/// Callbacks waiting to run on the thread that owns the queue.
pub struct CompletionQueue {
    receiver: mpsc::UnboundedReceiver<Job>,
}

impl CompletionQueue {
    pub fn channel() -> (CompletionSender, CompletionQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (CompletionSender { sender }, CompletionQueue { receiver })
    }

    /// Run every callback already queued. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.receiver.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Wait for one callback and run it. `false` once every sender is gone.
    ///
    /// # Panics
    ///
    /// When called from inside an async runtime.
    pub fn run_next_blocking(&mut self) -> bool {
        match self.receiver.blocking_recv() {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    pub async fn run_next(&mut self) -> bool {
        match self.receiver.recv().await {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }
}

/// Result of a submitted unit.
///
/// Await it from async code or [`Pending::wait`] from a plain thread.
pub struct Pending<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> Pending<T> {
    /// Block the current thread until the unit is done.
    ///
    /// # Panics
    ///
    /// When called from inside an async runtime.
    pub fn wait(self) -> Result<T, DispatchError> {
        self.receiver
            .blocking_recv()
            .map_err(|_| DispatchError::WorkerLost)
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map_err(|_| DispatchError::WorkerLost)
    }
}

/// Bounded worker pool.
pub struct Dispatcher {
    runtime: Option<Runtime>,
    handle: Handle,
    permits: Arc<Semaphore>,
    size: usize,
}

impl Dispatcher {
    /// Start `size` workers.
    pub fn new(size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "dispatcher needs at least one worker",
            ));
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(size)
            .thread_name("dbpool-worker")
            .enable_all()
            .build()?;

        tracing::debug!("Started {} workers.", size);

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            permits: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers free to take a unit right now.
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `work` on a worker.
    pub fn submit<Fut>(&self, work: Fut) -> Pending<Fut::Output>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        self.spawn_unit(work, move |output| {
            // The receiver may be gone; the result is simply dropped.
            let _ = sender.send(output);
        });
        Pending { receiver }
    }

    /// Run `work` on a worker, then post `callback` with its output to
    /// `context`. The callback is posted once; a unit that panics posts
    /// nothing.
    pub fn submit_with<Fut, C, F>(&self, work: Fut, context: C, callback: F)
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
        C: CompletionContext,
        F: FnOnce(Fut::Output) + Send + 'static,
    {
        self.spawn_unit(work, move |output| {
            context.post(Box::new(move || callback(output)));
        });
    }

    /// Drive `future` to completion on this dispatcher's runtime from a
    /// plain thread.
    ///
    /// # Panics
    ///
    /// When called from inside an async runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    /// Run `work` under a permit, then hand its output to `deliver`.
    ///
    /// The permit is released before delivery, so a caller woken by the
    /// output already sees the worker as idle.
    fn spawn_unit<Fut, D>(&self, work: Fut, deliver: D)
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
        D: FnOnce(Fut::Output) + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.handle.spawn(async move {
            let Ok(permit) = permits.acquire_owned().await else {
                return;
            };
            let output = work.await;
            drop(permit);
            deliver(output);
        });
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("size", &self.size)
            .field("idle_workers", &self.idle_workers())
            .finish()
    }
}
