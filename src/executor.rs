//! Single-worker FIFO task executor.
//!
//! Every task submitted to an [`Executor`] runs on one dedicated thread, in
//! arrival order, one at a time. State touched only from inside tasks needs
//! no further coordination: the queue is the mutual exclusion.

use crate::error::{Result, TimeoutError};
use crossbeam_channel::{Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

/// Handle to the result of a task submitted with [`Executor::submit`].
#[must_use = "a task handle does nothing unless waited on"]
pub struct TaskHandle<T> {
    inner: HandleInner<T>,
}

enum HandleInner<T> {
    Ready(T),
    Pending(Receiver<T>),
}

impl<T> TaskHandle<T> {
    /// Block until the task has run and return its value.
    ///
    /// # Errors
    ///
    /// Returns [`TimeoutError::TaskDropped`] if the task panicked or was
    /// discarded by a shutdown before it ran.
    pub fn wait(self) -> Result<T> {
        match self.inner {
            HandleInner::Ready(value) => Ok(value),
            HandleInner::Pending(rx) => rx.recv().map_err(|_| TimeoutError::TaskDropped),
        }
    }
}

/// A FIFO task runner backed by one named worker thread.
pub struct Executor {
    name: String,
    tx: Sender<Message>,
    worker_thread: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl Executor {
    /// Spawn the worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`TimeoutError::Spawn`] if the OS refuses to create the thread.
    pub fn new(thread_name: impl Into<String>) -> Result<Self> {
        let name = thread_name.into();
        let (tx, rx) = crossbeam_channel::unbounded::<Message>();
        let worker_name = name.clone();
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(&worker_name, &rx))
            .map_err(TimeoutError::Spawn)?;
        let worker_thread = worker.thread().id();

        Ok(Self {
            name,
            tx,
            worker_thread,
            worker: Mutex::new(Some(worker)),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Worker thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Whether the caller is running on this executor's worker thread.
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_thread
    }

    /// Queue a task and return a handle to its result.
    ///
    /// Called from the worker thread itself (i.e. from inside another task),
    /// the task runs inline and the handle is already complete. Waiting on a
    /// queued task from the worker would otherwise deadlock.
    ///
    /// # Errors
    ///
    /// Returns [`TimeoutError::ExecutorShutdown`] once shutdown has begun.
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shutdown() {
            return Err(TimeoutError::ExecutorShutdown);
        }
        if self.is_worker_thread() {
            return Ok(TaskHandle {
                inner: HandleInner::Ready(task()),
            });
        }

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.enqueue(Box::new(move || {
            let _ = reply_tx.send(task());
        }))?;
        Ok(TaskHandle {
            inner: HandleInner::Pending(reply_rx),
        })
    }

    /// Queue a task without waiting for it.
    ///
    /// Unlike [`submit`](Self::submit) this always goes through the queue,
    /// even from the worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`TimeoutError::ExecutorShutdown`] once shutdown has begun.
    pub fn execute<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(TimeoutError::ExecutorShutdown);
        }
        self.enqueue(Box::new(task))
    }

    /// Stop accepting tasks, let already-queued tasks run, and join the worker.
    ///
    /// Idempotent. When called from the worker thread the join is skipped;
    /// the worker exits once the current task returns.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(executor = %self.name, "executor shutting down");
        let _ = self.tx.send(Message::Shutdown);

        if self.is_worker_thread() {
            return;
        }
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!(executor = %self.name, "executor worker exited abnormally");
            }
        }
    }

    fn enqueue(&self, job: Job) -> Result<()> {
        self.tx
            .send(Message::Run(job))
            .map_err(|_| TimeoutError::ExecutorShutdown)
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(name: &str, rx: &Receiver<Message>) {
    while let Ok(message) = rx.recv() {
        match message {
            Message::Run(job) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    error!(
                        executor = %name,
                        panic = %panic_message(payload.as_ref()),
                        "executor task panicked"
                    );
                }
            }
            Message::Shutdown => break,
        }
    }
    debug!(executor = %name, "executor worker stopped");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
