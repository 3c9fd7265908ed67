//! Serial executor: confines state to one worker thread.
//!
//! Every job submitted to a [`SerialExecutor`] runs on the same dedicated
//! thread, in submission order, with exclusive access to the state. Callers
//! block until their job finishes, which gives them synchronous,
//! serializable semantics without locks around the state.

use crate::error::{Error, Result};
use std::{
    sync::{mpsc, Mutex},
    thread::{self, JoinHandle},
};

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Single-worker FIFO executor owning a piece of state.
pub struct SerialExecutor<S> {
    sender: Mutex<Option<mpsc::Sender<Job<S>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Send + 'static> SerialExecutor<S> {
    /// Start the worker thread with its state.
    pub fn spawn(name: &str, mut state: S) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job<S>>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in receiver {
                    job(&mut state);
                }
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Run a job on the worker and wait for its result.
    ///
    /// Must not be called from inside a job of the same executor.
    pub fn execute_and_wait<R, F>(&self, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (reply, result) = mpsc::sync_channel(1);
        let job: Job<S> = Box::new(move |state| {
            let _ = reply.send(job(state));
        });

        {
            let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
            let sender = sender
                .as_ref()
                .ok_or_else(|| Error::StoreUnavailable("executor is shut down".into()))?;
            sender
                .send(job)
                .map_err(|_| Error::StoreUnavailable("executor worker stopped".into()))?;
        }

        result
            .recv()
            .map_err(|_| Error::StoreUnavailable("job did not complete".into()))
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = worker {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

/// Run a blocking job, such as a store call, off the async worker threads.
pub async fn run_blocking<R, F>(job: F) -> Result<R>
where
    R: Send + 'static,
    F: FnOnce() -> Result<R> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| Error::StoreUnavailable(format!("blocking job failed: {e}")))?
}

impl<S> Drop for SerialExecutor<S> {
    fn drop(&mut self) {
        let sender = self.sender.get_mut().unwrap_or_else(|e| e.into_inner());
        sender.take();
        let worker = self.worker.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(worker) = worker.take() {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}
