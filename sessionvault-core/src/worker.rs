/*!
Single-worker serial queue for blocking payload work.

All disk and cipher work for one logical store goes through one
[`SerialWorker`]. Jobs run strictly one after another on tokio's blocking
pool, so persist, restore, and delete for the same payload never overlap and
the caller's task is never blocked on I/O.
*/

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::{PersistError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a serial background queue
///
/// Dropping the last handle closes the queue; jobs already submitted still run.
#[derive(Debug)]
pub struct SerialWorker {
    name: String,
    sender: mpsc::UnboundedSender<Job>,
}

impl SerialWorker {
    /// Start a worker on the current tokio runtime
    ///
    /// # Errors
    /// `PersistError::Worker` when called outside a tokio runtime
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| PersistError::worker(format!("no tokio runtime available: {e}")))?;
        Ok(Self::spawn_on(&handle, name))
    }

    /// Start a worker on an explicit runtime handle
    pub fn spawn_on(handle: &Handle, name: impl Into<String>) -> Self {
        let name = name.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        let worker_name = name.clone();
        let blocking = handle.clone();
        handle.spawn(async move {
            while let Some(job) = receiver.recv().await {
                if let Err(e) = blocking.spawn_blocking(job).await {
                    error!(worker = %worker_name, error = %e, "Background job panicked");
                }
            }
            debug!(worker = %worker_name, "Serial worker stopped");
        });

        Self { name, sender }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `job` behind everything submitted earlier
    ///
    /// The returned receiver resolves with the job's result once it has run.
    /// If the job panics the receiver resolves with an error instead.
    pub fn submit<F, T>(&self, job: F) -> Result<oneshot::Receiver<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let boxed: Job = Box::new(move || {
            // The submitter may have stopped waiting; the job still counts as done
            let _ = tx.send(job());
        });
        self.sender
            .send(boxed)
            .map_err(|_| PersistError::worker(format!("worker '{}' has shut down", self.name)))?;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let worker = SerialWorker::spawn("test").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut receivers = Vec::new();
        for i in 0..5 {
            let log = Arc::clone(&log);
            receivers.push(
                worker
                    .submit(move || {
                        // Earlier jobs sleep longer; order must still hold
                        std::thread::sleep(Duration::from_millis(5 * (5 - i)));
                        log.lock().unwrap().push(i);
                        i
                    })
                    .unwrap(),
            );
        }

        for (i, rx) in receivers.into_iter().enumerate() {
            assert_eq!(rx.await.unwrap(), i as u64);
        }
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_worker() {
        let worker = SerialWorker::spawn("test").unwrap();

        let failed = worker.submit(|| -> u8 { panic!("boom") }).unwrap();
        assert!(failed.await.is_err());

        let ok = worker.submit(|| 7u8).unwrap();
        assert_eq!(ok.await.unwrap(), 7);
    }

    #[test]
    fn test_spawn_outside_runtime_fails() {
        let result = SerialWorker::spawn("test");
        assert!(matches!(result, Err(PersistError::Worker(_))));
    }
}
