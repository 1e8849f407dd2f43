use super::observer::EventObserver;
use super::worker::PaymentWorker;
use crate::error::{PaymentError, Result};
use crate::queue::JobQueueRef;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Background consumers and observers for a set of queues.
///
/// Observers subscribe when the pool starts, so only events published
/// afterwards are seen.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<Result<()>>>,
    observers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `concurrency` workers and one observer per queue.
    pub fn start(
        worker: Arc<PaymentWorker>,
        observer: &EventObserver,
        queues: &[JobQueueRef],
        concurrency: usize,
    ) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let mut workers = Vec::new();
        let mut observers = Vec::new();

        for queue in queues {
            observers.push(tokio::spawn(
                observer.clone().run(queue.subscribe(), rx.clone()),
            ));
            for _ in 0..concurrency.max(1) {
                workers.push(tokio::spawn(
                    Arc::clone(&worker).run(Arc::clone(queue), rx.clone()),
                ));
            }
        }
        info!(queues = queues.len(), workers = workers.len(), "Worker pool started");

        Self {
            shutdown,
            workers,
            observers,
        }
    }

    /// Signals every task to stop and waits for them.
    ///
    /// A job already being handled finishes before its worker exits.
    pub async fn shutdown(self) -> Result<()> {
        // Err only when every receiver is gone, i.e. the tasks already ended.
        let _ = self.shutdown.send(true);

        let mut first_error = None;
        for handle in self.workers {
            let outcome = handle
                .await
                .map_err(|e| PaymentError::InternalProcessing(format!("Worker task panicked: {}", e)))
                .and_then(|result| result);
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        for handle in self.observers {
            if let Err(e) = handle.await {
                first_error.get_or_insert(PaymentError::InternalProcessing(format!(
                    "Observer task panicked: {}",
                    e
                )));
            }
        }
        info!("Worker pool stopped");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Polls the queues until none has waiting, delayed or active jobs.
pub async fn wait_until_drained(queues: &[JobQueueRef], poll: Duration) -> Result<()> {
    loop {
        let mut drained = true;
        for queue in queues {
            drained &= queue.counts().await?.is_drained();
        }
        if drained {
            return Ok(());
        }
        tokio::time::sleep(poll).await;
    }
}
