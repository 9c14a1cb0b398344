use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Serial callback queue.
///
/// Jobs run one at a time in submission order on a dedicated task. The
/// application creates one queue with UI affinity and hands clones of it to
/// every component that reports user-visible state.
#[derive(Clone)]
pub struct DispatchQueue {
    label: Arc<str>,
    sender: mpsc::UnboundedSender<Job>,
}

impl DispatchQueue {
    /// Spawns the queue worker. Must be called inside a tokio runtime.
    pub fn new(label: &str) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let worker_label: Arc<str> = Arc::from(label);
        let label = worker_label.clone();

        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job();
            }
            trace!("Dispatch queue '{}' drained", worker_label);
        });

        Self { label, sender }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Enqueues `job`; it is dropped with a warning if the worker is gone
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(Box::new(job)).is_err() {
            warn!("Dispatch queue '{}' is closed, dropping job", self.label);
        }
    }

    /// Resolves once every job enqueued before this call has run
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.dispatch(move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue").field("label", &self.label).finish()
    }
}
