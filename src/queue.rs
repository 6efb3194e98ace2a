use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::SubmitError;
use crate::types::NotificationJob;

/// Create a bounded FIFO queue.
///
/// The sending half is owned by the lifecycle controller, the receiving half
/// by the single dispatcher.
pub fn bounded(capacity: usize) -> (JobSender, JobReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let depth = Arc::new(AtomicUsize::new(0));

    (
        JobSender {
            tx,
            depth: depth.clone(),
            capacity,
        },
        JobReceiver { rx, depth },
    )
}

/// Producer handle. Cloning shares the same queue.
#[derive(Debug, Clone)]
pub struct JobSender {
    tx: mpsc::Sender<NotificationJob>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

impl JobSender {
    /// Queue a job without waiting. A full or closed queue drops the job.
    pub fn submit(&self, job: NotificationJob) -> Result<(), SubmitError> {
        // Count before sending so the receiver never decrements below zero.
        self.depth.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                match err {
                    mpsc::error::TrySendError::Full(_) => Err(SubmitError::Full),
                    mpsc::error::TrySendError::Closed(_) => Err(SubmitError::Closed),
                }
            }
        }
    }

    /// Jobs submitted and not yet taken by the dispatcher.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn depth_handle(&self) -> Arc<AtomicUsize> {
        self.depth.clone()
    }
}

/// Consumer handle.
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::Receiver<NotificationJob>,
    depth: Arc<AtomicUsize>,
}

impl JobReceiver {
    /// Wait for the next job. `None` once every sender is gone and the queue
    /// is empty.
    pub async fn recv(&mut self) -> Option<NotificationJob> {
        let job = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(job)
    }

    /// Take the next job if one is waiting.
    pub fn poll(&mut self) -> Option<NotificationJob> {
        let job = self.rx.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(job)
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
