use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{debug, error, info};

use crate::error::DeliveryOutcome;
use crate::queue::JobReceiver;
use crate::retry::{deliver_with_retry, RetryPolicy, StopSignal};
use crate::telemetry::metric_inc;
use crate::transport::Transport;
use crate::types::NotificationJob;

/// Shared, read-only context for the dispatcher.
pub(crate) struct WorkerContext {
    pub transport: Arc<dyn Transport>,
    pub policy: RetryPolicy,
    /// One permit, shared by every dispatcher a notifier starts. A delivery
    /// holds it until its task is gone, aborted or not.
    pub slot: Arc<Semaphore>,
}

/// Main dispatcher loop.
///
/// The dispatcher:
/// - Takes one job at a time, in submission order
/// - Runs delivery and retry for it to completion
/// - Exits on the stop signal, or once the queue is closed and empty
pub(crate) async fn worker_loop(
    mut rx: JobReceiver,
    ctx: Arc<WorkerContext>,
    mut stop: StopSignal,
) {
    info!(url = ctx.transport.target(), "notification dispatcher started");

    loop {
        let job = tokio::select! {
            biased;
            _ = stop.stopped() => break,
            job = rx.recv() => job,
        };

        let Some(job) = job else { break };

        process_job(job, &ctx, &stop).await;
    }

    info!(abandoned = rx.len(), "notification dispatcher stopped");
}

/// Deliver one job on its own task so a panic cannot take the loop down.
async fn process_job(job: NotificationJob, ctx: &Arc<WorkerContext>, stop: &StopSignal) {
    let trace = job.trace.clone();
    let task_ctx = ctx.clone();
    let mut task_stop = stop.clone();

    let Ok(permit) = ctx.slot.clone().acquire_owned().await else {
        error!(trace = %trace, "delivery slot closed, job dropped");
        return;
    };

    let handle = tokio::spawn(async move {
        let _permit = permit;
        deliver_with_retry(task_ctx.transport.as_ref(), &task_ctx.policy, &job, &mut task_stop)
            .await
    });
    // Aborting the dispatcher must not leave the delivery running.
    let _guard = AbortOnDrop(handle.abort_handle());

    match handle.await {
        Ok(outcome) => record(&trace, &outcome),
        Err(err) if err.is_panic() => {
            metric_inc("notifier.delivery.panicked");
            error!(trace = %trace, "notification job panicked, dispatcher continues");
        }
        Err(_) => debug!(trace = %trace, "notification job cancelled"),
    }
}

fn record(trace: &str, outcome: &DeliveryOutcome) {
    debug!(trace = %trace, status = ?outcome.status, attempts = outcome.attempts, "job finished");
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
