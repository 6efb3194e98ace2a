use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Mutex as LifecycleLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::NotifierConfig;
use crate::error::{ConfigError, DeliveryOutcome, SubmitError};
use crate::queue::{self, JobSender};
use crate::retry::{deliver_with_retry, RetryPolicy, StopSignal};
use crate::telemetry::metric_inc;
use crate::transport::{HttpTransport, Transport};
use crate::types::{DispatcherPhase, NotificationJob, NotifierStats};
use crate::worker::{worker_loop, WorkerContext};

/// How often `destroy` re-checks the queue while draining.
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Which path a job took in [`Notifier::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Queued for the background dispatcher.
    Enqueued,
    /// Refused by a full or closed queue.
    Dropped,
    /// Delivered inline on the caller's task.
    Inline(DeliveryOutcome),
    /// No target configured; nothing was sent.
    Skipped,
}

enum State {
    Uninitialized,
    Running(Running),
    Draining(Arc<AtomicUsize>),
    Stopped,
}

struct Running {
    queue: JobSender,
    stop: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    workers_started: AtomicU64,
}

/// Owns the background dispatcher's lifecycle.
///
/// `init` and `destroy` are serialized by a lifecycle lock. The queue handle
/// lives behind a separate mutex that is only held for short, non-async
/// sections, so `is_ready` and `submit` never wait on a draining shutdown.
pub struct Notifier {
    transport: Option<Arc<dyn Transport>>,
    policy: RetryPolicy,
    queue_capacity: usize,
    drain_timeout: Duration,
    state: Mutex<State>,
    lifecycle: LifecycleLock<()>,
    delivery_slot: Arc<Semaphore>,
    counters: Counters,
}

impl Notifier {
    /// Notifier delivering through `transport`, with limits from `config`.
    pub fn new(transport: Arc<dyn Transport>, config: &NotifierConfig) -> Self {
        Self::build(Some(transport), config)
    }

    /// HTTP notifier for the configured target. Without a target URL the
    /// notifier is inert: lifecycle calls work, nothing is ever sent.
    pub fn from_config(config: &NotifierConfig) -> Result<Self, ConfigError> {
        let transport = HttpTransport::from_config(config)?
            .map(|t| Arc::new(t) as Arc<dyn Transport>);
        Ok(Self::build(transport, config))
    }

    /// A notifier that never delivers.
    pub fn inert(config: &NotifierConfig) -> Self {
        Self::build(None, config)
    }

    fn build(transport: Option<Arc<dyn Transport>>, config: &NotifierConfig) -> Self {
        Self {
            transport,
            policy: config.retry_policy(),
            queue_capacity: config.queue_capacity.max(1),
            drain_timeout: config.drain_timeout(),
            state: Mutex::new(State::Uninitialized),
            lifecycle: LifecycleLock::new(()),
            delivery_slot: Arc::new(Semaphore::new(1)),
            counters: Counters::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Whether a target is configured.
    pub fn is_configured(&self) -> bool {
        self.transport.is_some()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start the dispatcher unless it is already running.
    ///
    /// Must be called from within a tokio runtime. The dispatcher is a plain
    /// task and does not keep the runtime alive on its own.
    pub async fn init(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        let Some(ref transport) = self.transport else {
            debug!("no notification target configured, dispatcher not started");
            return;
        };

        let mut state = self.lock_state();
        if matches!(*state, State::Running(_)) {
            return;
        }

        let (queue, rx) = queue::bounded(self.queue_capacity);
        let (stop, stop_rx) = watch::channel(false);
        let ctx = Arc::new(WorkerContext {
            transport: transport.clone(),
            policy: self.policy.clone(),
            slot: self.delivery_slot.clone(),
        });

        let worker = tokio::spawn(worker_loop(rx, ctx, StopSignal::new(stop_rx)));
        self.counters.workers_started.fetch_add(1, Ordering::SeqCst);

        *state = State::Running(Running { queue, stop, worker });
        info!(
            capacity = self.queue_capacity,
            tries = self.policy.tries,
            "notification dispatcher initialized"
        );
    }

    /// True iff the dispatcher accepts submissions.
    pub fn is_ready(&self) -> bool {
        matches!(*self.lock_state(), State::Running(_))
    }

    pub fn phase(&self) -> DispatcherPhase {
        match *self.lock_state() {
            State::Uninitialized => DispatcherPhase::Uninitialized,
            State::Running(_) => DispatcherPhase::Running,
            State::Draining(_) => DispatcherPhase::Draining,
            State::Stopped => DispatcherPhase::Stopped,
        }
    }

    /// Queue a job for the dispatcher. Returns whether it was accepted.
    ///
    /// Never blocks and never delivers. A job submitted while not ready, or
    /// while the queue is full, is dropped.
    pub fn submit(&self, job: NotificationJob) -> bool {
        match self.try_enqueue(job) {
            Ok(()) => true,
            Err(Rejected::NotReady(_)) => {
                self.record_drop(SubmitError::Closed);
                false
            }
            Err(Rejected::Dropped) => false,
        }
    }

    /// Enqueue when ready, otherwise deliver inline on the caller's task.
    ///
    /// The inline path blocks the caller for up to
    /// `tries * (timeouts + max backoff)`.
    pub async fn dispatch(&self, job: NotificationJob) -> Dispatch {
        if !self.is_configured() {
            return Dispatch::Skipped;
        }
        match self.try_enqueue(job) {
            Ok(()) => {
                info!("notification ENQUEUE mode");
                Dispatch::Enqueued
            }
            Err(Rejected::Dropped) => Dispatch::Dropped,
            Err(Rejected::NotReady(job)) => {
                info!(trace = %job.trace, "notification BLOCKING mode");
                match self.deliver_now(job).await {
                    Some(outcome) => Dispatch::Inline(outcome),
                    None => Dispatch::Skipped,
                }
            }
        }
    }

    /// Run delivery and retry for `job` on the caller's task.
    ///
    /// `None` when no target is configured.
    pub async fn deliver_now(&self, job: NotificationJob) -> Option<DeliveryOutcome> {
        let transport = self.transport.as_ref()?;
        let mut stop = StopSignal::never();
        Some(deliver_with_retry(transport.as_ref(), &self.policy, &job, &mut stop).await)
    }

    /// Stop the dispatcher, draining queued jobs for up to the drain timeout.
    ///
    /// Returns whether the queue emptied in time. The notifier always ends up
    /// stopped, also when this future is dropped early: the dispatcher is then
    /// aborted and its queue abandoned. A later `init` starts a fresh
    /// dispatcher with an empty queue.
    pub async fn destroy(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;

        let running = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, State::Stopped) {
                State::Running(running) => {
                    *state = State::Draining(running.queue.depth_handle());
                    running
                }
                other => {
                    *state = other;
                    return true;
                }
            }
        };

        let Running { queue, stop, worker } = running;
        let depth = queue.depth_handle();
        let mut teardown = Teardown {
            notifier: self,
            stop,
            worker,
            finished: false,
        };
        // Closing the queue lets the dispatcher finish what is left and exit.
        drop(queue);

        let deadline = Instant::now() + self.drain_timeout;
        let drained = loop {
            if depth.load(Ordering::SeqCst) == 0 {
                break true;
            }
            let now = Instant::now();
            if now >= deadline {
                break false;
            }
            sleep(DRAIN_POLL_INTERVAL.min(deadline - now)).await;
        };

        // Interrupts backoff sleeps of the job still in flight.
        let _ = teardown.stop.send(true);

        let remaining = deadline.saturating_duration_since(Instant::now());
        let exited = timeout(remaining, &mut teardown.worker).await.is_ok();
        teardown.finish(exited);

        if drained {
            info!("notification dispatcher drained and stopped");
        } else {
            metric_inc("notifier.drain.timeout");
            warn!(
                abandoned = depth.load(Ordering::SeqCst),
                "notification queue not drained before deadline"
            );
        }
        drained
    }

    pub fn stats(&self) -> NotifierStats {
        let queued = match *self.lock_state() {
            State::Running(ref running) => running.queue.len(),
            State::Draining(ref depth) => depth.load(Ordering::SeqCst),
            State::Uninitialized | State::Stopped => 0,
        };
        NotifierStats {
            queued,
            submitted: self.counters.submitted.load(Ordering::SeqCst),
            dropped: self.counters.dropped.load(Ordering::SeqCst),
            workers_started: self.counters.workers_started.load(Ordering::SeqCst),
        }
    }

    fn try_enqueue(&self, job: NotificationJob) -> Result<(), Rejected> {
        let state = self.lock_state();
        let State::Running(ref running) = *state else {
            return Err(Rejected::NotReady(job));
        };

        match running.queue.submit(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::SeqCst);
                metric_inc("notifier.queue.enqueued");
                Ok(())
            }
            Err(err) => {
                drop(state);
                self.record_drop(err);
                Err(Rejected::Dropped)
            }
        }
    }

    fn record_drop(&self, reason: SubmitError) {
        self.counters.dropped.fetch_add(1, Ordering::SeqCst);
        metric_inc("notifier.queue.dropped");
        debug!(%reason, "notification dropped");
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        // The state is replaced wholesale, so a poisoned value is still valid.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Rejected {
    NotReady(NotificationJob),
    Dropped,
}

/// The part of a shutdown that must happen even if `destroy` is dropped
/// mid-drain.
struct Teardown<'a> {
    notifier: &'a Notifier,
    stop: watch::Sender<bool>,
    worker: JoinHandle<()>,
    finished: bool,
}

impl Teardown<'_> {
    fn finish(&mut self, exited: bool) {
        if !exited {
            self.worker.abort();
            warn!("notification dispatcher still busy at drain deadline, aborted");
        }
        self.finished = true;
        *self.notifier.lock_state() = State::Stopped;
    }
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let _ = self.stop.send(true);
        self.worker.abort();
        *self.notifier.lock_state() = State::Stopped;
        metric_inc("notifier.drain.cancelled");
        warn!("notification dispatcher shutdown cancelled, dispatcher aborted");
    }
}
