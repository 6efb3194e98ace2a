//! Best-effort webhook notifications for host lifecycle events.
//!
//! When a hosted service starts or stops, or a webapp is deployed or
//! undeployed, this crate POSTs a form-encoded notification to a configured
//! URL. Delivery happens on a single background dispatcher fed by a
//! **bounded, in-memory** queue, so the host's lifecycle threads never wait
//! on the network once the dispatcher is up.
//!
//! ## Guarantees
//! - Bounded resource usage (one dispatcher, at most 1024 queued jobs)
//! - Submission never blocks; overflow is dropped
//! - FIFO delivery by the single dispatcher
//! - Shutdown drains under a deadline and never hangs the host
//!
//! ## Non-Guarantees
//! - Durability across restarts
//! - Exactly-once delivery
//! - Ordering between queued jobs and inline deliveries made before `init`
//!
//! ## Retry policy
//! 1xx to 4xx responses are final. 5xx responses and transport failures are
//! retried up to the configured count with a flat random pause of 100ms to
//! 3s between attempts.

mod config;
mod discovery;
mod error;
mod listener;
mod notifier;
mod payload;
mod queue;
mod retry;
mod telemetry;
mod transport;
mod types;
mod worker;

pub use config::{
    NotifierConfig,
    DEFAULT_CONNECT_TIMEOUT_MS,
    DEFAULT_DRAIN_TIMEOUT_MS,
    DEFAULT_QUEUE_CAPACITY,
    DEFAULT_READ_TIMEOUT_MS,
    DEFAULT_RETRY_COUNT,
    ENV_CONNECT_TIMEOUT,
    ENV_CUSTOM_VALUE,
    ENV_READ_TIMEOUT,
    ENV_RESOLVE_HOSTNAME,
    ENV_RETRY_COUNT,
    ENV_URL,
    MIN_TIMEOUT_MS,
};
pub use discovery::{Connector, EndpointResolver, ServiceDiscovery, StaticDiscovery};
pub use error::{
    ConfigError,
    DeliveryOutcome,
    DeliveryStatus,
    DiscoveryError,
    SubmitError,
    TransportError,
};
pub use listener::{ContextListener, HostEvent, LifecycleListener, RunnerListener, ServiceListener};
pub use notifier::{Dispatch, Notifier, DRAIN_POLL_INTERVAL};
pub use payload::{context_basename, EventKind, PayloadBuilder, ProcessIdentity};
pub use queue::{bounded, JobReceiver, JobSender};
pub use retry::{deliver_with_retry, RetryPolicy, StopSignal, Verdict};
pub use telemetry::{init_tracing, TracingConfig};
pub use transport::{HttpTransport, Transport, FORM_CONTENT_TYPE};
pub use types::{
    DispatcherPhase,
    Endpoint,
    NotificationJob,
    NotifierStats,
    ServiceDescriptor,
    ServiceMap,
};
