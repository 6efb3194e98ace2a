//! Host integration: lifecycle events in, notifications out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::config::NotifierConfig;
use crate::discovery::ServiceDiscovery;
use crate::error::DiscoveryError;
use crate::notifier::{Dispatch, Notifier};
use crate::payload::{EventKind, PayloadBuilder};
use crate::types::ServiceMap;

/// Lifecycle events emitted by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    BeforeInit,
    BeforeStart,
    AfterStart,
    BeforeStop,
    BeforeDestroy,
    AfterDestroy,
}

#[async_trait]
pub trait LifecycleListener: Send + Sync {
    async fn on_event(&self, event: HostEvent);
}

/// Starts the dispatcher before the host initializes and drains it after the
/// host is destroyed.
pub struct RunnerListener {
    notifier: Arc<Notifier>,
}

impl RunnerListener {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl LifecycleListener for RunnerListener {
    async fn on_event(&self, event: HostEvent) {
        match event {
            HostEvent::BeforeInit => {
                info!("starting notification dispatcher");
                self.notifier.init().await;
            }
            HostEvent::AfterDestroy => {
                info!("stopping notification dispatcher");
                if !self.notifier.destroy().await {
                    error!("notification dispatcher shutdown did not drain the queue");
                }
            }
            _ => {}
        }
    }
}

/// Logs a missing target once per listener.
#[derive(Default)]
struct MissingTarget(AtomicBool);

impl MissingTarget {
    fn check(&self, notifier: &Notifier) -> bool {
        if notifier.is_configured() {
            return true;
        }
        if !self.0.swap(true, Ordering::SeqCst) {
            error!(
                variable = crate::config::ENV_URL,
                "notification target url not configured, notifications disabled"
            );
        }
        false
    }
}

/// Announces every discovered service when the host starts and stops.
pub struct ServiceListener {
    notifier: Arc<Notifier>,
    discovery: Arc<dyn ServiceDiscovery>,
    payload: PayloadBuilder,
    services: RwLock<Option<ServiceMap>>,
    missing_target: MissingTarget,
}

impl ServiceListener {
    pub fn new(
        notifier: Arc<Notifier>,
        discovery: Arc<dyn ServiceDiscovery>,
        config: &NotifierConfig,
    ) -> Self {
        Self::with_payload(notifier, discovery, PayloadBuilder::from_config(config))
    }

    pub fn with_payload(
        notifier: Arc<Notifier>,
        discovery: Arc<dyn ServiceDiscovery>,
        payload: PayloadBuilder,
    ) -> Self {
        Self {
            notifier,
            discovery,
            payload,
            services: RwLock::new(None),
            missing_target: MissingTarget::default(),
        }
    }

    /// Take a fresh snapshot of the host's services.
    ///
    /// Discovery runs on the blocking pool. A failing discovery is logged
    /// and leaves an empty snapshot.
    pub async fn refresh_services(&self) -> ServiceMap {
        let discovery = self.discovery.clone();
        let discovered = tokio::task::spawn_blocking(move || discovery.discover())
            .await
            .unwrap_or_else(|err| Err(DiscoveryError::Unavailable(err.to_string())));

        let services = match discovered {
            Ok(services) => services,
            Err(err) => {
                error!(error = %err, "unable to discover services");
                ServiceMap::new()
            }
        };
        for name in services.names() {
            info!(service = %name, "discovered service");
        }
        *self.services.write().await = Some(services.clone());
        services
    }

    /// Notify `kind` for every service, one job each.
    pub async fn notify_services(&self, kind: EventKind) -> Vec<Dispatch> {
        if !self.missing_target.check(&self.notifier) {
            return Vec::new();
        }

        let snapshot = self.services.read().await.clone();
        let services = match snapshot {
            Some(services) => services,
            None => self.refresh_services().await,
        };

        let mode = if self.notifier.is_ready() { "ENQUEUE" } else { "BLOCKING" };
        info!(mode, event = kind.label(), services = services.len(), "notifying services");

        let mut results = Vec::with_capacity(services.len());
        for job in self.payload.service_jobs(kind, &services) {
            results.push(self.notifier.dispatch(job).await);
        }
        results
    }
}

#[async_trait]
impl LifecycleListener for ServiceListener {
    async fn on_event(&self, event: HostEvent) {
        match event {
            HostEvent::BeforeStart => {
                if !self.missing_target.check(&self.notifier) {
                    return;
                }
                self.refresh_services().await;
                self.notify_services(EventKind::Initialized).await;
            }
            HostEvent::BeforeDestroy => {
                self.notify_services(EventKind::Destroyed).await;
            }
            _ => {}
        }
    }
}

/// Announces one deployed webapp context.
pub struct ContextListener {
    notifier: Arc<Notifier>,
    discovery: Option<Arc<dyn ServiceDiscovery>>,
    payload: PayloadBuilder,
    context_path: String,
    missing_target: MissingTarget,
}

impl ContextListener {
    pub fn new(notifier: Arc<Notifier>, config: &NotifierConfig, context_path: impl Into<String>) -> Self {
        Self::with_payload(notifier, PayloadBuilder::from_config(config), context_path)
    }

    pub fn with_payload(
        notifier: Arc<Notifier>,
        payload: PayloadBuilder,
        context_path: impl Into<String>,
    ) -> Self {
        Self {
            notifier,
            discovery: None,
            payload,
            context_path: context_path.into(),
            missing_target: MissingTarget::default(),
        }
    }

    /// Use `discovery` to name the owning service in payloads.
    pub fn with_discovery(mut self, discovery: Arc<dyn ServiceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub async fn context_initialized(&self) -> Option<Dispatch> {
        self.notify(EventKind::Initialized).await
    }

    pub async fn context_destroyed(&self) -> Option<Dispatch> {
        self.notify(EventKind::Destroyed).await
    }

    async fn notify(&self, kind: EventKind) -> Option<Dispatch> {
        if !self.missing_target.check(&self.notifier) {
            return None;
        }
        let descriptor = self
            .discovery
            .as_ref()
            .and_then(|discovery| discovery.resolve_service_context());
        let job = self.payload.context_job(kind, &self.context_path, descriptor.as_ref());
        Some(self.notifier.dispatch(job).await)
    }
}

#[async_trait]
impl LifecycleListener for ContextListener {
    async fn on_event(&self, event: HostEvent) {
        match event {
            HostEvent::AfterStart => {
                self.context_initialized().await;
            }
            HostEvent::BeforeStop => {
                self.context_destroyed().await;
            }
            _ => {}
        }
    }
}
