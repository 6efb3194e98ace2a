use std::fmt;

use serde::{Deserialize, Serialize};

/// A fully rendered notification awaiting delivery.
///
/// Jobs are immutable once built. The dispatcher treats the body as opaque
/// form-encoded text; `trace` only feeds log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationJob {
    /// Human-readable context for log lines.
    pub trace: String,

    /// Pre-encoded request body.
    pub body: String,
}

impl NotificationJob {
    pub fn new(trace: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            trace: trace.into(),
            body: body.into(),
        }
    }
}

/// Discovered network addresses and routing tag of one named service.
///
/// A snapshot taken at startup. URI lists keep discovery order and hold no
/// duplicates. Empty lists are valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub https: Vec<String>,
    pub http: Vec<String>,
    pub ajp: Vec<String>,

    /// Routing identifier used by front-end balancers.
    pub route_tag: String,
}

impl Endpoint {
    pub fn new(route_tag: impl Into<String>) -> Self {
        Self {
            route_tag: route_tag.into(),
            ..Self::default()
        }
    }

    pub fn with_https(mut self, uri: impl Into<String>) -> Self {
        push_unique(&mut self.https, uri.into());
        self
    }

    pub fn with_http(mut self, uri: impl Into<String>) -> Self {
        push_unique(&mut self.http, uri.into());
        self
    }

    pub fn with_ajp(mut self, uri: impl Into<String>) -> Self {
        push_unique(&mut self.ajp, uri.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.https.is_empty() && self.http.is_empty() && self.ajp.is_empty()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "https={:?} http={:?} ajp={:?} route={}",
            self.https, self.http, self.ajp, self.route_tag
        )
    }
}

/// Append `uri` unless it is already listed.
pub(crate) fn push_unique(uris: &mut Vec<String>, uri: String) {
    if !uris.contains(&uri) {
        uris.push(uri);
    }
}

/// Service name to endpoint snapshot, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceMap {
    entries: Vec<(String, Endpoint)>,
}

impl ServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a service. A replaced service keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, endpoint: Endpoint) -> Option<Endpoint> {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, endpoint)),
            None => {
                self.entries.push((name, endpoint));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Endpoint> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, endpoint)| endpoint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Endpoint)> {
        self.entries.iter().map(|(name, endpoint)| (name.as_str(), endpoint))
    }
}

/// Host-side identity of the component a context listener runs in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub service_name: Option<String>,
    pub engine_name: Option<String>,
}

impl ServiceDescriptor {
    pub const UNKNOWN: &'static str = "unknown";

    /// Best label for logs and payloads: service, then engine, then `unknown`.
    pub fn label(&self) -> &str {
        self.service_name
            .as_deref()
            .or(self.engine_name.as_deref())
            .unwrap_or(Self::UNKNOWN)
    }
}

/// Lifecycle phase of a [`crate::Notifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherPhase {
    Uninitialized,
    Running,
    Draining,
    Stopped,
}

/// Counters snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifierStats {
    /// Jobs waiting in the queue right now.
    pub queued: usize,
    /// Jobs accepted into a queue since construction.
    pub submitted: u64,
    /// Jobs refused because the queue was full or closed.
    pub dropped: u64,
    /// Dispatcher tasks spawned since construction.
    pub workers_started: u64,
}
