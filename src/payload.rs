//! Form-encoded notification bodies.
//!
//! Field order is stable so receivers that log raw bodies get comparable
//! lines. Every body carries a millisecond timestamp (`ts`), the process
//! identity (`jvmid`), the configured `custom` value and the event flag
//! (`type=I` on start, `type=D` on stop).

use std::time::{SystemTime, UNIX_EPOCH};

use url::form_urlencoded::Serializer;

use crate::config::NotifierConfig;
use crate::types::{Endpoint, NotificationJob, ServiceDescriptor, ServiceMap};

/// Lifecycle transition being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Initialized,
    Destroyed,
}

impl EventKind {
    /// Value of the `type` field.
    pub fn flag(self) -> &'static str {
        match self {
            EventKind::Initialized => "I",
            EventKind::Destroyed => "D",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EventKind::Initialized => "Initialized",
            EventKind::Destroyed => "Destroyed",
        }
    }
}

/// `pid@hostname` of the running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity(String);

impl ProcessIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn current() -> Self {
        let host = std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        Self(format!("{}@{}", std::process::id(), host))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Renders jobs for one notification target.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    identity: ProcessIdentity,
    custom_value: String,
    target: String,
}

impl PayloadBuilder {
    pub fn new(identity: ProcessIdentity, custom_value: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            identity,
            custom_value: custom_value.into(),
            target: target.into(),
        }
    }

    pub fn from_config(config: &NotifierConfig) -> Self {
        Self::new(
            ProcessIdentity::current(),
            config.custom_value.clone(),
            config.target_url.clone().unwrap_or_default(),
        )
    }

    /// One job describing a named service and its endpoints.
    pub fn service_job(&self, kind: EventKind, service: &str, endpoint: &Endpoint) -> NotificationJob {
        let mut form = Serializer::new(String::new());
        form.append_pair("ts", &now_millis().to_string());
        form.append_pair("jvmid", self.identity.as_str());
        form.append_pair("custom", &self.custom_value);
        form.append_pair("type", kind.flag());
        form.append_pair("service", service);
        for uri in &endpoint.https {
            form.append_pair("https", uri);
        }
        for uri in &endpoint.http {
            form.append_pair("http", uri);
        }
        for uri in &endpoint.ajp {
            form.append_pair("ajp", uri);
        }
        form.append_pair("jvmroute", &endpoint.route_tag);
        form.append_pair("event", "E");

        let trace = format!(
            "service endpoint: {} service={} endpoint=[{}] target={}",
            kind.label(),
            service,
            endpoint,
            self.target
        );
        NotificationJob::new(trace, form.finish())
    }

    /// One job per service; siblings share nothing.
    pub fn service_jobs(&self, kind: EventKind, services: &ServiceMap) -> Vec<NotificationJob> {
        services
            .iter()
            .map(|(name, endpoint)| self.service_job(kind, name, endpoint))
            .collect()
    }

    /// One job for a webapp context deployed at `context_path`.
    pub fn context_job(
        &self,
        kind: EventKind,
        context_path: &str,
        descriptor: Option<&ServiceDescriptor>,
    ) -> NotificationJob {
        let basename = context_basename(context_path);

        let mut form = Serializer::new(String::new());
        form.append_pair("type", kind.flag());
        form.append_pair("ts", &now_millis().to_string());
        form.append_pair("jvmid", self.identity.as_str());
        form.append_pair("custom", &self.custom_value);
        form.append_pair("path", context_path);
        form.append_pair("basename", &basename);
        if let Some(descriptor) = descriptor {
            form.append_pair("service", descriptor.label());
        }

        let service = descriptor.map(ServiceDescriptor::label).unwrap_or(ServiceDescriptor::UNKNOWN);
        let trace = format!(
            "context: {} path={} basename={} service={} target={}",
            kind.label(),
            context_path,
            basename,
            service,
            self.target
        );
        NotificationJob::new(trace, form.finish())
    }
}

/// Deployment name of a context path: `ROOT` for the root context, otherwise
/// the path without its leading slash and with `/` replaced by `#`.
pub fn context_basename(context_path: &str) -> String {
    if context_path.is_empty() || context_path == "/" {
        return "ROOT".to_string();
    }
    context_path
        .strip_prefix('/')
        .unwrap_or(context_path)
        .replace('/', "#")
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(body: &str) -> Vec<(String, String)> {
        url::form_urlencoded::parse(body.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn builder() -> PayloadBuilder {
        PayloadBuilder::new(ProcessIdentity::new("42@node-a"), "blue", "http://hooks.local/n")
    }

    #[test]
    fn basename_rules() {
        assert_eq!(context_basename(""), "ROOT");
        assert_eq!(context_basename("/"), "ROOT");
        assert_eq!(context_basename("/shop"), "shop");
        assert_eq!(context_basename("/shop/admin"), "shop#admin");
    }

    #[test]
    fn service_body_lists_every_uri() {
        let endpoint = Endpoint::new("node-a")
            .with_https("https://node-a:8443")
            .with_http("http://node-a:8080")
            .with_ajp("ajp://node-a:8009");
        let job = builder().service_job(EventKind::Initialized, "Catalina", &endpoint);

        let fields = fields(&job.body);
        let keys: Vec<&str> = fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            ["ts", "jvmid", "custom", "type", "service", "https", "http", "ajp", "jvmroute", "event"]
        );
        assert!(fields.contains(&("type".into(), "I".into())));
        assert!(fields.contains(&("jvmid".into(), "42@node-a".into())));
        assert!(fields.contains(&("http".into(), "http://node-a:8080".into())));
        assert!(fields.contains(&("jvmroute".into(), "node-a".into())));
        assert!(job.trace.contains("service=Catalina"));
    }

    #[test]
    fn empty_endpoint_still_produces_a_body() {
        let job = builder().service_job(EventKind::Destroyed, "svc", &Endpoint::default());
        let fields = fields(&job.body);
        assert!(fields.contains(&("type".into(), "D".into())));
        assert!(fields.contains(&("jvmroute".into(), String::new())));
        assert!(!fields.iter().any(|(k, _)| k == "http"));
    }

    #[test]
    fn context_body_encodes_path() {
        let descriptor = ServiceDescriptor {
            service_name: Some("Catalina".into()),
            engine_name: None,
        };
        let job = builder().context_job(EventKind::Initialized, "/my app", Some(&descriptor));
        assert!(job.body.starts_with("type=I&ts="));
        assert!(job.body.contains("path=%2Fmy+app"));

        let fields = fields(&job.body);
        assert!(fields.contains(&("basename".into(), "my app".into())));
        assert!(fields.contains(&("service".into(), "Catalina".into())));
    }

    #[test]
    fn one_job_per_service() {
        let mut services = ServiceMap::new();
        services.insert("b", Endpoint::new("r2"));
        services.insert("a", Endpoint::new("r1"));
        let jobs = builder().service_jobs(EventKind::Initialized, &services);
        assert_eq!(jobs.len(), 2);
        assert!(jobs[0].body.contains("service=b"));
        assert!(jobs[1].body.contains("service=a"));
    }
}
