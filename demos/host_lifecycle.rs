use std::sync::Arc;

use lifecycle_notifier::{
    init_tracing, Connector, ContextListener, EndpointResolver, HostEvent, LifecycleListener,
    Notifier, NotifierConfig, RunnerListener, ServiceListener, StaticDiscovery, TracingConfig,
};

#[tokio::main]
async fn main() {
    init_tracing(&TracingConfig::default());

    let config = NotifierConfig::from_env().unwrap_or_default();
    let notifier = match Notifier::from_config(&config) {
        Ok(notifier) => Arc::new(notifier),
        Err(err) => {
            eprintln!("unable to build notifier: {err}");
            return;
        }
    };

    let resolver = EndpointResolver::lookup("localhost", config.resolve_hostname)
        .await
        .unwrap_or_else(|_| EndpointResolver::new("localhost"));
    let endpoint = resolver.endpoint(
        &[
            Connector::new("HTTP/1.1", "http", 8080),
            Connector::new("AJP/1.3", "http", 8009),
        ],
        "node-a",
    );
    let discovery = Arc::new(StaticDiscovery::new().with_service("Catalina", endpoint));

    let listeners: Vec<Box<dyn LifecycleListener>> = vec![
        Box::new(RunnerListener::new(notifier.clone())),
        Box::new(ServiceListener::new(notifier.clone(), discovery, &config)),
        Box::new(ContextListener::new(notifier.clone(), &config, "/shop")),
    ];

    for event in [
        HostEvent::BeforeInit,
        HostEvent::BeforeStart,
        HostEvent::AfterStart,
        HostEvent::BeforeStop,
        HostEvent::BeforeDestroy,
        HostEvent::AfterDestroy,
    ] {
        for listener in &listeners {
            listener.on_event(event).await;
        }
    }

    println!("{:?}", notifier.stats());
}
