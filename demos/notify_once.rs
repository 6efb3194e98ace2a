use lifecycle_notifier::{init_tracing, Notifier, NotifierConfig, NotificationJob, TracingConfig};

#[tokio::main]
async fn main() {
    init_tracing(&TracingConfig::default());

    let config = match NotifierConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid notifier settings: {err}");
            return;
        }
    };
    let notifier = match Notifier::from_config(&config) {
        Ok(notifier) => notifier,
        Err(err) => {
            eprintln!("unable to build notifier: {err}");
            return;
        }
    };

    let job = NotificationJob::new("manual ping", "type=I&event=E&custom=ping");
    match notifier.deliver_now(job).await {
        Some(outcome) => println!("{outcome}"),
        None => println!("WEBAPP_NOTIFIER_URL is not set, nothing sent"),
    }
}
