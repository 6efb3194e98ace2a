#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lifecycle_notifier::{NotificationJob, Transport, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub fn job(n: usize) -> NotificationJob {
    NotificationJob::new(format!("job-{n}"), format!("n={n}"))
}

/// A recorded attempt.
#[derive(Debug, Clone)]
pub struct Call {
    pub body: String,
    pub at: Instant,
}

/// Replies from a script, then from a fallback.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<u16, TransportError>>>,
    fallback: Result<u16, TransportError>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<u16, TransportError>>, fallback: Result<u16, TransportError>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn always(code: u16) -> Arc<Self> {
        Self::new(Vec::new(), Ok(code))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.body).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post(&self, body: &str) -> Result<u16, TransportError> {
        self.calls.lock().unwrap().push(Call {
            body: body.to_string(),
            at: Instant::now(),
        });
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }

    fn target(&self) -> &str {
        "scripted"
    }
}

/// Holds every attempt until released; models a stalled target.
pub struct GatedTransport {
    gate: Semaphore,
    started: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl GatedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Attempts started and not yet finished or dropped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Yield until `n` attempts have started.
    pub async fn wait_started(&self, n: usize) {
        while self.started() < n {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn post(&self, _body: &str) -> Result<u16, TransportError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        Ok(200)
    }

    fn target(&self) -> &str {
        "gated"
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A raw HTTP request as received by [`serve_raw`].
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub head: String,
    pub body: String,
}

impl RawRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        let prefix = format!("{}:", name.to_ascii_lowercase());
        self.head.lines().find_map(|line| {
            line.to_ascii_lowercase()
                .starts_with(&prefix)
                .then(|| line[prefix.len()..].trim().to_string())
        })
    }
}

/// Serve one connection per status in `statuses`, answering each request
/// with that status and closing the connection.
pub async fn serve_statuses(statuses: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<RawRequest>>) {
    let responses = statuses
        .into_iter()
        .map(|(code, extra_headers)| {
            format!(
                "HTTP/1.1 {code} Status\r\nContent-Length: 4\r\nConnection: close\r\n{extra_headers}\r\ndone"
            )
        })
        .collect();
    serve_raw(responses).await
}

/// Serve one connection per entry in `responses`, writing it verbatim after
/// reading the request, then closing the connection.
pub async fn serve_raw(responses: Vec<String>) -> (String, JoinHandle<Vec<RawRequest>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/notify", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for response in responses {
            let (mut stream, _) = listener.accept().await.unwrap();
            requests.push(read_request(&mut stream).await);
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        }
        requests
    });

    (url, handle)
}

/// Accept connections and read requests but never answer. Connections stay
/// open until the returned task is aborted.
pub async fn serve_silently() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/notify", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            held.push(stream);
        }
    });

    (url, handle)
}

async fn read_request(stream: &mut TcpStream) -> RawRequest {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];

    loop {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&data).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let head = text[..end].to_string();
            let request = RawRequest {
                head: head.clone(),
                body: String::new(),
            };
            let length: usize = request
                .header("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if data.len() >= end + 4 + length {
                let body = String::from_utf8_lossy(&data[end + 4..end + 4 + length]).to_string();
                return RawRequest { head, body };
            }
        }
    }

    RawRequest {
        head: String::from_utf8_lossy(&data).to_string(),
        body: String::new(),
    }
}

/// Address nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/notify")
}
