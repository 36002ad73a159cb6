//! Network probes for HTTP and TCP targets

use std::error::Error as _;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};

use super::result::CheckResult;
use crate::registry::{Protocol, Target, MAX_TIMEOUT};

/// Reason recorded when a check runs past its deadline
pub const TIMEOUT_REASON: &str = "timeout";

/// Reason prefix recorded when a response fails the target's criteria
pub const CRITERIA_MISMATCH: &str = "criteria mismatch";

/// Anything that can evaluate a target once.
///
/// Implementations must return by `deadline`; the scheduler relies on it.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn probe(&self, target: &Target, deadline: Instant) -> CheckResult;
}

/// Probe-side failures that are not health signals
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Invalid request for {address}: {reason}")]
    InvalidRequest { address: String, reason: String },

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Internal verdict before timing is attached
enum Verdict {
    Up,
    Down(String),
    Error(ProbeError),
}

/// Default prober backed by `reqwest` and tokio sockets
#[derive(Debug, Clone)]
pub struct Prober {
    client: reqwest::Client,
}

impl Prober {
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pulsewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    /// Use an existing HTTP client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn check(&self, target: &Target) -> Verdict {
        match target.protocol {
            Protocol::Http => self.check_http(target).await,
            Protocol::Tcp => check_tcp(target).await,
        }
    }

    async fn check_http(&self, target: &Target) -> Verdict {
        let url = match reqwest::Url::parse(&target.address) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => {
                return Verdict::Error(ProbeError::InvalidRequest {
                    address: target.address.clone(),
                    reason: format!("unsupported scheme '{}'", url.scheme()),
                })
            }
            Err(e) => {
                return Verdict::Error(ProbeError::InvalidRequest {
                    address: target.address.clone(),
                    reason: e.to_string(),
                })
            }
        };

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return Verdict::Error(ProbeError::InvalidRequest {
                    address: target.address.clone(),
                    reason: e.to_string(),
                })
            }
            Err(e) => return Verdict::Down(classify_reqwest(&e)),
        };

        let status = response.status().as_u16();
        if !target.expect.status_ok(status) {
            return Verdict::Down(format!("{CRITERIA_MISMATCH}: status {status}"));
        }

        if target.expect.needs_body() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => return Verdict::Down(classify_reqwest(&e)),
            };
            if !target.expect.body_ok(&body) {
                return Verdict::Down(format!("{CRITERIA_MISMATCH}: body"));
            }
        }

        Verdict::Up
    }
}

#[async_trait]
impl HealthCheck for Prober {
    async fn probe(&self, target: &Target, deadline: Instant) -> CheckResult {
        let start = Instant::now();
        let deadline = deadline.min(deadline_after(start, target.timeout));

        let verdict = match timeout_at(deadline, self.check(target)).await {
            Ok(verdict) => verdict,
            Err(_) => Verdict::Down(TIMEOUT_REASON.to_string()),
        };
        let latency = start.elapsed();

        match verdict {
            Verdict::Up => CheckResult::up(&target.name, latency),
            Verdict::Down(reason) => CheckResult::down(&target.name, reason, latency),
            Verdict::Error(e) => CheckResult::error(&target.name, e.to_string(), latency),
        }
    }
}

async fn check_tcp(target: &Target) -> Verdict {
    match TcpStream::connect(target.address.as_str()).await {
        Ok(_stream) => Verdict::Up,
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
            Verdict::Error(ProbeError::InvalidRequest {
                address: target.address.clone(),
                reason: e.to_string(),
            })
        }
        Err(e) => Verdict::Down(classify_io(&e)),
    }
}

/// Map a socket error to a short failure category
fn classify_io(e: &io::Error) -> String {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => "connection refused".to_string(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
            "connection reset".to_string()
        }
        io::ErrorKind::TimedOut => TIMEOUT_REASON.to_string(),
        io::ErrorKind::AddrNotAvailable => "unreachable".to_string(),
        _ => {
            let text = e.to_string();
            if text.contains("lookup") || text.contains("resolve") {
                "dns".to_string()
            } else {
                format!("connect: {text}")
            }
        }
    }
}

/// Map a client error to a short failure category
fn classify_reqwest(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        return TIMEOUT_REASON.to_string();
    }

    // Prefer the underlying socket error when there is one
    let mut source = e.source();
    while let Some(inner) = source {
        if let Some(io_err) = inner.downcast_ref::<io::Error>() {
            return classify_io(io_err);
        }
        source = inner.source();
    }

    let text = e.to_string();
    if text.contains("dns error") {
        "dns".to_string()
    } else if e.is_connect() {
        "connect".to_string()
    } else if e.is_redirect() {
        "redirect".to_string()
    } else if e.is_body() || e.is_decode() {
        "body".to_string()
    } else {
        "transport".to_string()
    }
}

/// Convenience: probe with the target's own timeout as deadline
pub async fn probe_once(checker: &dyn HealthCheck, target: &Target) -> CheckResult {
    let deadline = deadline_after(Instant::now(), target.timeout);
    checker.probe(target, deadline).await
}

/// `start + timeout`, clamped to [`MAX_TIMEOUT`] when that would overflow
pub fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .unwrap_or_else(|| start + MAX_TIMEOUT)
}

/// Upper bound on how far past the deadline a probe may return
pub const DEADLINE_TOLERANCE: Duration = Duration::from_millis(250);
