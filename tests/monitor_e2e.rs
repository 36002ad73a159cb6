//! End-to-end tests: real probes against a local target server, alerts
//! pushed to a local receiver.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use pulsewatch::registry::{MonitorConfig, Settings};
use pulsewatch::{Monitor, Status};
use tokio::net::TcpListener;

const KEY_ENV: &str = "PULSEWATCH_TEST_KEY";

/// Target whose health can be flipped
#[derive(Clone)]
struct TargetServer {
    addr: SocketAddr,
    healthy: Arc<AtomicBool>,
}

impl TargetServer {
    async fn spawn(healthy: bool) -> Self {
        let flag = Arc::new(AtomicBool::new(healthy));
        let app = Router::new()
            .route(
                "/health",
                get(|State(flag): State<Arc<AtomicBool>>| async move {
                    if flag.load(Ordering::SeqCst) {
                        (StatusCode::OK, "ok")
                    } else {
                        (StatusCode::SERVICE_UNAVAILABLE, "down")
                    }
                }),
            )
            .with_state(flag.clone());
        Self {
            addr: serve(app).await,
            healthy: flag,
        }
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    fn url(&self) -> String {
        format!("http://{}/health", self.addr)
    }
}

/// Push endpoint that records payloads and answers with a fixed status
#[derive(Clone)]
struct Receiver {
    addr: SocketAddr,
    payloads: Arc<Mutex<Vec<serde_json::Value>>>,
    hits: Arc<AtomicUsize>,
}

#[derive(Clone)]
struct ReceiverState {
    payloads: Arc<Mutex<Vec<serde_json::Value>>>,
    hits: Arc<AtomicUsize>,
    reply: StatusCode,
}

impl Receiver {
    async fn spawn(reply: StatusCode) -> Self {
        let state = ReceiverState {
            payloads: Arc::default(),
            hits: Arc::default(),
            reply,
        };
        let app = Router::new()
            .route(
                "/push",
                post(
                    |State(rx): State<ReceiverState>, Json(body): Json<serde_json::Value>| async move {
                        rx.hits.fetch_add(1, Ordering::SeqCst);
                        rx.payloads.lock().push(body);
                        rx.reply
                    },
                ),
            )
            .with_state(state.clone());
        Self {
            addr: serve(app).await,
            payloads: state.payloads,
            hits: state.hits,
        }
    }

    fn url(&self) -> String {
        format!("http://{}/push", self.addr)
    }

    fn statuses(&self) -> Vec<String> {
        self.payloads
            .lock()
            .iter()
            .map(|p| p["status"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn config(target_url: &str, push_url: &str, extra: &str) -> String {
    format!(
        r#"
dedup_window = "5m"
shutdown_grace = "1s"
{extra}

[notification]
provider = "webhook"
endpoint = "{push_url}"
credential_env = "{KEY_ENV}"
retry_base_delay = "50ms"
retry_max_delay = "200ms"

[[targets]]
name = "web"
address = "{target_url}"
interval = "100ms"
timeout = "1s"
failure_threshold = 2
"#
    )
}

fn settings(toml: &str, credential: Option<&str>) -> Settings {
    let credential = credential.map(String::from);
    MonitorConfig::from_toml(toml)
        .unwrap()
        .settings_with_env(move |key| {
            if key == KEY_ENV {
                credential.clone()
            } else {
                None
            }
        })
        .unwrap()
}

/// Poll `check` until it holds or `timeout` passes
async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

fn status_of(monitor: &Monitor, name: &str) -> Option<Status> {
    monitor.board().get(name).map(|s| s.status)
}

#[tokio::test]
async fn test_down_and_recovery_are_pushed() {
    let target = TargetServer::spawn(true).await;
    let receiver = Receiver::spawn(StatusCode::OK).await;
    let monitor = Monitor::new(settings(
        &config(&target.url(), &receiver.url(), ""),
        Some("secret"),
    ))
    .unwrap();
    monitor.start();

    assert!(wait_until(Duration::from_secs(5), || status_of(&monitor, "web") == Some(Status::Up)).await);
    // First UP after startup is silent
    assert_eq!(receiver.hits(), 0);

    target.set_healthy(false);
    assert!(wait_until(Duration::from_secs(5), || receiver.hits() == 1).await);

    target.set_healthy(true);
    assert!(wait_until(Duration::from_secs(5), || receiver.hits() == 2).await);
    assert_eq!(receiver.statuses(), vec!["DOWN", "UP"]);

    let down = receiver.payloads.lock()[0].clone();
    assert_eq!(down["target"], "web");
    assert_eq!(down["previous"], "UP");
    assert!(down["reason"].as_str().unwrap().contains("criteria mismatch"));

    monitor.shutdown().await;
}

#[tokio::test]
async fn test_no_credential_makes_no_calls() {
    let target = TargetServer::spawn(false).await;
    let receiver = Receiver::spawn(StatusCode::OK).await;
    let monitor = Monitor::new(settings(&config(&target.url(), &receiver.url(), ""), None)).unwrap();
    assert!(!monitor.notifier().is_enabled());
    monitor.start();

    assert!(wait_until(Duration::from_secs(5), || status_of(&monitor, "web") == Some(Status::Down)).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(receiver.hits(), 0);
    let state = monitor.board().get("web").unwrap();
    assert_eq!(state.last_notified, None);
    monitor.shutdown().await;
}

#[tokio::test]
async fn test_retry_exhaustion_does_not_stop_monitoring() {
    let target = TargetServer::spawn(false).await;
    let receiver = Receiver::spawn(StatusCode::SERVICE_UNAVAILABLE).await;
    let toml = config(&target.url(), &receiver.url(), "max_retry_attempts = 3");
    let monitor = Monitor::new(settings(&toml, Some("secret"))).unwrap();
    monitor.start();

    assert!(wait_until(Duration::from_secs(5), || {
        monitor
            .board()
            .get("web")
            .map(|s| s.last_notified == Some(Status::Down) && !s.alert_in_flight)
            .unwrap_or(false)
    })
    .await);
    assert_eq!(receiver.hits(), 3);

    // Target stays down: no new transition, no new pushes, checks continue
    let checked = monitor.board().get("web").unwrap().last_checked;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(receiver.hits(), 3);
    assert_ne!(monitor.board().get("web").unwrap().last_checked, checked);

    monitor.shutdown().await;
}

#[tokio::test]
async fn test_state_file_prevents_realert_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let config_path = dir.path().join("pulsewatch.toml");

    let target = TargetServer::spawn(false).await;
    let receiver = Receiver::spawn(StatusCode::OK).await;
    let extra = format!("state_file = {:?}", state_path.display().to_string());
    std::fs::write(&config_path, config(&target.url(), &receiver.url(), &extra)).unwrap();

    let load = || {
        MonitorConfig::from_file(&config_path)
            .unwrap()
            .settings_with_env(|key| (key == KEY_ENV).then(|| "secret".to_string()))
            .unwrap()
    };

    let first = Monitor::new(load()).unwrap();
    first.start();
    assert!(wait_until(Duration::from_secs(5), || receiver.hits() == 1).await);
    assert!(wait_until(Duration::from_secs(5), || {
        first.board().get("web").map(|s| !s.alert_in_flight).unwrap_or(false)
    })
    .await);
    first.shutdown().await;
    drop(first);
    assert!(state_path.exists());

    let second = Monitor::new(load()).unwrap();
    assert_eq!(status_of(&second, "web"), Some(Status::Down));
    second.start();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(receiver.hits(), 1);

    target.set_healthy(true);
    assert!(wait_until(Duration::from_secs(5), || receiver.hits() == 2).await);
    assert_eq!(receiver.statuses(), vec!["DOWN", "UP"]);
    second.shutdown().await;
}

#[tokio::test]
async fn test_reload_adds_and_removes_targets() {
    let target = TargetServer::spawn(true).await;
    let receiver = Receiver::spawn(StatusCode::OK).await;
    let monitor = Monitor::new(settings(&config(&target.url(), &receiver.url(), ""), None)).unwrap();
    monitor.start();
    assert!(wait_until(Duration::from_secs(5), || status_of(&monitor, "web") == Some(Status::Up)).await);

    let renamed = config(&target.url(), &receiver.url(), "").replace("name = \"web\"", "name = \"api\"");
    let diff = monitor.reload(settings(&renamed, None).targets).await;
    assert_eq!(diff.added.len(), 1);
    assert_eq!(diff.removed, vec!["web".to_string()]);

    assert!(wait_until(Duration::from_secs(5), || status_of(&monitor, "api") == Some(Status::Up)).await);
    assert_eq!(monitor.scheduler().running(), vec!["api"]);
    assert!(monitor.board().get("web").is_none());

    // Reloading the same list changes nothing
    let diff = monitor.reload(settings(&renamed, None).targets).await;
    assert!(diff.is_empty());
    monitor.shutdown().await;
}
