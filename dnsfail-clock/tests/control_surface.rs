use dnsfail::components::notifier::Notifier;
use dnsfail::control::{ControlContext, ControlServer};
use dnsfail::metrics::ResetMetrics;
use dnsfail::prelude::*;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

#[derive(Default)]
struct Chime {
    played: Mutex<Vec<ResetSource>>,
}

impl Notifier for Chime {
    fn notify(&self, source: ResetSource) {
        self.played.lock().unwrap().push(source);
    }
}

struct Daemon {
    client: ControlClient,
    timer: Arc<TimerState>,
    chime: Arc<Chime>,
    shutdown: broadcast::Sender<()>,
    _dir: tempfile::TempDir,
}

async fn start_daemon() -> Daemon {
    let dir = tempfile::tempdir().unwrap();
    let chime = Arc::new(Chime::default());
    let timer = Arc::new(TimerState::initialize(
        StateStore::new(dir.path().join("last_reset.json")),
        chime.clone(),
        Arc::new(ResetMetrics::new()),
    ));

    let context = ControlContext::new(Arc::clone(&timer), chrono_tz::UTC);
    let server = ControlServer::bind("127.0.0.1:0", context).await.unwrap();
    let client = ControlClient::new(server.local_addr().unwrap().to_string());
    let (shutdown, rx) = broadcast::channel(1);
    tokio::spawn(server.run(rx));

    Daemon {
        client,
        timer,
        chime,
        shutdown,
        _dir: dir,
    }
}

#[tokio::test]
async fn reset_over_http_updates_status_file_and_metrics() {
    let daemon = start_daemon().await;
    let before = daemon.timer.get_origin();

    let health = daemon.client.health().await.unwrap();
    assert_eq!(health.status, "ok");

    let reset = daemon.client.reset().await.unwrap();
    assert_eq!(reset.status, "ok");
    assert_eq!(reset.message, "Counter reset successfully");

    let origin = daemon.timer.get_origin();
    assert!(origin >= before);
    let saved = StateStore::new(daemon.timer.store().path()).load();
    assert_eq!(saved, Some(origin));
    assert_eq!(*daemon.chime.played.lock().unwrap(), vec![ResetSource::Web]);

    let status = daemon.client.status().await.unwrap();
    assert_eq!(status.status, "ok");
    assert_eq!(status.uptime.formatted.line1, "00y 00mo 00d");
    assert!(status.uptime.total_seconds <= 1);

    let metrics = daemon.client.metrics().await.unwrap();
    assert!(metrics.contains("dnsfail_resets_total{source=\"web\"} 1"));
    assert!(metrics.contains("dnsfail_resets_total{source=\"button\"} 0"));

    daemon.shutdown.send(()).unwrap();
}

#[tokio::test]
async fn unknown_paths_are_client_errors() {
    let daemon = start_daemon().await;
    let addr = daemon.client.addr();

    let missing = raw_get(addr, "/api/v1/nope").await;
    assert!(missing.starts_with("HTTP/1.1 404"));
    assert!(missing.contains(r#""status":"error""#));

    let wrong_method = raw_get(addr, "/api/v1/reset").await;
    assert!(wrong_method.starts_with("HTTP/1.1 405"));
    assert_eq!(daemon.chime.played.lock().unwrap().len(), 0);

    daemon.shutdown.send(()).unwrap();
}

#[tokio::test]
async fn client_reports_unreachable_daemon() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = ControlClient::new(addr.to_string()).status().await.unwrap_err();
    assert!(format!("{:#}", err).contains("connecting to"));
}

#[tokio::test]
async fn web_page_and_legacy_routes_share_the_timer() {
    let daemon = start_daemon().await;
    let addr = daemon.client.addr();

    let page = raw_request(addr, "GET", "/").await;
    assert!(page.starts_with("HTTP/1.1 200"));
    assert!(page.contains("text/html"));
    assert!(page.contains("/api/v1/reset"));

    let reset = raw_request(addr, "POST", "/api/reset").await;
    assert!(reset.starts_with("HTTP/1.1 200"));
    assert!(reset.contains(r#""success":true"#));
    assert!(reset.contains("Timer reset successfully"));
    assert_eq!(*daemon.chime.played.lock().unwrap(), vec![ResetSource::Web]);

    let origin = daemon.timer.get_origin().to_rfc3339();
    let state = raw_request(addr, "GET", "/api/state").await;
    assert!(state.contains(&origin));

    daemon.shutdown.send(()).unwrap();
}

#[tokio::test]
async fn client_reads_chunked_keep_alive_responses() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = r#"{"status":"ok","timestamp":"2024-03-01T12:00:00+00:00"}"#;
    let (first, second) = body.split_at(20);

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf).await.unwrap();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
             Transfer-Encoding: chunked\r\nConnection: keep-alive\r\n\r\n\
             {:x}\r\n{}\r\n{:x}\r\n{}\r\n0\r\n\r\n",
            first.len(),
            first,
            second.len(),
            second
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        // Hold the connection open; the client must not wait for EOF.
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    });

    let health = tokio::time::timeout(
        std::time::Duration::from_secs(3),
        ControlClient::new(addr.to_string()).health(),
    )
    .await
    .expect("client waited for the connection to close")
    .unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.timestamp, "2024-03-01T12:00:00+00:00");
}

async fn raw_get(addr: &str, path: &str) -> String {
    raw_request(addr, "GET", path).await
}

async fn raw_request(addr: &str, method: &str, path: &str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nContent-Length: 0\r\n\r\n",
        method, path, addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}
