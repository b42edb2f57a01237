//! The local HTTP control surface, and a client for it.
//!
//! Endpoints (JSON unless noted, one request per connection):
//!
//! - `GET  /`: the browser page (HTML)
//! - `GET  /api/v1/status`: origin and formatted elapsed time
//! - `POST /api/v1/reset`: reset the timer
//! - `GET  /api/v1/health`: liveness
//! - `GET  /metrics`: Prometheus text format
//! - `GET  /api/state`, `POST /api/reset`: the older `{"success": ..}` API,
//!   kept for existing scripts
//!
//! There is no authentication; bind it to a trusted network only.

use crate::common::{ResetSource, Timestamp};
use crate::formatter::format_elapsed;
use crate::timer::TimerState;
use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use chrono_tz::Tz;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn, Instrument};

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_HEADER_LINES: usize = 100;
const MAX_LINE_BYTES: u64 = 8 * 1024;

const JSON: &str = "application/json";
const HTML: &str = "text/html; charset=utf-8";
const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4";

const INDEX_PAGE: &str = include_str!("../assets/index.html");

fn iso(timestamp: Timestamp) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedElapsed {
    pub line1: String,
    pub line2: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uptime {
    pub total_seconds: i64,
    pub formatted: FormattedElapsed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub last_reset: String,
    pub last_reset_local: String,
    pub uptime: Uptime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub status: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
}

/// Body of `GET /api/state` and `POST /api/reset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyStateResponse {
    pub success: bool,
    pub last_reset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// An HTTP response, before it is written out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    fn json<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_string(body) {
            Ok(body) => Self {
                status,
                content_type: JSON,
                body,
            },
            Err(e) => Self::error(500, &format!("could not encode response: {}", e)),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        let body = ErrorResponse {
            status: "error".to_string(),
            message: message.to_string(),
        };
        Self {
            status,
            content_type: JSON,
            body: serde_json::to_string(&body).unwrap_or_default(),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            _ => "Internal Server Error",
        }
    }

    fn to_http(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len(),
            self.body
        )
    }
}

const KNOWN_PATHS: [&str; 7] = [
    "/",
    "/api/v1/status",
    "/api/v1/reset",
    "/api/v1/health",
    "/metrics",
    "/api/state",
    "/api/reset",
];

/// What request handlers need: the timer, and the zone for local times.
pub struct ControlContext {
    pub timer: Arc<TimerState>,
    pub timezone: Tz,
}

impl ControlContext {
    pub fn new(timer: Arc<TimerState>, timezone: Tz) -> Self {
        Self { timer, timezone }
    }

    /// Answers one request. Both reset routes go through [`TimerState::reset`].
    pub async fn route(&self, method: &str, target: &str) -> Response {
        let path = target.split('?').next().unwrap_or(target);
        match (method, path) {
            ("GET", "/") => Response {
                status: 200,
                content_type: HTML,
                body: INDEX_PAGE.to_string(),
            },
            ("GET", "/api/v1/status") => self.status(),
            ("POST", "/api/v1/reset") => {
                // Report the value reset() returned; reading it back could race another reset.
                let origin = self.timer.reset(ResetSource::Web).await;
                Response::json(
                    200,
                    &ResetResponse {
                        status: "ok".to_string(),
                        message: "Counter reset successfully".to_string(),
                        timestamp: iso(origin),
                    },
                )
            }
            ("GET", "/api/v1/health") => Response::json(
                200,
                &HealthResponse {
                    status: "ok".to_string(),
                    timestamp: iso(Utc::now()),
                },
            ),
            ("GET", "/metrics") => Response {
                status: 200,
                content_type: PROMETHEUS_TEXT,
                body: self
                    .timer
                    .metrics()
                    .render(Utc::now(), self.timer.get_origin()),
            },
            ("GET", "/api/state") => Response::json(
                200,
                &LegacyStateResponse {
                    success: true,
                    last_reset: iso(self.timer.get_origin()),
                    message: None,
                },
            ),
            ("POST", "/api/reset") => {
                let origin = self.timer.reset(ResetSource::Web).await;
                Response::json(
                    200,
                    &LegacyStateResponse {
                        success: true,
                        last_reset: iso(origin),
                        message: Some("Timer reset successfully".to_string()),
                    },
                )
            }
            (_, path) if KNOWN_PATHS.contains(&path) => {
                Response::error(405, &format!("{} not allowed on {}", method, path))
            }
            _ => Response::error(404, &format!("no route for {}", path)),
        }
    }

    fn status(&self) -> Response {
        let now = Utc::now();
        let origin = self.timer.get_origin();
        let (line1, line2) = format_elapsed(now, origin);
        Response::json(
            200,
            &StatusResponse {
                status: "ok".to_string(),
                last_reset: iso(origin),
                last_reset_local: origin
                    .with_timezone(&self.timezone)
                    .to_rfc3339_opts(SecondsFormat::AutoSi, false),
                uptime: Uptime {
                    total_seconds: now.signed_duration_since(origin).num_seconds().max(0),
                    formatted: FormattedElapsed { line1, line2 },
                },
            },
        )
    }
}

/// Accepts control connections until shutdown.
pub struct ControlServer {
    listener: TcpListener,
    context: Arc<ControlContext>,
}

impl ControlServer {
    pub async fn bind(addr: &str, context: ControlContext) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding control surface to {}", addr))?;
        Ok(Self {
            listener,
            context: Arc::new(context),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("Control surface listening on http://{}", addr);
        }
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let context = Arc::clone(&self.context);
                        let span = tracing::debug_span!("request", %peer);
                        tokio::spawn(
                            async move {
                                if let Err(e) = handle_connection(stream, &context).await {
                                    debug!("Connection ended with error: {:#}", e);
                                }
                            }
                            .instrument(span),
                        );
                    }
                    Err(e) => warn!("Failed to accept control connection: {}", e),
                }
            }
        }
        info!("Control surface stopped");
    }
}

async fn handle_connection(stream: TcpStream, context: &ControlContext) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let response = match tokio::time::timeout(READ_TIMEOUT, read_request_head(&mut reader)).await {
        Ok(Ok((method, target))) => {
            debug!("{} {}", method, target);
            context.route(&method, &target).await
        }
        Ok(Err(e)) => {
            debug!("Malformed request: {:#}", e);
            Response::error(400, "malformed request")
        }
        Err(_) => bail!("timed out reading request"),
    };

    writer.write_all(response.to_http().as_bytes()).await?;
    writer.shutdown().await?;
    Ok(())
}

/// Reads the request line and skips the headers; returns method and target.
async fn read_request_head<R>(reader: &mut R) -> Result<(String, String)>
where
    R: AsyncBufReadExt + Unpin,
{
    let request_line = read_bounded_line(reader).await?;
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        bail!("bad request line {:?}", request_line);
    };
    if !version.starts_with("HTTP/1.") {
        bail!("unsupported protocol {:?}", version);
    }
    let head = (method.to_ascii_uppercase(), target.to_string());

    for _ in 0..MAX_HEADER_LINES {
        if read_bounded_line(reader).await?.is_empty() {
            return Ok(head);
        }
    }
    bail!("too many header lines")
}

async fn read_bounded_line<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    let read = (&mut *reader)
        .take(MAX_LINE_BYTES)
        .read_line(&mut line)
        .await?;
    if read == 0 {
        bail!("connection closed mid-request");
    }
    if !line.ends_with('\n') {
        bail!("request line too long");
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Talks to a running daemon's control surface.
#[derive(Debug, Clone)]
pub struct ControlClient {
    addr: String,
    http: reqwest::Client,
}

impl ControlClient {
    pub fn new(addr: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("Could not configure HTTP client ({}); using defaults.", e);
                reqwest::Client::new()
            });
        Self {
            addr: addr.into(),
            http,
        }
    }

    /// A client for the daemon configured with `host`/`port`. A wildcard bind
    /// address is reached over loopback.
    pub fn for_local_daemon(host: &str, port: u16) -> Self {
        let host = match host {
            "0.0.0.0" | "" => "127.0.0.1",
            "::" => "::1",
            other => other,
        };
        let addr = if host.contains(':') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        Self::new(addr)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        self.send(Method::GET, "/api/v1/status")
            .await?
            .json()
            .await
            .context("decoding status response")
    }

    pub async fn reset(&self) -> Result<ResetResponse> {
        self.send(Method::POST, "/api/v1/reset")
            .await?
            .json()
            .await
            .context("decoding reset response")
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.send(Method::GET, "/api/v1/health")
            .await?
            .json()
            .await
            .context("decoding health response")
    }

    pub async fn metrics(&self) -> Result<String> {
        self.send(Method::GET, "/metrics")
            .await?
            .text()
            .await
            .context("reading metrics response")
    }

    /// Sends one request and turns a non-2xx answer into an error carrying
    /// the server's message.
    async fn send(&self, method: Method, path: &str) -> Result<reqwest::Response> {
        let url = format!("http://{}{}", self.addr, path);
        let response = self
            .http
            .request(method.clone(), &url)
            .send()
            .await
            .with_context(|| format!("connecting to {}", self.addr))?;

        let status_error = response.error_for_status_ref().err();
        if let Some(e) = status_error {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|err| err.message)
                .unwrap_or(body);
            bail!("{} {} failed: {} ({})", method, path, message, e);
        }
        Ok(response)
    }
}
