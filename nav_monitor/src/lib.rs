// THEORY:
// The monitor is a read-mostly window onto one navigation run. It never touches
// the engine's internals: it holds the same channels a `RunHandle` hands out
// (the status `watch`, the event `broadcast` sender to subscribe from, and the
// stop signal) and serves them over HTTP when the `web` feature is on.
//
// Routes:
// - `GET /status`     latest `StatusSnapshot` as JSON
// - `GET /ws/events`  every `NavEvent` as a JSON text frame
// - `POST /control/stop` requests a stop (202)
// - `GET /healthz`    liveness

use std::net::SocketAddr;

use minimap_nav::{NavEvent, RunHandle, StatusSnapshot, StopSignal};
use tokio::sync::{broadcast, watch};

pub const BIND_ENV: &str = "NAV_MONITOR_BIND";
pub const DEFAULT_BIND: &str = "127.0.0.1:3001";

#[derive(Clone)]
pub struct MonitorHandle {
    status: watch::Receiver<StatusSnapshot>,
    events: broadcast::Sender<NavEvent>,
    stop: StopSignal,
}

impl MonitorHandle {
    pub fn new(
        status: watch::Receiver<StatusSnapshot>,
        events: broadcast::Sender<NavEvent>,
        stop: StopSignal,
    ) -> Self {
        Self { status, events, stop }
    }

    pub fn from_run(run: &RunHandle) -> Self {
        Self::new(run.status_receiver(), run.event_sender(), run.stop_signal())
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NavEvent> {
        self.events.subscribe()
    }

    pub fn request_stop(&self) {
        tracing::info!("stop requested through monitor");
        self.stop.stop();
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var(BIND_ENV).unwrap_or_else(|_| DEFAULT_BIND.to_string()),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: DEFAULT_BIND.to_string() }
    }
}

pub struct RunningServer {
    pub local_addr: SocketAddr,
    pub task: tokio::task::JoinHandle<()>,
}

#[cfg(feature = "web")]
pub async fn start_server(monitor: MonitorHandle, cfg: ServerConfig) -> anyhow::Result<RunningServer> {
    use axum::extract::State;
    use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use futures_util::{SinkExt, StreamExt};
    use tokio::sync::broadcast::error::RecvError;

    async fn status(State(monitor): State<MonitorHandle>) -> Json<StatusSnapshot> {
        Json(monitor.status())
    }

    async fn stop(State(monitor): State<MonitorHandle>) -> StatusCode {
        monitor.request_stop();
        StatusCode::ACCEPTED
    }

    async fn events(ws: WebSocketUpgrade, State(monitor): State<MonitorHandle>) -> impl IntoResponse {
        let events = monitor.subscribe();
        ws.on_upgrade(move |socket| stream_events(socket, events))
    }

    async fn stream_events(socket: WebSocket, mut events: broadcast::Receiver<NavEvent>) {
        let (mut tx, mut rx) = socket.split();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(err) => {
                                tracing::warn!(%err, "event not serializable");
                                continue;
                            }
                        };
                        if tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "event subscriber lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                incoming = rx.next() => match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                },
            }
        }
        let _ = tx.close().await;
    }

    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/status", get(status))
        .route("/ws/events", get(events))
        .route("/control/stop", post(stop))
        .with_state(monitor);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("monitor listening on http://{local_addr}");

    let task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(%err, "monitor server stopped");
        }
    });
    Ok(RunningServer { local_addr, task })
}

#[cfg(not(feature = "web"))]
pub async fn start_server(_monitor: MonitorHandle, _cfg: ServerConfig) -> anyhow::Result<RunningServer> {
    Err(anyhow::anyhow!("web feature not enabled; rebuild nav_monitor with --features web"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use minimap_nav::OrchestratorState;

    fn monitor() -> (MonitorHandle, watch::Sender<StatusSnapshot>, StopSignal) {
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::default());
        let (events, _) = broadcast::channel(8);
        let stop = StopSignal::new();
        (MonitorHandle::new(status_rx, events, stop.clone()), status_tx, stop)
    }

    #[test]
    fn status_tracks_the_latest_snapshot() {
        let (monitor, status_tx, _) = monitor();
        assert_eq!(monitor.status().state, OrchestratorState::Idle);
        status_tx.send_modify(|s| {
            s.state = OrchestratorState::Running;
            s.current_point_index = 2;
        });
        let snapshot = monitor.status();
        assert_eq!(snapshot.state, OrchestratorState::Running);
        assert_eq!(snapshot.current_point_index, 2);
    }

    #[test]
    fn request_stop_trips_the_signal() {
        let (monitor, _status_tx, stop) = monitor();
        assert!(!stop.is_stopped());
        monitor.request_stop();
        assert!(stop.is_stopped());
    }

    #[test]
    fn default_bind_is_loopback() {
        assert_eq!(ServerConfig::default().bind_addr, "127.0.0.1:3001");
    }

    #[cfg(not(feature = "web"))]
    #[tokio::test]
    async fn start_server_needs_the_web_feature() {
        let (monitor, _status_tx, _) = monitor();
        assert!(start_server(monitor, ServerConfig::default()).await.is_err());
    }

    #[cfg(feature = "web")]
    #[tokio::test]
    async fn serves_health_and_stop() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        async fn request(addr: SocketAddr, line: &str) -> String {
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            let req = format!("{line} HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            stream.write_all(req.as_bytes()).await.unwrap();
            let mut out = String::new();
            stream.read_to_string(&mut out).await.unwrap();
            out
        }

        let (monitor, _status_tx, stop) = monitor();
        let server = start_server(monitor, ServerConfig { bind_addr: "127.0.0.1:0".into() })
            .await
            .unwrap();

        let health = request(server.local_addr, "GET /healthz").await;
        assert!(health.starts_with("HTTP/1.1 200"), "{health}");
        assert!(health.ends_with("ok"));

        let status = request(server.local_addr, "GET /status").await;
        assert!(status.contains("\"state\":\"IDLE\""), "{status}");

        let stopped = request(server.local_addr, "POST /control/stop").await;
        assert!(stopped.starts_with("HTTP/1.1 202"), "{stopped}");
        assert!(stop.is_stopped());

        server.task.abort();
    }
}
