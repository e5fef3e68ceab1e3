// Framework bootstrap: tracing, the axum WebSocket front end, and the
// socket pump that adapts one WebSocket into the `Connection` port.

use crate::frameworks::config;
use crate::domain::ids::{ClientId, SessionId};
use crate::interface_adapters::connection::{Connection, ConnectionError, WireFrame};
use crate::use_cases::realm::LandRealm;
use crate::use_cases::router::LandRouter;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use std::io::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

#[derive(Clone)]
struct AppState {
    realm: Arc<LandRealm>,
    router: Arc<LandRouter>,
}

pub async fn run(
    listener: tokio::net::TcpListener,
    realm: Arc<LandRealm>,
    router: Arc<LandRouter>,
) -> Result<()> {
    let address = listener.local_addr()?;
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(health_handler))
        .with_state(AppState { realm, router });

    tracing::info!(%address, "listening");

    axum::serve(listener, app).await.inspect_err(|e| {
        tracing::error!(error = %e, "server error");
    })
}

pub async fn run_with_config(realm: Arc<LandRealm>, router: Arc<LandRouter>) -> Result<()> {
    init_runtime();

    let address = SocketAddr::from(([127, 0, 0, 1], config::http_port()));
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .inspect_err(|e| {
            tracing::error!(%address, error = %e, "failed to bind");
        })?;

    run(listener, realm, router).await
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.realm.health_check().await)
}

#[derive(Debug, serde::Deserialize)]
struct ConnectQuery {
    // Stable client/device key; falls back to the session id.
    #[serde(default)]
    client_id: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.router, query.client_id))
}

enum Outbound {
    Frame(WireFrame),
    Close,
}

/// `Connection` port over the socket's writer task.
struct WsConnection {
    tx: mpsc::Sender<Outbound>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&self, frame: WireFrame) -> std::result::Result<(), ConnectionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }
        self.tx
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Outbound::Close).await;
        }
    }
}

async fn handle_socket(socket: WebSocket, router: Arc<LandRouter>, client_id: Option<String>) {
    let session_id = SessionId::new(Uuid::new_v4().to_string());
    let client_id = ClientId::new(client_id.unwrap_or_else(|| session_id.to_string()));

    let (mut writer, mut reader) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(64);

    // Writer task: the only place that touches the sink.
    let writer_session = session_id.clone();
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            let message = match item {
                Outbound::Frame(WireFrame::Text(text)) => Message::Text(text.into()),
                Outbound::Frame(WireFrame::Binary(bytes)) => Message::Binary(bytes),
                Outbound::Close => {
                    let _ = writer.send(Message::Close(None)).await;
                    break;
                }
            };
            if let Err(err) = writer.send(message).await {
                debug!(session_id = %writer_session, error = %err, "socket write failed");
                break;
            }
        }
    });

    let conn = Arc::new(WsConnection {
        tx,
        closed: AtomicBool::new(false),
    });
    router
        .on_connect(session_id.clone(), client_id.clone(), None, conn.clone())
        .await;
    info!(%session_id, %client_id, "client connected");

    // The join must arrive within the handshake window.
    let mut first = true;
    loop {
        let incoming = if first {
            match timeout(config::join_timeout(), reader.next()).await {
                Ok(incoming) => incoming,
                Err(_) => {
                    warn!(%session_id, "no join within handshake window; closing");
                    break;
                }
            }
        } else {
            reader.next().await
        };

        let Some(incoming) = incoming else {
            break;
        };
        let message = match incoming {
            Ok(message) => message,
            Err(err) => {
                debug!(%session_id, error = %err, "websocket recv error");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                first = false;
                router
                    .on_message(&session_id, WireFrame::Text(text.to_string()))
                    .await;
            }
            Message::Binary(bytes) => {
                first = false;
                router
                    .on_message(&session_id, WireFrame::Binary(bytes))
                    .await;
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
        }
    }

    conn.close().await;
    router.on_disconnect(&session_id).await;
    info!(%session_id, "client disconnected");
}
