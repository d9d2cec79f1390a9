//! Gateway - WebSocket listener that accepts incoming connections.
//!
//! The Gateway binds the realtime socket and spawns a Connection task for
//! each accepted client. Origin checking happens during the WebSocket
//! handshake, before any session state exists.

use crate::config::WebSocketConfig;
use crate::net::Connection;
use crate::session::Broker;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_hdr_async;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// The Gateway accepts incoming WebSocket connections and spawns handlers.
pub struct Gateway {
    listener: TcpListener,
    websocket: WebSocketConfig,
    broker: Arc<Broker>,
}

impl Gateway {
    /// Bind the gateway to the realtime address.
    pub async fn bind(
        addr: SocketAddr,
        websocket: WebSocketConfig,
        broker: Arc<Broker>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "Realtime listener bound");
        Ok(Self {
            listener,
            websocket,
            broker,
        })
    }

    /// Run the gateway, accepting connections forever.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let broker = Arc::clone(&self.broker);
                    let allowed = self.websocket.allow_origins.clone();
                    let conn_id = Uuid::new_v4().to_string();

                    tokio::spawn(async move {
                        // Origin validation callback for the WebSocket handshake.
                        let cors_callback =
                            |req: &http::Request<()>, response: http::Response<()>| {
                                // An empty allow list means allow all origins.
                                if allowed.is_empty() {
                                    return Ok(response);
                                }

                                if let Some(origin) = req
                                    .headers()
                                    .get("Origin")
                                    .and_then(|o| o.to_str().ok())
                                {
                                    if allowed.iter().any(|a| a == origin || a == "*") {
                                        return Ok(response);
                                    }
                                    warn!(%addr, origin = %origin, "WebSocket origin rejected");
                                }

                                Err(http::Response::builder()
                                    .status(http::StatusCode::FORBIDDEN)
                                    .body(Some("origin not allowed".to_string()))
                                    .unwrap())
                            };

                        match accept_hdr_async(stream, cors_callback).await {
                            Ok(ws_stream) => {
                                info!(conn = %conn_id, %addr, "WebSocket handshake successful");
                                let connection =
                                    Connection::new(conn_id.clone(), ws_stream, addr, broker);
                                if let Err(e) = connection.run().await {
                                    error!(conn = %conn_id, %addr, error = %e, "Connection error");
                                }
                                info!(conn = %conn_id, %addr, "Connection closed");
                            }
                            Err(e) => {
                                warn!(%addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}
