//! Connection - handles an individual realtime client.
//!
//! Each connection runs in its own task: a unified `tokio::select!` loop
//! over inbound WebSocket frames and the outbound event channel other tasks
//! fan into. A connection starts anonymous; the first successful `join`
//! establishes its session, and everything else is rejected until then.
//! Disconnect cleanup (participant removal, lock release) runs inline before
//! the task exits, never deferred to a sweep.

use crate::error::SessionError;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::session::{Broker, JoinRequest, SessionCtx};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Outbound events buffered per connection before fan-out applies
/// backpressure to the broadcasting task.
const OUTGOING_BUFFER: usize = 64;

/// A realtime client connection handler.
pub struct Connection {
    conn_id: String,
    addr: SocketAddr,
    ws: WebSocketStream<TcpStream>,
    broker: Arc<Broker>,
}

impl Connection {
    pub fn new(
        conn_id: String,
        ws: WebSocketStream<TcpStream>,
        addr: SocketAddr,
        broker: Arc<Broker>,
    ) -> Self {
        Self {
            conn_id,
            addr,
            ws,
            broker,
        }
    }

    /// Run the connection loop until the client leaves or the socket drops.
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            conn_id,
            addr,
            ws,
            broker,
        } = self;
        // Split so inbound frames and outbound fan-out can interleave in one
        // select loop.
        let (mut ws_tx, mut ws_rx) = ws.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<ServerEvent>(OUTGOING_BUFFER);
        broker.hub.register_sender(&conn_id, outgoing_tx);

        let mut session: Option<SessionCtx> = None;

        loop {
            tokio::select! {
                frame = ws_rx.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            let event = match serde_json::from_str::<ClientEvent>(&text) {
                                Ok(event) => event,
                                Err(e) => {
                                    debug!(conn = %conn_id, error = %e, "Malformed event");
                                    let err = SessionError::Malformed(e.to_string());
                                    broker.hub.send_to(&conn_id, err.to_event()).await;
                                    continue;
                                }
                            };

                            if matches!(event, ClientEvent::Leave) {
                                break;
                            }
                            if let Err(e) = dispatch(&broker, &conn_id, event, &mut session).await {
                                debug!(
                                    conn = %conn_id,
                                    code = e.error_code(),
                                    "Event rejected"
                                );
                                broker.hub.send_to(&conn_id, e.to_event()).await;
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws_tx.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!(conn = %conn_id, %addr, "Client disconnected");
                            break;
                        }
                        Some(Ok(_)) => {
                            // Binary and pong frames carry nothing for us.
                        }
                        Some(Err(e)) => {
                            warn!(conn = %conn_id, error = %e, "Read error");
                            break;
                        }
                    }
                }

                Some(event) = outgoing_rx.recv() => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(conn = %conn_id, error = %e, "Event encode failed");
                            continue;
                        }
                    };
                    if let Err(e) = ws_tx.send(Message::Text(text)).await {
                        warn!(conn = %conn_id, error = %e, "Write error");
                        break;
                    }
                }
            }
        }

        if let Some(ctx) = &session {
            broker.disconnect(ctx).await;
        }
        broker.hub.unregister_sender(&conn_id);

        Ok(())
    }
}

/// Route one client event to the broker, establishing the session on `join`.
async fn dispatch(
    broker: &Broker,
    conn_id: &str,
    event: ClientEvent,
    session: &mut Option<SessionCtx>,
) -> Result<(), SessionError> {
    if let ClientEvent::Join {
        project_id,
        user_id,
        name,
        email,
        section_id,
        content,
    } = event
    {
        // A second join on the same connection moves the session; release
        // the old one first so its locks don't linger until the sweep.
        if let Some(old) = session.take() {
            broker.disconnect(&old).await;
        }
        let ctx = broker
            .join(
                conn_id,
                JoinRequest {
                    project_id,
                    user_id,
                    name,
                    email,
                    section_id,
                    content,
                },
            )
            .await?;
        *session = Some(ctx);
        return Ok(());
    }

    let ctx = session.as_ref().ok_or(SessionError::NotJoined)?;
    match event {
        ClientEvent::SectionChange { section_id } => {
            broker.section_change(ctx, &section_id).await
        }
        ClientEvent::ContentUpdate {
            section_id,
            content,
            base_content,
            patch,
        } => {
            broker
                .content_update(ctx, &section_id, content, base_content, patch)
                .await
        }
        ClientEvent::Cursor {
            section_id,
            position,
            selection_start,
            selection_end,
        } => {
            broker
                .cursor(ctx, &section_id, position, selection_start, selection_end)
                .await
        }
        ClientEvent::CommentAdd {
            text,
            selection,
            thread_id,
            parent_id,
            task_id,
        } => broker
            .comment_add(ctx, text, selection, thread_id, parent_id, task_id)
            .await
            .map(|_| ()),
        ClientEvent::CommentUpdate { comment_id, status } => broker
            .comment_update(ctx, &comment_id, status)
            .await
            .map(|_| ()),
        ClientEvent::LockRequest {
            section_id,
            start,
            end,
        } => broker.lock_request(ctx, &section_id, start, end).await,
        ClientEvent::LockRenew { lock_id } => broker.lock_renew(ctx, &lock_id).await,
        ClientEvent::LockRelease { lock_id } => broker.lock_release(ctx, &lock_id).await,
        // Join and Leave are handled before dispatch.
        ClientEvent::Join { .. } | ClientEvent::Leave => Ok(()),
    }
}
