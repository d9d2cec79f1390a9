//! Test client for the realtime channel.
//!
//! Speaks the JSON event protocol over a real WebSocket. Events are handled
//! as raw `serde_json::Value`s so tests assert on the wire shape directly.

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected realtime test client.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Open a WebSocket to the server.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (ws, _) = connect_async(url).await?;
        Ok(Self { ws })
    }

    /// Send one event frame.
    pub async fn send(&mut self, event: Value) -> anyhow::Result<()> {
        self.ws.send(Message::Text(event.to_string())).await?;
        Ok(())
    }

    /// Join a project section, seeding the section cache with `content`.
    pub async fn join(
        &mut self,
        project_id: &str,
        user_id: &str,
        name: &str,
        section_id: &str,
        content: &str,
    ) -> anyhow::Result<()> {
        self.send(json!({
            "type": "join",
            "projectId": project_id,
            "userId": user_id,
            "name": name,
            "email": null,
            "sectionId": section_id,
            "content": content,
        }))
        .await
    }

    /// Leave the session cleanly.
    pub async fn leave(&mut self) -> anyhow::Result<()> {
        self.send(json!({ "type": "leave" })).await
    }

    /// Read events until one matches the predicate, returning it. Other
    /// events are discarded. Fails after five seconds.
    pub async fn recv_until(
        &mut self,
        mut pred: impl FnMut(&Value) -> bool,
    ) -> anyhow::Result<Value> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let frame = tokio::time::timeout(remaining, self.ws.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for event"))?;
            match frame {
                Some(Ok(Message::Text(text))) => {
                    let event: Value = serde_json::from_str(&text)?;
                    if pred(&event) {
                        return Ok(event);
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => anyhow::bail!("connection closed"),
            }
        }
    }

    /// Read events until one with the given `type` tag arrives.
    pub async fn recv_type(&mut self, event_type: &str) -> anyhow::Result<Value> {
        self.recv_until(|e| e["type"] == event_type).await
    }
}
