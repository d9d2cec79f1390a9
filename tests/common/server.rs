//! Test server management.
//!
//! Spawns and manages scribed instances for end-to-end testing.

use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::sleep;

/// A test server instance running the real binary.
pub struct TestServer {
    child: Child,
    ws_port: u16,
    _data_dir: tempfile::TempDir,
}

impl TestServer {
    /// Spawn a server with the realtime socket on `ws_port` and the HTTP
    /// API on `http_port`. No database section: the server runs in memory.
    pub async fn spawn(ws_port: u16, http_port: u16) -> anyhow::Result<Self> {
        let data_dir = tempfile::tempdir()?;
        let config_path = data_dir.path().join("config.toml");
        let config_content = format!(
            r#"
[server]
name = "scribed.test"
description = "test instance"

[listen]
address = "127.0.0.1:{ws_port}"

[http]
address = "127.0.0.1:{http_port}"
"#
        );
        std::fs::write(&config_path, config_content)?;

        let child = Command::new(env!("CARGO_BIN_EXE_scribed"))
            .arg(&config_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        // Wait for the realtime listener to come up.
        for _ in 0..50 {
            if TcpStream::connect(("127.0.0.1", ws_port)).await.is_ok() {
                return Ok(Self {
                    child,
                    ws_port,
                    _data_dir: data_dir,
                });
            }
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("server did not start on port {ws_port}")
    }

    /// WebSocket URL for the realtime socket.
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.ws_port)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
