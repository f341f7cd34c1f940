/// Realtime push client.
///
/// Manages one outgoing WebSocket connection per pipeline. Each frame is
/// a JSON `DealEvent` merged straight into the board store; the server
/// confirmation of a local move may arrive here as an echo, which the
/// store's single-owner merge absorbs in any order.
use std::collections::HashMap;
use std::sync::Arc;

use dealboard_core::realtime::DealEvent;
use dealboard_core::store::BoardStore;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::config::SyncConfig;

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("Already connected to pipeline {0}")]
    AlreadyConnected(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Info about an active realtime connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConnectionInfo {
    pub pipeline_id: String,
    pub ws_url: String,
    pub status: String,
}

struct RealtimeConnection {
    ws_url: String,
    ws_task: JoinHandle<()>,
}

#[derive(Default)]
pub struct RealtimeManager {
    connections: HashMap<String, RealtimeConnection>,
}

impl RealtimeManager {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Spawn a realtime task for a pipeline, feeding events into `store`.
    pub fn connect(
        &mut self,
        config: &SyncConfig,
        pipeline_id: &str,
        store: Arc<BoardStore>,
    ) -> Result<(), RealtimeError> {
        if self.connections.contains_key(pipeline_id) {
            return Err(RealtimeError::AlreadyConnected(pipeline_id.to_string()));
        }

        let ws_url = config.ws_url(pipeline_id);
        let task_url = ws_url.clone();
        let task_pipeline = pipeline_id.to_string();

        let ws_task = tokio::spawn(async move {
            if let Err(e) = run_realtime_client(&task_url, store).await {
                log::error!(
                    "[realtime_client] connection for pipeline {} failed: {}",
                    task_pipeline,
                    e
                );
            }
        });

        self.connections.insert(
            pipeline_id.to_string(),
            RealtimeConnection { ws_url, ws_task },
        );
        Ok(())
    }

    /// Tear down the realtime task for a pipeline.
    pub fn disconnect(&mut self, pipeline_id: &str) {
        if let Some(conn) = self.connections.remove(pipeline_id) {
            conn.ws_task.abort();
            log::info!("[realtime_client] Disconnected from pipeline {}", pipeline_id);
        }
    }

    pub fn list_connections(&self) -> Vec<RealtimeConnectionInfo> {
        self.connections
            .iter()
            .map(|(pipeline_id, conn)| RealtimeConnectionInfo {
                pipeline_id: pipeline_id.clone(),
                ws_url: conn.ws_url.clone(),
                status: if conn.ws_task.is_finished() {
                    "disconnected".to_string()
                } else {
                    "connected".to_string()
                },
            })
            .collect()
    }
}

async fn run_realtime_client(ws_url: &str, store: Arc<BoardStore>) -> Result<(), RealtimeError> {
    use tokio_tungstenite::tungstenite::Message;

    let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
        .await
        .map_err(|e| RealtimeError::WebSocket(format!("connect failed: {}", e)))?;

    log::info!("[realtime_client] Connected to {}", ws_url);

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    while let Some(msg) = ws_rx.next().await {
        let msg = msg.map_err(|e| RealtimeError::WebSocket(format!("read error: {}", e)))?;
        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Close(_) => {
                log::info!("[realtime_client] Channel closed for {}", ws_url);
                break;
            }
            Message::Ping(data) => {
                let _ = ws_tx.send(Message::Pong(data)).await;
                continue;
            }
            _ => continue,
        };

        // A malformed frame is skipped rather than killing the channel;
        // the board stays consistent and later frames still apply.
        let event: DealEvent = match serde_json::from_str(&text) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("[realtime_client] Unparseable frame ({}): {}", e, text);
                continue;
            }
        };

        store.apply_event(&event);
    }

    Ok(())
}
