use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use crossbeam::queue::SegQueue;
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;

use crate::error::SourceError;
use crate::protocol::{ChangeEvent, ChangeKind, ChangeStream};

const HEARTBEAT_TIMEOUT_MS: u64 = 30_000;

/// Websocket adapter for the backend's change-notification channel.
///
/// A reader thread with its own current-thread runtime drains the socket
/// into a lock-free queue; `poll_event` pops from that queue. Each
/// `connect` supersedes any previous reader through the epoch counter, so
/// reconnecting is idempotent.
pub struct WsChangeStream {
    endpoint: String,
    connected: bool,
    queue: Arc<SegQueue<ChangeEvent>>,
    ws_running: Arc<AtomicBool>,
    ws_epoch: Arc<AtomicU64>,
    last_message_ms: Arc<AtomicU64>,
}

impl WsChangeStream {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let now_ms = now_millis();
        Self {
            endpoint: endpoint.into(),
            connected: false,
            queue: Arc::new(SegQueue::new()),
            ws_running: Arc::new(AtomicBool::new(false)),
            ws_epoch: Arc::new(AtomicU64::new(0)),
            last_message_ms: Arc::new(AtomicU64::new(now_ms)),
        }
    }

    fn spawn_ws_reader(&self) {
        let queue = Arc::clone(&self.queue);
        let ws_running = Arc::clone(&self.ws_running);
        let ws_epoch = Arc::clone(&self.ws_epoch);
        let last_message_ms = Arc::clone(&self.last_message_ms);
        let endpoint = self.endpoint.clone();
        let current_epoch = ws_epoch.fetch_add(1, Ordering::AcqRel) + 1;

        ws_running.store(true, Ordering::Release);
        thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(_) => {
                    ws_running.store(false, Ordering::Release);
                    return;
                }
            };

            runtime.block_on(async move {
                let connection = tokio_tungstenite::connect_async(endpoint).await;
                let (stream, _) = match connection {
                    Ok(ok) => ok,
                    Err(_) => {
                        ws_running.store(false, Ordering::Release);
                        return;
                    }
                };

                let (_write, mut read) = stream.split();
                while let Some(msg) = read.next().await {
                    if ws_epoch.load(Ordering::Acquire) != current_epoch {
                        break;
                    }

                    match msg {
                        Ok(Message::Text(text)) => {
                            if let Some(event) = parse_change_event(&text) {
                                queue.push(event);
                            }
                            last_message_ms.store(now_millis(), Ordering::Relaxed);
                        }
                        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                            last_message_ms.store(now_millis(), Ordering::Relaxed);
                        }
                        Ok(Message::Close(_)) => break,
                        Err(_) => break,
                        _ => {}
                    }
                }

                if ws_epoch.load(Ordering::Acquire) == current_epoch {
                    ws_running.store(false, Ordering::Release);
                }
            });
        });
    }
}

impl ChangeStream for WsChangeStream {
    fn connect(&mut self) -> Result<(), SourceError> {
        self.connected = true;
        self.last_message_ms.store(now_millis(), Ordering::Relaxed);
        self.spawn_ws_reader();
        Ok(())
    }

    fn poll_event(&mut self) -> Result<Option<ChangeEvent>, SourceError> {
        if !self.connected {
            return Err(SourceError::NotConnected);
        }
        Ok(self.queue.pop())
    }

    fn disconnect(&mut self) -> Result<(), SourceError> {
        // Bumping the epoch makes any live reader bail on its next
        // message; the socket is dropped with it.
        self.ws_epoch.fetch_add(1, Ordering::AcqRel);
        self.ws_running.store(false, Ordering::Release);
        self.connected = false;
        Ok(())
    }

    fn heartbeat(&mut self) -> Result<(), SourceError> {
        if !self.connected {
            return Err(SourceError::NotConnected);
        }

        let now = now_millis();
        let last = self.last_message_ms.load(Ordering::Relaxed);
        if !self.ws_running.load(Ordering::Acquire)
            && now.saturating_sub(last) > HEARTBEAT_TIMEOUT_MS
        {
            self.connected = false;
            return Err(SourceError::Transport(
                "change stream reader stopped".to_string(),
            ));
        }
        Ok(())
    }
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

pub(crate) fn parse_change_event(text: &str) -> Option<ChangeEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let payload = value.get("payload").unwrap_or(&value);

    let kind = match value.get("event").and_then(|x| x.as_str())? {
        "INSERT" => ChangeKind::Insert,
        "UPDATE" => ChangeKind::Update,
        "DELETE" => ChangeKind::Delete,
        _ => return None,
    };
    let table = value
        .get("table")
        .or_else(|| payload.get("table"))
        .and_then(|x| x.as_str())?
        .to_string();
    let column = value
        .get("column")
        .or_else(|| payload.get("column"))
        .and_then(|x| x.as_str())
        .map(|x| x.to_string());

    Some(ChangeEvent {
        kind,
        table,
        column,
    })
}
