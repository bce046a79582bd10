//! Realtime channel over the service's Phoenix websocket
//!
//! One websocket connection per joined channel. The connection task sends the
//! join frame, keeps the socket alive with heartbeats, forwards matching
//! `postgres_changes` frames as [`ChangeEvent`]s and sends `phx_leave` when the
//! subscription ends. A renewed access token is pushed to the channel on the
//! next heartbeat.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use crate::error::BackendError;
use crate::realtime::{ChangeEvent, ChangeFilter, ChangeKind, ChangeSubscription};

/// Phoenix protocol version spoken by the client
const PROTOCOL_VSN: &str = "1.0.0";

/// One Phoenix frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Frame {
    pub(crate) topic: String,
    pub(crate) event: String,
    #[serde(default)]
    pub(crate) payload: Value,
    #[serde(rename = "ref", default)]
    pub(crate) reference: Option<String>,
}

impl Frame {
    fn new(topic: impl Into<String>, event: &str, payload: Value, reference: u64) -> Self {
        Self {
            topic: topic.into(),
            event: event.to_string(),
            payload,
            reference: Some(reference.to_string()),
        }
    }
}

/// Supplies the access token a channel should be authorized with
#[async_trait]
pub(crate) trait TokenSource: Send + Sync {
    /// Current token, renewed if it expired
    async fn access_token(&self) -> String;
}

/// Topic name of a channel
pub(crate) fn topic(channel: &str) -> String {
    format!("realtime:{channel}")
}

/// Websocket endpoint for a project base URL
pub(crate) fn websocket_url(base_url: &str, anon_key: &str) -> Result<String, BackendError> {
    let rest = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(BackendError::Config(format!(
            "cannot derive websocket url from {base_url}"
        )));
    };
    Ok(format!(
        "{}/realtime/v1/websocket?apikey={anon_key}&vsn={PROTOCOL_VSN}",
        rest.trim_end_matches('/')
    ))
}

/// `phx_join` frame carrying the change filters
pub(crate) fn join_frame(
    channel: &str,
    filters: &[ChangeFilter],
    access_token: &str,
    reference: u64,
) -> Frame {
    let changes: Vec<Value> = filters
        .iter()
        .map(|filter| {
            let mut change = json!({
                "event": filter.event,
                "schema": filter.schema,
                "table": filter.table,
            });
            if let Some(predicate) = filter.row_predicate() {
                change["filter"] = Value::String(predicate);
            }
            change
        })
        .collect();

    Frame::new(
        topic(channel),
        "phx_join",
        json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": changes,
            },
            "access_token": access_token,
        }),
        reference,
    )
}

pub(crate) fn heartbeat_frame(reference: u64) -> Frame {
    Frame::new("phoenix", "heartbeat", json!({}), reference)
}

pub(crate) fn leave_frame(channel: &str, reference: u64) -> Frame {
    Frame::new(topic(channel), "phx_leave", json!({}), reference)
}

pub(crate) fn access_token_frame(channel: &str, access_token: &str, reference: u64) -> Frame {
    Frame::new(
        topic(channel),
        "access_token",
        json!({ "access_token": access_token }),
        reference,
    )
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: ChangeKind,
    schema: String,
    table: String,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
    #[serde(default)]
    commit_timestamp: Option<String>,
}

/// Extract a row change from a `postgres_changes` frame
pub(crate) fn decode_change(frame: &Frame) -> Option<ChangeEvent> {
    if frame.event != "postgres_changes" {
        return None;
    }
    let data = frame.payload.get("data")?.clone();
    let data: ChangeData = match serde_json::from_value(data) {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!(error = %e, "malformed postgres_changes payload");
            return None;
        }
    };
    let empty = || Value::Object(serde_json::Map::new());
    Some(ChangeEvent {
        kind: data.kind,
        schema: data.schema,
        table: data.table,
        record: data.record.unwrap_or_else(empty),
        old_record: data.old_record.unwrap_or_else(empty),
        commit_timestamp: data.commit_timestamp,
    })
}

/// What the connection loop should do with an incoming frame
#[derive(Debug, PartialEq)]
pub(crate) enum Incoming {
    Deliver(ChangeEvent),
    Ignore,
    Close(String),
}

pub(crate) fn classify(frame: &Frame, channel: &str, filters: &[ChangeFilter]) -> Incoming {
    if frame.topic != topic(channel) {
        return Incoming::Ignore;
    }
    match frame.event.as_str() {
        "postgres_changes" => match decode_change(frame) {
            Some(event) if filters.iter().any(|f| f.matches(&event)) => Incoming::Deliver(event),
            _ => Incoming::Ignore,
        },
        "phx_reply" => {
            let status = frame.payload.get("status").and_then(Value::as_str);
            if status == Some("error") {
                let reason = frame
                    .payload
                    .pointer("/response/reason")
                    .and_then(Value::as_str)
                    .unwrap_or("join rejected");
                Incoming::Close(reason.to_string())
            } else {
                Incoming::Ignore
            }
        }
        "phx_error" => Incoming::Close("channel error".to_string()),
        "phx_close" => Incoming::Close("channel closed by server".to_string()),
        _ => Incoming::Ignore,
    }
}

fn encode(frame: &Frame) -> Result<Message, BackendError> {
    Ok(Message::Text(serde_json::to_string(frame)?))
}

/// Connect, join `channel` and spawn the connection task
pub(crate) async fn join(
    url: &str,
    channel: &str,
    filters: Vec<ChangeFilter>,
    tokens: Arc<dyn TokenSource>,
    heartbeat: Duration,
) -> Result<ChangeSubscription, BackendError> {
    let mut access_token = tokens.access_token().await;
    let (socket, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| BackendError::Realtime(format!("connect failed: {e}")))?;
    let (mut sink, mut stream) = socket.split();

    sink.send(encode(&join_frame(channel, &filters, &access_token, 1))?)
        .await
        .map_err(|e| BackendError::Realtime(format!("join failed: {e}")))?;
    tracing::info!(channel, filters = filters.len(), "joined realtime channel");

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (leave_tx, mut leave_rx) = oneshot::channel::<()>();
    let channel_name = channel.to_string();

    tokio::spawn(async move {
        let mut reference: u64 = 1;
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut leave_rx => {
                    reference += 1;
                    if let Ok(frame) = encode(&leave_frame(&channel_name, reference)) {
                        let _ = sink.send(frame).await;
                    }
                    let _ = sink.close().await;
                    break;
                }
                _ = ticker.tick() => {
                    let token = tokens.access_token().await;
                    let mut frames = Vec::with_capacity(2);
                    if token != access_token {
                        tracing::debug!(channel = %channel_name, "pushing renewed access token");
                        reference += 1;
                        frames.push(access_token_frame(&channel_name, &token, reference));
                        access_token = token;
                    }
                    reference += 1;
                    frames.push(heartbeat_frame(reference));

                    let mut sent = true;
                    for frame in &frames {
                        sent = match encode(frame) {
                            Ok(message) => sink.send(message).await.is_ok(),
                            Err(_) => false,
                        };
                        if !sent {
                            break;
                        }
                    }
                    if !sent {
                        tracing::warn!(channel = %channel_name, "heartbeat failed, closing channel");
                        break;
                    }
                }
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let frame: Frame = match serde_json::from_str(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!(error = %e, "unreadable realtime frame");
                                continue;
                            }
                        };
                        match classify(&frame, &channel_name, &filters) {
                            Incoming::Deliver(event) => {
                                if events_tx.send(event).is_err() {
                                    break;
                                }
                            }
                            Incoming::Ignore => {}
                            Incoming::Close(reason) => {
                                tracing::warn!(channel = %channel_name, %reason, "realtime channel closed");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(channel = %channel_name, "realtime socket closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(channel = %channel_name, error = %e, "realtime socket error");
                        break;
                    }
                },
            }
        }
    });

    Ok(ChangeSubscription::new(channel, events_rx, move || {
        let _ = leave_tx.send(());
    }))
}
