use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use client_core::ValidationChannel;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{
    error::{ChannelError, ChannelException, ErrorCode},
    protocol::{ClientMessage, ValidationOutcome},
};
use tokio::{
    net::TcpStream,
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Debug, Serialize)]
struct OutboundFrame<'a> {
    command: &'a str,
    identifier: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    identifier: Option<String>,
    message: Option<Value>,
    reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChannelIdentifier {
    channel: String,
}

/// Websocket transport for server-side form validation.
///
/// Frames follow the cable convention: every command carries a JSON-encoded
/// channel identifier, and application payloads ride inside a `data` /
/// `message` envelope. Verdicts arrive unsolicited and are fanned out to
/// subscribers; wiring one into a coordinator is
/// `coordinator.run_outcome_feed(cable.subscribe_outcomes())`.
pub struct CableClient {
    channel: String,
    identifier: String,
    writer: Mutex<Option<WsSink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    outcomes: broadcast::Sender<ValidationOutcome>,
    errors: broadcast::Sender<ChannelError>,
}

impl CableClient {
    pub fn new(channel: impl Into<String>) -> Arc<Self> {
        let channel = channel.into();
        let identifier = serde_json::json!({ "channel": channel }).to_string();
        let (outcomes, _) = broadcast::channel(64);
        let (errors, _) = broadcast::channel(16);
        Arc::new(Self {
            channel,
            identifier,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            outcomes,
            errors,
        })
    }

    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<ValidationOutcome> {
        self.outcomes.subscribe()
    }

    /// Transport and protocol faults observed by the reader task. The
    /// coordinator itself stays fail-closed either way; this exists so an
    /// owner can tell "still waiting" apart from "cable is gone".
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ChannelError> {
        self.errors.subscribe()
    }

    /// Connect to the cable endpoint, start the reader task, and subscribe
    /// to the validation channel.
    pub async fn connect(self: &Arc<Self>, endpoint: &str) -> Result<()> {
        let url = Url::parse(endpoint)
            .with_context(|| format!("invalid cable endpoint: {endpoint}"))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(anyhow!("cable endpoint must be ws:// or wss://, got {other}://")),
        }
        let (stream, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect cable: {endpoint}"))?;
        info!(endpoint, "cable connected");
        let (writer, reader) = stream.split();
        *self.writer.lock().await = Some(writer);

        let client = Arc::clone(self);
        let handle = tokio::spawn(async move {
            client.read_frames(reader).await;
        });
        if let Some(previous) = self.reader.lock().await.replace(handle) {
            previous.abort();
        }

        self.send_frame(OutboundFrame {
            command: "subscribe",
            identifier: &self.identifier,
            data: None,
        })
        .await
    }

    pub async fn disconnect(&self) {
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.send(Message::Close(None)).await;
        }
        info!("cable disconnected");
    }

    async fn send_frame(&self, frame: OutboundFrame<'_>) -> Result<()> {
        let payload = serde_json::to_string(&frame)?;
        let mut writer = self.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or_else(|| ChannelException::new(ErrorCode::Transport, "cable is not connected"))?;
        writer
            .send(Message::Text(payload))
            .await
            .context("failed to send cable frame")
    }

    async fn read_frames(&self, mut reader: WsSource) {
        while let Some(message) = reader.next().await {
            match message {
                Ok(Message::Text(text)) => self.handle_frame(&text),
                Ok(Message::Close(_)) => {
                    info!("cable closed by server");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("cable receive failed: {err}");
                    let _ = self.errors.send(ChannelError::new(
                        ErrorCode::Transport,
                        format!("cable receive failed: {err}"),
                    ));
                    break;
                }
            }
        }
        *self.writer.lock().await = None;
    }

    fn handle_frame(&self, text: &str) {
        let frame: InboundFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("discarding malformed cable frame: {err}");
                return;
            }
        };
        match frame.kind.as_deref() {
            Some("ping") => return,
            Some("welcome") => {
                debug!("cable welcome received");
                return;
            }
            Some("confirm_subscription") => {
                info!(channel = %self.channel, "validation channel subscription confirmed");
                return;
            }
            Some("reject_subscription") => {
                warn!(channel = %self.channel, "validation channel subscription rejected");
                let _ = self.errors.send(ChannelError::new(
                    ErrorCode::Protocol,
                    "subscription rejected",
                ));
                return;
            }
            Some("disconnect") => {
                let reason = frame
                    .reason
                    .unwrap_or_else(|| "server closed the cable".to_string());
                warn!(reason = %reason, "cable disconnect requested");
                let _ = self
                    .errors
                    .send(ChannelError::new(ErrorCode::Transport, reason));
                return;
            }
            _ => {}
        }
        if !self.identifier_matches(frame.identifier.as_deref()) {
            return;
        }
        let Some(message) = frame.message else {
            return;
        };
        match serde_json::from_value::<ValidationOutcome>(message) {
            Ok(outcome) => {
                debug!(
                    base_errors = outcome.base_errors.len(),
                    model_errors = outcome.model_errors.len(),
                    "verdict received"
                );
                let _ = self.outcomes.send(outcome);
            }
            Err(err) => {
                warn!("discarding malformed verdict: {err}");
                let _ = self.errors.send(ChannelError::new(
                    ErrorCode::Protocol,
                    format!("malformed verdict: {err}"),
                ));
            }
        }
    }

    // The server re-serializes the identifier, so compare parsed forms
    // rather than raw strings.
    fn identifier_matches(&self, identifier: Option<&str>) -> bool {
        let Some(identifier) = identifier else {
            return false;
        };
        match serde_json::from_str::<ChannelIdentifier>(identifier) {
            Ok(parsed) => parsed.channel == self.channel,
            Err(_) => false,
        }
    }
}

#[async_trait]
impl ValidationChannel for CableClient {
    async fn perform_validate(&self, message: ClientMessage) -> Result<()> {
        let data = serde_json::to_string(&message)?;
        self.send_frame(OutboundFrame {
            command: "message",
            identifier: &self.identifier,
            data: Some(data),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn subscribe_frame_omits_data() {
        let frame = OutboundFrame {
            command: "subscribe",
            identifier: r#"{"channel":"form_validation"}"#,
            data: None,
        };
        let json = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(json["command"], "subscribe");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn validate_payload_rides_inside_the_data_envelope() {
        let mut fields = BTreeMap::new();
        fields.insert("user[email]".to_string(), "ada@example.com".to_string());
        let data = serde_json::to_string(&ClientMessage::Validate { fields }).expect("serialize");
        let frame = OutboundFrame {
            command: "message",
            identifier: r#"{"channel":"form_validation"}"#,
            data: Some(data),
        };
        let json = serde_json::to_value(&frame).expect("serialize");
        let inner: Value =
            serde_json::from_str(json["data"].as_str().expect("data is a string")).expect("parse");
        assert_eq!(inner["action"], "validate");
        assert_eq!(inner["fields"]["user[email]"], "ada@example.com");
    }

    #[test]
    fn verdict_frames_reach_subscribers() {
        let client = CableClient::new("form_validation");
        let mut outcomes = client.subscribe_outcomes();

        client.handle_frame(
            r#"{"identifier":"{\"channel\":\"form_validation\"}","message":{"baseErrors":[],"modelErrors":{"email":["has already been taken"]}}}"#,
        );

        let outcome = outcomes.try_recv().expect("verdict delivered");
        assert_eq!(
            outcome.model_errors.get("email"),
            Some(&vec!["has already been taken".to_string()])
        );
    }

    #[test]
    fn control_frames_are_swallowed() {
        let client = CableClient::new("form_validation");
        let mut outcomes = client.subscribe_outcomes();

        client.handle_frame(r#"{"type":"welcome"}"#);
        client.handle_frame(r#"{"type":"ping","message":1756400000}"#);
        client.handle_frame(
            r#"{"type":"confirm_subscription","identifier":"{\"channel\":\"form_validation\"}"}"#,
        );
        client.handle_frame("not json");

        assert!(outcomes.try_recv().is_err());
    }

    #[test]
    fn frames_for_other_channels_are_ignored() {
        let client = CableClient::new("form_validation");
        let mut outcomes = client.subscribe_outcomes();

        client.handle_frame(
            r#"{"identifier":"{\"channel\":\"chat\"}","message":{"baseErrors":["nope"]}}"#,
        );

        assert!(outcomes.try_recv().is_err());
    }

    #[test]
    fn disconnect_frame_surfaces_a_transport_error() {
        let client = CableClient::new("form_validation");
        let mut errors = client.subscribe_errors();

        client.handle_frame(r#"{"type":"disconnect","reason":"unauthorized","reconnect":false}"#);

        let error = errors.try_recv().expect("error delivered");
        assert!(matches!(error.code, ErrorCode::Transport));
        assert_eq!(error.message, "unauthorized");
    }

    #[test]
    fn identifier_comparison_survives_reserialization() {
        let client = CableClient::new("form_validation");
        assert!(client.identifier_matches(Some("{ \"channel\": \"form_validation\" }")));
        assert!(!client.identifier_matches(Some(r#"{"channel":"chat"}"#)));
        assert!(!client.identifier_matches(None));
    }
}
