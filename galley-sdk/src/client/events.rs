//! Event stream client with resume-from-sequence reconnects.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;
use uuid::Uuid;

use super::ClientError;
use crate::objects::EventEnvelope;
use crate::objects::ws::{WsClientMessage, WsServerMessage};
use crate::signature::{ACTOR_HEADER, SIGNATURE_HEADER, TENANT_HEADER, sign_identity};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the stream yields to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Event(EventEnvelope),
    /// All missed events since the resume point were delivered.
    ReplayComplete { latest_sequence: u64 },
    /// The server can no longer replay the missed range. Fetch full state,
    /// then call [`EventStream::mark_resynced`].
    ResyncRequired { latest_sequence: u64 },
    /// Events were dropped because this client fell behind. Same recovery
    /// as [`StreamItem::ResyncRequired`].
    Gap { latest_sequence: u64 },
    Error { code: u16, reason: String },
    Closed,
}

/// A tenant event stream that remembers the last sequence it delivered and
/// resumes from it on [`reconnect`](EventStream::reconnect).
///
/// Events at or below the last delivered sequence are dropped, so a replay
/// that overlaps with already-seen events never produces duplicates.
pub struct EventStream {
    socket: Socket,
    endpoint: Url,
    tenant_id: Uuid,
    actor: String,
    secret: Vec<u8>,
    last_seen: Option<u64>,
}

impl EventStream {
    /// Open `{ws_base}/api/v1/events`, resuming after `last_seen` when given.
    pub async fn connect(
        ws_base: &Url,
        tenant_id: Uuid,
        actor: impl Into<String>,
        tenant_secret: impl Into<Vec<u8>>,
        last_seen: Option<u64>,
    ) -> Result<Self, ClientError> {
        let endpoint = ws_base.join("/api/v1/events")?;
        let actor = actor.into();
        let secret = tenant_secret.into();
        let socket = open(&endpoint, tenant_id, &actor, &secret, last_seen).await?;
        Ok(Self {
            socket,
            endpoint,
            tenant_id,
            actor,
            secret,
            last_seen,
        })
    }

    /// The highest sequence delivered so far.
    pub fn last_seen(&self) -> Option<u64> {
        self.last_seen
    }

    /// Record that the application re-fetched full state as of `sequence`.
    pub fn mark_resynced(&mut self, sequence: u64) {
        self.last_seen = Some(sequence);
    }

    /// Drop the current connection and reopen it from [`last_seen`](Self::last_seen).
    pub async fn reconnect(&mut self) -> Result<(), ClientError> {
        let _ = self.socket.close(None).await;
        self.socket = open(
            &self.endpoint,
            self.tenant_id,
            &self.actor,
            &self.secret,
            self.last_seen,
        )
        .await?;
        Ok(())
    }

    /// Wait for the next item. Keep-alive pings are answered internally.
    pub async fn next(&mut self) -> Result<StreamItem, ClientError> {
        loop {
            let Some(frame) = self.socket.next().await else {
                return Ok(StreamItem::Closed);
            };
            let text = match frame? {
                Message::Text(text) => text,
                Message::Close(_) => return Ok(StreamItem::Closed),
                _ => continue,
            };

            match serde_json::from_str::<WsServerMessage>(&text)? {
                WsServerMessage::Event { event } => {
                    if self.last_seen.is_some_and(|seen| event.sequence <= seen) {
                        continue;
                    }
                    self.last_seen = Some(event.sequence);
                    self.send(WsClientMessage::Ack {
                        sequence: event.sequence,
                    })
                    .await?;
                    return Ok(StreamItem::Event(event));
                }
                WsServerMessage::Ping => {
                    self.send(WsClientMessage::Pong).await?;
                }
                WsServerMessage::ReplayComplete { latest_sequence } => {
                    return Ok(StreamItem::ReplayComplete { latest_sequence });
                }
                WsServerMessage::ResyncRequired { latest_sequence } => {
                    return Ok(StreamItem::ResyncRequired { latest_sequence });
                }
                WsServerMessage::Gap { latest_sequence } => {
                    return Ok(StreamItem::Gap { latest_sequence });
                }
                WsServerMessage::Error { code, reason } => {
                    return Ok(StreamItem::Error { code, reason });
                }
            }
        }
    }

    async fn send(&mut self, message: WsClientMessage) -> Result<(), ClientError> {
        let json = serde_json::to_string(&message)?;
        self.socket.send(Message::Text(json)).await?;
        Ok(())
    }
}

async fn open(
    endpoint: &Url,
    tenant_id: Uuid,
    actor: &str,
    secret: &[u8],
    last_seen: Option<u64>,
) -> Result<Socket, ClientError> {
    let mut url = endpoint.clone();
    if let Some(seen) = last_seen {
        url.query_pairs_mut()
            .clear()
            .append_pair("last_seen", &seen.to_string());
    }

    let identity = sign_identity(tenant_id, actor, secret);
    let mut request = url.as_str().into_client_request()?;
    let headers = request.headers_mut();
    for (name, value) in [
        (TENANT_HEADER, identity.tenant),
        (ACTOR_HEADER, identity.actor),
        (SIGNATURE_HEADER, identity.signature),
    ] {
        let name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| ClientError::InvalidHeader)?;
        let value = HeaderValue::from_str(&value).map_err(|_| ClientError::InvalidHeader)?;
        headers.insert(name, value);
    }

    let (socket, _) = connect_async(request).await?;
    Ok(socket)
}
