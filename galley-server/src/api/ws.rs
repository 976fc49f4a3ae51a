use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use galley_core::broadcast::{CloseReason, Delivery, Replay, Subscription};
use galley_core::entities::{AuthContext, TenantId};
use galley_core::error::AuthError;
use galley_sdk::objects::ws::{WsClientMessage, WsCloseCode, WsServerMessage};
use serde::Deserialize;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::extractors::Authenticated;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(super) struct EventStreamParams {
    /// Last sequence the client processed; triggers a replay.
    last_seen: Option<u64>,
    /// Tenant the client expects to watch. Defaults to the caller's own.
    tenant_id: Option<Uuid>,
}

/// `GET /events`: tenant event stream over WebSocket.
///
/// See [`galley_sdk::objects::ws`] for the frame protocol.
pub(super) async fn event_stream(
    state: State<AppState>,
    caller: Authenticated,
    Query(params): Query<EventStreamParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let app_state = state.0.clone();
    let auth = caller.auth_context();
    let tenant_id = params
        .tenant_id
        .map(TenantId)
        .unwrap_or(caller.0.tenant_id);
    ws.on_upgrade(move |socket| {
        handle_event_ws(socket, app_state, auth, tenant_id, params.last_seen)
    })
}

async fn close(socket: &mut WebSocket, code: u16, reason: &str) {
    let _ = send_json(
        socket,
        &WsServerMessage::Error {
            code,
            reason: reason.to_owned(),
        },
    )
    .await;
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

/// Close code and reason for a refused subscription.
fn rejection_close(error: &AuthError) -> (u16, &'static str) {
    match error {
        AuthError::TenantMismatch { .. } => (WsCloseCode::TENANT_MISMATCH, "tenant mismatch"),
        AuthError::Anonymous | AuthError::UnknownTenant(_) => {
            (WsCloseCode::UNAUTHORIZED, "unauthorized")
        }
    }
}

/// Open the subscription and send whatever replay the client asked for.
///
/// Returns `None` when the connection is already closed.
async fn open_subscription(
    socket: &mut WebSocket,
    state: &AppState,
    auth: &AuthContext,
    tenant_id: TenantId,
    last_seen: Option<u64>,
) -> Option<Subscription> {
    let opened = match last_seen {
        None => state
            .broadcaster
            .subscribe(tenant_id, auth)
            .map(|subscription| (subscription, None)),
        Some(last_seen) => state
            .broadcaster
            .resubscribe(tenant_id, auth, last_seen)
            .map(|(subscription, replay)| (subscription, Some(replay))),
    };

    let (subscription, replay) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            tracing::warn!(error = %e, "WS: rejected subscription");
            let (code, reason) = rejection_close(&e);
            close(socket, code, reason).await;
            return None;
        }
    };

    match replay {
        None => {}
        Some(Replay::Events(events)) => {
            for event in events {
                let frame = WsServerMessage::Event {
                    event: (*event).clone(),
                };
                send_json(socket, &frame).await.ok()?;
            }
            let frame = WsServerMessage::ReplayComplete {
                latest_sequence: state.broadcaster.latest_sequence(tenant_id),
            };
            send_json(socket, &frame).await.ok()?;
        }
        Some(Replay::ResyncRequired { latest_sequence }) => {
            send_json(socket, &WsServerMessage::ResyncRequired { latest_sequence })
                .await
                .ok()?;
        }
    }
    Some(subscription)
}

/// Background task that drives a single event stream connection.
///
/// 1. Registers the subscriber and sends the requested replay.
/// 2. Relays live deliveries, pinging on the keep-alive interval.
/// 3. Closes with 4008 once the broadcaster evicts the subscriber for
///    missing keep-alives.
async fn handle_event_ws(
    mut socket: WebSocket,
    state: AppState,
    auth: AuthContext,
    tenant_id: TenantId,
    last_seen: Option<u64>,
) {
    let Some(subscription) =
        open_subscription(&mut socket, &state, &auth, tenant_id, last_seen).await
    else {
        return;
    };
    tracing::debug!(%tenant_id, subscription_id = subscription.id(), "WS: event stream opened");

    let mut keepalive = tokio::time::interval(state.broadcaster.keepalive_interval());
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keepalive.tick().await;

    loop {
        tokio::select! {
            delivery = subscription.recv() => {
                let frame = match delivery {
                    Some(Delivery::Event(event)) => WsServerMessage::Event {
                        event: (*event).clone(),
                    },
                    Some(Delivery::Gap { last_dropped }) => {
                        tracing::warn!(
                            %tenant_id,
                            subscription_id = subscription.id(),
                            last_dropped,
                            "WS: subscriber fell behind, events dropped"
                        );
                        WsServerMessage::Gap {
                            latest_sequence: state.broadcaster.latest_sequence(tenant_id),
                        }
                    }
                    None => {
                        match subscription.close_reason() {
                            Some(CloseReason::IdleTimeout) => {
                                tracing::info!(
                                    %tenant_id,
                                    subscription_id = subscription.id(),
                                    "WS: closing idle event stream"
                                );
                                close(&mut socket, WsCloseCode::IDLE_TIMEOUT, "idle timeout").await;
                            }
                            None => {
                                let _ = socket.send(Message::Close(None)).await;
                            }
                        }
                        return;
                    }
                };
                if send_json(&mut socket, &frame).await.is_err() {
                    return;
                }
            }

            _ = keepalive.tick() => {
                if send_json(&mut socket, &WsServerMessage::Ping).await.is_err() {
                    return;
                }
            }

            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WsClientMessage>(text.as_str()) {
                            Ok(WsClientMessage::Ack { sequence }) => subscription.ack(sequence),
                            Ok(WsClientMessage::Pong) => subscription.touch(),
                            Err(e) => {
                                tracing::debug!(error = %e, "WS: ignoring malformed client frame");
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => subscription.touch(),
                    Some(Ok(Message::Close(_))) | None => {
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => {
                        return;
                    }
                }
            }
        }
    }
}

/// Serialize `value` as JSON and send it as a text WebSocket frame.
///
/// Returns `Err(())` if the send fails (client disconnected).
async fn send_json<T: serde::Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), ()> {
    let json = serde_json::to_string(value).map_err(|_| ())?;
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_close_with_distinct_codes() {
        let mismatch = AuthError::TenantMismatch {
            expected: TenantId::generate(),
            actual: TenantId::generate(),
        };
        assert_eq!(rejection_close(&mismatch).0, WsCloseCode::TENANT_MISMATCH);
        assert_eq!(rejection_close(&AuthError::Anonymous).0, WsCloseCode::UNAUTHORIZED);
        assert_eq!(
            rejection_close(&AuthError::UnknownTenant(TenantId::generate())),
            (WsCloseCode::UNAUTHORIZED, "unauthorized")
        );
        assert_ne!(WsCloseCode::UNAUTHORIZED, WsCloseCode::TENANT_MISMATCH);
    }
}
