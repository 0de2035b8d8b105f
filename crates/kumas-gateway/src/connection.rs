use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, trace, warn};

use kumas_types::events::GatewayEvent;
use kumas_types::models::UserId;

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const GREETING: &str = "connected to kumas gateway";

/// Drive one pre-authenticated push connection until either side closes.
///
/// The access token was validated at the HTTP upgrade layer, so the
/// connection is registered straight away, greeted, and then only forwards
/// queued events. Inbound text is ignored; the channel is push-only.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, user_id: UserId, name: String) {
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, mut outbox) = dispatcher.attach(user_id);
    let registry = dispatcher.registry();
    info!(
        "{} ({}) connected to gateway as {} ({} users, {} connections online)",
        name,
        user_id,
        conn_id,
        registry.online_user_count(),
        registry.connection_count()
    );

    let hello = GatewayEvent::Hello {
        connection_id: conn_id,
        message: GREETING.to_string(),
    };
    if send_event(&mut sender, &hello).await.is_err() {
        dispatcher.detach(conn_id);
        return;
    }

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = outbox.recv() => {
                    let Some(event) = result else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let name_recv = name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                Message::Text(text) => {
                    trace!(
                        "{} ({}) sent ignored text: {}",
                        name_recv,
                        user_id,
                        text.as_str().chars().take(200).collect::<String>()
                    );
                }
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.detach(conn_id);
    let registry = dispatcher.registry();
    info!(
        "{} ({}) disconnected from gateway ({}); {} users, {} connections online",
        name,
        user_id,
        conn_id,
        registry.online_user_count(),
        registry.connection_count()
    );
}

/// Serialize an event into a text frame.
fn encode(event: &GatewayEvent) -> Result<Message, serde_json::Error> {
    Ok(Message::Text(serde_json::to_string(event)?.into()))
}

/// Send one event. An event that cannot be encoded is an error, which
/// ends the connection rather than silently skipping the frame.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let frame = encode(event).map_err(|e| {
        error!("failed to encode gateway event: {}", e);
        axum::Error::new(e)
    })?;
    sender.send(frame).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_encode_produces_tagged_text_frame() {
        let conn_id = Uuid::new_v4();
        let frame = encode(&GatewayEvent::Hello {
            connection_id: conn_id,
            message: GREETING.to_string(),
        })
        .unwrap();

        let Message::Text(text) = frame else {
            panic!("expected a text frame, got {:?}", frame);
        };
        let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(json["type"], "Hello");
        assert_eq!(json["data"]["connection_id"], conn_id.to_string());
        assert_eq!(json["data"]["message"], GREETING);
    }
}
