//! Per-connection streaming session.
//!
//! One task per authenticated WebSocket. The session's first frame must be
//! a subscribe request; after registering with the requested bins and
//! replaying retained messages, the task multiplexes three event sources:
//! inbound frames (published into bins), fan-out deliveries (written to the
//! socket), and a keepalive ticker.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

use cachet_bins::{Message, SubscriberHandle, DEFAULT_QUEUE_DEPTH};
use cachet_pki::PeerIdentity;

use crate::handlers::AppState;
use crate::proto::{SubscribeAck, SubscribeRequest, SUBSCRIBE_TYPE};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] axum::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Entry point for an upgraded WebSocket.
pub async fn run(socket: WebSocket, state: Arc<AppState>, identity: PeerIdentity) {
    info!(serial = %identity.serial, subject = %identity.subject, "Streaming session opened");

    // Make sure the referrer tree covers every identity that connects, not
    // only certificates issued by this instance.
    if let Some(referrer) = &identity.referrer_id {
        state.revocation.register(&identity.serial, referrer);
    }

    match session(socket, state, &identity).await {
        Ok(()) => debug!(serial = %identity.serial, "Streaming session closed"),
        Err(err) => debug!(serial = %identity.serial, error = %err, "Streaming session ended with error"),
    }
}

async fn session(
    mut socket: WebSocket,
    state: Arc<AppState>,
    identity: &PeerIdentity,
) -> Result<(), SessionError> {
    let request = match socket.recv().await {
        Some(Ok(WsMessage::Text(text))) => parse_subscribe(text.as_bytes())?,
        Some(Ok(WsMessage::Binary(data))) => parse_subscribe(&data)?,
        Some(Ok(frame)) => {
            return Err(SessionError::Protocol(format!(
                "expected subscribe frame, got {frame:?}"
            )))
        }
        Some(Err(err)) => return Err(err.into()),
        None => return Ok(()),
    };

    let client_id = request
        .client_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    debug!(
        serial = %identity.serial,
        client_id = %client_id,
        bins = request.bin_ids.len(),
        "Subscribing"
    );

    let result = drive(socket, &state, &request.bin_ids, &client_id).await;

    for &bin_id in &request.bin_ids {
        state.bins.unsubscribe(bin_id, &client_id).await;
    }

    result
}

async fn drive(
    mut socket: WebSocket,
    state: &Arc<AppState>,
    bin_ids: &[u64],
    client_id: &str,
) -> Result<(), SessionError> {
    // The handle stays alive for the whole session: a client evicted from
    // every bin (or subscribed to none) may still publish.
    let (handle, mut deliveries) = SubscriberHandle::channel(DEFAULT_QUEUE_DEPTH);

    // Register, then replay what the bin retained.
    for &bin_id in bin_ids {
        state.bins.subscribe(bin_id, client_id, handle.clone()).await;
        for msg in state.bins.recent(bin_id).await {
            socket.send(WsMessage::Text(encode(&msg)?)).await?;
        }
    }

    let ack = SubscribeAck::new(client_id, bin_ids.len());
    socket
        .send(WsMessage::Text(serde_json::to_string(&ack).map_err(|e| {
            SessionError::Protocol(format!("encoding ack: {e}"))
        })?))
        .await?;

    let (mut sink, mut stream) = socket.split();

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keepalive.tick().await;

    let mut shutdown = state.shutdown.clone();

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => publish(state, text.as_bytes()).await?,
                Some(Ok(WsMessage::Binary(data))) => publish(state, &data).await?,
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                Some(Err(err)) => return Err(err.into()),
            },
            delivered = deliveries.recv() => match delivered {
                Some(msg) => sink.send(WsMessage::Text(encode(&msg)?)).await?,
                // Unreachable while `handle` is held above.
                None => return Ok(()),
            },
            _ = keepalive.tick() => {
                sink.send(WsMessage::Ping(Vec::new())).await?;
            }
            _ = shutdown.changed() => return Ok(()),
        }
    }
}

async fn publish(state: &Arc<AppState>, payload: &[u8]) -> Result<(), SessionError> {
    let msg: Message = serde_json::from_slice(payload)
        .map_err(|e| SessionError::Protocol(format!("invalid message frame: {e}")))?;
    state.bins.publish(msg).await;
    Ok(())
}

fn encode(msg: &Message) -> Result<String, SessionError> {
    serde_json::to_string(msg).map_err(|e| SessionError::Protocol(format!("encoding message: {e}")))
}

fn parse_subscribe(payload: &[u8]) -> Result<SubscribeRequest, SessionError> {
    let request: SubscribeRequest = serde_json::from_slice(payload)
        .map_err(|e| SessionError::Protocol(format!("invalid subscribe frame: {e}")))?;
    if request.kind != SUBSCRIBE_TYPE {
        return Err(SessionError::Protocol(format!(
            "expected \"{SUBSCRIBE_TYPE}\", got \"{}\"",
            request.kind
        )));
    }
    Ok(request)
}
