//! InkLayer WebSocket Relay Server
//!
//! Fans drawing events out to every other peer in the same room. The relay
//! never looks at pixels; it only tracks who is in which room.
//!
//! ## Protocol
//!
//! Every frame is a JSON envelope:
//! ```json
//! { "event": "join-room", "roomId": "lobby", "authorId": "<uuid>", "userId": "<uuid>", "username": "Alice", "color": "#e63946" }
//! { "event": "drawing", "roomId": "lobby", "authorId": "<uuid>", "type": "move", "pos": { "x": 10, "y": 20 }, ... }
//! ```
//!
//! On join the relay answers with `users-update` (and `username-assigned` if
//! the name was taken) and tells the rest of the room `user-joined`. Relay
//! frames carry the author id `"relay"`.

mod rooms;

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use inklayer_core::protocol::RELAY_AUTHOR_ID;
use inklayer_core::{Envelope, WireEvent};
use rooms::{RoomFrame, RoomRegistry};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_ADDR: &str = "0.0.0.0:3030";

/// Shared application state
struct AppState {
    rooms: RoomRegistry,
}

/// Where a connection currently is.
struct Membership {
    conn_id: Uuid,
    room_id: String,
    user_id: String,
    rx: broadcast::Receiver<RoomFrame>,
}

type Sender = SplitSink<WebSocket, Message>;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inklayer_server=info,tower_http=info".into()),
        )
        .init();

    let addr = listen_addr();
    let state = Arc::new(AppState {
        rooms: RoomRegistry::new(),
    });

    let app = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("InkLayer relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

/// `INKLAYER_ADDR`, falling back to the default on absence or parse failure.
fn listen_addr() -> SocketAddr {
    let fallback = || DEFAULT_ADDR.parse().unwrap_or(SocketAddr::from(([0, 0, 0, 0], 3030)));
    match std::env::var("INKLAYER_ADDR") {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("Ignoring invalid INKLAYER_ADDR {:?}: {}", raw, e);
            fallback()
        }),
        Err(_) => fallback(),
    }
}

/// Index page
async fn index() -> &'static str {
    "InkLayer Relay Server - Connect via WebSocket at /ws"
}

/// Health check with room counts
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.rooms.stats())
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = Uuid::new_v4();
    info!("New connection: {}", conn_id);

    let (mut sender, mut receiver) = socket.split();
    let mut membership: Option<Membership> = None;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if handle_frame(&state, &mut sender, &mut membership, conn_id, text.as_str()).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Ignore binary, ping and pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", conn_id, e);
                        break;
                    }
                }
            }

            frame = async {
                match &mut membership {
                    Some(m) => Some(m.rx.recv().await),
                    None => std::future::pending().await,
                }
            } => {
                let Some(m) = &membership else { continue };
                match frame {
                    Some(Ok((from, json))) => {
                        // Don't echo back to sender
                        if from != m.user_id && send_text(&mut sender, json).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(RecvError::Lagged(skipped))) => {
                        warn!("{} fell behind and missed {} frames", m.user_id, skipped);
                    }
                    Some(Err(RecvError::Closed)) | None => {
                        membership = None;
                    }
                }
            }
        }
    }

    if let Some(m) = membership {
        leave(&state, &m);
    }
    info!("Connection closed: {}", conn_id);
}

/// Apply one client frame. `Err` means the socket is gone.
async fn handle_frame(
    state: &AppState,
    sender: &mut Sender,
    membership: &mut Option<Membership>,
    conn_id: Uuid,
    text: &str,
) -> Result<(), axum::Error> {
    let mut envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Invalid message: {}", e);
            let room_id = membership.as_ref().map(|m| m.room_id.clone()).unwrap_or_default();
            return send_error(sender, &room_id, format!("Invalid message: {}", e)).await;
        }
    };

    if let WireEvent::JoinRoom {
        user_id,
        username,
        color,
    } = &envelope.event
    {
        if let Some(old) = membership.take() {
            leave(state, &old);
        }
        let room_id = envelope.room_id.clone();
        let joined = state.rooms.join(&room_id, conn_id, user_id, username, *color);
        info!("{} joined room {} as {}", user_id, room_id, joined.member.username);

        if joined.renamed {
            let assigned = WireEvent::UsernameAssigned {
                username: joined.member.username.clone(),
            };
            send_event(sender, &room_id, assigned).await?;
        }
        send_event(sender, &room_id, WireEvent::UsersUpdate { users: joined.users }).await?;

        let announce = WireEvent::UserJoined {
            user_id: joined.member.user_id.clone(),
            username: joined.member.username.clone(),
            color: joined.member.color,
        };
        broadcast_event(state, &room_id, user_id, announce);

        *membership = Some(Membership {
            conn_id,
            room_id,
            user_id: user_id.clone(),
            rx: joined.rx,
        });
        return Ok(());
    }

    let Some(m) = membership.as_ref() else {
        return send_error(sender, &envelope.room_id, "Join a room first".to_string()).await;
    };
    if is_relay_only(&envelope.event) {
        let message = format!("{} can only be sent by the relay", envelope.event.name());
        return send_error(sender, &m.room_id, message).await;
    }

    // Peers cannot speak for anyone else or outside their room.
    envelope.author_id = m.user_id.clone();
    envelope.room_id = m.room_id.clone();
    match envelope.to_json() {
        Ok(json) => {
            debug!("{} -> {}: {}", m.user_id, m.room_id, envelope.event.name());
            state.rooms.broadcast(&m.room_id, &m.user_id, json);
        }
        Err(e) => warn!("Failed to re-encode {}: {}", envelope.event.name(), e),
    }
    Ok(())
}

fn is_relay_only(event: &WireEvent) -> bool {
    matches!(
        event,
        WireEvent::UsersUpdate { .. }
            | WireEvent::UserJoined { .. }
            | WireEvent::UserLeft { .. }
            | WireEvent::UsernameAssigned { .. }
            | WireEvent::Error { .. }
    )
}

/// Announce a departure unless the user already rejoined elsewhere.
fn leave(state: &AppState, m: &Membership) {
    let Some(member) = state.rooms.leave(&m.room_id, m.conn_id, &m.user_id) else {
        debug!("{} on {} was superseded; not announcing", m.user_id, m.conn_id);
        return;
    };
    info!("{} left room {}", member.username, m.room_id);
    let left = WireEvent::UserLeft {
        user_id: member.user_id,
        username: Some(member.username),
    };
    broadcast_event(state, &m.room_id, &m.user_id, left);
}

fn broadcast_event(state: &AppState, room_id: &str, from: &str, event: WireEvent) {
    match Envelope::new(room_id, RELAY_AUTHOR_ID, event).to_json() {
        Ok(json) => state.rooms.broadcast(room_id, from, json),
        Err(e) => warn!("Failed to encode relay event: {}", e),
    }
}

async fn send_event(sender: &mut Sender, room_id: &str, event: WireEvent) -> Result<(), axum::Error> {
    match Envelope::new(room_id, RELAY_AUTHOR_ID, event).to_json() {
        Ok(json) => send_text(sender, json).await,
        Err(e) => {
            warn!("Failed to encode relay event: {}", e);
            Ok(())
        }
    }
}

async fn send_error(sender: &mut Sender, room_id: &str, message: String) -> Result<(), axum::Error> {
    send_event(sender, room_id, WireEvent::Error { message }).await
}

async fn send_text(sender: &mut Sender, json: String) -> Result<(), axum::Error> {
    sender.send(Message::Text(json.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_only_events() {
        assert!(is_relay_only(&WireEvent::UsernameAssigned {
            username: "x".to_string()
        }));
        assert!(!is_relay_only(&WireEvent::ClearCanvas {}));
        assert!(!is_relay_only(&WireEvent::RequestCanvasState {}));
    }
}
