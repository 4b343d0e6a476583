//! Headless InkLayer peer.
//!
//! Joins a room, mirrors every participant's layer and writes the composed
//! canvas to a PNG when the time is up.
//!
//! ```text
//! inklayer-peer [room] [output.png] [seconds]
//! ```
//!
//! Everything else comes from the session config file.

use std::error::Error;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use inklayer_core::{DrawingSession, NativeWebSocket, SessionConfig, SessionEvent};

const FRAME: Duration = Duration::from_millis(16);

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let mut config = SessionConfig::load_default()?;
    if let Some(room) = args.next() {
        config.room = room;
    }
    let output = PathBuf::from(args.next().unwrap_or_else(|| "inklayer.png".to_string()));
    let seconds: u64 = match args.next() {
        Some(raw) => raw.parse()?,
        None => 10,
    };

    log::info!("Starting InkLayer peer for room {}", config.room);

    let mut session = DrawingSession::from_config(&config);
    session.join_room(&config.room);

    let mut client = NativeWebSocket::with_policy(config.reconnect_policy());
    client.connect(&config.relay_url)?;

    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline {
        for event in client.poll_events() {
            session.handle_client_event(event);
        }
        if client.is_connected() {
            for frame in session.take_outgoing() {
                if let Err(e) = client.send(&frame) {
                    log::warn!("Failed to send frame: {}", e);
                }
            }
        }
        for event in session.poll_events() {
            report(&event);
        }
        if let Some(metrics) = session.poll_metrics(Instant::now()) {
            log::debug!(
                "pending={} strokes={} clock={}",
                metrics.pending_events,
                metrics.buffered_strokes,
                metrics.logical_clock
            );
        }
        thread::sleep(FRAME);
    }

    client.disconnect();
    std::fs::write(&output, session.download()?)?;
    log::info!("Wrote {}", output.display());
    Ok(())
}

fn report(event: &SessionEvent) {
    match event {
        SessionEvent::ParticipantJoined(p) => log::info!("{} joined", p.username),
        SessionEvent::ParticipantLeft { user_id, username } => {
            log::info!("{} left", username.as_deref().unwrap_or(user_id))
        }
        SessionEvent::UsernameAssigned(name) => log::info!("Relay renamed us to {}", name),
        SessionEvent::RelayError(message) => log::warn!("Relay error: {}", message),
        SessionEvent::Connection(state) => log::info!("Connection: {:?}", state),
        SessionEvent::Repainted
        | SessionEvent::RosterChanged
        | SessionEvent::CursorMoved { .. }
        | SessionEvent::LayerRestored { .. } => {}
    }
}
