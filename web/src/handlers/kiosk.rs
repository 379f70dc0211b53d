//! Kiosk WebSocket channel.
//!
//! # Protocol
//!
//! **Kiosk → Server:**
//! ```json
//! { "type": "register", "location_id": "…", "bay_id": "…" }
//! { "type": "request_refresh", "location_id": "…", "bay_id": "…" }
//! { "type": "unlock_ack", "correlation_id": "…", "success": true }
//! { "type": "heartbeat" }
//! ```
//!
//! **Server → Kiosk:** `registered`, `unlock_command`, `booking_delta`, `bookings_refresh`
//! and `error`, as defined by [`ServerMessage`].
//!
//! A connection must register before anything but acknowledgments is honoured. Outbound
//! frames go through a bounded queue drained by a send task, so a slow kiosk never blocks
//! the coordinator.

use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use simbay_core::ids::{BayId, ConnectionId, LocationId};
use simbay_core::store::BayStore;
use simbay_runtime::{KioskMessage, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outbound frames buffered per connection
pub const OUTBOUND_BUFFER: usize = 64;

/// Upgrades to the kiosk protocol.
///
/// ```text
/// GET /kiosk/ws
/// ```
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn kiosk_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize kiosk frame");
                    continue;
                },
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        debug!("Kiosk send task terminated");
    });

    let mut session = KioskSession::new(state, tx);
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
                Some(Ok(Message::Binary(_))) => {
                    session.reply_error("Binary frames are not supported");
                },
                Some(Ok(Message::Close(_))) | None => break,
                // ping/pong are answered by axum
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    debug!(error = %e, "Kiosk socket error");
                    break;
                },
            },
            _ = &mut send_task => break,
        }
    }

    session.close();
    send_task.abort();
}

/// State of one kiosk connection
pub struct KioskSession {
    state: AppState,
    tx: mpsc::Sender<ServerMessage>,
    registration: Option<(LocationId, BayId, ConnectionId)>,
}

impl KioskSession {
    /// A session writing its replies to `tx`
    #[must_use]
    pub const fn new(state: AppState, tx: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            state,
            tx,
            registration: None,
        }
    }

    /// Channel this connection is registered on
    #[must_use]
    pub fn registered_on(&self) -> Option<(LocationId, BayId)> {
        self.registration.map(|(location, bay, _)| (location, bay))
    }

    fn reply(&self, message: ServerMessage) {
        if self.tx.try_send(message).is_err() {
            debug!("Kiosk outbound queue full or closed");
        }
    }

    fn reply_error(&self, message: impl Into<String>) {
        self.reply(ServerMessage::Error {
            message: message.into(),
        });
    }

    /// Handles one text frame
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<KioskMessage>(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                warn!(error = %e, "Invalid kiosk frame");
                self.reply_error(format!("Invalid message: {e}"));
            },
        }
    }

    /// Handles one decoded frame
    pub async fn handle(&mut self, message: KioskMessage) {
        match message {
            KioskMessage::Register {
                location_id,
                bay_id,
            } => self.register(location_id, bay_id).await,
            KioskMessage::RequestRefresh {
                location_id,
                bay_id,
            } => match self.registration {
                Some((location, bay, connection)) if (location, bay) == (location_id, bay_id) => {
                    self.refresh(location, bay, connection).await;
                },
                _ => self.reply_error("Register for this bay before requesting a refresh"),
            },
            KioskMessage::UnlockAck {
                correlation_id,
                success,
                error,
            } => {
                self.state
                    .coordinator
                    .resolve_ack(correlation_id, success, error);
            },
            KioskMessage::Heartbeat => self.heartbeat().await,
        }
    }

    async fn register(&mut self, location: LocationId, bay: BayId) {
        let bay_row = match self.state.store.get_bay(bay).await {
            Ok(row) => row,
            Err(e) => {
                warn!(%bay, error = %e, "Bay lookup failed during kiosk registration");
                self.reply_error("Registration failed, please retry");
                return;
            },
        };
        if bay_row.is_none_or(|row| row.location_id != location) {
            self.reply_error("Unknown bay for this location");
            return;
        }

        // re-registering moves the connection to the new channel
        self.close();
        match self
            .state
            .coordinator
            .register(location, bay, self.tx.clone())
        {
            Ok(connection) => {
                self.registration = Some((location, bay, connection));
                self.reply(ServerMessage::Registered {
                    location_id: location,
                    bay_id: bay,
                });
                self.refresh(location, bay, connection).await;
            },
            Err(e) => {
                warn!(%location, %bay, error = %e, "Kiosk registration refused");
                self.reply_error(e.to_string());
            },
        }
    }

    async fn refresh(&self, location: LocationId, bay: BayId, connection: ConnectionId) {
        match self
            .state
            .effects
            .refresh_today(location, bay, connection)
            .await
        {
            Ok(true) => {},
            Ok(false) => debug!(%location, %bay, %connection, "Kiosk left before its refresh was queued"),
            Err(e) => {
                warn!(%location, %bay, error = %e, "Kiosk schedule refresh failed");
                self.reply_error("Schedule refresh failed");
            },
        }
    }

    async fn heartbeat(&self) {
        let Some((_, bay, _)) = self.registration else {
            self.reply_error("Register before sending heartbeats");
            return;
        };
        let now = self.state.clock.now();
        if let Err(e) = self.state.store.record_heartbeat(bay, now).await {
            warn!(%bay, error = %e, "Failed to record kiosk heartbeat");
        }
    }

    /// Leaves the registered channel, if any
    pub fn close(&mut self) {
        if let Some((location, bay, connection)) = self.registration.take() {
            self.state.coordinator.unregister(location, bay, connection);
            info!(%location, %bay, %connection, "Kiosk disconnected");
        }
    }
}

impl Drop for KioskSession {
    fn drop(&mut self) {
        self.close();
    }
}
