//! Kiosk channel registry and acknowledged unlock commands.
//!
//! Kiosks join a logical channel keyed by `(location, bay)` after a `register`
//! handshake. The coordinator fans one-way schedule updates out to every connection in a
//! channel and sends unlock commands that wait for an acknowledgment.
//!
//! An unlock request parks a oneshot sender under a fresh correlation id and waits on
//! the receiver with [`tokio::time::timeout`]. Whichever of the acknowledgment or the
//! timeout comes first removes the pending entry; the other side then finds nothing and
//! is dropped. Timeout, a failed acknowledgment and an empty channel all resolve to
//! `false`.
//!
//! The registry lives behind a `std` mutex that is never held across an await point.

use crate::metrics::{self as m, gauge, histogram};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use simbay_core::effect::BookingDelta;
use simbay_core::ids::{BayId, BookingId, ConnectionId, CorrelationId, LocationId};
use simbay_core::model::BookingSummary;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Default wait for an unlock acknowledgment
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap on simultaneously registered kiosk connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 512;

// ============================================================================
// Wire format
// ============================================================================

/// Server → kiosk frame
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration accepted
    Registered {
        /// Venue
        location_id: LocationId,
        /// Bay
        bay_id: BayId,
    },
    /// Open the door; reply with `unlock_ack`
    UnlockCommand {
        /// How long to keep the door unlocked
        duration_seconds: u64,
        /// Booking being honoured
        booking_id: BookingId,
        /// Echoed back in the acknowledgment
        correlation_id: CorrelationId,
    },
    /// Single-booking schedule change
    BookingDelta(BookingDelta),
    /// Full schedule for one local date
    BookingsRefresh {
        /// Local date
        date: NaiveDate,
        /// Active bookings on the bay that day, ordered by start
        bookings: Vec<BookingSummary>,
    },
    /// Protocol error
    Error {
        /// Human-readable message
        message: String,
    },
}

/// Kiosk → server frame
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KioskMessage {
    /// Join the channel of a bay
    Register {
        /// Venue
        location_id: LocationId,
        /// Bay
        bay_id: BayId,
    },
    /// Ask for a full schedule refresh
    RequestRefresh {
        /// Venue
        location_id: LocationId,
        /// Bay
        bay_id: BayId,
    },
    /// Answer to an `unlock_command`
    UnlockAck {
        /// Correlation id of the command
        correlation_id: CorrelationId,
        /// Door actually opened
        success: bool,
        /// Kiosk-side failure detail
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Liveness ping
    Heartbeat,
}

// ============================================================================
// Coordinator
// ============================================================================

/// Outbound queue of one kiosk connection
pub type KioskSender = mpsc::Sender<ServerMessage>;

/// Coordinator tuning
#[derive(Clone, Debug)]
pub struct CoordinatorSettings {
    /// How long an unlock waits for its acknowledgment
    pub ack_timeout: Duration,
    /// Registrations beyond this are refused
    pub max_connections: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Registration failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KioskError {
    /// Connection limit reached
    #[error("kiosk connection limit of {0} reached")]
    TooManyConnections(usize),
}

#[derive(Clone, Debug)]
struct Ack {
    success: bool,
    error: Option<String>,
}

type ChannelKey = (LocationId, BayId);

#[allow(clippy::cast_precision_loss)]
fn record_connections(total: usize) {
    gauge!(m::KIOSK_CONNECTIONS).set(total as f64);
}

#[derive(Default)]
struct Hub {
    channels: HashMap<ChannelKey, HashMap<ConnectionId, KioskSender>>,
    pending: HashMap<CorrelationId, oneshot::Sender<Ack>>,
}

impl Hub {
    fn connection_count(&self) -> usize {
        self.channels.values().map(HashMap::len).sum()
    }

    fn senders(&self, key: &ChannelKey) -> Vec<KioskSender> {
        self.channels
            .get(key)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Removes an unlock's pending entry when the request ends, whether it returns or its
/// future is dropped mid-wait
struct PendingAck<'a> {
    coordinator: &'a UnlockCoordinator,
    correlation_id: CorrelationId,
}

impl Drop for PendingAck<'_> {
    fn drop(&mut self) {
        // no-op when the ack already removed it
        self.coordinator.hub().pending.remove(&self.correlation_id);
    }
}

/// Channel registry and unlock round-trips
pub struct UnlockCoordinator {
    hub: Mutex<Hub>,
    settings: CoordinatorSettings,
}

impl std::fmt::Debug for UnlockCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockCoordinator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl UnlockCoordinator {
    /// Empty registry
    #[must_use]
    pub fn new(settings: CoordinatorSettings) -> Self {
        Self {
            hub: Mutex::new(Hub::default()),
            settings,
        }
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a connection to the `(location, bay)` channel.
    ///
    /// # Errors
    ///
    /// [`KioskError::TooManyConnections`] when the connection limit is reached.
    pub fn register(
        &self,
        location: LocationId,
        bay: BayId,
        sender: KioskSender,
    ) -> Result<ConnectionId, KioskError> {
        let mut hub = self.hub();
        if hub.connection_count() >= self.settings.max_connections {
            return Err(KioskError::TooManyConnections(self.settings.max_connections));
        }
        let connection = Uuid::new_v4();
        hub.channels
            .entry((location, bay))
            .or_default()
            .insert(connection, sender);
        let total = hub.connection_count();
        drop(hub);

        record_connections(total);
        tracing::info!(%location, %bay, %connection, total, "Kiosk registered");
        Ok(connection)
    }

    /// Removes a connection; unknown connections are ignored
    pub fn unregister(&self, location: LocationId, bay: BayId, connection: ConnectionId) {
        let mut hub = self.hub();
        let key = (location, bay);
        let removed = hub
            .channels
            .get_mut(&key)
            .and_then(|conns| conns.remove(&connection))
            .is_some();
        if hub.channels.get(&key).is_some_and(HashMap::is_empty) {
            hub.channels.remove(&key);
        }
        let total = hub.connection_count();
        drop(hub);

        if removed {
            record_connections(total);
            tracing::info!(%location, %bay, %connection, total, "Kiosk unregistered");
        }
    }

    /// Connections across all channels
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.hub().connection_count()
    }

    /// Connections in one channel
    #[must_use]
    pub fn channel_size(&self, location: LocationId, bay: BayId) -> usize {
        self.hub()
            .channels
            .get(&(location, bay))
            .map_or(0, HashMap::len)
    }

    /// Unlock commands still waiting for an acknowledgment
    #[must_use]
    pub fn pending_acks(&self) -> usize {
        self.hub().pending.len()
    }

    /// Sends an unlock command to the bay's kiosks and waits for the first
    /// acknowledgment.
    ///
    /// Returns `true` only for an acknowledgment with `success = true`. An empty
    /// channel returns `false` without waiting.
    pub async fn request_unlock(
        &self,
        location: LocationId,
        bay: BayId,
        duration_seconds: u64,
        booking: BookingId,
    ) -> bool {
        let correlation_id = Uuid::new_v4();
        let (ack_tx, ack_rx) = oneshot::channel();

        let senders = {
            let mut hub = self.hub();
            let senders = hub.senders(&(location, bay));
            if senders.is_empty() {
                tracing::warn!(%location, %bay, booking_id = %booking, "No kiosk registered for bay");
                return false;
            }
            hub.pending.insert(correlation_id, ack_tx);
            senders
        };
        let _pending = PendingAck {
            coordinator: self,
            correlation_id,
        };

        let command = ServerMessage::UnlockCommand {
            duration_seconds,
            booking_id: booking,
            correlation_id,
        };
        let delivered = senders
            .iter()
            .filter(|sender| sender.try_send(command.clone()).is_ok())
            .count();
        if delivered == 0 {
            tracing::warn!(%location, %bay, booking_id = %booking, "Unlock command could not be queued to any kiosk");
            return false;
        }

        let started = tokio::time::Instant::now();
        let outcome = tokio::time::timeout(self.settings.ack_timeout, ack_rx).await;
        histogram!(m::UNLOCK_ACK_DURATION).record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(Ok(ack)) if ack.success => {
                tracing::info!(booking_id = %booking, %correlation_id, "Kiosk acknowledged unlock");
                true
            },
            Ok(Ok(ack)) => {
                tracing::warn!(
                    booking_id = %booking,
                    %correlation_id,
                    error = ack.error.as_deref().unwrap_or("unspecified"),
                    "Kiosk reported unlock failure"
                );
                false
            },
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::warn!(
                    booking_id = %booking,
                    %correlation_id,
                    timeout_ms = self.settings.ack_timeout.as_millis(),
                    "Unlock acknowledgment timed out"
                );
                false
            },
        }
    }

    /// Delivers an acknowledgment to the waiting unlock request.
    ///
    /// Returns `false` for an unknown or already-resolved correlation id.
    pub fn resolve_ack(
        &self,
        correlation_id: CorrelationId,
        success: bool,
        error: Option<String>,
    ) -> bool {
        let waiter = self.hub().pending.remove(&correlation_id);
        match waiter {
            Some(tx) => tx.send(Ack { success, error }).is_ok(),
            None => {
                tracing::debug!(%correlation_id, "Dropping late or unknown unlock acknowledgment");
                false
            },
        }
    }

    /// Pushes a single-booking change to every kiosk on the bay, returning how many
    /// connections accepted it
    pub fn broadcast_booking_change(
        &self,
        location: LocationId,
        bay: BayId,
        delta: BookingDelta,
    ) -> usize {
        self.fan_out(location, bay, &ServerMessage::BookingDelta(delta))
    }

    /// Pushes the full schedule of one local date to every kiosk on the bay
    pub fn send_refresh(
        &self,
        location: LocationId,
        bay: BayId,
        date: NaiveDate,
        bookings: Vec<BookingSummary>,
    ) -> usize {
        self.fan_out(location, bay, &ServerMessage::BookingsRefresh { date, bookings })
    }

    /// Pushes the full schedule of one local date to a single connection.
    ///
    /// Returns `false` when the connection has left the channel or its queue is full.
    pub fn send_refresh_to(
        &self,
        location: LocationId,
        bay: BayId,
        connection: ConnectionId,
        date: NaiveDate,
        bookings: Vec<BookingSummary>,
    ) -> bool {
        let sender = self
            .hub()
            .channels
            .get(&(location, bay))
            .and_then(|conns| conns.get(&connection))
            .cloned();
        sender.is_some_and(|sender| {
            sender
                .try_send(ServerMessage::BookingsRefresh { date, bookings })
                .is_ok()
        })
    }

    fn fan_out(&self, location: LocationId, bay: BayId, message: &ServerMessage) -> usize {
        let senders = self.hub().senders(&(location, bay));
        let delivered = senders
            .iter()
            .filter(|sender| sender.try_send(message.clone()).is_ok())
            .count();
        if delivered < senders.len() {
            tracing::debug!(
                %location,
                %bay,
                delivered,
                connections = senders.len(),
                "Some kiosks missed a schedule update"
            );
        }
        delivered
    }
}
