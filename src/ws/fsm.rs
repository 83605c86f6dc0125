//! Per-connection lifecycle.
//!
//! A connection moves strictly forward: transport handshake, then the join
//! request and access check, then active event routing, then closed. There
//! is no reconnect state; a reconnecting client runs a fresh cycle on a new
//! connection, reusing its stable user id.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Transport-level handshake in progress.
    Connecting,
    /// Waiting for the join request; the access check happens here.
    Joining,
    /// Participant registered; inbound messages route to the broadcaster.
    Active,
    /// Terminal. Closing an already-closed connection is a no-op.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// The websocket upgrade completed.
    Opened,
    /// The join request passed the access check and the participant is
    /// registered.
    JoinGranted,
    /// The access check rejected the join.
    JoinDenied,
    /// The transport closed or errored, from either side.
    TransportClosed,
}

impl ConnectionPhase {
    pub fn on_event(self, event: PhaseEvent) -> ConnectionPhase {
        use ConnectionPhase::*;
        use PhaseEvent::*;
        match (self, event) {
            (Connecting, Opened) => Joining,
            (Joining, JoinGranted) => Active,
            (Joining, JoinDenied) => Closed,
            (_, TransportClosed) => Closed,
            // Anything else is out of order; stay put.
            (phase, _) => phase,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionPhase::Active)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionPhase::Closed)
    }
}
