//! Communication session management
//!
//! This module defines the trait for tunneling messages between the game
//! engine and connected clients (the host and players). The tunnel
//! abstraction allows for different communication mechanisms while
//! maintaining a consistent interface; the runtime layer implements it over
//! in-process channels, a server embedding it might implement it over
//! WebSockets.

use crate::game::{SyncMessage, UpdateMessage};

/// Trait for sending messages through a communication tunnel
///
/// Sends must be non-blocking: the game core calls them synchronously while
/// holding exclusive session state, so an implementation may queue but never
/// wait on I/O. Messages sent through one tunnel are delivered in the order
/// they were sent.
pub trait Tunnel {
    /// Sends an update message to the client
    ///
    /// Update messages notify clients about changes that affect their
    /// current view or state.
    fn send_message(&self, message: &UpdateMessage);

    /// Sends a state synchronization message to the client
    ///
    /// Sync messages carry a full snapshot of the current phase, used when a
    /// client connects or reconnects mid-session.
    fn send_state(&self, state: &SyncMessage);

    /// Closes the communication tunnel
    ///
    /// This method should be called when the client disconnects or
    /// when the communication is no longer needed.
    fn close(self);
}
