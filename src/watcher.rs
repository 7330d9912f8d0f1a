//! Participant tracking and message fan-out
//!
//! This module manages the participants of a game session, the host and the
//! players, and provides the fan-out primitives for delivering events to
//! their connections. Participant identity is tracked here; player roster
//! data (names, answers) lives with the game state machine.

use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    str::FromStr,
};

use enum_map::{Enum, EnumMap};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use uuid::Uuid;

use super::{
    game::{SyncMessage, UpdateMessage},
    session::Tunnel,
};

/// A unique identifier for participants in the game
///
/// Each participant (host or player) gets a unique ID that persists
/// throughout their participation in the game session, across disconnects
/// and reconnects.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct Id(Uuid);

impl Id {
    /// Creates a new random participant ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Id {
    /// Creates a new random participant ID (same as `new()`)
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Id {
    /// Formats the ID as a UUID string
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Id {
    type Err = uuid::Error;

    /// Parses an ID from a UUID string
    ///
    /// # Errors
    ///
    /// Returns a `uuid::Error` if the string is not a valid UUID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// The role of a participant in a game session
///
/// The role determines which commands a participant may issue and which
/// audience a broadcast reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize, Deserialize)]
pub enum Role {
    /// The game host who controls the game flow
    Host,
    /// A player participating in the game
    Player,
}

/// Errors that can occur when managing watchers
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The game has reached the maximum number of allowed players
    #[error("maximum number of players reached")]
    MaximumPlayers,
}

/// Manages all participants (watchers) of a game session
///
/// This struct tracks every participant and their role, and provides
/// functionality for sending messages to individual participants or
/// broadcasting to the whole session through their [`Tunnel`]s. A
/// participant without an active tunnel is simply skipped by sends; their
/// registration survives disconnects.
#[derive(Debug, Default)]
pub struct Watchers {
    /// Primary mapping from participant ID to their role
    mapping: HashMap<Id, Role>,

    /// Reverse mapping organized by role for efficient filtering
    reverse_mapping: EnumMap<Role, HashSet<Id>>,
}

impl Watchers {
    /// Creates a new Watchers instance with a host already assigned
    pub fn with_host_id(host_id: Id) -> Self {
        Self {
            mapping: {
                let mut map = HashMap::default();
                map.insert(host_id, Role::Host);
                map
            },
            reverse_mapping: {
                let mut map: EnumMap<Role, HashSet<Id>> = EnumMap::default();
                map[Role::Host].insert(host_id);
                map
            },
        }
    }

    /// Gets a vector of all participants with their tunnels and roles
    ///
    /// Participants without an active tunnel are omitted.
    pub fn vec<T: Tunnel, F: Fn(Id) -> Option<T>>(&self, tunnel_finder: F) -> Vec<(Id, T, Role)> {
        self.reverse_mapping
            .values()
            .flat_map(|v| v.iter())
            .filter_map(|x| match (tunnel_finder(*x), self.mapping.get(x)) {
                (Some(t), Some(v)) => Some((*x, t, *v)),
                _ => None,
            })
            .collect_vec()
    }

    /// Gets a vector of participants of a specific role with their tunnels
    pub fn specific_vec<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        filter: Role,
        tunnel_finder: F,
    ) -> Vec<(Id, T)> {
        self.reverse_mapping[filter]
            .iter()
            .filter_map(|x| tunnel_finder(*x).map(|t| (*x, t)))
            .collect_vec()
    }

    /// Gets the count of participants of a specific role
    pub fn specific_count(&self, filter: Role) -> usize {
        self.reverse_mapping[filter].len()
    }

    /// Adds a new watcher to the game session
    ///
    /// # Errors
    ///
    /// Returns [`Error::MaximumPlayers`] if adding this watcher would exceed
    /// the maximum allowed number of participants.
    pub fn add_watcher(&mut self, watcher_id: Id, role: Role) -> Result<(), Error> {
        if self.mapping.len() >= crate::constants::session::MAX_PLAYER_COUNT {
            return Err(Error::MaximumPlayers);
        }

        self.mapping.insert(watcher_id, role);
        self.reverse_mapping[role].insert(watcher_id);

        Ok(())
    }

    /// Gets the role of a specific watcher
    pub fn role(&self, watcher_id: Id) -> Option<Role> {
        self.mapping.get(&watcher_id).copied()
    }

    /// Checks if a watcher is registered in the game session
    pub fn has_watcher(&self, watcher_id: Id) -> bool {
        self.mapping.contains_key(&watcher_id)
    }

    /// Checks if a watcher has an active connection
    pub fn is_alive<T: Tunnel, F: Fn(Id) -> Option<T>>(watcher_id: Id, tunnel_finder: F) -> bool {
        tunnel_finder(watcher_id).is_some()
    }

    /// Sends an update message to a specific watcher
    pub fn send_message<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &UpdateMessage,
        watcher_id: Id,
        tunnel_finder: F,
    ) {
        let Some(session) = tunnel_finder(watcher_id) else {
            return;
        };

        session.send_message(message);
    }

    /// Sends a state synchronization message to a specific watcher
    pub fn send_state<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &SyncMessage,
        watcher_id: Id,
        tunnel_finder: F,
    ) {
        let Some(session) = tunnel_finder(watcher_id) else {
            return;
        };

        session.send_state(message);
    }

    /// Sends personalized messages to all watchers using a sender function
    ///
    /// The sender function is called for each connected watcher and can
    /// return different messages based on the watcher's ID and role, or
    /// `None` to skip sending.
    pub fn announce_with<S, T: Tunnel, F: Fn(Id) -> Option<T>>(&self, sender: S, tunnel_finder: F)
    where
        S: Fn(Id, Role) -> Option<UpdateMessage>,
    {
        for (watcher, session, role) in self.vec(tunnel_finder) {
            let Some(message) = sender(watcher, role) else {
                continue;
            };

            session.send_message(&message);
        }
    }

    /// Broadcasts an update message to every connected watcher
    pub fn announce<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &UpdateMessage,
        tunnel_finder: F,
    ) {
        self.announce_with(|_, _| Some(message.to_owned()), tunnel_finder);
    }

    /// Sends an update message to all watchers of a specific role
    pub fn announce_specific<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        filter: Role,
        message: &UpdateMessage,
        tunnel_finder: F,
    ) {
        for (_, session) in self.specific_vec(filter, tunnel_finder) {
            session.send_message(message);
        }
    }
}
