//! # QuizWhiz Game Engine
//!
//! This library provides the live session engine for the QuizWhiz quiz
//! platform. It handles game sessions joined by PIN, the question/reveal/
//! leaderboard flow, latency-based scoring, and real-time synchronization
//! between players and hosts. Quiz authoring and storage live outside this
//! crate behind the [`quiz::QuizSource`] collaborator trait.

#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::wildcard_imports)]
use derive_where::derive_where;
use itertools::Itertools;
use serde::Serialize;

pub mod constants;

pub mod game;
pub mod game_id;
pub mod leaderboard;
pub mod quiz;
pub mod registry;
pub mod runtime;
pub mod scoring;
pub mod session;
pub mod watcher;

/// An event delivered to one connected client
///
/// All traffic towards a client is one of two kinds: update messages about
/// committed state changes, and sync messages carrying a full snapshot for
/// (re)connection. Within one session, events reach each client in the order
/// the state machine produced them.
#[derive(Debug, Serialize, Clone, derive_more::From)]
pub enum ServerEvent {
    /// A committed state change
    Update(game::UpdateMessage),
    /// A full snapshot of the current phase
    Sync(game::SyncMessage),
}

impl ServerEvent {
    /// Converts the event to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// A truncated vector that maintains the exact count while limiting displayed items
///
/// This structure is useful for displaying a limited number of items while
/// still showing the total count. For example, showing "120 players" but only
/// sending the first 50 roster entries.
#[derive(Debug, Clone, Serialize)]
#[derive_where(Default)]
pub struct TruncatedVec<T> {
    /// The exact total count of items
    exact_count: usize,
    /// The truncated list of items (up to the limit)
    items: Vec<T>,
}

impl<T: Clone> TruncatedVec<T> {
    /// Creates a new truncated vector from an iterator
    ///
    /// # Arguments
    ///
    /// * `list` - An iterator over items to include
    /// * `limit` - Maximum number of items to include in the truncated vector
    /// * `exact_count` - The exact total count of items (may be larger than limit)
    pub fn new<I: Iterator<Item = T>>(list: I, limit: usize, exact_count: usize) -> Self {
        let items = list.take(limit).collect_vec();
        Self { exact_count, items }
    }

    /// Maps a function over the items in the truncated vector
    pub fn map<F, U>(self, f: F) -> TruncatedVec<U>
    where
        F: Fn(T) -> U,
    {
        TruncatedVec {
            exact_count: self.exact_count,
            items: self.items.into_iter().map(f).collect_vec(),
        }
    }

    /// Returns the exact count of items
    pub fn exact_count(&self) -> usize {
        self.exact_count
    }

    /// Returns the truncated items
    pub fn items(&self) -> &[T] {
        &self.items
    }
}
