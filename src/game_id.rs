//! Game PIN generation and management
//!
//! This module provides functionality for generating and managing the short
//! join codes ("PINs") that players type in to enter a game session. PINs are
//! displayed as zero-padded 4-digit decimal numbers so they are easy to
//! communicate verbally or show on a projector.

use std::{fmt::Display, num::ParseIntError, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Number of distinct PINs (4 decimal digits)
const PIN_SPACE: u16 = 10_000;

/// A short human-enterable code identifying a joinable game session
///
/// PINs are drawn randomly from the 4-digit decimal space and rendered with
/// leading zeros. They are only unique among sessions that have not finished;
/// the [`registry`](crate::registry) reuses codes once a session retires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GamePin(u16);

impl GamePin {
    /// Number of distinct PINs available
    pub const SPACE: usize = PIN_SPACE as usize;

    /// Draws a new random PIN
    ///
    /// The caller is responsible for checking the result against PINs already
    /// in use; see [`Registry::create_session`](crate::registry::Registry::create_session).
    pub fn random() -> Self {
        Self(fastrand::u16(0..PIN_SPACE))
    }

    /// Returns the PIN at a given position in the PIN space
    ///
    /// Used by the registry to sweep the space exhaustively once random
    /// drawing keeps colliding.
    pub fn from_index(index: usize) -> Option<Self> {
        u16::try_from(index)
            .ok()
            .filter(|i| *i < PIN_SPACE)
            .map(Self)
    }
}

impl Display for GamePin {
    /// Formats the PIN as a zero-padded 4-digit decimal number
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

impl Serialize for GamePin {
    /// Serializes the PIN as a zero-padded decimal string
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for GamePin {
    /// Deserializes a PIN from its decimal string representation
    fn deserialize<D>(deserializer: D) -> Result<GamePin, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        GamePin::from_str(&s).map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}

/// Errors from parsing a PIN out of user input
#[derive(Debug, Error)]
pub enum ParsePinError {
    /// The input was not a decimal number
    #[error(transparent)]
    NotANumber(#[from] ParseIntError),
    /// The number does not fit in the 4-digit PIN space
    #[error("PIN must have at most 4 digits")]
    OutOfRange,
}

impl FromStr for GamePin {
    type Err = ParsePinError;

    /// Parses a PIN from a decimal string representation
    ///
    /// # Errors
    ///
    /// Returns [`ParsePinError`] if the string is not a decimal number inside
    /// the 4-digit space.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u16 = s.parse()?;
        if value < PIN_SPACE {
            Ok(Self(value))
        } else {
            Err(ParsePinError::OutOfRange)
        }
    }
}
