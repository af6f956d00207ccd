//! Addressable event coordinates of the form `kind:pubkey:d-tag`.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{is_hex64, Event};

/// Reasons a coordinate string is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoordinateError {
    #[error("coordinate must have the form kind:pubkey:identifier")]
    MissingParts,
    #[error("invalid kind `{0}`")]
    Kind(String),
    #[error("invalid pubkey `{0}`")]
    Pubkey(String),
}

/// Parsed addressable reference.
///
/// The identifier may itself contain colons: everything after the second
/// colon belongs to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub kind: u32,
    pub pubkey: String,
    pub identifier: String,
}

impl Coordinate {
    pub fn new(kind: u32, pubkey: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            pubkey: pubkey.into(),
            identifier: identifier.into(),
        }
    }

    /// Coordinate of an addressable event; events without a `d` tag use `""`.
    pub fn of(event: &Event) -> Self {
        Self::new(
            event.kind,
            event.pubkey.clone(),
            event.identifier().unwrap_or_default(),
        )
    }
}

impl FromStr for Coordinate {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(kind), Some(pubkey), Some(identifier)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(CoordinateError::MissingParts);
        };
        let kind = kind
            .parse()
            .map_err(|_| CoordinateError::Kind(kind.to_string()))?;
        if !is_hex64(pubkey) {
            return Err(CoordinateError::Pubkey(pubkey.to_string()));
        }
        Ok(Self::new(kind, pubkey.to_ascii_lowercase(), identifier))
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.pubkey, self.identifier)
    }
}
