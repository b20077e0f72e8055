//! Node and cluster availability states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ClusterStateError;

/// The possible states of a node or of the cluster as a whole.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum State {
    /// Available and serving.
    Up,

    /// Not available.
    Down,

    /// Taken out of service by an operator; keeps its data.
    Maintenance,

    /// Being drained of its data.
    Retired,

    /// Starting up and listing its buckets.
    Initializing,

    /// Shutting down.
    Stopping,
}

/// States in which a distributor is considered to hold on to bucket ownership.
pub const DISTRIBUTOR_AVAILABLE_STATES: [State; 4] = [
    State::Up,
    State::Initializing,
    State::Maintenance,
    State::Retired,
];

impl State {
    /// The single character used for this state in the wire form.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Up => 'u',
            Self::Down => 'd',
            Self::Maintenance => 'm',
            Self::Retired => 'r',
            Self::Initializing => 'i',
            Self::Stopping => 's',
        }
    }

    /// Looks up a state from its wire character.
    #[must_use]
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            'u' => Some(Self::Up),
            'd' => Some(Self::Down),
            'm' => Some(Self::Maintenance),
            'r' => Some(Self::Retired),
            'i' => Some(Self::Initializing),
            's' => Some(Self::Stopping),
            _ => None,
        }
    }

    /// Returns true if this state is one of `states`.
    #[must_use]
    pub fn one_of(self, states: &[Self]) -> bool {
        states.contains(&self)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Maintenance => "maintenance",
            Self::Retired => "retired",
            Self::Initializing => "initializing",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

impl FromStr for State {
    type Err = ClusterStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => {
                Self::from_char(c).ok_or_else(|| ClusterStateError::InvalidState(s.to_string()))
            }
            _ => Err(ClusterStateError::InvalidState(s.to_string())),
        }
    }
}
