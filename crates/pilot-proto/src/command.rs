use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Coordinate;

/// Operator command for the vehicle. Sent, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "data")]
pub enum Command {
    /// Queue a target position on the vehicle.
    #[serde(rename = "move")]
    Move(Coordinate),
    /// Drop the most recently queued target.
    #[serde(rename = "p")]
    ClearPrevious,
    /// Drop every queued target.
    #[serde(rename = "c")]
    ClearAll,
}

impl Command {
    pub fn tag(&self) -> &'static str {
        match self {
            Command::Move(_) => "move",
            Command::ClearPrevious => "p",
            Command::ClearAll => "c",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Move(c) => write!(f, "move({})", c),
            other => f.write_str(other.tag()),
        }
    }
}
