//! Core type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a cached conversion job.
///
/// Transitions only move forward: `Pending -> Ready` or `Pending -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    /// Conversion requested, engine work in flight.
    Pending,
    /// The artifact exists and can be served.
    Ready,
    /// The conversion ended with an error.
    Failed,
}

impl ConversionStatus {
    /// Whether no further transition is allowed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(self, next: ConversionStatus) -> bool {
        matches!((self, next), (Self::Pending, Self::Ready) | (Self::Pending, Self::Failed))
    }
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ConversionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid conversion status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_and_parse() {
        for status in [
            ConversionStatus::Pending,
            ConversionStatus::Ready,
            ConversionStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<ConversionStatus>(), Ok(status));
        }
        assert!("queued".parse::<ConversionStatus>().is_err());
    }

    #[test]
    fn test_transitions_only_move_forward() {
        use ConversionStatus::*;
        assert!(Pending.can_transition_to(Ready));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Ready.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ConversionStatus::Pending.is_terminal());
        assert!(ConversionStatus::Ready.is_terminal());
        assert!(ConversionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&ConversionStatus::Ready).unwrap();
        assert_eq!(json, "\"ready\"");
    }
}
