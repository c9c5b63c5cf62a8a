//! # SIP Lifecycle State
//!
//! The persisted state of an archival package and the rules for moving
//! between states. Transitions are checked at runtime because state is
//! always loaded from the catalog.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Lifecycle state of an archival package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SipState {
    /// Creation or hard deletion in flight.
    Processing,
    /// Stored and verified.
    Archived,
    /// Logically deleted. Payload still on disk.
    Removed,
    /// Payload physically erased. Metadata retained.
    Deleted,
    /// Reported by an audit when stored bytes no longer match their digest.
    Corrupted,
}

impl SipState {
    /// Returns the canonical state name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Processing => "PROCESSING",
            Self::Archived => "ARCHIVED",
            Self::Removed => "REMOVED",
            Self::Deleted => "DELETED",
            Self::Corrupted => "CORRUPTED",
        }
    }

    /// Parse a canonical state name as stored in the catalog.
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "PROCESSING" => Some(Self::Processing),
            "ARCHIVED" => Some(Self::Archived),
            "REMOVED" => Some(Self::Removed),
            "DELETED" => Some(Self::Deleted),
            "CORRUPTED" => Some(Self::Corrupted),
            _ => None,
        }
    }

    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted)
    }

    /// Whether a hard delete may be registered from this state.
    pub fn accepts_deletion(&self) -> bool {
        matches!(self, Self::Archived | Self::Removed)
    }

    /// Whether `self -> to` is a legal persisted transition.
    pub fn can_transition_to(&self, to: SipState) -> bool {
        matches!(
            (*self, to),
            (SipState::Processing, SipState::Archived)
                | (SipState::Archived, SipState::Removed)
                | (SipState::Archived, SipState::Processing)
                | (SipState::Removed, SipState::Processing)
                | (SipState::Processing, SipState::Deleted)
        )
    }

    /// Validate `self -> to`, returning the target on success.
    pub fn try_transition(&self, to: SipState) -> Result<SipState, LifecycleError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(LifecycleError::InvalidTransition {
                from: *self,
                to,
            })
        }
    }
}

impl std::fmt::Display for SipState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Errors raised by lifecycle checks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// Attempted transition is not allowed by the state machine.
    #[error("invalid sip transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: SipState,
        /// Attempted target state.
        to: SipState,
    },

    /// Metadata versions are not contiguous from 1.
    #[error("xml versions are not contiguous: expected {expected}, found {found}")]
    VersionGap {
        /// The version that should have been present.
        expected: u32,
        /// The version actually found at that position.
        found: u32,
    },
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SipState; 5] = [
        SipState::Processing,
        SipState::Archived,
        SipState::Removed,
        SipState::Deleted,
        SipState::Corrupted,
    ];

    #[test]
    fn creation_path() {
        assert_eq!(
            SipState::Processing.try_transition(SipState::Archived),
            Ok(SipState::Archived)
        );
    }

    #[test]
    fn soft_delete_only_from_archived() {
        for from in ALL {
            let ok = from.try_transition(SipState::Removed).is_ok();
            assert_eq!(ok, from == SipState::Archived, "from {from}");
        }
    }

    #[test]
    fn deletion_registration_from_archived_or_removed_only() {
        for from in ALL {
            let ok = from.try_transition(SipState::Processing).is_ok();
            assert_eq!(ok, from.accepts_deletion(), "from {from}");
        }
        assert!(!SipState::Processing.accepts_deletion());
        assert!(!SipState::Deleted.accepts_deletion());
        assert!(!SipState::Corrupted.accepts_deletion());
    }

    #[test]
    fn deleted_is_terminal() {
        for to in ALL {
            assert!(SipState::Deleted.try_transition(to).is_err());
        }
        assert!(SipState::Deleted.is_terminal());
    }

    #[test]
    fn corrupted_is_never_a_target() {
        for from in ALL {
            assert!(from.try_transition(SipState::Corrupted).is_err());
        }
    }

    #[test]
    fn rejected_transition_names_both_states() {
        let err = SipState::Removed.try_transition(SipState::Archived).unwrap_err();
        assert_eq!(err.to_string(), "invalid sip transition: REMOVED -> ARCHIVED");
    }

    #[test]
    fn names_roundtrip_and_match_serde() {
        for s in ALL {
            assert_eq!(SipState::from_name(s.name()), Some(s));
            let json = serde_json::to_string(&s).unwrap();
            assert_eq!(json, format!("\"{}\"", s.name()));
        }
        assert_eq!(SipState::from_name("archived"), None);
    }
}
