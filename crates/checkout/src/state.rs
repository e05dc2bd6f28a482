//! Checkout attempt state machine.

use serde::{Deserialize, Serialize};

/// The state of one checkout attempt.
///
/// State transitions:
/// ```text
/// Validating ──► CartLoaded ──► Reserving ──► Charging ──┬──► Paid ───┬──► Committing ──► Committed
///                                                        └──► Failed ─┘
/// ```
///
/// Every non-terminal state may also move to `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CheckoutState {
    /// Input is being checked.
    #[default]
    Validating,

    /// The cart was loaded and its total computed.
    CartLoaded,

    /// Stock is being reserved line by line.
    Reserving,

    /// Waiting on the payment provider.
    Charging,

    /// The provider approved the charge.
    Paid,

    /// The provider declined the charge.
    Failed,

    /// The unit of work is being committed.
    Committing,

    /// Everything is durable (terminal state).
    Committed,

    /// The attempt stopped without committing (terminal state).
    Aborted,
}

impl CheckoutState {
    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: CheckoutState) -> bool {
        use CheckoutState::*;

        if next == Aborted {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Validating, CartLoaded)
                | (CartLoaded, Reserving)
                | (Reserving, Charging)
                | (Charging, Paid)
                | (Charging, Failed)
                | (Paid, Committing)
                | (Failed, Committing)
                | (Committing, Committed)
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckoutState::Committed | CheckoutState::Aborted)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutState::Validating => "Validating",
            CheckoutState::CartLoaded => "CartLoaded",
            CheckoutState::Reserving => "Reserving",
            CheckoutState::Charging => "Charging",
            CheckoutState::Paid => "Paid",
            CheckoutState::Failed => "Failed",
            CheckoutState::Committing => "Committing",
            CheckoutState::Committed => "Committed",
            CheckoutState::Aborted => "Aborted",
        }
    }
}

impl std::fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_validating() {
        assert_eq!(CheckoutState::default(), CheckoutState::Validating);
    }

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            CheckoutState::Validating,
            CheckoutState::CartLoaded,
            CheckoutState::Reserving,
            CheckoutState::Charging,
            CheckoutState::Paid,
            CheckoutState::Committing,
            CheckoutState::Committed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_declined_charge_still_commits() {
        assert!(CheckoutState::Charging.can_transition_to(CheckoutState::Failed));
        assert!(CheckoutState::Failed.can_transition_to(CheckoutState::Committing));
    }

    #[test]
    fn test_no_skipping_steps() {
        assert!(!CheckoutState::Validating.can_transition_to(CheckoutState::Charging));
        assert!(!CheckoutState::Reserving.can_transition_to(CheckoutState::Committing));
        assert!(!CheckoutState::Paid.can_transition_to(CheckoutState::Committed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(CheckoutState::Committed.is_terminal());
        assert!(CheckoutState::Aborted.is_terminal());
        assert!(!CheckoutState::Committing.is_terminal());
        assert!(!CheckoutState::Committed.can_transition_to(CheckoutState::Aborted));
        assert!(!CheckoutState::Aborted.can_transition_to(CheckoutState::Aborted));
    }

    #[test]
    fn test_any_live_state_can_abort() {
        for state in [
            CheckoutState::Validating,
            CheckoutState::CartLoaded,
            CheckoutState::Reserving,
            CheckoutState::Charging,
            CheckoutState::Paid,
            CheckoutState::Failed,
            CheckoutState::Committing,
        ] {
            assert!(state.can_transition_to(CheckoutState::Aborted), "{state}");
        }
    }

    #[test]
    fn test_serialization() {
        let state = CheckoutState::Charging;
        let json = serde_json::to_string(&state).unwrap();
        let deserialized: CheckoutState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, deserialized);
    }
}
