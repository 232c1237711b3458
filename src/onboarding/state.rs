//! Onboarding state machine: tracks which phase each user is in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The phases of the onboarding conversation.
///
/// Progresses forward only: Asking → Confirmation → Done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingPhase {
    /// Questions are being asked.
    Asking,
    /// Enough is known; waiting for the user to close or add more.
    Confirmation,
    Done,
}

impl OnboardingPhase {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: OnboardingPhase) -> bool {
        use OnboardingPhase::*;
        matches!(
            (self, target),
            (Asking, Confirmation) | (Asking, Done) | (Confirmation, Done)
        )
    }

    /// Whether this phase is terminal (onboarding is done).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Get the next phase in the linear progression, if any.
    pub fn next(&self) -> Option<OnboardingPhase> {
        match self {
            Self::Asking => Some(Self::Confirmation),
            Self::Confirmation => Some(Self::Done),
            Self::Done => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asking => "asking",
            Self::Confirmation => "confirmation",
            Self::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asking" => Some(Self::Asking),
            "confirmation" => Some(Self::Confirmation),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

impl std::fmt::Display for OnboardingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted per-user onboarding state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingState {
    pub sender: String,
    pub phase: OnboardingPhase,
    /// Last question sent to the user.
    pub last_question: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl OnboardingState {
    pub fn new(sender: &str, now: DateTime<Utc>) -> Self {
        Self {
            sender: sender.to_string(),
            phase: OnboardingPhase::Asking,
            last_question: None,
            updated_at: now,
        }
    }

    /// Move to `target` if that is a forward transition.
    ///
    /// Returns the phase actually in effect afterwards. Backward or
    /// self transitions leave the phase unchanged.
    pub fn advance_to(&mut self, target: OnboardingPhase) -> OnboardingPhase {
        if self.phase.can_transition_to(target) {
            self.phase = target;
        } else if target != self.phase {
            tracing::debug!(
                sender = %self.sender,
                from = %self.phase,
                to = %target,
                "Ignoring backward onboarding transition"
            );
        }
        self.phase
    }
}
