//! Per-sender conversation state, derived from persisted records.

use crate::conversation::model::PendingMealClarification;
use crate::error::DatabaseError;
use crate::onboarding::state::{OnboardingPhase, OnboardingState};
use crate::store::Database;

/// Mutually exclusive states of one sender's conversation.
///
/// Nothing is held in memory between messages; the state is rebuilt from
/// the pending-meal and onboarding records each time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    AwaitingMealSlot { food: String },
    OnboardingAsking { last_question: Option<String> },
    OnboardingConfirmation,
}

impl ConversationState {
    /// A pending meal takes precedence over onboarding.
    pub fn derive(
        pending: Option<&PendingMealClarification>,
        onboarding: Option<&OnboardingState>,
    ) -> Self {
        if let Some(pending) = pending {
            return Self::AwaitingMealSlot {
                food: pending.food.clone(),
            };
        }
        match onboarding {
            Some(state) => match state.phase {
                OnboardingPhase::Asking => Self::OnboardingAsking {
                    last_question: state.last_question.clone(),
                },
                OnboardingPhase::Confirmation => Self::OnboardingConfirmation,
                OnboardingPhase::Done => Self::Idle,
            },
            None => Self::Idle,
        }
    }

    pub async fn load(db: &dyn Database, sender: &str) -> Result<Self, DatabaseError> {
        let pending = db.get_pending_meal(sender).await?;
        let onboarding = db.get_onboarding_state(sender).await?;
        Ok(Self::derive(pending.as_ref(), onboarding.as_ref()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingMealSlot { .. } => "awaiting_meal_slot",
            Self::OnboardingAsking { .. } => "onboarding_asking",
            Self::OnboardingConfirmation => "onboarding_confirmation",
        }
    }
}
