//! OnboardingEngine: merges preference answers, decides when enough is
//! known, phrases the next question, and proactively onboards new users.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channels::MessageSender;
use crate::clock::Clock;
use crate::conversation::dedup::DedupLedger;
use crate::conversation::extract::FieldExtractor;
use crate::conversation::model::{ConversationTurn, TurnSource};
use crate::error::DatabaseError;
use crate::llm::FailoverGateway;
use crate::store::Database;

use super::model::{
    PREFERENCE_CHECKLIST, PreferenceQuestion, RegisteredUser, UserPreferences, UserProfile,
    is_valid_phone,
};
use super::prompts::{
    CLOSING_MESSAGE, CONFIRMATION_MESSAGE, completeness_prompt, first_question_prompt,
    next_question_prompt, parse_yes_no, welcome_message,
};
use super::state::{OnboardingPhase, OnboardingState};

/// Sent when a user who already finished onboarding adds a preference.
pub const PREFERENCES_UPDATED_MESSAGE: &str = "Got it! I've updated your preferences 👍";

/// What the engine wants sent back, and the phase now in effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardingReply {
    pub text: String,
    pub phase: OnboardingPhase,
}

/// Tally of one proactive onboarding sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub considered: usize,
    pub started: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum SweepOutcome {
    Started,
    Skipped,
    Failed,
}

/// Drives the per-user onboarding state machine.
pub struct OnboardingEngine {
    db: Arc<dyn Database>,
    gateway: Arc<FailoverGateway>,
    extractor: FieldExtractor,
    ledger: DedupLedger,
    sender: Arc<dyn MessageSender>,
    clock: Arc<dyn Clock>,
}

impl OnboardingEngine {
    pub fn new(
        db: Arc<dyn Database>,
        gateway: Arc<FailoverGateway>,
        sender: Arc<dyn MessageSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            extractor: FieldExtractor::new(Arc::clone(&gateway)),
            ledger: DedupLedger::new(Arc::clone(&db), Arc::clone(&clock)),
            db,
            gateway,
            sender,
            clock,
        }
    }

    /// Process a free-text onboarding answer.
    ///
    /// 1. Extract a preference delta and merge it into the stored preferences.
    /// 2. While still asking, decide whether enough is known.
    /// 3. Either confirm or phrase the next question.
    /// 4. Persist the (forward-only) phase.
    ///
    /// The reply is returned, not sent; the caller records and delivers it.
    pub async fn handle_answer(
        &self,
        sender: &str,
        answer: &str,
        context: &str,
    ) -> Result<OnboardingReply, DatabaseError> {
        let now = self.clock.now();
        let current = self.db.get_preferences(sender).await?;
        let delta = self
            .extractor
            .extract_preferences(answer, &current, context)
            .await;
        let preferences = if delta.is_empty() {
            debug!(sender, "No preferences found in answer");
            current
        } else {
            info!(sender, keys = delta.len(), "Merging preference answer");
            self.db.merge_preferences(sender, &delta, now).await?
        };

        let mut state = self
            .db
            .get_onboarding_state(sender)
            .await?
            .unwrap_or_else(|| OnboardingState::new(sender, now));

        let missing = preferences.missing();
        if state.phase == OnboardingPhase::Asking && self.is_complete(&preferences, &missing).await
        {
            state.advance_to(OnboardingPhase::Confirmation);
        }

        let text = match state.phase {
            OnboardingPhase::Asking => {
                let question = self
                    .next_question(&preferences, &missing, state.last_question.as_deref())
                    .await;
                state.last_question = Some(question.clone());
                question
            }
            OnboardingPhase::Confirmation => CONFIRMATION_MESSAGE.to_string(),
            OnboardingPhase::Done => PREFERENCES_UPDATED_MESSAGE.to_string(),
        };

        state.updated_at = now;
        self.db.put_onboarding_state(&state).await?;
        info!(sender, phase = %state.phase, "Onboarding answer handled");

        Ok(OnboardingReply {
            text,
            phase: state.phase,
        })
    }

    /// Finish onboarding after the user declines to add more.
    pub async fn close(&self, sender: &str) -> Result<OnboardingReply, DatabaseError> {
        let now = self.clock.now();
        let mut state = self
            .db
            .get_onboarding_state(sender)
            .await?
            .unwrap_or_else(|| OnboardingState::new(sender, now));
        state.advance_to(OnboardingPhase::Done);
        state.updated_at = now;
        self.db.put_onboarding_state(&state).await?;
        info!(sender, "Onboarding closed");
        Ok(OnboardingReply {
            text: CLOSING_MESSAGE.to_string(),
            phase: state.phase,
        })
    }

    /// Everything known about `phone`, or `None` if nothing is.
    pub async fn profile(&self, phone: &str) -> Result<Option<UserProfile>, DatabaseError> {
        let user = self.db.get_user(phone).await?;
        let onboarding = self.db.get_onboarding_state(phone).await?;
        let preferences = self.db.get_preferences(phone).await?;
        if user.is_none() && onboarding.is_none() && preferences.is_empty() {
            return Ok(None);
        }
        Ok(Some(UserProfile {
            phone: phone.to_string(),
            name: user.and_then(|u| u.name),
            preferences,
            onboarding,
        }))
    }

    /// Start onboarding for every registered user who has never talked to
    /// the bot. Each user is handled independently; one failure does not
    /// stop the others.
    pub async fn sweep(&self) -> Result<SweepReport, DatabaseError> {
        let users = self.db.list_users().await?;
        info!(users = users.len(), "Onboarding sweep started");

        let outcomes = join_all(users.iter().map(|user| self.start_for(user))).await;

        let mut report = SweepReport {
            considered: users.len(),
            ..SweepReport::default()
        };
        for outcome in outcomes {
            match outcome {
                SweepOutcome::Started => report.started += 1,
                SweepOutcome::Skipped => report.skipped += 1,
                SweepOutcome::Failed => report.failed += 1,
            }
        }
        info!(
            started = report.started,
            skipped = report.skipped,
            failed = report.failed,
            "Onboarding sweep finished"
        );
        Ok(report)
    }

    async fn start_for(&self, user: &RegisteredUser) -> SweepOutcome {
        match self.try_start(user).await {
            Ok(true) => SweepOutcome::Started,
            Ok(false) => SweepOutcome::Skipped,
            Err(e) => {
                warn!(phone = %user.phone, error = %e, "Failed to start onboarding");
                SweepOutcome::Failed
            }
        }
    }

    /// Returns `Ok(false)` when the user is not eligible.
    async fn try_start(&self, user: &RegisteredUser) -> Result<bool, crate::error::Error> {
        let phone = user.phone.as_str();
        if !is_valid_phone(phone) {
            debug!(phone, "Skipping onboarding for invalid phone");
            return Ok(false);
        }
        if self.db.has_turns(phone).await? || self.db.get_onboarding_state(phone).await?.is_some()
        {
            return Ok(false);
        }
        // The welcome goes out at most once per user, even across restarts.
        let claim_id = format!("onboarding-{phone}");
        if !self.ledger.try_claim(&claim_id, phone).await? {
            return Ok(false);
        }

        let preferences = self.db.get_preferences(phone).await?;
        let missing = preferences.missing();
        let question = match self
            .gateway
            .generate(&first_question_prompt(
                user.display_name(),
                &preferences,
                &missing,
            ))
            .await
        {
            Some(question) => question,
            None => fallback_question(&missing).to_string(),
        };

        let welcome = welcome_message(user.display_name());
        for text in [&welcome, &question] {
            if let Err(e) = self.sender.send(phone, text).await {
                // Nothing is recorded yet, so a later sweep starts over.
                self.ledger.release(&claim_id).await?;
                return Err(e.into());
            }
        }

        let now = self.clock.now();
        let mut state = OnboardingState::new(phone, now);
        state.last_question = Some(question.clone());
        self.db.put_onboarding_state(&state).await?;

        for text in [&welcome, &question] {
            self.db
                .append_turn(&ConversationTurn::outbound(
                    phone,
                    text,
                    TurnSource::Onboarding,
                    now,
                ))
                .await?;
        }

        info!(phone, "Onboarding started");
        Ok(true)
    }

    async fn is_complete(
        &self,
        preferences: &UserPreferences,
        missing: &[&PreferenceQuestion],
    ) -> bool {
        let label = self
            .gateway
            .generate_label(&completeness_prompt(preferences, missing))
            .await;
        match label.as_deref().and_then(parse_yes_no) {
            Some(decision) => decision,
            None => {
                debug!("Completeness check unavailable, using checklist");
                missing.is_empty()
            }
        }
    }

    async fn next_question(
        &self,
        preferences: &UserPreferences,
        missing: &[&PreferenceQuestion],
        last_question: Option<&str>,
    ) -> String {
        let prompt = next_question_prompt(preferences, missing, last_question);
        match self.gateway.generate(&prompt).await {
            Some(question) => question,
            None => fallback_question(missing).to_string(),
        }
    }
}

fn fallback_question(missing: &[&PreferenceQuestion]) -> &'static str {
    missing
        .first()
        .map(|q| q.question)
        .unwrap_or(PREFERENCE_CHECKLIST[0].question)
}
