//! Conversation core: routes each inbound message to a meal log, a
//! clarification, onboarding, or a conversational reply.
//!
//! Flow per message:
//! 1. Sanity filter (non-text, empty, or our own echo) → skip, no claim
//! 2. Dedup claim → duplicates stop here
//! 3. Context read, inbound turn appended
//! 4. Pending meal slot answer → resolve without classifying
//! 5. Closing word during onboarding confirmation → finish onboarding
//! 6. Intent classification → log meal / onboarding / suggestions / chat
//! 7. Outbound turn appended, then the reply is sent (best effort)
//!
//! The state mutation is committed before the reply goes out. A failed
//! send is logged and reported; the claim then suppresses redeliveries, so
//! a reply may be lost but a meal is never logged twice.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::channels::MessageSender;
use crate::clock::Clock;
use crate::conversation::context::{chat_prompt, load_context};
use crate::conversation::dedup::DedupLedger;
use crate::conversation::extract::{FieldExtractor, FoodItem, meal_slot_for_hour};
use crate::conversation::intent::{Intent, IntentClassifier};
use crate::conversation::model::{
    ConversationTurn, InboundMessage, MealLogEntry, MealSlot, MessageKind,
    PendingMealClarification, TurnSource,
};
use crate::conversation::state::ConversationState;
use crate::error::Error;
use crate::llm::FailoverGateway;
use crate::onboarding::manager::OnboardingEngine;
use crate::onboarding::prompts::is_close_reply;
use crate::onboarding::state::OnboardingPhase;
use crate::store::Database;

/// Reply used whenever nothing better can be said.
pub const APOLOGY_MESSAGE: &str = "Sorry, I couldn't find the response.";

/// Asked when a food item was found but no meal slot.
pub const SLOT_QUESTION: &str = "Got it! Was this for *breakfast*, *lunch*, or *dinner*?";

/// Text our own welcome message carries; inbound copies of it are echoes.
const WELCOME_MARKER: &str = "I'm your personal meal assistant";

/// Why a message was dropped before claiming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotText,
    EmptyBody,
    OwnEcho,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped(SkipReason),
    Duplicate,
    /// A pending food item got its slot from this message.
    PendingResolved { food: String, slot: MealSlot },
    MealLogged { food: String, slot: MealSlot },
    ClarificationRequested { food: String },
    NoFoodMentioned,
    Suggestions,
    Onboarding(OnboardingPhase),
    OnboardingClosed,
    Chat,
    /// Something failed; the user got the apology.
    Failed(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped(_) => "skipped",
            Self::Duplicate => "duplicate",
            Self::PendingResolved { .. } => "pending_resolved",
            Self::MealLogged { .. } => "meal_logged",
            Self::ClarificationRequested { .. } => "clarification_requested",
            Self::NoFoodMentioned => "no_food_mentioned",
            Self::Suggestions => "suggestions",
            Self::Onboarding(_) => "onboarding",
            Self::OnboardingClosed => "onboarding_closed",
            Self::Chat => "chat",
            Self::Failed(_) => "failed",
        }
    }
}

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReport {
    pub message_id: String,
    pub sender: String,
    pub outcome: Outcome,
    /// Whether the reply reached the sender collaborator successfully.
    pub reply_sent: bool,
}

/// Tuning for the core.
#[derive(Debug, Clone, Copy)]
pub struct CoreConfig {
    /// Number of recent turns fed to generation calls.
    pub context_turns: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self { context_turns: 5 }
    }
}

/// The conversation/intent resolution core.
pub struct ConversationCore {
    db: Arc<dyn Database>,
    ledger: DedupLedger,
    classifier: IntentClassifier,
    extractor: FieldExtractor,
    gateway: Arc<FailoverGateway>,
    onboarding: Arc<OnboardingEngine>,
    sender: Arc<dyn MessageSender>,
    clock: Arc<dyn Clock>,
    config: CoreConfig,
}

impl ConversationCore {
    pub fn new(
        db: Arc<dyn Database>,
        gateway: Arc<FailoverGateway>,
        onboarding: Arc<OnboardingEngine>,
        sender: Arc<dyn MessageSender>,
        clock: Arc<dyn Clock>,
        config: CoreConfig,
    ) -> Self {
        Self {
            ledger: DedupLedger::new(Arc::clone(&db), Arc::clone(&clock)),
            classifier: IntentClassifier::new(Arc::clone(&gateway)),
            extractor: FieldExtractor::new(Arc::clone(&gateway)),
            db,
            gateway,
            onboarding,
            sender,
            clock,
            config,
        }
    }

    /// Handle one webhook delivery.
    ///
    /// Messages are grouped by sender. Different senders run concurrently;
    /// one sender's messages run one after another in arrival order.
    pub async fn handle_batch(&self, messages: Vec<InboundMessage>) -> Vec<MessageReport> {
        if messages.is_empty() {
            return Vec::new();
        }
        let count = messages.len();

        let mut groups: Vec<(String, Vec<InboundMessage>)> = Vec::new();
        for message in messages {
            match groups.iter_mut().find(|(sender, _)| *sender == message.sender) {
                Some((_, group)) => group.push(message),
                None => groups.push((message.sender.clone(), vec![message])),
            }
        }
        info!(count, senders = groups.len(), "Processing webhook batch");

        let per_sender = join_all(groups.into_iter().map(|(_, group)| async move {
            let mut reports = Vec::with_capacity(group.len());
            for message in group {
                reports.push(self.handle_message(message).await);
            }
            reports
        }))
        .await;

        per_sender.into_iter().flatten().collect()
    }

    /// Handle a single inbound message end to end. Never fails; problems
    /// are reported in the returned outcome.
    pub async fn handle_message(&self, message: InboundMessage) -> MessageReport {
        let mut report = MessageReport {
            message_id: message.id.clone(),
            sender: message.sender.clone(),
            outcome: Outcome::Duplicate,
            reply_sent: false,
        };

        if let Some(reason) = sanity_check(&message) {
            debug!(message_id = %message.id, ?reason, "Skipping inbound message");
            report.outcome = Outcome::Skipped(reason);
            return report;
        }

        let (outcome, reply) = match self.ledger.try_claim(&message.id, &message.sender).await {
            Ok(false) => return report,
            Ok(true) => match self.process(&message).await {
                Ok(result) => result,
                Err(e) => {
                    error!(message_id = %message.id, error = %e, "Failed to process message");
                    (Outcome::Failed(e.to_string()), APOLOGY_MESSAGE.to_string())
                }
            },
            Err(e) => {
                error!(message_id = %message.id, error = %e, "Dedup claim failed");
                (Outcome::Failed(e.to_string()), APOLOGY_MESSAGE.to_string())
            }
        };

        info!(
            message_id = %message.id,
            sender = %message.sender,
            outcome = outcome.label(),
            "Message handled"
        );
        report.reply_sent = self.deliver(&message.sender, &reply).await;
        report.outcome = outcome;
        report
    }

    async fn process(&self, message: &InboundMessage) -> Result<(Outcome, String), Error> {
        let sender = message.sender.as_str();
        let body = message.body.trim();

        let context = load_context(self.db.as_ref(), sender, self.config.context_turns).await?;
        self.db
            .append_turn(&ConversationTurn::inbound(sender, body, self.clock.now()))
            .await?;

        let state = ConversationState::load(self.db.as_ref(), sender).await?;
        debug!(sender, state = state.name(), "Conversation state");

        if let ConversationState::AwaitingMealSlot { .. } = state
            && let Some(slot) = MealSlot::parse(body)
            && let Some(entry) = self
                .db
                .resolve_pending_meal(sender, slot, self.clock.now())
                .await?
        {
            info!(sender, food = %entry.food, slot = %slot, "Pending meal resolved");
            let reply = format!("Perfect! Logged \"{}\" as your {}. ✅", entry.food, slot.as_str());
            return Ok((
                Outcome::PendingResolved {
                    food: entry.food,
                    slot,
                },
                reply,
            ));
        }

        if state == ConversationState::OnboardingConfirmation && is_close_reply(body) {
            let reply = self.onboarding.close(sender).await?;
            return Ok((Outcome::OnboardingClosed, reply.text));
        }

        let intent = self.classifier.classify(body, &context).await;
        info!(sender, intent = intent.as_str(), "Classified message");

        match intent {
            Intent::LogMeal => self.log_meal(sender, body).await,
            Intent::StartOnboarding => {
                let reply = self.onboarding.handle_answer(sender, body, &context).await?;
                Ok((Outcome::Onboarding(reply.phase), reply.text))
            }
            Intent::GetMealSuggestions => Ok(self.converse(&context, body, Outcome::Suggestions).await),
            Intent::GeneralChat => Ok(self.converse(&context, body, Outcome::Chat).await),
        }
    }

    async fn log_meal(&self, sender: &str, body: &str) -> Result<(Outcome, String), Error> {
        let Some(food) = self.extractor.extract_food_item(body).await else {
            warn!(sender, "Food extraction unavailable");
            return Ok((
                Outcome::Failed("food extraction unavailable".into()),
                APOLOGY_MESSAGE.to_string(),
            ));
        };

        let slot = match self.extractor.extract_meal_slot(body).await {
            Some(slot) => Some(slot),
            None => {
                let hour = self.clock.local_hour();
                let inferred = meal_slot_for_hour(hour);
                debug!(sender, hour, slot = ?inferred, "Inferred meal slot from time of day");
                inferred
            }
        };

        let now = self.clock.now();
        match (food, slot) {
            (FoodItem::Food(food), Some(slot)) => {
                self.db
                    .insert_meal_log(&MealLogEntry::new(sender, &food, slot, now))
                    .await?;
                info!(sender, food = %food, slot = %slot, "Meal logged");
                let reply = format!("Yum! Logged: \"{food}\" for {slot} 🍽️");
                Ok((Outcome::MealLogged { food, slot }, reply))
            }
            (FoodItem::Food(food), None) => {
                self.db
                    .put_pending_meal(&PendingMealClarification {
                        sender: sender.to_string(),
                        food: food.clone(),
                        created_at: now,
                    })
                    .await?;
                info!(sender, food = %food, "Meal slot unknown, asking");
                Ok((
                    Outcome::ClarificationRequested { food },
                    SLOT_QUESTION.to_string(),
                ))
            }
            (FoodItem::NotMentioned, Some(slot)) => Ok((
                Outcome::NoFoodMentioned,
                format!("What did you have for {}? Tell me the dish and I'll log it 🍽️", slot.as_str()),
            )),
            (FoodItem::NotMentioned, None) => Ok((
                Outcome::NoFoodMentioned,
                "What did you eat? Tell me the dish and I'll log it 🍽️".to_string(),
            )),
        }
    }

    async fn converse(&self, context: &str, body: &str, outcome: Outcome) -> (Outcome, String) {
        match self.gateway.generate(&chat_prompt(context, body)).await {
            Some(reply) => (outcome, reply),
            None => (
                Outcome::Failed("reply generation unavailable".into()),
                APOLOGY_MESSAGE.to_string(),
            ),
        }
    }

    /// Record the outbound turn, then send. Returns whether the send worked.
    async fn deliver(&self, recipient: &str, text: &str) -> bool {
        let turn = ConversationTurn::outbound(recipient, text, TurnSource::Reply, self.clock.now());
        if let Err(e) = self.db.append_turn(&turn).await {
            warn!(recipient, error = %e, "Failed to record outbound turn");
        }
        match self.sender.send(recipient, text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(recipient, channel = self.sender.name(), error = %e, "Failed to send reply");
                false
            }
        }
    }
}

/// Drop messages the core should never see.
fn sanity_check(message: &InboundMessage) -> Option<SkipReason> {
    if message.kind != MessageKind::Text {
        return Some(SkipReason::NotText);
    }
    let body = message.body.trim();
    if body.is_empty() {
        return Some(SkipReason::EmptyBody);
    }
    if body.contains(WELCOME_MARKER) {
        return Some(SkipReason::OwnEcho);
    }
    None
}
