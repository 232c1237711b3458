//! Scheduled meal recommendations, fanned out to every registered user.
//!
//! Each user is handled independently: one failed generation or send is
//! logged and counted, and the rest of the broadcast carries on.

use std::sync::Arc;

use chrono::Duration;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channels::MessageSender;
use crate::clock::Clock;
use crate::conversation::model::{ConversationTurn, MealSlot};
use crate::error::{DatabaseError, Error};
use crate::llm::FailoverGateway;
use crate::onboarding::model::{RegisteredUser, UserPreferences};
use crate::store::Database;

/// Dish suggested when no model is available.
pub const FALLBACK_DISH: &str = "poha";

/// Earlier recommendations considered for variety.
const HISTORY_LIMIT: usize = 10;
const HISTORY_DAYS: i64 = 7;
/// Recently logged meals the model is asked to avoid.
const RECENT_MEALS_LIMIT: usize = 5;

/// Tally of one broadcast run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub slot: MealSlot,
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub fn recommendation_prompt(
    slot: MealSlot,
    history: &[String],
    recent_meals: &[String],
    preferences: &UserPreferences,
) -> String {
    let history = if history.is_empty() {
        "No history".to_string()
    } else {
        history.join(", ")
    };
    let recent_meals = if recent_meals.is_empty() {
        "None logged".to_string()
    } else {
        recent_meals.join(", ")
    };
    format!(
        "You are a helpful meal assistant bot. Based on the user's recent {slot} suggestions:\n\
         {history}\n\n\
         Meals they logged recently: {recent_meals}\n\
         Their dietary preferences (JSON): {prefs}\n\n\
         Suggest 3 healthy, balanced and diverse Indian {slot} options that haven't been repeated recently \
         and fit their preferences. Only return the names of the dishes, one per line, no explanation.",
        prefs = preferences.to_prompt_json(),
    )
}

/// Turn raw model output into a numbered list, one dish per line or comma.
pub fn format_dishes(raw: &str) -> String {
    raw.split(['\n', ','])
        .map(|dish| {
            dish.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*'))
                .trim()
        })
        .filter(|dish| !dish.is_empty())
        .enumerate()
        .map(|(idx, dish)| format!("{}. {dish}", idx + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn broadcast_message(name: &str, slot: MealSlot, dishes: &str) -> String {
    format!(
        "👋 Hi *{name}*,\n🍽️ *{slot} Time!*\nHere are some tasty picks for you:\n\n{dishes}\n\nReply with your choice! 😊"
    )
}

/// Sends per-slot recommendations to all registered users.
pub struct MealBroadcaster {
    db: Arc<dyn Database>,
    gateway: Arc<FailoverGateway>,
    sender: Arc<dyn MessageSender>,
    clock: Arc<dyn Clock>,
}

impl MealBroadcaster {
    pub fn new(
        db: Arc<dyn Database>,
        gateway: Arc<FailoverGateway>,
        sender: Arc<dyn MessageSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            gateway,
            sender,
            clock,
        }
    }

    /// Broadcast `slot` recommendations. Only listing users can fail the run.
    pub async fn broadcast(&self, slot: MealSlot) -> Result<BroadcastReport, DatabaseError> {
        let users = self.db.list_users().await?;
        info!(slot = %slot, users = users.len(), "Meal broadcast started");

        let results = join_all(users.iter().map(|user| self.send_to(user, slot))).await;

        let mut report = BroadcastReport {
            slot,
            attempted: users.len(),
            delivered: 0,
            failed: 0,
        };
        for (user, result) in users.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(phone = %user.phone, slot = %slot, error = %e, "Broadcast to user failed");
                    report.failed += 1;
                }
            }
        }
        info!(
            slot = %slot,
            delivered = report.delivered,
            failed = report.failed,
            "Meal broadcast finished"
        );
        Ok(report)
    }

    async fn send_to(&self, user: &RegisteredUser, slot: MealSlot) -> Result<(), Error> {
        let phone = user.phone.as_str();
        let now = self.clock.now();

        let history: Vec<String> = self
            .db
            .recent_broadcasts(phone, slot, now - Duration::days(HISTORY_DAYS), HISTORY_LIMIT)
            .await?
            .into_iter()
            .map(|turn| turn.recommendation.unwrap_or(turn.text))
            .filter(|text| !text.is_empty())
            .collect();
        let recent_meals: Vec<String> = self
            .db
            .list_meal_logs(phone, RECENT_MEALS_LIMIT)
            .await?
            .into_iter()
            .map(|entry| entry.food)
            .collect();
        let preferences = self.db.get_preferences(phone).await?;

        let prompt = recommendation_prompt(slot, &history, &recent_meals, &preferences);
        let recommendation = match self.gateway.generate(&prompt).await {
            Some(text) => text,
            None => {
                warn!(phone, slot = %slot, "Falling back to default recommendation");
                FALLBACK_DISH.to_string()
            }
        };
        debug!(phone, slot = %slot, recommendation = %recommendation, "Recommendation ready");

        let message = broadcast_message(user.display_name(), slot, &format_dishes(&recommendation));
        self.db
            .append_turn(&ConversationTurn::broadcast(phone, "", slot, &recommendation, now))
            .await?;
        self.sender.send(phone, &message).await?;
        Ok(())
    }
}
