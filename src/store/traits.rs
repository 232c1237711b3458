//! Unified `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::conversation::model::{
    ConversationTurn, MealLogEntry, MealSlot, PendingMealClarification, ProcessedMessageRecord,
};
use crate::error::DatabaseError;
use crate::onboarding::model::{RegisteredUser, UserPreferences};
use crate::onboarding::state::OnboardingState;

/// Backend-agnostic database trait covering dedup claims, conversation
/// turns, meal logs, onboarding, and users.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Processed messages ──────────────────────────────────────────

    /// Atomically record `message_id` as processed.
    ///
    /// Returns `true` if this call created the record, `false` if it already
    /// existed. Concurrent calls for the same id see exactly one `true`.
    async fn claim_message(
        &self,
        message_id: &str,
        sender: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    async fn get_processed_message(
        &self,
        message_id: &str,
    ) -> Result<Option<ProcessedMessageRecord>, DatabaseError>;

    /// Drop a claim so the id can be claimed again.
    async fn release_claim(&self, message_id: &str) -> Result<(), DatabaseError>;

    // ── Conversation turns ──────────────────────────────────────────

    async fn append_turn(&self, turn: &ConversationTurn) -> Result<(), DatabaseError>;

    /// Last `limit` turns for `sender`, oldest first.
    async fn recent_turns(
        &self,
        sender: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, DatabaseError>;

    /// Whether any turn exists for `sender`.
    async fn has_turns(&self, sender: &str) -> Result<bool, DatabaseError>;

    /// Broadcast turns for `sender` and `slot` since `since`, newest first.
    async fn recent_broadcasts(
        &self,
        sender: &str,
        slot: MealSlot,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, DatabaseError>;

    // ── Pending meal clarifications ─────────────────────────────────

    async fn get_pending_meal(
        &self,
        sender: &str,
    ) -> Result<Option<PendingMealClarification>, DatabaseError>;

    /// Insert or replace the pending clarification for its sender.
    async fn put_pending_meal(&self, pending: &PendingMealClarification)
    -> Result<(), DatabaseError>;

    /// Log the pending food for `sender` under `slot` and drop the
    /// clarification. `None` when nothing was pending. The clarification
    /// survives if the log write fails.
    async fn resolve_pending_meal(
        &self,
        sender: &str,
        slot: MealSlot,
        at: DateTime<Utc>,
    ) -> Result<Option<MealLogEntry>, DatabaseError>;

    // ── Meal logs ───────────────────────────────────────────────────

    async fn insert_meal_log(&self, entry: &MealLogEntry) -> Result<(), DatabaseError>;

    /// Meal logs for `sender`, newest first.
    async fn list_meal_logs(
        &self,
        sender: &str,
        limit: usize,
    ) -> Result<Vec<MealLogEntry>, DatabaseError>;

    // ── Onboarding ──────────────────────────────────────────────────

    async fn get_onboarding_state(
        &self,
        sender: &str,
    ) -> Result<Option<OnboardingState>, DatabaseError>;

    async fn put_onboarding_state(&self, state: &OnboardingState) -> Result<(), DatabaseError>;

    /// Stored preferences, empty if none.
    async fn get_preferences(&self, sender: &str) -> Result<UserPreferences, DatabaseError>;

    /// Merge `delta` into the stored preferences and return the result.
    async fn merge_preferences(
        &self,
        sender: &str,
        delta: &Map<String, Value>,
        at: DateTime<Utc>,
    ) -> Result<UserPreferences, DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    async fn get_user(&self, phone: &str) -> Result<Option<RegisteredUser>, DatabaseError>;

    async fn upsert_user(&self, user: &RegisteredUser) -> Result<(), DatabaseError>;

    async fn list_users(&self) -> Result<Vec<RegisteredUser>, DatabaseError>;
}
