//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::conversation::model::{
    ConversationTurn, Direction, MealLogEntry, MealSlot, PendingMealClarification,
    ProcessedMessageRecord, TurnSource,
};
use crate::error::DatabaseError;
use crate::onboarding::model::{RegisteredUser, UserPreferences};
use crate::onboarding::state::{OnboardingPhase, OnboardingState};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run raw SQL against the connection.
    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<(), DatabaseError> {
        self.conn
            .execute(sql, ())
            .await
            .map_err(|e| DatabaseError::Query(format!("execute_raw: {e}")))?;
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn row_to_turn(row: &libsql::Row) -> Result<ConversationTurn, libsql::Error> {
    let direction: String = row.get(1)?;
    let source: String = row.get(3)?;
    let slot: Option<String> = row.get::<String>(4).ok();
    let created: String = row.get(6)?;
    Ok(ConversationTurn {
        sender: row.get(0)?,
        direction: Direction::parse(&direction),
        text: row.get(2)?,
        source: TurnSource::parse(&source),
        meal_slot: slot.as_deref().and_then(MealSlot::parse),
        recommendation: row.get::<String>(5).ok(),
        timestamp: parse_datetime(&created),
    })
}

fn row_to_pending(row: &libsql::Row) -> Result<PendingMealClarification, libsql::Error> {
    let created: String = row.get(2)?;
    Ok(PendingMealClarification {
        sender: row.get(0)?,
        food: row.get(1)?,
        created_at: parse_datetime(&created),
    })
}

fn row_to_meal_log(row: &libsql::Row) -> Result<MealLogEntry, DatabaseError> {
    let id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("meal_log.id: {e}")))?;
    let slot: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("meal_log.meal_slot: {e}")))?;
    let logged: String = row
        .get(4)
        .map_err(|e| DatabaseError::Query(format!("meal_log.logged_at: {e}")))?;
    Ok(MealLogEntry {
        id: Uuid::parse_str(&id)
            .map_err(|e| DatabaseError::Serialization(format!("meal_log.id: {e}")))?,
        sender: row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("meal_log.sender: {e}")))?,
        food: row
            .get(2)
            .map_err(|e| DatabaseError::Query(format!("meal_log.food: {e}")))?,
        slot: MealSlot::parse(&slot)
            .ok_or_else(|| DatabaseError::Serialization(format!("unknown meal slot '{slot}'")))?,
        logged_at: parse_datetime(&logged),
    })
}

fn row_to_user(row: &libsql::Row) -> Result<RegisteredUser, libsql::Error> {
    let registered: String = row.get(2)?;
    Ok(RegisteredUser {
        phone: row.get(0)?,
        name: row.get::<String>(1).ok(),
        registered_at: parse_datetime(&registered),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const TURN_COLUMNS: &str = "sender, direction, text, source, meal_slot, recommendation, created_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Processed messages ──────────────────────────────────────────

    async fn claim_message(
        &self,
        message_id: &str,
        sender: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        // Single statement: the primary key arbitrates concurrent claims.
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO processed_messages (message_id, sender, claimed_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (message_id) DO NOTHING",
                params![message_id, sender, at.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_message: {e}")))?;

        debug!(message_id, claimed = (inserted == 1), "Claim attempted");
        Ok(inserted == 1)
    }

    async fn release_claim(&self, message_id: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM processed_messages WHERE message_id = ?1",
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("release_claim: {e}")))?;
        debug!(message_id, "Claim released");
        Ok(())
    }

    async fn get_processed_message(
        &self,
        message_id: &str,
    ) -> Result<Option<ProcessedMessageRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT message_id, sender, claimed_at FROM processed_messages WHERE message_id = ?1",
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_processed_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let claimed: String = row
                    .get(2)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(ProcessedMessageRecord {
                    message_id: row
                        .get(0)
                        .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
                    sender: row
                        .get(1)
                        .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
                    claimed_at: parse_datetime(&claimed),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_processed_message: {e}"))),
        }
    }

    // ── Conversation turns ──────────────────────────────────────────

    async fn append_turn(&self, turn: &ConversationTurn) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO conversation_turns
                    (sender, direction, text, source, meal_slot, recommendation, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    turn.sender.as_str(),
                    turn.direction.as_str(),
                    turn.text.as_str(),
                    turn.source.as_str(),
                    opt_text(turn.meal_slot.map(|s| s.as_str())),
                    opt_text(turn.recommendation.as_deref()),
                    turn.timestamp.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_turn: {e}")))?;
        Ok(())
    }

    async fn recent_turns(
        &self,
        sender: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TURN_COLUMNS} FROM conversation_turns
                     WHERE sender = ?1
                     ORDER BY created_at DESC, seq DESC
                     LIMIT ?2"
                ),
                params![sender, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_turns: {e}")))?;

        let mut turns = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_turns: {e}")))?
        {
            turns.push(row_to_turn(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?);
        }
        turns.reverse();
        Ok(turns)
    }

    async fn has_turns(&self, sender: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM conversation_turns WHERE sender = ?1 LIMIT 1",
                params![sender],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("has_turns: {e}")))?;

        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(DatabaseError::Query(format!("has_turns: {e}"))),
        }
    }

    async fn recent_broadcasts(
        &self,
        sender: &str,
        slot: MealSlot,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TURN_COLUMNS} FROM conversation_turns
                     WHERE sender = ?1 AND source = 'broadcast' AND meal_slot = ?2
                       AND created_at >= ?3
                     ORDER BY created_at DESC, seq DESC
                     LIMIT ?4"
                ),
                params![sender, slot.as_str(), since.to_rfc3339(), limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_broadcasts: {e}")))?;

        let mut turns = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_broadcasts: {e}")))?
        {
            turns.push(row_to_turn(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?);
        }
        Ok(turns)
    }

    // ── Pending meal clarifications ─────────────────────────────────

    async fn get_pending_meal(
        &self,
        sender: &str,
    ) -> Result<Option<PendingMealClarification>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT sender, food, created_at FROM pending_meal_logs WHERE sender = ?1",
                params![sender],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_pending_meal: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_pending(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_pending_meal: {e}"))),
        }
    }

    async fn put_pending_meal(
        &self,
        pending: &PendingMealClarification,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO pending_meal_logs (sender, food, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (sender) DO UPDATE SET food = ?2, created_at = ?3",
                params![
                    pending.sender.as_str(),
                    pending.food.as_str(),
                    pending.created_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("put_pending_meal: {e}")))?;
        Ok(())
    }

    async fn resolve_pending_meal(
        &self,
        sender: &str,
        slot: MealSlot,
        at: DateTime<Utc>,
    ) -> Result<Option<MealLogEntry>, DatabaseError> {
        let Some(pending) = self.get_pending_meal(sender).await? else {
            return Ok(None);
        };

        // The log goes in first; a failed insert leaves the clarification intact.
        let entry = MealLogEntry::new(&pending.sender, &pending.food, slot, at);
        self.insert_meal_log(&entry).await?;

        self.conn()
            .execute(
                "DELETE FROM pending_meal_logs WHERE sender = ?1 AND created_at = ?2",
                params![sender, pending.created_at.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("resolve_pending_meal: {e}")))?;

        Ok(Some(entry))
    }

    // ── Meal logs ───────────────────────────────────────────────────

    async fn insert_meal_log(&self, entry: &MealLogEntry) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO meal_logs (id, sender, food, meal_slot, logged_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.id.to_string(),
                    entry.sender.as_str(),
                    entry.food.as_str(),
                    entry.slot.as_str(),
                    entry.logged_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_meal_log: {e}")))?;

        debug!(sender = %entry.sender, food = %entry.food, slot = %entry.slot, "Meal logged");
        Ok(())
    }

    async fn list_meal_logs(
        &self,
        sender: &str,
        limit: usize,
    ) -> Result<Vec<MealLogEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, sender, food, meal_slot, logged_at FROM meal_logs
                 WHERE sender = ?1 ORDER BY logged_at DESC, rowid DESC LIMIT ?2",
                params![sender, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_meal_logs: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_meal_logs: {e}")))?
        {
            entries.push(row_to_meal_log(&row)?);
        }
        Ok(entries)
    }

    // ── Onboarding ──────────────────────────────────────────────────

    async fn get_onboarding_state(
        &self,
        sender: &str,
    ) -> Result<Option<OnboardingState>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT sender, phase, last_question, updated_at FROM onboarding_states WHERE sender = ?1",
                params![sender],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_onboarding_state: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let phase: String = row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                let updated: String = row
                    .get(3)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(OnboardingState {
                    sender: row
                        .get(0)
                        .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
                    phase: OnboardingPhase::parse(&phase).ok_or_else(|| {
                        DatabaseError::Serialization(format!("unknown onboarding phase '{phase}'"))
                    })?,
                    last_question: row.get::<String>(2).ok(),
                    updated_at: parse_datetime(&updated),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_onboarding_state: {e}"))),
        }
    }

    async fn put_onboarding_state(&self, state: &OnboardingState) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO onboarding_states (sender, phase, last_question, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (sender) DO UPDATE SET phase = ?2, last_question = ?3, updated_at = ?4",
                params![
                    state.sender.as_str(),
                    state.phase.as_str(),
                    opt_text(state.last_question.as_deref()),
                    state.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("put_onboarding_state: {e}")))?;
        Ok(())
    }

    async fn get_preferences(&self, sender: &str) -> Result<UserPreferences, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT preferences, updated_at FROM user_preferences WHERE sender = ?1",
                params![sender],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_preferences: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let raw: String = row.get(0).unwrap_or_else(|_| "{}".to_string());
                let updated: String = row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                let values = match serde_json::from_str::<Value>(&raw) {
                    Ok(Value::Object(map)) => map,
                    Ok(_) => Map::new(),
                    Err(e) => return Err(DatabaseError::Serialization(e.to_string())),
                };
                Ok(UserPreferences {
                    values,
                    updated_at: Some(parse_datetime(&updated)),
                })
            }
            Ok(None) => Ok(UserPreferences::default()),
            Err(e) => Err(DatabaseError::Query(format!("get_preferences: {e}"))),
        }
    }

    async fn merge_preferences(
        &self,
        sender: &str,
        delta: &Map<String, Value>,
        at: DateTime<Utc>,
    ) -> Result<UserPreferences, DatabaseError> {
        let mut prefs = self.get_preferences(sender).await?;
        let changed = prefs.merge(delta, at);
        let raw = serde_json::to_string(&prefs.values)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO user_preferences (sender, preferences, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (sender) DO UPDATE SET preferences = ?2, updated_at = ?3",
                params![sender, raw, at.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("merge_preferences: {e}")))?;

        debug!(sender, changed, total = prefs.values.len(), "Preferences merged");
        Ok(prefs)
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn get_user(&self, phone: &str) -> Result<Option<RegisteredUser>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT phone, name, registered_at FROM users WHERE phone = ?1",
                params![phone],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_user(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user: {e}"))),
        }
    }

    async fn upsert_user(&self, user: &RegisteredUser) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO users (phone, name, registered_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (phone) DO UPDATE SET name = ?2",
                params![
                    user.phone.as_str(),
                    opt_text(user.name.as_deref()),
                    user.registered_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_user: {e}")))?;
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<RegisteredUser>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT phone, name, registered_at FROM users ORDER BY registered_at ASC, phone ASC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_users: {e}")))?;

        let mut users = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_users: {e}")))?
        {
            users.push(row_to_user(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?);
        }
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_000 + secs, 0).unwrap()
    }

    // ── Claims ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn claim_twice_yields_true_then_false() {
        let db = test_db().await;
        assert!(db.claim_message("wamid.1", "919800000001", ts(0)).await.unwrap());
        assert!(!db.claim_message("wamid.1", "919800000001", ts(5)).await.unwrap());

        let record = db.get_processed_message("wamid.1").await.unwrap().unwrap();
        assert_eq!(record.claimed_at, ts(0), "second claim must not touch the record");
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let db = Arc::new(test_db().await);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let db = Arc::clone(&db);
                tokio::spawn(async move { db.claim_message("wamid.race", "91", ts(0)).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn claims_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("meal.db");

        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            assert!(db.claim_message("wamid.persist", "91", ts(0)).await.unwrap());
        }

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(!db.claim_message("wamid.persist", "91", ts(1)).await.unwrap());
    }

    // ── Turns ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn recent_turns_are_chronological_and_limited() {
        let db = test_db().await;
        for i in 0..7 {
            let turn = ConversationTurn::inbound("91", &format!("msg {i}"), ts(i));
            db.append_turn(&turn).await.unwrap();
        }
        db.append_turn(&ConversationTurn::inbound("92", "other user", ts(100)))
            .await
            .unwrap();

        let turns = db.recent_turns("91", 5).await.unwrap();
        let texts: Vec<&str> = turns.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["msg 2", "msg 3", "msg 4", "msg 5", "msg 6"]);
        assert!(db.has_turns("92").await.unwrap());
        assert!(!db.has_turns("93").await.unwrap());
    }

    #[tokio::test]
    async fn same_timestamp_turns_keep_insertion_order() {
        let db = test_db().await;
        db.append_turn(&ConversationTurn::inbound("91", "first", ts(0)))
            .await
            .unwrap();
        db.append_turn(&ConversationTurn::outbound("91", "second", TurnSource::Reply, ts(0)))
            .await
            .unwrap();

        let turns = db.recent_turns("91", 5).await.unwrap();
        assert_eq!(turns[0].text, "first");
        assert_eq!(turns[1].direction, Direction::Out);
    }

    #[tokio::test]
    async fn broadcasts_filter_by_slot_and_window() {
        let db = test_db().await;
        let now = ts(30 * 86_400);
        let old = now - Duration::days(8);
        let recent = now - Duration::days(1);

        db.append_turn(&ConversationTurn::broadcast("91", "", MealSlot::Lunch, "old pick", old))
            .await
            .unwrap();
        db.append_turn(&ConversationTurn::broadcast("91", "", MealSlot::Lunch, "rajma", recent))
            .await
            .unwrap();
        db.append_turn(&ConversationTurn::broadcast("91", "", MealSlot::Dinner, "khichdi", recent))
            .await
            .unwrap();
        db.append_turn(&ConversationTurn::inbound("91", "lunch", recent))
            .await
            .unwrap();

        let hits = db
            .recent_broadcasts("91", MealSlot::Lunch, now - Duration::days(7), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].recommendation.as_deref(), Some("rajma"));
        assert_eq!(hits[0].meal_slot, Some(MealSlot::Lunch));
    }

    // ── Pending ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn pending_is_upserted_and_resolved_once() {
        let db = test_db().await;
        let mut pending = PendingMealClarification {
            sender: "91".into(),
            food: "poha".into(),
            created_at: ts(0),
        };
        db.put_pending_meal(&pending).await.unwrap();
        pending.food = "upma".into();
        db.put_pending_meal(&pending).await.unwrap();

        assert_eq!(db.get_pending_meal("91").await.unwrap().unwrap().food, "upma");

        let entry = db
            .resolve_pending_meal("91", MealSlot::Breakfast, ts(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.food, "upma");
        assert_eq!(entry.slot, MealSlot::Breakfast);
        assert!(db.get_pending_meal("91").await.unwrap().is_none());
        assert!(
            db.resolve_pending_meal("91", MealSlot::Lunch, ts(120))
                .await
                .unwrap()
                .is_none()
        );

        let logs = db.list_meal_logs("91", 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].id, entry.id);
    }

    #[tokio::test]
    async fn failed_log_write_keeps_pending() {
        let db = test_db().await;
        db.put_pending_meal(&PendingMealClarification {
            sender: "91".into(),
            food: "poha".into(),
            created_at: ts(0),
        })
        .await
        .unwrap();
        db.execute_raw("DROP TABLE meal_logs").await.unwrap();

        let result = db.resolve_pending_meal("91", MealSlot::Breakfast, ts(60)).await;

        assert!(matches!(result, Err(DatabaseError::Query(_))));
        assert_eq!(db.get_pending_meal("91").await.unwrap().unwrap().food, "poha");
    }

    // ── Meal logs ───────────────────────────────────────────────────

    #[tokio::test]
    async fn meal_logs_newest_first() {
        let db = test_db().await;
        db.insert_meal_log(&MealLogEntry::new("91", "poha", MealSlot::Breakfast, ts(0)))
            .await
            .unwrap();
        db.insert_meal_log(&MealLogEntry::new("91", "dal", MealSlot::Lunch, ts(10)))
            .await
            .unwrap();

        let logs = db.list_meal_logs("91", 10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].food, "dal");
        assert_eq!(logs[0].slot, MealSlot::Lunch);
        assert_eq!(logs[1].slot, MealSlot::Breakfast);
    }

    // ── Onboarding ──────────────────────────────────────────────────

    #[tokio::test]
    async fn onboarding_state_roundtrip() {
        let db = test_db().await;
        assert!(db.get_onboarding_state("91").await.unwrap().is_none());

        let mut state = OnboardingState::new("91", ts(0));
        state.last_question = Some("Do you eat eggs?".into());
        db.put_onboarding_state(&state).await.unwrap();

        state.advance_to(OnboardingPhase::Confirmation);
        db.put_onboarding_state(&state).await.unwrap();

        let fetched = db.get_onboarding_state("91").await.unwrap().unwrap();
        assert_eq!(fetched.phase, OnboardingPhase::Confirmation);
        assert_eq!(fetched.last_question.as_deref(), Some("Do you eat eggs?"));
    }

    #[tokio::test]
    async fn preferences_merge_persists() {
        let db = test_db().await;
        assert!(db.get_preferences("91").await.unwrap().is_empty());

        let delta = json!({"a": 1}).as_object().cloned().unwrap();
        db.merge_preferences("91", &delta, ts(0)).await.unwrap();
        let delta = json!({"b": 2}).as_object().cloned().unwrap();
        db.merge_preferences("91", &delta, ts(1)).await.unwrap();
        let delta = json!({"a": 3}).as_object().cloned().unwrap();
        let merged = db.merge_preferences("91", &delta, ts(2)).await.unwrap();

        assert_eq!(Value::Object(merged.values), json!({"a": 3, "b": 2}));
        let stored = db.get_preferences("91").await.unwrap();
        assert_eq!(Value::Object(stored.values), json!({"a": 3, "b": 2}));
        assert_eq!(stored.updated_at, Some(ts(2)));
    }

    // ── Users ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn users_upsert_and_list() {
        let db = test_db().await;
        let mut user = RegisteredUser {
            phone: "919800000001".into(),
            name: None,
            registered_at: ts(0),
        };
        db.upsert_user(&user).await.unwrap();
        user.name = Some("Asha".into());
        db.upsert_user(&user).await.unwrap();
        db.upsert_user(&RegisteredUser {
            phone: "919800000002".into(),
            name: Some("Ravi".into()),
            registered_at: ts(1),
        })
        .await
        .unwrap();

        let users = db.list_users().await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].name.as_deref(), Some("Asha"));
        assert_eq!(
            db.get_user("919800000002").await.unwrap().unwrap().display_name(),
            "Ravi"
        );
        assert!(db.get_user("000").await.unwrap().is_none());
    }
}
