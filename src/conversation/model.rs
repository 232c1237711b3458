//! Conversation data model: inbound messages, turns, meal logs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload kind of an inbound message. Only text is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Other,
}

/// One message as delivered by the upstream channel. May be redelivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Channel-native unique id.
    pub id: String,
    /// Sender phone number.
    pub sender: String,
    pub body: String,
    pub kind: MessageKind,
}

impl InboundMessage {
    pub fn text(id: impl Into<String>, sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            body: body.into(),
            kind: MessageKind::Text,
        }
    }
}

/// Meal slot a logged food item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealSlot {
    Breakfast,
    Lunch,
    Dinner,
}

impl MealSlot {
    pub const ALL: [MealSlot; 3] = [MealSlot::Breakfast, MealSlot::Lunch, MealSlot::Dinner];

    /// Case-insensitive exact match on the slot name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "breakfast" => Some(Self::Breakfast),
            "lunch" => Some(Self::Lunch),
            "dinner" => Some(Self::Dinner),
            _ => None,
        }
    }

    /// Lower-case storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Breakfast => "breakfast",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
        }
    }

    /// Capitalized form used in user-facing text.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Breakfast => "Breakfast",
            Self::Lunch => "Lunch",
            Self::Dinner => "Dinner",
        }
    }
}

impl fmt::Display for MealSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Direction of a conversation turn relative to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "out" { Self::Out } else { Self::In }
    }
}

/// What produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnSource {
    UserInput,
    Reply,
    Broadcast,
    Onboarding,
}

impl TurnSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserInput => "user_input",
            Self::Reply => "reply",
            Self::Broadcast => "broadcast",
            Self::Onboarding => "onboarding",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "reply" => Self::Reply,
            "broadcast" => Self::Broadcast,
            "onboarding" => Self::Onboarding,
            _ => Self::UserInput,
        }
    }
}

/// One entry in the append-only conversation log.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub sender: String,
    pub direction: Direction,
    pub text: String,
    pub source: TurnSource,
    /// Set on broadcast turns.
    pub meal_slot: Option<MealSlot>,
    /// Raw recommendation text of a broadcast turn.
    pub recommendation: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn inbound(sender: &str, text: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender: sender.to_string(),
            direction: Direction::In,
            text: text.to_string(),
            source: TurnSource::UserInput,
            meal_slot: None,
            recommendation: None,
            timestamp,
        }
    }

    pub fn outbound(sender: &str, text: &str, source: TurnSource, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender: sender.to_string(),
            direction: Direction::Out,
            text: text.to_string(),
            source,
            meal_slot: None,
            recommendation: None,
            timestamp,
        }
    }

    /// Outbound broadcast turn carrying the slot and raw recommendation.
    pub fn broadcast(
        sender: &str,
        text: &str,
        slot: MealSlot,
        recommendation: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            meal_slot: Some(slot),
            recommendation: Some(recommendation.to_string()),
            ..Self::outbound(sender, text, TurnSource::Broadcast, timestamp)
        }
    }
}

/// Proof that a message id was claimed for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedMessageRecord {
    pub message_id: String,
    pub sender: String,
    pub claimed_at: DateTime<Utc>,
}

/// A food item waiting for its meal slot. At most one per sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMealClarification {
    pub sender: String,
    pub food: String,
    pub created_at: DateTime<Utc>,
}

/// A finalized meal log. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MealLogEntry {
    pub id: Uuid,
    pub sender: String,
    pub food: String,
    pub slot: MealSlot,
    pub logged_at: DateTime<Utc>,
}

impl MealLogEntry {
    pub fn new(sender: &str, food: &str, slot: MealSlot, logged_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.to_string(),
            food: food.to_string(),
            slot,
            logged_at,
        }
    }
}
