//! Intent classification: one gateway call per message.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::llm::FailoverGateway;

/// What the user wants from a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// The user reports something they ate.
    LogMeal,
    /// The user is sharing preferences or answering an onboarding question.
    StartOnboarding,
    /// The user wants food ideas or a recipe.
    GetMealSuggestions,
    GeneralChat,
}

impl Intent {
    pub const ALL: [Intent; 4] = [
        Intent::LogMeal,
        Intent::StartOnboarding,
        Intent::GetMealSuggestions,
        Intent::GeneralChat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LogMeal => "log_meal",
            Self::StartOnboarding => "start_onboarding",
            Self::GetMealSuggestions => "get_meal_suggestions",
            Self::GeneralChat => "general_chat",
        }
    }

    /// Parse a model label, accepting the older label set as aliases.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "log_meal" | "meal_log" => Some(Self::LogMeal),
            "start_onboarding" => Some(Self::StartOnboarding),
            "get_meal_suggestions" | "meal_selection_with_query" | "recipe_request" => {
                Some(Self::GetMealSuggestions)
            }
            "general_chat" | "other" => Some(Self::GeneralChat),
            _ => None,
        }
    }

    /// Like [`Intent::parse`], falling back to `GeneralChat`.
    pub fn from_label(label: &str) -> Self {
        Self::parse(label).unwrap_or(Self::GeneralChat)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the routing prompt for a message and its recent context.
pub fn classification_prompt(message: &str, context: &str) -> String {
    let context = if context.trim().is_empty() {
        "(no earlier messages)"
    } else {
        context
    };
    format!(
        "You are an assistant that routes WhatsApp messages for a meal-tracking bot.\n\
         Possible intents:\n\n\
         - \"log_meal\": User mentions a meal or dish they ate (e.g., \"I had poha for lunch\")\n\
         - \"start_onboarding\": User wants to set preferences or is answering an onboarding question\n\
         - \"get_meal_suggestions\": User wants food suggestions, a recipe, or asks \"what should I eat?\"\n\
         - \"general_chat\": Any other small talk or non-specific query\n\n\
         Message history:\n{context}\n\n\
         Latest user message: \"{message}\"\n\n\
         Reply with ONLY one of: log_meal, start_onboarding, get_meal_suggestions, general_chat"
    )
}

/// Maps a message plus context to an [`Intent`].
pub struct IntentClassifier {
    gateway: Arc<FailoverGateway>,
}

impl IntentClassifier {
    pub fn new(gateway: Arc<FailoverGateway>) -> Self {
        Self { gateway }
    }

    /// Absent or unrecognized model output yields `GeneralChat`.
    pub async fn classify(&self, message: &str, context: &str) -> Intent {
        let prompt = classification_prompt(message, context);
        match self.gateway.generate_label(&prompt).await {
            Some(label) => {
                let intent = Intent::parse(&label);
                if intent.is_none() {
                    tracing::warn!(label = %label, "Unrecognized intent label, treating as general_chat");
                }
                intent.unwrap_or(Intent::GeneralChat)
            }
            None => {
                tracing::warn!("Intent classification unavailable, treating as general_chat");
                Intent::GeneralChat
            }
        }
    }
}
