//! User profile, dietary preferences, and the preference checklist.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::state::OnboardingState;

/// A user registered out-of-band. The core only reads these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredUser {
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub registered_at: DateTime<Utc>,
}

impl RegisteredUser {
    /// Name to greet the user with.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => "there",
        }
    }
}

/// Inferred dietary preferences, merged incrementally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub values: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserPreferences {
    /// Merge `delta` into the preferences.
    ///
    /// New keys are added and existing keys overwritten. Keys absent from
    /// `delta` are left alone and `null` values in `delta` are ignored, so
    /// nothing is ever removed.
    pub fn merge(&mut self, delta: &Map<String, Value>, at: DateTime<Utc>) -> usize {
        let mut changed = 0;
        for (key, value) in delta {
            if value.is_null() {
                continue;
            }
            if self.values.get(key) != Some(value) {
                changed += 1;
            }
            self.values.insert(key.clone(), value.clone());
        }
        self.updated_at = Some(at);
        changed
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Checklist items with no recorded value yet.
    pub fn missing(&self) -> Vec<&'static PreferenceQuestion> {
        PREFERENCE_CHECKLIST
            .iter()
            .filter(|q| !self.values.contains_key(q.key))
            .collect()
    }

    /// JSON rendering for prompts.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string(&self.values).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Everything known about one user, assembled for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub preferences: UserPreferences,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onboarding: Option<OnboardingState>,
}

/// One item on the preference checklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreferenceQuestion {
    pub key: &'static str,
    pub question: &'static str,
}

/// Preferences the onboarding flow tries to learn, in default asking order.
pub static PREFERENCE_CHECKLIST: [PreferenceQuestion; 12] = [
    PreferenceQuestion {
        key: "diet_type",
        question: "Do you follow a vegetarian, non-vegetarian, or vegan diet?",
    },
    PreferenceQuestion {
        key: "egg_preference",
        question: "Do you eat eggs?",
    },
    PreferenceQuestion {
        key: "allergies",
        question: "Do you have any food allergies?",
    },
    PreferenceQuestion {
        key: "preferred_protein",
        question: "What are your preferred sources of protein?",
    },
    PreferenceQuestion {
        key: "non_veg_comfort",
        question: "Are you okay with seeing non-veg suggestions?",
    },
    PreferenceQuestion {
        key: "partner_diet",
        question: "Does your partner follow the same dietary preferences?",
    },
    PreferenceQuestion {
        key: "disliked_ingredients",
        question: "Are there any ingredients you dislike?",
    },
    PreferenceQuestion {
        key: "preferred_cuisine",
        question: "Do you have preferred cuisines?",
    },
    PreferenceQuestion {
        key: "cook_at_home",
        question: "Do you have a cook at home, or do you cook yourself?",
    },
    PreferenceQuestion {
        key: "kids_at_home",
        question: "Are there any kids at home?",
    },
    PreferenceQuestion {
        key: "location",
        question: "Which city do you live in?",
    },
    PreferenceQuestion {
        key: "favourite_dishes",
        question: "What are some of your favourite dishes?",
    },
];

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9]\d{10,14}$").expect("valid phone pattern"));

/// International number without `+`: 11 to 15 digits, no leading zero.
pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_RE.is_match(phone)
}
