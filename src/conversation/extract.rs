//! Field extractors: food item, meal slot, and dietary preferences from free text.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::conversation::model::MealSlot;
use crate::llm::FailoverGateway;
use crate::onboarding::model::UserPreferences;
use crate::onboarding::prompts::preference_extraction_prompt;

/// Result of food extraction when generation succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FoodItem {
    Food(String),
    /// The model found no food in the message.
    NotMentioned,
}

impl FoodItem {
    /// Interpret a model label. `none` (any case) means no food.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        if label.is_empty() || label.eq_ignore_ascii_case("none") {
            Self::NotMentioned
        } else {
            Self::Food(label.to_string())
        }
    }
}

/// Infer a meal slot from the local hour-of-day.
///
/// 06–10 is breakfast, 12–16 lunch, 18–22 dinner. Hours 11, 17 and
/// 23–05 have no slot.
pub fn meal_slot_for_hour(hour: u32) -> Option<MealSlot> {
    match hour {
        6..=10 => Some(MealSlot::Breakfast),
        12..=16 => Some(MealSlot::Lunch),
        18..=22 => Some(MealSlot::Dinner),
        _ => None,
    }
}

pub fn food_prompt(message: &str) -> String {
    format!(
        "Extract the meal/food item name from this message: {message}. \
         Only return the name. If not found, return \"none\"."
    )
}

pub fn meal_slot_prompt(message: &str) -> String {
    format!(
        "You are a helpful assistant. From the message below, extract the meal type mentioned, if any. \
         Respond with exactly one word: \"breakfast\", \"lunch\", \"dinner\", or \"none\".\n\n\
         Message: \"{message}\""
    )
}

/// Single-call extractors backed by the gateway.
pub struct FieldExtractor {
    gateway: Arc<FailoverGateway>,
}

impl FieldExtractor {
    pub fn new(gateway: Arc<FailoverGateway>) -> Self {
        Self { gateway }
    }

    /// `None` means generation failed; `Some(NotMentioned)` means the model
    /// answered that there is no food.
    pub async fn extract_food_item(&self, message: &str) -> Option<FoodItem> {
        self.gateway
            .generate_label(&food_prompt(message))
            .await
            .map(|label| FoodItem::from_label(&label))
    }

    /// Explicit slot named in the message, if any.
    pub async fn extract_meal_slot(&self, message: &str) -> Option<MealSlot> {
        let label = self.gateway.generate_label(&meal_slot_prompt(message)).await?;
        MealSlot::parse(&label)
    }

    /// Structured preference delta from a free-text answer. Empty on failure.
    pub async fn extract_preferences(
        &self,
        answer: &str,
        current: &UserPreferences,
        context: &str,
    ) -> Map<String, Value> {
        let prompt = preference_extraction_prompt(answer, current, context);
        self.gateway.generate_json(&prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::failover::tests::{ScriptedLlm, providers};
    use crate::llm::{GatewayConfig, RetryPolicy};
    use std::time::Duration;

    fn extractor(script: Vec<Result<&str, ()>>) -> FieldExtractor {
        let llm = ScriptedLlm::new("m", script);
        FieldExtractor::new(Arc::new(FailoverGateway::new(
            providers(&[&llm]),
            GatewayConfig {
                retry: RetryPolicy::new(1, Duration::ZERO),
                call_timeout: Duration::from_secs(5),
            },
        )))
    }

    #[test]
    fn hour_bands() {
        assert_eq!(meal_slot_for_hour(8), Some(MealSlot::Breakfast));
        assert_eq!(meal_slot_for_hour(6), Some(MealSlot::Breakfast));
        assert_eq!(meal_slot_for_hour(10), Some(MealSlot::Breakfast));
        assert_eq!(meal_slot_for_hour(11), None);
        assert_eq!(meal_slot_for_hour(12), Some(MealSlot::Lunch));
        assert_eq!(meal_slot_for_hour(16), Some(MealSlot::Lunch));
        assert_eq!(meal_slot_for_hour(17), None);
        assert_eq!(meal_slot_for_hour(22), Some(MealSlot::Dinner));
        assert_eq!(meal_slot_for_hour(23), None);
        assert_eq!(meal_slot_for_hour(3), None);
    }

    #[test]
    fn none_sentinel() {
        assert_eq!(FoodItem::from_label("none"), FoodItem::NotMentioned);
        assert_eq!(FoodItem::from_label("None"), FoodItem::NotMentioned);
        assert_eq!(FoodItem::from_label("dal"), FoodItem::Food("dal".into()));
    }

    #[tokio::test]
    async fn food_sentinel_differs_from_failure() {
        assert_eq!(
            extractor(vec![Ok("\"none\"")]).extract_food_item("hello").await,
            Some(FoodItem::NotMentioned)
        );
        assert_eq!(extractor(vec![Err(())]).extract_food_item("hello").await, None);
        assert_eq!(
            extractor(vec![Ok("Masala Dosa")]).extract_food_item("had dosa").await,
            Some(FoodItem::Food("Masala Dosa".into()))
        );
    }

    #[tokio::test]
    async fn meal_slot_is_normalized_or_null() {
        assert_eq!(
            extractor(vec![Ok("Lunch")]).extract_meal_slot("dal at lunch").await,
            Some(MealSlot::Lunch)
        );
        assert_eq!(extractor(vec![Ok("none")]).extract_meal_slot("dal").await, None);
        assert_eq!(extractor(vec![Ok("snack")]).extract_meal_slot("chips").await, None);
        assert_eq!(extractor(vec![Err(())]).extract_meal_slot("dal").await, None);
    }

    #[tokio::test]
    async fn preferences_parse_json() {
        let extractor = extractor(vec![Ok("```json\n{\"diet_type\": \"vegetarian\"}\n```")]);
        let delta = extractor
            .extract_preferences("I'm vegetarian", &UserPreferences::default(), "")
            .await;
        assert_eq!(delta["diet_type"], "vegetarian");
    }
}
