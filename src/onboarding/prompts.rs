//! Prompts and fixed replies for the onboarding flow.

use super::model::{PreferenceQuestion, UserPreferences};

/// Sent once the preferences look complete.
pub const CONFIRMATION_MESSAGE: &str = "✅ I've noted down your preferences.\n\
Would you like to add anything else about your diet or food choices?";

/// Sent when the user closes onboarding.
pub const CLOSING_MESSAGE: &str =
    "Thanks! Your preferences are saved 🙌 I'll keep them in mind for your meal ideas.";

/// Replies that close onboarding from the confirmation phase.
const CLOSE_WORDS: &[&str] = &[
    "no",
    "nope",
    "nothing",
    "nothing else",
    "that's all",
    "thats all",
    "done",
    "no thanks",
    "no thank you",
];

/// Whether `reply` is a plain closing answer like "no" or "that's all".
pub fn is_close_reply(reply: &str) -> bool {
    let normalized = reply
        .trim()
        .trim_end_matches(['.', '!'])
        .replace('’', "'")
        .to_lowercase();
    CLOSE_WORDS.contains(&normalized.as_str())
}

/// Greeting sent by the proactive onboarding sweep.
pub fn welcome_message(name: &str) -> String {
    format!(
        "👋 Hi *{name}*! I'm your personal meal assistant.\n\
         I'll send you meal ideas every day 🍽️. Just reply with what you ate, and I'll log it for you!\n\n\
         Let's get started! 💬"
    )
}

fn checklist_lines(items: &[&PreferenceQuestion]) -> String {
    items
        .iter()
        .map(|q| format!("- {}: {}", q.key, q.question))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Turn a free-text answer into a JSON preference delta.
pub fn preference_extraction_prompt(
    answer: &str,
    current: &UserPreferences,
    context: &str,
) -> String {
    format!(
        "You maintain a user's dietary preference record for an Indian meal assistant.\n\n\
         Current preferences (JSON):\n{current}\n\n\
         Recent conversation:\n{context}\n\n\
         The user just said: \"{answer}\"\n\n\
         Return a JSON object with only the preference keys this answer adds or changes. \
         Prefer these keys where they fit: diet_type, egg_preference, allergies, preferred_protein, \
         non_veg_comfort, partner_diet, disliked_ingredients, preferred_cuisine, cook_at_home, \
         kids_at_home, location, favourite_dishes. Use arrays for lists and booleans for yes/no. \
         Return {{}} if the answer contains no preference.",
        current = current.to_prompt_json(),
    )
}

/// Binary decision: is enough known to stop asking?
pub fn completeness_prompt(preferences: &UserPreferences, missing: &[&PreferenceQuestion]) -> String {
    let missing = if missing.is_empty() {
        "(none)".to_string()
    } else {
        checklist_lines(missing)
    };
    format!(
        "You are onboarding a user for an Indian meal assistant.\n\n\
         Known preferences (JSON):\n{known}\n\n\
         Preferences still unknown:\n{missing}\n\n\
         Is there enough information to suggest meals the user will enjoy and can safely eat? \
         Diet type and allergies matter most. Reply with exactly one word: yes or no.",
        known = preferences.to_prompt_json(),
    )
}

/// Phrase the most useful next question.
pub fn next_question_prompt(
    preferences: &UserPreferences,
    missing: &[&PreferenceQuestion],
    last_question: Option<&str>,
) -> String {
    let last = last_question.unwrap_or("(none)");
    format!(
        "You are a friendly Indian meal assistant on WhatsApp getting to know a user's food habits.\n\n\
         Known preferences (JSON):\n{known}\n\n\
         Still unknown:\n{missing}\n\n\
         Previous question: {last}\n\n\
         Ask ONE short, warm question about the most useful unknown item. \
         Do not repeat the previous question. Return only the question.",
        known = preferences.to_prompt_json(),
        missing = checklist_lines(missing),
    )
}

/// Pick the best opening question for a new user.
pub fn first_question_prompt(
    name: &str,
    preferences: &UserPreferences,
    missing: &[&PreferenceQuestion],
) -> String {
    format!(
        "A new user named {name} just joined an Indian meal assistant on WhatsApp.\n\n\
         Known profile preferences (JSON):\n{known}\n\n\
         Checklist of things we would like to learn:\n{missing}\n\n\
         Pick the single best question to ask first and phrase it warmly in one sentence. \
         Return only the question.",
        known = preferences.to_prompt_json(),
        missing = checklist_lines(missing),
    )
}

/// Interpret a yes/no label. Anything else is `None`.
pub fn parse_yes_no(label: &str) -> Option<bool> {
    match label.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" => Some(true),
        "no" | "n" | "false" => Some(false),
        _ => None,
    }
}
