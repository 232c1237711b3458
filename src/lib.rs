//! Meal Assist: WhatsApp meal-tracking assistant core.

pub mod broadcast;
pub mod channels;
pub mod clock;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod onboarding;
pub mod scheduler;
pub mod store;
