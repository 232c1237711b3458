//! Onboarding: the guided multi-turn flow that builds a user's dietary
//! preference record.
//!
//! Each user moves forward through `asking → confirmation → done`. Answers
//! are merged into the stored preferences key by key; nothing is ever
//! removed. A scheduled sweep greets registered users who have never
//! talked to the bot and asks them a first question.

pub mod manager;
pub mod model;
pub mod prompts;
pub mod routes;
pub mod state;

pub use manager::{OnboardingEngine, OnboardingReply, SweepReport};
pub use model::{RegisteredUser, UserPreferences, UserProfile};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use state::{OnboardingPhase, OnboardingState};
