//! Conversation core: dedup, intent classification, field extraction,
//! clarification state, and routing of each inbound message.

pub mod context;
pub mod dedup;
pub mod extract;
pub mod intent;
pub mod model;
pub mod router;
pub mod state;

pub use dedup::DedupLedger;
pub use intent::{Intent, IntentClassifier};
pub use model::{InboundMessage, MealLogEntry, MealSlot, MessageKind};
pub use router::{ConversationCore, CoreConfig, MessageReport, Outcome};
pub use state::ConversationState;
