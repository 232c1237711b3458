//! At-most-once claim per inbound message id.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::DatabaseError;
use crate::store::Database;

/// Claims message ids against the persistent store.
///
/// The claim is a single atomic insert, so two concurrent deliveries of the
/// same id never both succeed, and a claim survives restarts.
pub struct DedupLedger {
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
}

impl DedupLedger {
    pub fn new(db: Arc<dyn Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Returns `true` if the caller now owns `message_id`, `false` if it was
    /// already claimed.
    pub async fn try_claim(&self, message_id: &str, sender: &str) -> Result<bool, DatabaseError> {
        let claimed = self
            .db
            .claim_message(message_id, sender, self.clock.now())
            .await?;
        if !claimed {
            tracing::info!(message_id, sender, "Duplicate message, skipping");
        }
        Ok(claimed)
    }

    /// Give up a claim whose work could not be finished.
    pub async fn release(&self, message_id: &str) -> Result<(), DatabaseError> {
        self.db.release_claim(message_id).await
    }
}
