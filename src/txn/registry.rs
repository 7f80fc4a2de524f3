//! Transaction identity → participant map.
//!
//! Keyed by transaction identity alone, so a transaction used from several
//! threads shares one undo log. The lock is held only for lookup-or-create.

use super::TransactionId;
use super::participant::TxParticipant;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
pub struct ParticipantRegistry {
    participants: Mutex<HashMap<TransactionId, Arc<TxParticipant>>>,
}

impl ParticipantRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Finds or creates the participant for `id`.
    pub fn participant_for(self: &Arc<Self>, id: TransactionId) -> Arc<TxParticipant> {
        let mut participants = self.lock();
        participants
            .entry(id)
            .or_insert_with(|| {
                log::debug!("New participant for {}", id);
                Arc::new(TxParticipant::new(id, Arc::downgrade(self)))
            })
            .clone()
    }

    pub fn get(&self, id: TransactionId) -> Option<Arc<TxParticipant>> {
        self.lock().get(&id).cloned()
    }

    /// Drops the entry for `id`; called on the terminal callback.
    pub(crate) fn remove(&self, id: TransactionId) {
        if self.lock().remove(&id).is_some() {
            log::debug!("Removed participant for {}", id);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TransactionId, Arc<TxParticipant>>> {
        self.participants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
