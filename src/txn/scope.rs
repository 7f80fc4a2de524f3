//! In-process transaction coordinator.
//!
//! ## Example
//!
//! ```no_run
//! # use txfs::{FileManager, Transaction};
//! # fn example() -> txfs::Result<()> {
//! let files = FileManager::new();
//! let tx = Transaction::begin();
//!
//! files.write_text(Some(&tx), "config.toml", "[server]\nport = 8080\n")?;
//! files.move_file(Some(&tx), "staging.db", "live.db", true)?;
//!
//! tx.complete()?; // dropping `tx` instead rolls everything back
//! # Ok(())
//! # }
//! ```
//!
//! Completion is two-phase: every participant is asked to prepare, then all
//! are committed, or all are rolled back if any votes otherwise. Callbacks run
//! without the transaction's lock held.

use super::{Participant, TransactionContext, TransactionId, Vote};
use crate::error::{Result, TxError};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Preparing,
    Committed,
    RolledBack,
}

struct Inner {
    status: TransactionStatus,
    participants: Vec<Arc<dyn Participant>>,
}

/// A transaction scope.
///
/// Must be explicitly completed. If dropped while still active, every
/// enlisted participant is rolled back.
#[must_use = "Transaction must be completed or rolled back"]
pub struct Transaction {
    id: TransactionId,
    inner: Mutex<Inner>,
}

impl Transaction {
    /// Starts a new active transaction.
    pub fn begin() -> Self {
        let id = TransactionId::next();
        log::debug!("Began {}", id);
        Self {
            id,
            inner: Mutex::new(Inner {
                status: TransactionStatus::Active,
                participants: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn status(&self) -> TransactionStatus {
        self.lock().status
    }

    /// Number of registered participants.
    pub fn participant_count(&self) -> usize {
        self.lock().participants.len()
    }

    /// Commits the transaction.
    ///
    /// Prepares every participant; if all vote `Prepared` they are committed,
    /// otherwise all are rolled back and `Aborted` is returned (merged with
    /// any rollback failures).
    pub fn complete(self) -> Result<()> {
        let participants = self.take_participants(TransactionStatus::Preparing)?;

        let vetoed = participants
            .iter()
            .map(|p| p.prepare())
            .filter(|vote| *vote == Vote::ForceRollback)
            .count();

        if vetoed > 0 {
            log::warn!("{} vetoed by {} participant(s), rolling back", self.id, vetoed);
            let mut errors = vec![TxError::Aborted(self.id)];
            errors.extend(Self::rollback_all(&participants));
            self.set_status(TransactionStatus::RolledBack);
            return Err(TxError::merge(errors).unwrap_or(TxError::Aborted(self.id)));
        }

        let errors: Vec<TxError> = participants
            .iter()
            .filter_map(|p| p.commit().err())
            .collect();

        self.set_status(TransactionStatus::Committed);
        log::info!("Committed {}", self.id);

        match TxError::merge(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Rolls back every participant.
    ///
    /// Returns the aggregated rollback failures, if any.
    pub fn rollback(self) -> Result<()> {
        self.abort()
    }

    fn abort(&self) -> Result<()> {
        let participants = self.take_participants(TransactionStatus::RolledBack)?;
        let errors = Self::rollback_all(&participants);
        log::info!("Rolled back {}", self.id);

        match TxError::merge(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Later enlistments depend on earlier ones, so participants unwind in
    /// reverse registration order.
    fn rollback_all(participants: &[Arc<dyn Participant>]) -> Vec<TxError> {
        participants
            .iter()
            .rev()
            .filter_map(|p| p.rollback().err())
            .collect()
    }

    fn take_participants(&self, next: TransactionStatus) -> Result<Vec<Arc<dyn Participant>>> {
        let mut inner = self.lock();
        if inner.status != TransactionStatus::Active {
            return Err(TxError::Registration(format!(
                "{} is already {:?}",
                self.id, inner.status
            )));
        }
        inner.status = next;
        Ok(std::mem::take(&mut inner.participants))
    }

    fn set_status(&self, status: TransactionStatus) {
        self.lock().status = status;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TransactionContext for Transaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    fn enlist(&self, participant: Arc<dyn Participant>) -> Result<()> {
        let mut inner = self.lock();
        if inner.status != TransactionStatus::Active {
            return Err(TxError::Registration(format!(
                "cannot enlist in {} while {:?}",
                self.id, inner.status
            )));
        }
        inner.participants.push(participant);
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.status() != TransactionStatus::Active {
            return;
        }

        log::info!("{} dropped without completion, rolling back", self.id);
        if let Err(e) = self.abort() {
            log::warn!("Rollback of dropped {} failed: {}", self.id, e);
        }
    }
}
