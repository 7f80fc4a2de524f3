//! Transaction coordination.
//!
//! The undo-log engine only depends on two small traits:
//!
//! - [`TransactionContext`]: what a caller passes to the file manager. Answers
//!   "is this transaction active?" and accepts participant registrations.
//! - [`Participant`]: what a coordinator drives through two-phase completion.
//!
//! [`Transaction`] is an in-process coordinator implementing the former.

pub mod participant;
pub mod registry;
pub mod scope;

pub use participant::{ParticipantState, TxParticipant};
pub use registry::ParticipantRegistry;
pub use scope::{Transaction, TransactionStatus};

use crate::error::Result;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique transaction identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Allocates the next identity.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TransactionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// A participant's answer to `prepare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Prepared,
    ForceRollback,
}

/// Receives two-phase completion callbacks from a coordinator.
pub trait Participant: Send + Sync {
    fn prepare(&self) -> Vote;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;
}

/// The transaction a mutating call runs under.
pub trait TransactionContext: Send + Sync {
    fn id(&self) -> TransactionId;

    fn is_active(&self) -> bool;

    /// Registers `participant` for prepare/commit/rollback callbacks.
    ///
    /// Fails with `Registration` once the transaction has left the active
    /// state.
    fn enlist(&self, participant: Arc<dyn Participant>) -> Result<()>;
}
