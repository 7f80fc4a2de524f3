//! Per-transaction undo log.
//!
//! ## States
//!
//! ```text
//! Active ──prepare──▶ Preparing ──commit──▶ Committed
//!    │                    │
//!    └──────rollback──────┴──────────────▶ RolledBack
//! ```
//!
//! Operations are enlisted only while `Active`. Commit releases backups in
//! enlistment order; rollback undoes in reverse order, then releases every
//! backup. Both terminal callbacks remove the participant from its registry.

use super::registry::ParticipantRegistry;
use super::{Participant, TransactionContext, TransactionId, Vote};
use crate::error::{FailureReport, OperationFailure, Result, TxError};
use crate::fs::AppliedOperation;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    Active,
    Preparing,
    Committed,
    RolledBack,
}

struct Inner {
    state: ParticipantState,
    log: Vec<AppliedOperation>,
}

/// Ordered log of executed operations for one transaction.
pub struct TxParticipant {
    id: TransactionId,
    inner: Mutex<Inner>,
    registered: Mutex<bool>,
    registry: Weak<ParticipantRegistry>,
}

impl TxParticipant {
    pub(crate) fn new(id: TransactionId, registry: Weak<ParticipantRegistry>) -> Self {
        Self {
            id,
            inner: Mutex::new(Inner {
                state: ParticipantState::Active,
                log: Vec::new(),
            }),
            registered: Mutex::new(false),
            registry,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> ParticipantState {
        self.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == ParticipantState::Active
    }

    /// Number of operations currently logged.
    pub fn len(&self) -> usize {
        self.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends an already-executed operation.
    ///
    /// Registers with `ctx` on the first enlistment. If the participant is no
    /// longer active, or registration is refused, the operation is undone and
    /// its backup released before the `Registration` error is returned.
    ///
    /// `ctx.enlist` runs without the log locked, so a coordinator may call
    /// back into this participant from inside it.
    pub fn enlist(
        self: &Arc<Self>,
        ctx: &dyn TransactionContext,
        mut operation: AppliedOperation,
    ) -> Result<()> {
        let state = self.state();
        if state != ParticipantState::Active {
            return Err(self.reject(&mut operation, state));
        }

        {
            let mut registered = self
                .registered
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !*registered {
                let participant: Arc<dyn Participant> = self.clone();
                if let Err(e) = ctx.enlist(participant) {
                    drop(registered);
                    discard(&mut operation);
                    self.detach();
                    log::error!("Registration of {} failed: {}", self.id, e);
                    return Err(e);
                }
                *registered = true;
                log::debug!("Registered participant for {}", self.id);
            }
        }

        let mut inner = self.lock();
        if inner.state != ParticipantState::Active {
            let state = inner.state;
            drop(inner);
            return Err(self.reject(&mut operation, state));
        }

        log::debug!(
            "Enlisted {} {} into {}",
            operation.kind(),
            operation.target().display(),
            self.id
        );
        inner.log.push(operation);
        Ok(())
    }

    fn reject(&self, operation: &mut AppliedOperation, state: ParticipantState) -> TxError {
        discard(operation);
        log::error!("Enlist into {} rejected in state {:?}", self.id, state);
        TxError::Registration(format!(
            "participant for {} is {:?}, not accepting operations",
            self.id, state
        ))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to a terminal state, handing back the log.
    fn finish(&self, state: ParticipantState) -> Vec<AppliedOperation> {
        let mut inner = self.lock();
        inner.state = state;
        std::mem::take(&mut inner.log)
    }

    fn detach(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

/// Best-effort undo of an operation that never made it into the log.
fn discard(operation: &mut AppliedOperation) {
    if let Err(e) = operation.rollback() {
        log::warn!(
            "Failed to undo rejected {} {}: {}",
            operation.kind(),
            operation.target().display(),
            e
        );
    }
    if let Err(e) = operation.cleanup() {
        log::warn!("Failed to release backup for {}: {}", operation.kind(), e);
    }
}

fn failure(operation: &AppliedOperation, error: std::io::Error) -> OperationFailure {
    OperationFailure {
        operation: operation.kind().name(),
        path: operation.target().to_path_buf(),
        error,
    }
}

impl Participant for TxParticipant {
    fn prepare(&self) -> Vote {
        let mut inner = self.lock();
        match inner.state {
            ParticipantState::Active | ParticipantState::Preparing => {
                inner.state = ParticipantState::Preparing;
                Vote::Prepared
            }
            state => {
                log::warn!("Prepare on {} in state {:?}", self.id, state);
                Vote::ForceRollback
            }
        }
    }

    fn commit(&self) -> Result<()> {
        let mut entries = self.finish(ParticipantState::Committed);
        let mut failures = FailureReport::default();

        for operation in entries.iter_mut() {
            if let Err(e) = operation.cleanup() {
                log::warn!("Cleanup failed for {}: {}", operation.kind(), e);
                failures.push(failure(operation, e));
            }
        }

        log::debug!("Committed {} operations for {}", entries.len(), self.id);
        drop(entries);
        self.detach();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TxError::CleanupFailed(failures))
        }
    }

    fn rollback(&self) -> Result<()> {
        let mut entries = self.finish(ParticipantState::RolledBack);
        let mut failures = FailureReport::default();

        log::info!("Rolling back {} operations for {}", entries.len(), self.id);

        for operation in entries.iter_mut().rev() {
            if let Err(e) = operation.rollback() {
                log::warn!(
                    "Undo failed for {} {}: {}",
                    operation.kind(),
                    operation.target().display(),
                    e
                );
                failures.push(failure(operation, e));
            }
        }

        for operation in entries.iter_mut() {
            if let Err(e) = operation.cleanup() {
                log::warn!("Cleanup failed for {}: {}", operation.kind(), e);
                failures.push(failure(operation, e));
            }
        }

        drop(entries);
        self.detach();

        if failures.is_empty() {
            log::info!("Rollback of {} completed", self.id);
            Ok(())
        } else {
            Err(TxError::RollbackFailed(failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{Encoding, Operation, Relocation, TempStore};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Records registrations without driving completion.
    struct StubContext {
        id: TransactionId,
        active: AtomicBool,
        registrations: AtomicUsize,
    }

    impl StubContext {
        fn new() -> Self {
            Self {
                id: TransactionId::next(),
                active: AtomicBool::new(true),
                registrations: AtomicUsize::new(0),
            }
        }
    }

    impl TransactionContext for StubContext {
        fn id(&self) -> TransactionId {
            self.id
        }

        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }

        fn enlist(&self, _participant: Arc<dyn Participant>) -> Result<()> {
            if !self.is_active() {
                return Err(TxError::Registration("inactive".into()));
            }
            self.registrations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn setup() -> (TempDir, TempStore, Arc<ParticipantRegistry>) {
        let temp = TempDir::new().unwrap();
        let store = TempStore::new(temp.path().join(".backups"), Relocation::Auto);
        (temp, store, ParticipantRegistry::new())
    }

    fn write(store: &TempStore, path: &Path, text: &str) -> AppliedOperation {
        Operation::WriteText {
            path: path.to_path_buf(),
            contents: text.to_string(),
            encoding: Encoding::Utf8,
        }
        .execute(store)
        .unwrap()
    }

    fn backup_count(temp: &TempDir) -> usize {
        let root: PathBuf = temp.path().join(".backups");
        if !root.exists() {
            return 0;
        }
        fs::read_dir(root).unwrap().count()
    }

    #[test]
    fn test_registers_once() {
        let (temp, store, registry) = setup();
        let ctx = StubContext::new();
        let participant = registry.participant_for(ctx.id);

        participant
            .enlist(&ctx, write(&store, &temp.path().join("a"), "1"))
            .unwrap();
        participant
            .enlist(&ctx, write(&store, &temp.path().join("b"), "2"))
            .unwrap();

        assert_eq!(ctx.registrations.load(Ordering::SeqCst), 1);
        assert_eq!(participant.len(), 2);
    }

    #[test]
    fn test_commit_releases_backups_and_registry_entry() {
        let (temp, store, registry) = setup();
        let ctx = StubContext::new();
        let file = temp.path().join("f.txt");
        fs::write(&file, "old").unwrap();

        let participant = registry.participant_for(ctx.id);
        participant.enlist(&ctx, write(&store, &file, "new")).unwrap();
        assert_eq!(backup_count(&temp), 1);

        assert_eq!(participant.prepare(), Vote::Prepared);
        participant.commit().unwrap();

        assert_eq!(participant.state(), ParticipantState::Committed);
        assert_eq!(fs::read_to_string(&file).unwrap(), "new");
        assert_eq!(backup_count(&temp), 0);
        assert!(registry.get(ctx.id).is_none());
    }

    #[test]
    fn test_rollback_reverse_order() {
        let (temp, store, registry) = setup();
        let ctx = StubContext::new();
        let file = temp.path().join("f.txt");
        fs::write(&file, "v0").unwrap();

        let participant = registry.participant_for(ctx.id);
        participant.enlist(&ctx, write(&store, &file, "v1")).unwrap();
        participant.enlist(&ctx, write(&store, &file, "v2")).unwrap();

        participant.rollback().unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "v0");
        assert_eq!(backup_count(&temp), 0);
        assert_eq!(participant.state(), ParticipantState::RolledBack);
    }

    #[test]
    fn test_enlist_after_prepare_is_rejected_and_undone() {
        let (temp, store, registry) = setup();
        let ctx = StubContext::new();
        let participant = registry.participant_for(ctx.id);
        participant.prepare();

        let file = temp.path().join("late.txt");
        let result = participant.enlist(&ctx, write(&store, &file, "late"));

        assert!(matches!(result, Err(TxError::Registration(_))));
        assert!(!file.exists());
        assert_eq!(backup_count(&temp), 0);
    }

    #[test]
    fn test_refused_registration_undoes_operation() {
        let (temp, store, registry) = setup();
        let ctx = StubContext::new();
        let participant = registry.participant_for(ctx.id);
        ctx.active.store(false, Ordering::SeqCst);

        let file = temp.path().join("f.txt");
        fs::write(&file, "orig").unwrap();
        let result = participant.enlist(&ctx, write(&store, &file, "changed"));

        assert!(matches!(result, Err(TxError::Registration(_))));
        assert_eq!(fs::read_to_string(&file).unwrap(), "orig");
        assert!(registry.get(ctx.id).is_none());
    }

    #[test]
    fn test_rollback_continues_after_failure() {
        let (temp, store, registry) = setup();
        let ctx = StubContext::new();
        let dir = temp.path().join("dir");
        fs::create_dir(&dir).unwrap();
        let inner_file = dir.join("inner.txt");
        fs::write(&inner_file, "inner").unwrap();
        let other = temp.path().join("other.txt");
        fs::write(&other, "other").unwrap();

        let participant = registry.participant_for(ctx.id);
        participant.enlist(&ctx, write(&store, &other, "x")).unwrap();
        participant
            .enlist(&ctx, write(&store, &inner_file, "y"))
            .unwrap();

        // Replace the parent directory with a file so the restore cannot
        // recreate it.
        fs::remove_dir_all(&dir).unwrap();
        fs::write(&dir, "blocker").unwrap();

        let result = participant.rollback();

        match result {
            Err(TxError::RollbackFailed(report)) => {
                assert_eq!(report.len(), 1);
                assert!(report.iter().all(|f| f.path == inner_file));
            }
            other => panic!("expected RollbackFailed, got {:?}", other),
        }
        assert_eq!(fs::read_to_string(&other).unwrap(), "other");
        assert_eq!(backup_count(&temp), 0);
    }

    #[test]
    fn test_prepare_after_rollback_votes_rollback() {
        let (_temp, _store, registry) = setup();
        let participant = registry.participant_for(TransactionId::next());
        participant.rollback().unwrap();
        assert_eq!(participant.prepare(), Vote::ForceRollback);
    }

    /// Aborts synchronously from inside registration.
    struct AbortingContext {
        id: TransactionId,
    }

    impl TransactionContext for AbortingContext {
        fn id(&self) -> TransactionId {
            self.id
        }

        fn is_active(&self) -> bool {
            true
        }

        fn enlist(&self, participant: Arc<dyn Participant>) -> Result<()> {
            assert_eq!(participant.prepare(), Vote::Prepared);
            participant.rollback()
        }
    }

    #[test]
    fn test_callback_during_registration_does_not_deadlock() {
        let (temp, store, registry) = setup();
        let ctx = AbortingContext {
            id: TransactionId::next(),
        };
        let file = temp.path().join("f.txt");
        fs::write(&file, "orig").unwrap();

        let participant = registry.participant_for(ctx.id);
        let result = participant.enlist(&ctx, write(&store, &file, "changed"));

        assert!(matches!(result, Err(TxError::Registration(_))));
        assert_eq!(participant.state(), ParticipantState::RolledBack);
        assert_eq!(fs::read_to_string(&file).unwrap(), "orig");
        assert_eq!(backup_count(&temp), 0);
        assert!(registry.get(ctx.id).is_none());
    }
}
