use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Semaphore, watch};
use uuid::Uuid;

use crate::sandbox::{ExecutionOutcome, RunStep, SandboxBackend, Workspace};

/// Owner side of a cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            receiver: Some(self.sender.subscribe()),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.sender, &other.sender)
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation flag. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    receiver: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { receiver: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.receiver.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested. Pending forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        if let Some(rx) = self.receiver.as_mut() {
            let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
            if !closed {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

/// Bounds how many sandboxed processes run at once across all submissions
/// and tracks the cancellation handle of every submission being judged.
#[derive(Clone)]
pub struct Scheduler {
    slots: Arc<Semaphore>,
    in_flight: Arc<DashMap<Uuid, CancelHandle>>,
}

impl Scheduler {
    pub fn new(max_concurrent_processes: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent_processes.max(1))),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Registers a submission as in flight until the returned admission drops.
    pub fn admit(&self, submission_id: Uuid) -> Admission {
        let handle = CancelHandle::new();
        if self
            .in_flight
            .insert(submission_id, handle.clone())
            .is_some()
        {
            tracing::warn!(submission_id = %submission_id, "submission id already in flight");
        }
        Admission {
            submission_id,
            handle,
            in_flight: self.in_flight.clone(),
        }
    }

    pub fn cancel(&self, submission_id: Uuid) -> bool {
        match self.in_flight.get(&submission_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for entry in self.in_flight.iter() {
            entry.value().cancel();
            cancelled += 1;
        }
        cancelled
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Runs `step` once a process slot is free. Cancellation while waiting for
    /// a slot skips the step.
    pub async fn execute(
        &self,
        backend: &dyn SandboxBackend,
        workspace: &Workspace,
        step: RunStep,
        mut cancel: CancelSignal,
    ) -> ExecutionOutcome {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ExecutionOutcome::cancelled(),
            permit = self.slots.acquire() => permit,
        };
        let Ok(_permit) = permit else {
            return ExecutionOutcome::spawn_failed("process slots closed");
        };
        backend.execute(workspace, step, cancel).await
    }
}

pub struct Admission {
    submission_id: Uuid,
    handle: CancelHandle,
    in_flight: Arc<DashMap<Uuid, CancelHandle>>,
}

impl Admission {
    pub fn submission_id(&self) -> Uuid {
        self.submission_id
    }

    pub fn signal(&self) -> CancelSignal {
        self.handle.signal()
    }

    pub fn handle(&self) -> &CancelHandle {
        &self.handle
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.in_flight
            .remove_if(&self.submission_id, |_, handle| handle.same_as(&self.handle));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn signal_fires_after_cancel() {
        let handle = CancelHandle::new();
        let mut signal = handle.signal();
        assert!(!signal.is_cancelled());

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
        });
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_handle_never_fires() {
        let handle = CancelHandle::new();
        let mut signal = handle.signal();
        drop(handle);
        let fired = tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(fired.is_err());
        assert!(!CancelSignal::never().is_cancelled());
    }

    #[test]
    fn admission_registers_until_dropped() {
        let scheduler = Scheduler::new(2);
        let id = Uuid::new_v4();
        let admission = scheduler.admit(id);
        let signal = admission.signal();
        assert_eq!(scheduler.in_flight(), 1);

        assert!(scheduler.cancel(id));
        assert!(signal.is_cancelled());

        drop(admission);
        assert_eq!(scheduler.in_flight(), 0);
        assert!(!scheduler.cancel(id));
    }

    #[test]
    fn cancel_all_reaches_every_submission() {
        let scheduler = Scheduler::new(1);
        let a = scheduler.admit(Uuid::new_v4());
        let b = scheduler.admit(Uuid::new_v4());
        assert_eq!(scheduler.cancel_all(), 2);
        assert!(a.handle().is_cancelled());
        assert!(b.handle().is_cancelled());
    }

    #[test]
    fn zero_slots_is_raised_to_one() {
        assert_eq!(Scheduler::new(0).available_slots(), 1);
    }
}
