//! A single-slot holder for the one request an asset may have outstanding.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};

use crate::utils::futures::CallOnDrop;

/// A shareable handle to the result of a running computation.
///
/// Resolves to `Err(Canceled)` if the computation was dropped before producing a result.
pub type Pending<T> = Shared<oneshot::Receiver<T>>;

/// How a caller got hold of a [`Pending`] computation.
pub enum Claim<T: Clone> {
    /// The caller started a new computation.
    Started(Pending<T>),
    /// The caller attached to a computation that was already running.
    Joined(Pending<T>),
}

impl<T: Clone> Claim<T> {
    pub fn into_pending(self) -> Pending<T> {
        match self {
            Claim::Started(pending) | Claim::Joined(pending) => pending,
        }
    }
}

/// Holds at most one running computation, which concurrent callers share.
///
/// The slot is `Idle` when empty and `Running` while a computation is set. Checking and setting
/// the slot happens under one lock, so two callers can never both start a computation. The slot
/// is cleared as soon as the computation settles, before its result is handed out, so callers
/// either attach to a channel that will still receive the result or start a new computation.
pub struct InFlight<T: Clone> {
    slot: Arc<Mutex<Option<Pending<T>>>>,
}

impl<T: Clone> fmt::Debug for InFlight<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight")
            .field("running", &lock(&self.slot).is_some())
            .finish()
    }
}

impl<T: Clone> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T> InFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the running computation, if there is one.
    pub fn join(&self) -> Option<Pending<T>> {
        lock(&self.slot).clone()
    }

    /// Whether a computation is currently running.
    pub fn is_running(&self) -> bool {
        lock(&self.slot).is_some()
    }

    /// Attaches to the running computation, or spawns the one created by `make` if the slot is
    /// empty.
    ///
    /// `make` is only invoked when a new computation is started. The computation is spawned on
    /// the current tokio runtime, so it runs to completion even if all callers go away.
    pub fn claim_or_join<F, Fut>(&self, make: F) -> Claim<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut slot = lock(&self.slot);
        if let Some(pending) = slot.as_ref() {
            return Claim::Joined(pending.clone());
        }

        let (sender, receiver) = oneshot::channel();
        let pending = receiver.shared();

        let release = {
            let slot = self.slot.clone();
            CallOnDrop::new(move || {
                lock(&slot).take();
            })
        };

        let computation = make();
        tokio::spawn(async move {
            let result = computation.await;
            // Release the slot first, so that nobody attaches to a channel that already sent.
            drop(release);
            sender.send(result).ok();
        });

        *slot = Some(pending.clone());
        Claim::Started(pending)
    }
}

fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    // The slot is always left in a consistent state, so a poisoned lock is fine to reuse.
    slot.lock().unwrap_or_else(|e| e.into_inner())
}
