// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! One write in flight, the latest request queued behind it.
//!
//! The sequentializer is a two-slot structure: `pending` is the save currently running, `next` is
//! the single follow-up that runs once it finishes. A request that arrives while a follow-up is
//! already queued replaces the queued closure but shares its [`Completion`], so every caller is
//! answered by the one save that actually runs.
//!
//! Advancing is explicit: whoever drives the pending save calls
//! [`SaveSequentializer::finish_pending`] and starts the returned [`NextSave`].

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::store::FileOperationError;

/// Outcome of a save: `Ok(true)` when the model ended up saved.
pub type SaveResult = Result<bool, FileOperationError>;

/// Shared outcome of a save. Clones resolve together.
#[derive(Debug, Clone)]
pub struct Completion {
    rx: watch::Receiver<Option<SaveResult>>,
}

impl Completion {
    pub fn ready(result: SaveResult) -> Self {
        let (tx, rx) = watch::channel(Some(result));
        drop(tx);
        Self { rx }
    }

    pub fn is_complete(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Whether both handles observe the same save.
    pub fn same_as(&self, other: &Completion) -> bool {
        self.rx.same_channel(&other.rx)
    }

    pub async fn wait(mut self) -> SaveResult {
        loop {
            if let Some(result) = self.rx.borrow_and_update().clone() {
                return result;
            }
            if self.rx.changed().await.is_err() {
                // Source dropped without an answer; nothing was saved.
                return self.rx.borrow().clone().unwrap_or(Ok(false));
            }
        }
    }
}

impl IntoFuture for Completion {
    type Output = SaveResult;
    type IntoFuture = Pin<Box<dyn Future<Output = SaveResult> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

/// Write half of a [`Completion`].
#[derive(Debug)]
pub struct CompletionSource {
    tx: watch::Sender<Option<SaveResult>>,
}

impl CompletionSource {
    pub fn new() -> (Self, Completion) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, Completion { rx })
    }

    pub fn complete(self, result: SaveResult) {
        self.tx.send_replace(Some(result));
    }
}

/// Cooperative cancellation handed to save participants.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancellationSource {
    token: CancellationToken,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Starts a save and hands back its completion.
pub type SaveRun = Box<dyn FnOnce() -> Completion + Send>;

struct PendingSave {
    version: u64,
    completion: Completion,
    cancel: CancellationSource,
}

/// The queued follow-up save.
pub struct NextSave {
    run: SaveRun,
    source: CompletionSource,
}

impl fmt::Debug for NextSave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextSave").finish_non_exhaustive()
    }
}

impl NextSave {
    /// Runs the queued closure and forwards its outcome to every waiter.
    ///
    /// The closure runs synchronously so the new save is registered before the caller yields;
    /// only the forwarding is spawned.
    pub fn start(self) {
        let completion = (self.run)();
        let source = self.source;
        tokio::spawn(async move {
            source.complete(completion.wait().await);
        });
    }
}

#[derive(Default)]
pub struct SaveSequentializer {
    pending: Option<PendingSave>,
    next: Option<(SaveRun, CompletionSource, Completion)>,
}

impl fmt::Debug for SaveSequentializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveSequentializer")
            .field("pending", &self.pending.as_ref().map(|pending| pending.version))
            .field("next", &self.next.is_some())
            .finish()
    }
}

impl SaveSequentializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any pending save with `None`, otherwise only one for exactly `version`.
    pub fn has_pending(&self, version: Option<u64>) -> bool {
        match (&self.pending, version) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(pending), Some(version)) => pending.version == version,
        }
    }

    pub fn pending_version(&self) -> Option<u64> {
        self.pending.as_ref().map(|pending| pending.version)
    }

    pub fn pending_completion(&self, version: Option<u64>) -> Option<Completion> {
        if !self.has_pending(version) {
            return None;
        }
        self.pending.as_ref().map(|pending| pending.completion.clone())
    }

    pub fn set_pending(&mut self, version: u64, completion: Completion, cancel: CancellationSource) {
        self.pending = Some(PendingSave {
            version,
            completion,
            cancel,
        });
    }

    /// Re-registers the pending save under `to`, keeping its completion.
    ///
    /// Returns `false` if no save is pending for `from`.
    pub fn repin(&mut self, from: u64, to: u64) -> bool {
        match self.pending.as_mut() {
            Some(pending) if pending.version == from => {
                pending.version = to;
                true
            }
            _ => false,
        }
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    /// Queues `run` behind the pending save, replacing any queued closure.
    pub fn set_next(&mut self, run: SaveRun) -> Completion {
        if let Some((queued, _, completion)) = self.next.as_mut() {
            *queued = run;
            return completion.clone();
        }
        let (source, completion) = CompletionSource::new();
        self.next = Some((run, source, completion.clone()));
        completion
    }

    /// Clears the pending slot if it still belongs to `version` and hands out the queued save.
    pub fn finish_pending(&mut self, version: u64) -> Option<NextSave> {
        if !self.has_pending(Some(version)) {
            return None;
        }
        self.pending = None;
        self.next
            .take()
            .map(|(run, source, _)| NextSave { run, source })
    }

    /// Signals the participant of the pending save. The write itself is never interrupted.
    pub fn cancel_pending(&self) {
        if let Some(pending) = &self.pending {
            pending.cancel.cancel();
        }
    }
}
