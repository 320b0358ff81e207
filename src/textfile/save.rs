// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! The save workflow.
//!
//! [`TextFileModel::save`] decides synchronously whether a save runs, joins an existing one or
//! queues behind it, and registers itself with the sequentializer before returning. The save
//! body then runs on a spawned task, so dropping the returned [`Completion`] never abandons a
//! half-done save.

use std::sync::Arc;
use std::time::SystemTime;

use crate::model::{Etag, FileStat, ModelEvent, SaveReason};
use crate::store::{BoxFuture, FileOperationError, FileOperationResult, TouchOptions, WriteOptions};

use super::sequentializer::{
    CancellationSource, CancellationToken, Completion, CompletionSource, SaveResult,
};
use super::{ModelError, TextFileModel};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Save even when not dirty. A clean forced save only touches the file.
    pub force: bool,
    pub reason: SaveReason,
    pub overwrite_readonly: bool,
    pub overwrite_encoding: bool,
    /// Write without the etag, accepting that external changes get overwritten.
    pub ignore_modified_since: bool,
    /// Return write failures to the caller instead of reporting them to the handler.
    pub ignore_error_handler: bool,
    pub skip_save_participants: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveContext {
    pub reason: SaveReason,
}

/// Hook that runs right before the write and may edit the buffer.
pub trait SaveParticipant: Send + Sync {
    fn participate<'a>(
        &'a self,
        model: &'a TextFileModel,
        context: SaveContext,
        token: CancellationToken,
    ) -> BoxFuture<'a, Result<(), ModelError>>;
}

/// Receives every failed write that was not returned to the caller.
pub trait SaveErrorHandler: Send + Sync {
    fn on_save_error(&self, error: &FileOperationError, model: &TextFileModel);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSaveErrorHandler;

impl SaveErrorHandler for LoggingSaveErrorHandler {
    fn on_save_error(&self, error: &FileOperationError, model: &TextFileModel) {
        match error.result() {
            FileOperationResult::ModifiedSince => log::error!(
                "{}: file changed on disk, compare or overwrite to resolve",
                model.resource()
            ),
            _ => log::error!("{}: save failed: {error}", model.resource()),
        }
    }
}

/// The buffer as it was when the save was requested.
struct Requested {
    content: String,
    saved_alternative_version_id: Option<u64>,
}

/// What the save body decided to do after the participant ran.
enum Step {
    Touch {
        version: u64,
        options: TouchOptions,
    },
    Write {
        version: u64,
        saved_alternative_version_id: Option<u64>,
        content: String,
        options: WriteOptions,
    },
}

impl TextFileModel {
    /// Requests a save and returns its shared outcome.
    ///
    /// Must be called within a tokio runtime. `Ok(true)` means the model ended up saved; write
    /// failures resolve to `Ok(false)` after the error handler ran, or to `Err` with
    /// [`SaveOptions::ignore_error_handler`].
    pub fn save(&self, options: SaveOptions) -> Completion {
        let mut state = self.lock();
        if state.disposed {
            return Completion::ready(Ok(false));
        }
        if !state.is_resolved() {
            log::trace!("{}: save ignored, model is not resolved", self.inner.resource);
            return Completion::ready(Ok(false));
        }
        if self.is_readonly() {
            log::trace!("{}: save ignored, model is readonly", self.inner.resource);
            return Completion::ready(Ok(false));
        }
        if (state.dirty.in_conflict_mode() || state.dirty.in_error_mode())
            && options.reason.is_implicit()
        {
            log::trace!(
                "{}: {:?} save ignored while in conflict or error",
                self.inner.resource,
                options.reason
            );
            return Completion::ready(Ok(false));
        }

        let version = state.versions.current();
        if let Some(pending) = state.sequentializer.pending_completion(Some(version)) {
            log::trace!("{}: joining pending save of version {version}", self.inner.resource);
            return pending;
        }

        if !options.force && !state.dirty.is_dirty() {
            log::trace!("{}: save ignored, model is not dirty", self.inner.resource);
            return Completion::ready(Ok(true));
        }

        if state.sequentializer.has_pending(None) {
            log::trace!("{}: queueing save behind pending write", self.inner.resource);
            let model = self.clone();
            return state
                .sequentializer
                .set_next(Box::new(move || model.save(options)));
        }

        // Later edits must not leak into this request's write.
        let Some(buffer) = state.buffer.as_mut() else {
            return Completion::ready(Ok(false));
        };
        buffer.push_undo_checkpoint();
        let requested = Requested {
            content: buffer.text(),
            saved_alternative_version_id: Some(buffer.alternative_version_id()),
        };

        let (source, completion) = CompletionSource::new();
        let cancel = CancellationSource::new();
        let token = cancel.token();
        state
            .sequentializer
            .set_pending(version, completion.clone(), cancel);
        drop(state);

        let model = self.clone();
        tokio::spawn(async move {
            let mut registered = version;
            let result = model
                .run_save(&mut registered, requested, options, token)
                .await;
            let next = model.lock().sequentializer.finish_pending(registered);
            source.complete(result);
            if let Some(next) = next {
                next.start();
            }
        });
        completion
    }

    async fn run_save(
        &self,
        registered: &mut u64,
        requested: Requested,
        options: SaveOptions,
        token: CancellationToken,
    ) -> SaveResult {
        let initial_version = *registered;
        log::trace!("{}: save of version {initial_version} started", self.inner.resource);

        let participated = self.run_participant(&options, &token).await;

        let step = {
            let mut state = self.lock();
            if state.disposed {
                return Ok(false);
            }

            // A participant saves the buffer as it left it, edits included.
            let version = if participated {
                let current = state.versions.current();
                state.sequentializer.repin(*registered, current);
                *registered = current;
                current
            } else {
                initial_version
            };
            state.dirty.clear_error();

            let held = state.last_resolved_stat.clone();
            if options.force
                && !state.dirty.is_dirty()
                && !state.orphaned
                && options.reason == SaveReason::Explicit
                && version == initial_version
            {
                Step::Touch {
                    version,
                    options: TouchOptions {
                        mtime: held.as_ref().map(|stat| stat.mtime),
                        etag: held.map(|stat| stat.etag).unwrap_or_else(Etag::disabled),
                    },
                }
            } else {
                let etag = if options.ignore_modified_since
                    || !self.inner.settings.prevent_save_conflicts()
                {
                    Etag::disabled()
                } else {
                    held.as_ref()
                        .map(|stat| stat.etag.clone())
                        .unwrap_or_else(Etag::disabled)
                };
                let (content, saved_alternative_version_id) = if participated {
                    let Some(buffer) = state.buffer.as_ref() else {
                        return Ok(false);
                    };
                    (buffer.text(), Some(buffer.alternative_version_id()))
                } else {
                    (requested.content, requested.saved_alternative_version_id)
                };
                let write_options = WriteOptions {
                    mtime: held.map(|stat| stat.mtime),
                    etag,
                    encoding: self.effective_encoding(&state),
                    overwrite_readonly: options.overwrite_readonly,
                    overwrite_encoding: options.overwrite_encoding,
                };
                state.last_save_attempt = Some(SystemTime::now());
                Step::Write {
                    version,
                    saved_alternative_version_id,
                    content,
                    options: write_options,
                }
            }
        };

        match step {
            Step::Touch { version, options: touch } => {
                match self.inner.files.touch(&self.inner.resource, touch).await {
                    Ok(stat) => Ok(self.commit_touch(stat, version, options.reason)),
                    Err(err) => {
                        log::warn!("{}: touch failed: {err}", self.inner.resource);
                        Ok(!self.is_dirty())
                    }
                }
            }
            Step::Write {
                version,
                saved_alternative_version_id,
                content,
                options: write,
            } => {
                let result = self
                    .inner
                    .files
                    .write(&self.inner.resource, &content, write)
                    .await;
                match result {
                    Ok(stat) => {
                        let saved = self.commit_write(
                            stat,
                            version,
                            saved_alternative_version_id,
                            options.reason,
                        );
                        if saved {
                            if let Err(err) = self.inner.backups.discard(&self.inner.resource).await
                            {
                                log::warn!(
                                    "{}: discarding backup failed: {err}",
                                    self.inner.resource
                                );
                            }
                        }
                        Ok(saved)
                    }
                    Err(err) => self.handle_save_error(err, &options),
                }
            }
        }
    }

    /// Returns whether a participant ran.
    async fn run_participant(&self, options: &SaveOptions, token: &CancellationToken) -> bool {
        if options.skip_save_participants {
            return false;
        }
        let Some(participant) = self.inner.participant.clone() else {
            return false;
        };

        let ignoring = {
            let mut state = self.lock();
            std::mem::replace(&mut state.ignore_dirty_on_content_change, true)
        };
        let context = SaveContext {
            reason: options.reason,
        };
        if let Err(err) = participant.participate(self, context, token.clone()).await {
            log::warn!("{}: save participant failed: {err}", self.inner.resource);
        }
        self.lock().ignore_dirty_on_content_change = ignoring;
        true
    }

    fn commit_touch(&self, stat: FileStat, version: u64, reason: SaveReason) -> bool {
        let mut state = self.lock();
        if state.disposed {
            return false;
        }
        state.adopt_stat(stat);
        log::trace!("{}: touched at version {version}", self.inner.resource);
        self.emit(ModelEvent::Saved { reason });
        !state.dirty.is_dirty()
    }

    fn commit_write(
        &self,
        stat: FileStat,
        version: u64,
        saved_alternative_version_id: Option<u64>,
        reason: SaveReason,
    ) -> bool {
        let mut state = self.lock();
        if state.disposed {
            log::trace!("{}: write finished after dispose", self.inner.resource);
            return false;
        }

        state.adopt_stat(stat);
        if state.versions.is_current(version) {
            let was_dirty = state.dirty.is_dirty();
            let alternative_version_id = state.alternative_version_id();
            state.dirty.set_dirty(false, alternative_version_id);
            if was_dirty {
                self.emit(ModelEvent::DirtyChanged { dirty: false });
            }
        } else {
            log::trace!(
                "{}: edited while saving version {version}, staying dirty",
                self.inner.resource
            );
            state.dirty.update_saved_version(saved_alternative_version_id);
        }
        self.set_orphaned(&mut state, false);
        self.emit(ModelEvent::Saved { reason });
        !state.dirty.is_dirty()
    }

    fn handle_save_error(&self, error: FileOperationError, options: &SaveOptions) -> SaveResult {
        {
            let mut state = self.lock();
            if state.disposed {
                log::trace!("{}: write failed after dispose: {error}", self.inner.resource);
                return Ok(false);
            }
            let was_dirty = state.dirty.is_dirty();
            state
                .dirty
                .mark_save_failed(error.result() == FileOperationResult::ModifiedSince);
            if !was_dirty {
                self.emit(ModelEvent::DirtyChanged { dirty: true });
            }
            self.emit(ModelEvent::SaveError);
        }

        if options.ignore_error_handler {
            return Err(error);
        }
        let handler = Arc::clone(&self.inner.error_handler);
        handler.on_save_error(&error, self);
        Ok(false)
    }
}
