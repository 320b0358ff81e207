// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! The text file model.
//!
//! A [`TextFileModel`] is a cheap, cloneable handle to one open file. All state lives behind a
//! single mutex that is never held across an `.await`, so every transition is one synchronous
//! critical section and the only interleavings are at awaited collaborator calls. Work started
//! in the background (queued saves, orphan checks, auto-save) re-checks the disposed flag and the
//! version id before committing anything.
//!
//! The lifecycle is split over submodules: [`load`], [`save`] and [`orphan`] each add their
//! operations to the model; [`sequentializer`] holds the save queue.

pub mod load;
pub mod orphan;
pub mod save;
pub mod sequentializer;


use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use crate::config::Settings;
use crate::model::{
    default_buffer_factory, BufferFactory, ContentChange, DirtyState, DirtyStatus, EditError,
    Encoding, FileStat, ModelEvent, ModelEvents, Resource, SaveReason, TextBuffer, TextEdit,
    VersionTracker,
};
use crate::store::{Backup, BackupMeta, BackupStore, FileOperationError, FileService, NoBackupStore};

pub use load::LoadOptions;
pub use orphan::{OrphanDetector, OrphanSignal};
pub use save::{
    LoggingSaveErrorHandler, SaveContext, SaveErrorHandler, SaveOptions, SaveParticipant,
};
pub use sequentializer::{
    CancellationSource, CancellationToken, Completion, CompletionSource, NextSave,
    SaveSequentializer, SaveResult,
};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error(transparent)]
    File(#[from] FileOperationError),
    #[error("backup store failed: {0}")]
    Backup(#[source] io::Error),
    #[error("model is disposed")]
    Disposed,
    #[error("model is not resolved")]
    NotResolved,
    #[error("cannot reopen a dirty model with another encoding")]
    DirtyReopen,
    #[error(transparent)]
    Edit(#[from] EditError),
}

/// States a model can be asked about with [`TextFileModel::has_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelStateKind {
    Saved,
    Dirty,
    PendingSave,
    Conflict,
    Orphan,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingMode {
    /// Save the current content with the new encoding.
    Encode,
    /// Re-read the file from disk with the new encoding.
    Decode,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RevertOptions {
    /// Only reset the flags, keep the buffer as it is.
    pub soft: bool,
}

pub(crate) struct ModelState {
    pub(crate) buffer: Option<Box<dyn TextBuffer>>,
    pub(crate) versions: VersionTracker,
    pub(crate) dirty: DirtyState,
    pub(crate) orphaned: bool,
    pub(crate) ignore_dirty_on_content_change: bool,
    pub(crate) last_resolved_stat: Option<FileStat>,
    pub(crate) preferred_encoding: Option<Encoding>,
    pub(crate) content_encoding: Option<Encoding>,
    pub(crate) last_save_attempt: Option<SystemTime>,
    pub(crate) sequentializer: SaveSequentializer,
    pub(crate) auto_save_generation: u64,
    pub(crate) disposed: bool,
}

impl ModelState {
    fn new(preferred_encoding: Option<Encoding>) -> Self {
        Self {
            buffer: None,
            versions: VersionTracker::new(),
            dirty: DirtyState::new(),
            orphaned: false,
            ignore_dirty_on_content_change: false,
            last_resolved_stat: None,
            preferred_encoding,
            content_encoding: None,
            last_save_attempt: None,
            sequentializer: SaveSequentializer::new(),
            auto_save_generation: 0,
            disposed: false,
        }
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.buffer.is_some()
    }

    pub(crate) fn alternative_version_id(&self) -> Option<u64> {
        self.buffer.as_ref().map(|buffer| buffer.alternative_version_id())
    }

    pub(crate) fn adopt_stat(&mut self, stat: FileStat) {
        if FileStat::should_adopt(self.last_resolved_stat.as_ref(), &stat) {
            self.last_resolved_stat = Some(stat);
        }
    }
}

pub(crate) struct ModelInner {
    pub(crate) resource: Resource,
    pub(crate) files: Arc<dyn FileService>,
    pub(crate) backups: Arc<dyn BackupStore>,
    pub(crate) settings: Arc<Settings>,
    pub(crate) participant: Option<Arc<dyn SaveParticipant>>,
    pub(crate) error_handler: Arc<dyn SaveErrorHandler>,
    pub(crate) buffer_factory: BufferFactory,
    pub(crate) orphan_detector: OrphanDetector,
    pub(crate) events: ModelEvents,
    pub(crate) state: Mutex<ModelState>,
}

/// Handle to one open text file.
#[derive(Clone)]
pub struct TextFileModel {
    pub(crate) inner: Arc<ModelInner>,
}

impl fmt::Debug for TextFileModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextFileModel")
            .field("resource", &self.inner.resource)
            .finish_non_exhaustive()
    }
}

pub struct TextFileModelBuilder {
    resource: Resource,
    files: Arc<dyn FileService>,
    backups: Arc<dyn BackupStore>,
    settings: Arc<Settings>,
    participant: Option<Arc<dyn SaveParticipant>>,
    error_handler: Arc<dyn SaveErrorHandler>,
    buffer_factory: BufferFactory,
    preferred_encoding: Option<Encoding>,
}

impl TextFileModelBuilder {
    pub fn backups(mut self, backups: Arc<dyn BackupStore>) -> Self {
        self.backups = backups;
        self
    }

    pub fn settings(mut self, settings: Arc<Settings>) -> Self {
        self.settings = settings;
        self
    }

    pub fn save_participant(mut self, participant: Arc<dyn SaveParticipant>) -> Self {
        self.participant = Some(participant);
        self
    }

    pub fn save_error_handler(mut self, handler: Arc<dyn SaveErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    pub fn buffer_factory(mut self, factory: BufferFactory) -> Self {
        self.buffer_factory = factory;
        self
    }

    pub fn preferred_encoding(mut self, encoding: Encoding) -> Self {
        self.preferred_encoding = Some(encoding);
        self
    }

    pub fn build(self) -> TextFileModel {
        let orphan_detector = OrphanDetector::new(self.settings.orphan_settle());
        TextFileModel {
            inner: Arc::new(ModelInner {
                resource: self.resource,
                files: self.files,
                backups: self.backups,
                settings: self.settings,
                participant: self.participant,
                error_handler: self.error_handler,
                buffer_factory: self.buffer_factory,
                orphan_detector,
                events: ModelEvents::new(),
                state: Mutex::new(ModelState::new(self.preferred_encoding)),
            }),
        }
    }
}

impl TextFileModel {
    pub fn builder(resource: Resource, files: Arc<dyn FileService>) -> TextFileModelBuilder {
        TextFileModelBuilder {
            resource,
            files,
            backups: Arc::new(NoBackupStore),
            settings: Arc::new(Settings::default()),
            participant: None,
            error_handler: Arc::new(LoggingSaveErrorHandler),
            buffer_factory: default_buffer_factory(),
            preferred_encoding: None,
        }
    }

    pub fn new(
        resource: Resource,
        files: Arc<dyn FileService>,
        backups: Arc<dyn BackupStore>,
        settings: Arc<Settings>,
    ) -> Self {
        Self::builder(resource, files)
            .backups(backups)
            .settings(settings)
            .build()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ModelState> {
        self.inner.state.lock().expect("text file model lock poisoned")
    }

    pub(crate) fn emit(&self, event: ModelEvent) {
        self.inner.events.emit(event);
    }

    pub fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    /// Whether both handles refer to the same model.
    pub fn same_model(&self, other: &TextFileModel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ModelEvent> {
        self.inner.events.subscribe()
    }

    pub fn version_id(&self) -> u64 {
        self.lock().versions.current()
    }

    pub fn alternative_version_id(&self) -> Option<u64> {
        self.lock().alternative_version_id()
    }

    pub fn buffer_saved_version_id(&self) -> Option<u64> {
        self.lock().dirty.buffer_saved_version_id()
    }

    pub fn text(&self) -> Option<String> {
        self.lock().buffer.as_ref().map(|buffer| buffer.text())
    }

    pub fn is_resolved(&self) -> bool {
        self.lock().is_resolved()
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty.is_dirty()
    }

    pub fn status(&self) -> DirtyStatus {
        self.lock().dirty.status()
    }

    pub fn in_conflict_mode(&self) -> bool {
        self.lock().dirty.in_conflict_mode()
    }

    pub fn in_error_mode(&self) -> bool {
        self.lock().dirty.in_error_mode()
    }

    pub fn is_orphaned(&self) -> bool {
        self.lock().orphaned
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.settings.is_readonly(&self.inner.resource)
    }

    pub fn last_resolved_stat(&self) -> Option<FileStat> {
        self.lock().last_resolved_stat.clone()
    }

    pub fn last_save_attempt(&self) -> Option<SystemTime> {
        self.lock().last_save_attempt
    }

    pub fn preferred_encoding(&self) -> Option<Encoding> {
        self.lock().preferred_encoding
    }

    pub fn content_encoding(&self) -> Option<Encoding> {
        self.lock().content_encoding
    }

    /// Encoding used for the next write.
    pub fn encoding(&self) -> Encoding {
        let state = self.lock();
        self.effective_encoding(&state)
    }

    pub(crate) fn effective_encoding(&self, state: &ModelState) -> Encoding {
        state
            .preferred_encoding
            .or(state.content_encoding)
            .unwrap_or_else(|| self.inner.settings.default_encoding())
    }

    pub fn has_state(&self, kind: ModelStateKind) -> bool {
        let state = self.lock();
        match kind {
            ModelStateKind::Saved => !state.dirty.is_dirty(),
            ModelStateKind::Dirty => state.dirty.is_dirty(),
            ModelStateKind::PendingSave => state.sequentializer.has_pending(None),
            ModelStateKind::Conflict => state.dirty.in_conflict_mode(),
            ModelStateKind::Orphan => state.orphaned,
            ModelStateKind::Error => state.dirty.in_error_mode(),
        }
    }

    /// Waits for the save currently in flight, if any.
    pub async fn join_pending_save(&self) {
        let pending = self.lock().sequentializer.pending_completion(None);
        if let Some(completion) = pending {
            let _ = completion.await;
        }
    }

    pub fn apply_edit(&self, edit: &TextEdit) -> Result<u64, ModelError> {
        self.mutate_buffer(|buffer| buffer.apply(edit).map(|()| true).map_err(ModelError::from))
            .map(|_| self.version_id())
    }

    pub fn set_content(&self, text: &str) -> Result<u64, ModelError> {
        self.mutate_buffer(|buffer| {
            buffer.set_content(text);
            Ok(true)
        })
        .map(|_| self.version_id())
    }

    /// Returns `false` when there was nothing to undo.
    pub fn undo(&self) -> Result<bool, ModelError> {
        self.mutate_buffer(|buffer| Ok(buffer.undo()))
    }

    /// Returns `false` when there was nothing to redo.
    pub fn redo(&self) -> Result<bool, ModelError> {
        self.mutate_buffer(|buffer| Ok(buffer.redo()))
    }

    pub fn push_undo_checkpoint(&self) {
        if let Some(buffer) = self.lock().buffer.as_mut() {
            buffer.push_undo_checkpoint();
        }
    }

    fn mutate_buffer(
        &self,
        mutate: impl FnOnce(&mut dyn TextBuffer) -> Result<bool, ModelError>,
    ) -> Result<bool, ModelError> {
        let mut state = self.lock();
        if state.disposed {
            return Err(ModelError::Disposed);
        }
        let Some(buffer) = state.buffer.as_mut() else {
            return Err(ModelError::NotResolved);
        };
        let changed = mutate(buffer.as_mut())?;
        if changed {
            self.on_content_changed(&mut state);
        }
        Ok(changed)
    }

    /// Bookkeeping for one observed buffer mutation.
    pub(crate) fn on_content_changed(&self, state: &mut ModelState) {
        let version_id = state.versions.bump();
        self.emit(ModelEvent::ContentChanged { version_id });

        let Some(alternative_version_id) = state.alternative_version_id() else {
            return;
        };
        let suppressed = state.ignore_dirty_on_content_change || self.is_readonly();
        match state.dirty.on_content_changed(alternative_version_id, suppressed) {
            ContentChange::RevertedToSaved { was_dirty: true } => {
                log::trace!("{}: undo reached saved version", self.inner.resource);
                self.emit(ModelEvent::DirtyChanged { dirty: false });
                self.emit(ModelEvent::Reverted);
            }
            ContentChange::BecameDirty { was_dirty: false } => {
                self.emit(ModelEvent::DirtyChanged { dirty: true });
            }
            _ => {}
        }

        if !suppressed && state.dirty.is_dirty() && !state.dirty.in_conflict_mode() {
            self.schedule_auto_save(state);
        }
    }

    /// Marks the model dirty or clean without touching the buffer.
    pub fn set_dirty(&self, dirty: bool) {
        let mut state = self.lock();
        if state.disposed {
            return;
        }
        let was_dirty = state.dirty.is_dirty();
        let alternative_version_id = state.alternative_version_id();
        state.dirty.set_dirty(dirty, alternative_version_id);
        if was_dirty != dirty {
            self.emit(ModelEvent::DirtyChanged { dirty });
        }
    }

    pub(crate) fn set_orphaned(&self, state: &mut ModelState, orphaned: bool) {
        if state.orphaned != orphaned {
            state.orphaned = orphaned;
            self.emit(ModelEvent::OrphanChanged { orphaned });
        }
    }

    fn schedule_auto_save(&self, state: &mut ModelState) {
        let Some(delay) = self.inner.settings.auto_save_delay() else {
            return;
        };
        state.auto_save_generation += 1;
        let generation = state.auto_save_generation;
        let version = state.versions.current();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::debug!("{}: no runtime, auto-save skipped", self.inner.resource);
            return;
        };
        let model = self.clone();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let due = {
                let state = model.lock();
                !state.disposed
                    && state.auto_save_generation == generation
                    && state.versions.is_current(version)
                    && state.dirty.is_dirty()
            };
            if !due {
                return;
            }
            let options = SaveOptions {
                reason: SaveReason::Auto,
                ..SaveOptions::default()
            };
            if let Err(err) = model.save(options).await {
                log::warn!("{}: auto-save failed: {err}", model.inner.resource);
            }
        });
    }

    /// Discards unsaved changes.
    ///
    /// Returns `false` for a model that was never resolved.
    pub async fn revert(&self, options: RevertOptions) -> Result<bool, ModelError> {
        let (was_dirty, snapshot) = {
            let mut state = self.lock();
            if state.disposed || !state.is_resolved() {
                return Ok(false);
            }
            state.auto_save_generation += 1;
            let was_dirty = state.dirty.is_dirty();
            let alternative_version_id = state.alternative_version_id();
            (was_dirty, state.dirty.set_dirty(false, alternative_version_id))
        };

        if !options.soft {
            let reload = LoadOptions {
                force_read_from_disk: true,
                ..LoadOptions::default()
            };
            match self.load(reload).await {
                Ok(()) => {}
                Err(ModelError::File(FileOperationError::NotFound { .. })) => {}
                Err(err) => {
                    self.lock().dirty.restore(snapshot);
                    return Err(err);
                }
            }
        }

        if let Err(err) = self.inner.backups.discard(&self.inner.resource).await {
            log::warn!("{}: discarding backup failed: {err}", self.inner.resource);
        }

        self.emit(ModelEvent::Reverted);
        if was_dirty {
            self.emit(ModelEvent::DirtyChanged { dirty: false });
        }
        Ok(true)
    }

    /// Persists the current content to the backup store.
    pub async fn backup(&self) -> Result<(), ModelError> {
        let backup = {
            let state = self.lock();
            let Some(buffer) = state.buffer.as_ref() else {
                return Err(ModelError::NotResolved);
            };
            Backup {
                content: buffer.text(),
                meta: state.last_resolved_stat.as_ref().map(|stat| BackupMeta {
                    mtime: stat.mtime,
                    ctime: stat.ctime,
                    size: stat.size,
                    etag: stat.etag.clone(),
                    orphaned: state.orphaned,
                }),
            }
        };
        self.inner
            .backups
            .backup(&self.inner.resource, backup)
            .await
            .map_err(ModelError::Backup)
    }

    /// Changes the encoding, either by saving with it or by re-reading the file with it.
    pub async fn set_encoding(&self, encoding: Encoding, mode: EncodingMode) -> Result<(), ModelError> {
        match mode {
            EncodingMode::Encode => {
                let in_conflict = {
                    let mut state = self.lock();
                    if state.disposed {
                        return Err(ModelError::Disposed);
                    }
                    if self.effective_encoding(&state) == encoding {
                        return Ok(());
                    }
                    state.preferred_encoding = Some(encoding);
                    self.emit(ModelEvent::EncodingChanged { encoding });

                    if !state.dirty.is_dirty() {
                        state.versions.bump();
                        let alternative_version_id = state.alternative_version_id();
                        state.dirty.set_dirty(true, alternative_version_id);
                        self.emit(ModelEvent::DirtyChanged { dirty: true });
                    }
                    state.dirty.in_conflict_mode()
                };

                if !in_conflict {
                    let options = SaveOptions {
                        overwrite_encoding: true,
                        ..SaveOptions::default()
                    };
                    self.save(options).await?;
                }
                Ok(())
            }
            EncodingMode::Decode => {
                {
                    let mut state = self.lock();
                    if state.disposed {
                        return Err(ModelError::Disposed);
                    }
                    if self.effective_encoding(&state) == encoding {
                        return Ok(());
                    }
                    if state.dirty.is_dirty() {
                        return Err(ModelError::DirtyReopen);
                    }
                    state.preferred_encoding = Some(encoding);
                    self.emit(ModelEvent::EncodingChanged { encoding });
                }

                let reload = LoadOptions {
                    force_read_from_disk: true,
                    ..LoadOptions::default()
                };
                self.load(reload).await
            }
        }
    }

    /// Stops all future commits. In-flight writes finish but their results are dropped.
    pub fn dispose(&self) {
        let mut state = self.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.auto_save_generation += 1;
        state.sequentializer.cancel_pending();
        log::trace!("{}: disposed", self.inner.resource);
        self.emit(ModelEvent::Disposed);
    }
}
