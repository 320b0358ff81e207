// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Resolving model content from a backup or from disk.

use crate::model::{Encoding, Etag, FileStat, LoadReason, ModelEvent};
use crate::store::{Backup, FileOperationError, ReadOptions, TextContent};

use super::{ModelError, ModelState, TextFileModel};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Skip the etag short-circuit and always read the file.
    pub force_read_from_disk: bool,
    pub allow_binary: bool,
    pub reason: LoadReason,
}

/// Content ready to be adopted into the model.
struct Resolved {
    value: String,
    encoding: Encoding,
    stat: Option<FileStat>,
    from_backup: bool,
    orphaned: bool,
}

impl TextFileModel {
    /// Resolves the model's content.
    ///
    /// A dirty model or one with a save in flight is left untouched: reloading would throw away
    /// edits or race the write.
    pub async fn load(&self, options: LoadOptions) -> Result<(), ModelError> {
        let resolved = {
            let state = self.lock();
            if state.disposed {
                return Err(ModelError::Disposed);
            }
            if state.dirty.is_dirty() || state.sequentializer.has_pending(None) {
                log::trace!(
                    "{}: load ignored, model is dirty or has a pending save",
                    self.inner.resource
                );
                return Ok(());
            }
            state.is_resolved()
        };

        if !resolved {
            match self.load_from_backup(options).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(err) => {
                    log::warn!(
                        "{}: backup could not be restored, reading from disk: {err}",
                        self.inner.resource
                    );
                }
            }
        }

        self.load_from_file(options).await
    }

    async fn load_from_backup(&self, options: LoadOptions) -> Result<bool, ModelError> {
        let version = self.lock().versions.current();
        let Some(backup) = self
            .inner
            .backups
            .resolve(&self.inner.resource)
            .await
            .map_err(ModelError::Backup)?
        else {
            return Ok(false);
        };

        let mut state = self.lock();
        if state.disposed || state.is_resolved() || !state.versions.is_current(version) {
            log::trace!("{}: backup discarded, model changed meanwhile", self.inner.resource);
            return Ok(state.is_resolved());
        }

        let Backup { content, meta } = backup;
        let (stat, orphaned) = match meta {
            Some(meta) => (
                Some(FileStat {
                    mtime: meta.mtime,
                    ctime: meta.ctime,
                    size: meta.size,
                    etag: meta.etag,
                    readonly: false,
                }),
                meta.orphaned,
            ),
            None => (
                Some(FileStat {
                    mtime: 0,
                    ctime: 0,
                    size: 0,
                    etag: Etag::disabled(),
                    readonly: false,
                }),
                false,
            ),
        };
        let encoding = self.effective_encoding(&state);
        self.adopt(
            &mut state,
            Resolved {
                value: content,
                encoding,
                stat,
                from_backup: true,
                orphaned,
            },
            options.reason,
        );
        Ok(true)
    }

    async fn load_from_file(&self, options: LoadOptions) -> Result<(), ModelError> {
        let (read_options, version, resolved) = {
            let state = self.lock();
            let etag = match (&state.last_resolved_stat, options.force_read_from_disk) {
                (Some(stat), false) => stat.etag.clone(),
                _ => Etag::disabled(),
            };
            let read_options = ReadOptions {
                etag,
                encoding: Some(self.effective_encoding(&state)),
                accept_text_only: !(options.allow_binary || state.is_resolved()),
            };
            (read_options, state.versions.current(), state.is_resolved())
        };

        let result = self.inner.files.read(&self.inner.resource, read_options).await;

        let mut state = self.lock();
        if state.disposed {
            log::trace!("{}: load finished after dispose", self.inner.resource);
            return Ok(());
        }

        let content = match result {
            Ok(content) => content,
            Err(err) => {
                self.set_orphaned(&mut state, matches!(err, FileOperationError::NotFound { .. }));
                return match err {
                    FileOperationError::NotModifiedSince { .. } if resolved => Ok(()),
                    FileOperationError::NotFound { .. } if resolved => Ok(()),
                    err => Err(err.into()),
                };
            }
        };

        if !state.versions.is_current(version) {
            log::trace!(
                "{}: load result discarded, model changed meanwhile",
                self.inner.resource
            );
            return Ok(());
        }

        let TextContent {
            value,
            encoding,
            stat,
        } = content;
        self.adopt(
            &mut state,
            Resolved {
                value,
                encoding,
                stat: Some(stat),
                from_backup: false,
                orphaned: false,
            },
            options.reason,
        );
        Ok(())
    }

    fn adopt(&self, state: &mut ModelState, resolved: Resolved, reason: LoadReason) {
        if let Some(stat) = resolved.stat {
            state.adopt_stat(stat);
        }
        self.set_orphaned(state, resolved.orphaned);
        self.adopt_encoding(state, resolved.encoding);

        match state.buffer.as_mut() {
            None => {
                state.buffer = Some((self.inner.buffer_factory)(&resolved.value));
                let alternative_version_id = state.alternative_version_id();
                if resolved.from_backup {
                    // Backup content was never confirmed on disk, so there is no saved version.
                    state.dirty.set_dirty(true, alternative_version_id);
                    self.emit(ModelEvent::DirtyChanged { dirty: true });
                } else {
                    state.dirty.set_dirty(false, alternative_version_id);
                }
            }
            Some(buffer) => {
                if buffer.text() != resolved.value {
                    buffer.set_content(&resolved.value);
                    let ignoring = std::mem::replace(&mut state.ignore_dirty_on_content_change, true);
                    self.on_content_changed(state);
                    state.ignore_dirty_on_content_change = ignoring;
                }
                let was_dirty = state.dirty.is_dirty();
                let alternative_version_id = state.alternative_version_id();
                state.dirty.set_dirty(false, alternative_version_id);
                if was_dirty {
                    self.emit(ModelEvent::DirtyChanged { dirty: false });
                }
            }
        }

        log::trace!("{}: loaded ({reason:?})", self.inner.resource);
        self.emit(ModelEvent::Loaded { reason });
    }

    /// Records the encoding read from disk.
    ///
    /// An explicit preference follows the content encoding since a BOM overrides it.
    fn adopt_encoding(&self, state: &mut ModelState, encoding: Encoding) {
        let before = state.preferred_encoding.or(state.content_encoding);
        state.content_encoding = Some(encoding);
        if state.preferred_encoding.is_some() {
            state.preferred_encoding = Some(encoding);
        }
        if before.is_some_and(|before| before != encoding) {
            self.emit(ModelEvent::EncodingChanged { encoding });
        }
    }
}
