// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Storage boundary of the text file model.
//!
//! The model talks to disk only through [`FileService`] and [`BackupStore`]. Two
//! implementations ship with the crate: [`memory`] (instrumented, used by tests and benches) and
//! [`disk`] (tokio filesystem, used by the CLI).

pub mod disk;
pub mod memory;

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tokio::sync::broadcast;

use crate::model::{Encoding, Etag, FileStat, Resource};

pub use disk::{DiskBackupStore, DiskFileService};
pub use memory::{MemoryBackupStore, MemoryFileService};

/// A boxed future that is Send.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileOperationResult {
    NotFound,
    NotModifiedSince,
    ModifiedSince,
    Binary,
    Readonly,
    Other,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FileOperationError {
    #[error("file not found: {resource}")]
    NotFound { resource: Resource },
    #[error("file not modified since: {resource}")]
    NotModifiedSince { resource: Resource },
    #[error("file changed on disk since it was last read: {resource}")]
    ModifiedSince { resource: Resource },
    #[error("file seems to be binary: {resource}")]
    Binary { resource: Resource },
    #[error("file is readonly: {resource}")]
    Readonly { resource: Resource },
    #[error("io error at {resource}: {source}")]
    Io {
        resource: Resource,
        #[source]
        source: Arc<io::Error>,
    },
}

impl FileOperationError {
    /// Maps an io error, folding `NotFound` into its dedicated variant.
    pub fn io(resource: &Resource, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return Self::NotFound {
                resource: resource.clone(),
            };
        }
        Self::Io {
            resource: resource.clone(),
            source: Arc::new(source),
        }
    }

    pub fn result(&self) -> FileOperationResult {
        match self {
            Self::NotFound { .. } => FileOperationResult::NotFound,
            Self::NotModifiedSince { .. } => FileOperationResult::NotModifiedSince,
            Self::ModifiedSince { .. } => FileOperationResult::ModifiedSince,
            Self::Binary { .. } => FileOperationResult::Binary,
            Self::Readonly { .. } => FileOperationResult::Readonly,
            Self::Io { .. } => FileOperationResult::Other,
        }
    }

    pub fn resource(&self) -> &Resource {
        match self {
            Self::NotFound { resource }
            | Self::NotModifiedSince { resource }
            | Self::ModifiedSince { resource }
            | Self::Binary { resource }
            | Self::Readonly { resource }
            | Self::Io { resource, .. } => resource,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    /// Last known etag; a matching file yields `NotModifiedSince`. Disabled forces a read.
    pub etag: Etag,
    pub encoding: Option<Encoding>,
    pub accept_text_only: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            etag: Etag::disabled(),
            encoding: None,
            accept_text_only: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextContent {
    pub value: String,
    pub encoding: Encoding,
    pub stat: FileStat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// mtime of the stat the caller last read.
    pub mtime: Option<u64>,
    pub etag: Etag,
    pub encoding: Encoding,
    pub overwrite_readonly: bool,
    pub overwrite_encoding: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            mtime: None,
            etag: Etag::disabled(),
            encoding: Encoding::Utf8,
            overwrite_readonly: false,
            overwrite_encoding: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchOptions {
    pub mtime: Option<u64>,
    pub etag: Etag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileChangeType {
    Added,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub resource: Resource,
    pub kind: FileChangeType,
}

/// A batch of change notifications as delivered by a watcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileChanges {
    changes: SmallVec<[FileChange; 4]>,
}

impl FileChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(resource: Resource, kind: FileChangeType) -> Self {
        let mut changes = Self::new();
        changes.push(resource, kind);
        changes
    }

    pub fn push(&mut self, resource: Resource, kind: FileChangeType) {
        self.changes.push(FileChange { resource, kind });
    }

    pub fn contains(&self, resource: &Resource, kind: FileChangeType) -> bool {
        self.changes
            .iter()
            .any(|change| change.kind == kind && &change.resource == resource)
    }

    pub fn affects(&self, resource: &Resource) -> bool {
        self.changes.iter().any(|change| &change.resource == resource)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileChange> {
        self.changes.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Async access to the files backing models.
pub trait FileService: Send + Sync {
    fn read<'a>(
        &'a self,
        resource: &'a Resource,
        options: ReadOptions,
    ) -> BoxFuture<'a, Result<TextContent, FileOperationError>>;

    fn write<'a>(
        &'a self,
        resource: &'a Resource,
        content: &'a str,
        options: WriteOptions,
    ) -> BoxFuture<'a, Result<FileStat, FileOperationError>>;

    /// Bumps the mtime without rewriting content.
    fn touch<'a>(
        &'a self,
        resource: &'a Resource,
        options: TouchOptions,
    ) -> BoxFuture<'a, Result<FileStat, FileOperationError>>;

    fn stat<'a>(&'a self, resource: &'a Resource)
        -> BoxFuture<'a, Result<FileStat, FileOperationError>>;

    fn exists<'a>(&'a self, resource: &'a Resource) -> BoxFuture<'a, bool>;

    /// Change notifications for all resources served by this service.
    fn subscribe(&self) -> broadcast::Receiver<FileChanges>;
}

pub(crate) fn change_channel() -> broadcast::Sender<FileChanges> {
    broadcast::channel(CHANGE_CHANNEL_CAPACITY).0
}

pub(crate) fn check_not_modified(
    resource: &Resource,
    options: &ReadOptions,
    stat: &FileStat,
) -> Result<(), FileOperationError> {
    if !options.etag.is_disabled() && options.etag == stat.etag {
        return Err(FileOperationError::NotModifiedSince {
            resource: resource.clone(),
        });
    }
    Ok(())
}

/// Rejects writes based on an outdated read.
///
/// The etag is recomputed from the caller's mtime and the *current* size: a file whose mtime
/// moved but whose size did not is treated as touched, not modified.
pub(crate) fn check_modified_since(
    resource: &Resource,
    mtime: Option<u64>,
    etag: &Etag,
    disk: &FileStat,
) -> Result<(), FileOperationError> {
    let Some(mtime) = mtime else {
        return Ok(());
    };
    if etag.is_disabled() {
        return Ok(());
    }
    if mtime < disk.mtime && *etag != Etag::from_parts(mtime, disk.size) {
        return Err(FileOperationError::ModifiedSince {
            resource: resource.clone(),
        });
    }
    Ok(())
}

pub(crate) fn check_readonly(
    resource: &Resource,
    options: &WriteOptions,
    disk: &FileStat,
) -> Result<(), FileOperationError> {
    if disk.readonly && !options.overwrite_readonly {
        return Err(FileOperationError::Readonly {
            resource: resource.clone(),
        });
    }
    Ok(())
}

/// Metadata stored alongside backup content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMeta {
    pub mtime: u64,
    pub ctime: u64,
    pub size: u64,
    pub etag: Etag,
    #[serde(default)]
    pub orphaned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub content: String,
    pub meta: Option<BackupMeta>,
}

/// Persistence for unsaved content.
pub trait BackupStore: Send + Sync {
    fn resolve<'a>(&'a self, resource: &'a Resource) -> BoxFuture<'a, io::Result<Option<Backup>>>;

    fn backup<'a>(&'a self, resource: &'a Resource, backup: Backup) -> BoxFuture<'a, io::Result<()>>;

    fn discard<'a>(&'a self, resource: &'a Resource) -> BoxFuture<'a, io::Result<()>>;
}

/// Backup store that keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBackupStore;

impl BackupStore for NoBackupStore {
    fn resolve<'a>(&'a self, _resource: &'a Resource) -> BoxFuture<'a, io::Result<Option<Backup>>> {
        Box::pin(async { Ok(None) })
    }

    fn backup<'a>(&'a self, _resource: &'a Resource, _backup: Backup) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn discard<'a>(&'a self, _resource: &'a Resource) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::{check_modified_since, check_not_modified, FileChangeType, FileChanges, ReadOptions};
    use crate::model::{Etag, FileStat, Resource};
    use crate::store::FileOperationResult;

    fn foo() -> Resource {
        Resource::new("/w/foo.txt").unwrap()
    }

    #[test]
    fn not_modified_only_with_matching_enabled_etag() {
        let stat = FileStat::new(100, 1, 5);
        let mut options = ReadOptions::default();
        assert!(check_not_modified(&foo(), &options, &stat).is_ok());

        options.etag = stat.etag.clone();
        let err = check_not_modified(&foo(), &options, &stat).unwrap_err();
        assert_eq!(err.result(), FileOperationResult::NotModifiedSince);
    }

    #[test]
    fn modified_since_requires_newer_mtime_and_different_etag() {
        let held = FileStat::new(100, 1, 5);

        let rewritten = FileStat::new(200, 1, 9);
        let err = check_modified_since(&foo(), Some(held.mtime), &held.etag, &rewritten).unwrap_err();
        assert_eq!(err.result(), FileOperationResult::ModifiedSince);

        let touched = FileStat::new(200, 1, 5);
        assert!(check_modified_since(&foo(), Some(held.mtime), &held.etag, &touched).is_ok());

        assert!(check_modified_since(&foo(), Some(held.mtime), &Etag::disabled(), &rewritten).is_ok());
        assert!(check_modified_since(&foo(), None, &held.etag, &rewritten).is_ok());
    }

    #[test]
    fn changes_match_by_resource_and_kind() {
        let changes = FileChanges::single(foo(), FileChangeType::Deleted);
        assert!(changes.contains(&foo(), FileChangeType::Deleted));
        assert!(!changes.contains(&foo(), FileChangeType::Added));
        assert!(changes.affects(&foo()));
        assert!(!changes.affects(&Resource::new("/w/bar.txt").unwrap()));
    }
}
