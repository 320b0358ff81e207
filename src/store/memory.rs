// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! In-memory collaborators.
//!
//! `MemoryFileService` behaves like a disk (etag checks, readonly files, BOM preservation) on a
//! logical clock, and counts what it was asked to do so tests can assert on I/O, including the
//! highest number of writes that were ever in flight at once.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::broadcast;

use super::{
    change_channel, check_modified_since, check_not_modified, check_readonly, Backup, BackupStore,
    BoxFuture, FileChangeType, FileChanges, FileOperationError, FileService, ReadOptions,
    TextContent, TouchOptions, WriteOptions,
};
use crate::model::encoding;
use crate::model::{FileStat, Resource};

const CLOCK_START: u64 = 1_000;

#[derive(Debug, Clone)]
struct MemoryFile {
    bytes: Vec<u8>,
    mtime: u64,
    ctime: u64,
    readonly: bool,
}

impl MemoryFile {
    fn stat(&self) -> FileStat {
        FileStat::new(self.mtime, self.ctime, self.bytes.len() as u64).with_readonly(self.readonly)
    }
}

#[derive(Debug)]
struct MemoryState {
    files: BTreeMap<Resource, MemoryFile>,
    clock: u64,
    write_delay: Option<Duration>,
    fail_next_read: Option<io::ErrorKind>,
    fail_next_write: Option<io::ErrorKind>,
    written: Vec<(Resource, String)>,
}

impl MemoryState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn observe(&mut self, mtime: u64) {
        self.clock = self.clock.max(mtime);
    }
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicUsize,
    writes: AtomicUsize,
    touches: AtomicUsize,
    exists: AtomicUsize,
    writes_in_flight: AtomicUsize,
    max_concurrent_writes: AtomicUsize,
}

struct InFlightWrite<'a> {
    counters: &'a Counters,
}

impl<'a> InFlightWrite<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.writes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_concurrent_writes.fetch_max(now, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for InFlightWrite<'_> {
    fn drop(&mut self) {
        self.counters.writes_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MemoryFileService {
    state: Mutex<MemoryState>,
    counters: Counters,
    changes: broadcast::Sender<FileChanges>,
}

impl Default for MemoryFileService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                files: BTreeMap::new(),
                clock: CLOCK_START,
                write_delay: None,
                fail_next_read: None,
                fail_next_write: None,
                written: Vec::new(),
            }),
            counters: Counters::default(),
            changes: change_channel(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory file service lock poisoned")
    }

    /// Seeds a UTF-8 file without emitting a change notification.
    pub fn insert(&self, resource: &Resource, content: &str) -> FileStat {
        let mut state = self.lock();
        let mtime = state.tick();
        Self::put(&mut state, resource, content.as_bytes().to_vec(), mtime)
    }

    pub fn insert_with_mtime(&self, resource: &Resource, content: &str, mtime: u64) -> FileStat {
        let mut state = self.lock();
        state.observe(mtime);
        Self::put(&mut state, resource, content.as_bytes().to_vec(), mtime)
    }

    pub fn insert_bytes(&self, resource: &Resource, bytes: Vec<u8>) -> FileStat {
        let mut state = self.lock();
        let mtime = state.tick();
        Self::put(&mut state, resource, bytes, mtime)
    }

    fn put(state: &mut MemoryState, resource: &Resource, bytes: Vec<u8>, mtime: u64) -> FileStat {
        let (ctime, readonly) = state
            .files
            .get(resource)
            .map(|file| (file.ctime, file.readonly))
            .unwrap_or((mtime, false));
        let file = MemoryFile {
            bytes,
            mtime,
            ctime,
            readonly,
        };
        let stat = file.stat();
        state.files.insert(resource.clone(), file);
        stat
    }

    /// Simulates another process rewriting the file, with a notification.
    pub fn write_external(&self, resource: &Resource, content: &str, mtime: u64) -> FileStat {
        let (stat, existed) = {
            let mut state = self.lock();
            let existed = state.files.contains_key(resource);
            state.observe(mtime);
            let stat = Self::put(&mut state, resource, content.as_bytes().to_vec(), mtime);
            (stat, existed)
        };
        let kind = if existed {
            FileChangeType::Updated
        } else {
            FileChangeType::Added
        };
        self.emit(FileChanges::single(resource.clone(), kind));
        stat
    }

    /// Simulates another process deleting the file, with a notification.
    pub fn delete_external(&self, resource: &Resource) -> bool {
        let removed = self.lock().files.remove(resource).is_some();
        if removed {
            self.emit(FileChanges::single(resource.clone(), FileChangeType::Deleted));
        }
        removed
    }

    /// Removes a file silently, as if the notification got lost.
    pub fn remove_silently(&self, resource: &Resource) -> bool {
        self.lock().files.remove(resource).is_some()
    }

    pub fn set_readonly(&self, resource: &Resource, readonly: bool) {
        if let Some(file) = self.lock().files.get_mut(resource) {
            file.readonly = readonly;
        }
    }

    /// Every subsequent write sleeps this long before touching state.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        self.lock().write_delay = delay;
    }

    pub fn fail_next_read(&self, kind: io::ErrorKind) {
        self.lock().fail_next_read = Some(kind);
    }

    pub fn fail_next_write(&self, kind: io::ErrorKind) {
        self.lock().fail_next_write = Some(kind);
    }

    pub fn emit(&self, changes: FileChanges) {
        let _ = self.changes.send(changes);
    }

    pub fn content(&self, resource: &Resource) -> Option<String> {
        let state = self.lock();
        let file = state.files.get(resource)?;
        Some(encoding::decode(&file.bytes, None).0)
    }

    pub fn bytes(&self, resource: &Resource) -> Option<Vec<u8>> {
        self.lock().files.get(resource).map(|file| file.bytes.clone())
    }

    pub fn stat_of(&self, resource: &Resource) -> Option<FileStat> {
        self.lock().files.get(resource).map(MemoryFile::stat)
    }

    /// Contents of every completed write, in completion order.
    pub fn written(&self) -> Vec<String> {
        self.lock().written.iter().map(|(_, content)| content.clone()).collect()
    }

    pub fn read_count(&self) -> usize {
        self.counters.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.counters.writes.load(Ordering::SeqCst)
    }

    pub fn touch_count(&self) -> usize {
        self.counters.touches.load(Ordering::SeqCst)
    }

    pub fn exists_count(&self) -> usize {
        self.counters.exists.load(Ordering::SeqCst)
    }

    pub fn writes_in_flight(&self) -> usize {
        self.counters.writes_in_flight.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_writes(&self) -> usize {
        self.counters.max_concurrent_writes.load(Ordering::SeqCst)
    }
}

impl FileService for MemoryFileService {
    fn read<'a>(
        &'a self,
        resource: &'a Resource,
        options: ReadOptions,
    ) -> BoxFuture<'a, Result<TextContent, FileOperationError>> {
        Box::pin(async move {
            self.counters.reads.fetch_add(1, Ordering::SeqCst);
            let mut state = self.lock();
            if let Some(kind) = state.fail_next_read.take() {
                return Err(FileOperationError::io(resource, io::Error::from(kind)));
            }
            let Some(file) = state.files.get(resource) else {
                return Err(FileOperationError::NotFound {
                    resource: resource.clone(),
                });
            };
            let stat = file.stat();
            check_not_modified(resource, &options, &stat)?;
            if options.accept_text_only && encoding::looks_binary(&file.bytes) {
                return Err(FileOperationError::Binary {
                    resource: resource.clone(),
                });
            }
            let (value, encoding) = encoding::decode(&file.bytes, options.encoding);
            Ok(TextContent {
                value,
                encoding,
                stat,
            })
        })
    }

    fn write<'a>(
        &'a self,
        resource: &'a Resource,
        content: &'a str,
        options: WriteOptions,
    ) -> BoxFuture<'a, Result<FileStat, FileOperationError>> {
        Box::pin(async move {
            let _in_flight = InFlightWrite::enter(&self.counters);

            let delay = self.lock().write_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let (stat, existed) = {
                let mut state = self.lock();
                if let Some(kind) = state.fail_next_write.take() {
                    return Err(FileOperationError::io(resource, io::Error::from(kind)));
                }

                let existing = state.files.get(resource);
                if let Some(file) = existing {
                    let disk = file.stat();
                    check_readonly(resource, &options, &disk)?;
                    check_modified_since(resource, options.mtime, &options.etag, &disk)?;
                }
                let existed = existing.is_some();
                let encoding = encoding::resolve_write_encoding(
                    existing.map(|file| file.bytes.as_slice()),
                    options.encoding,
                    options.overwrite_encoding,
                );

                let mtime = state.tick();
                let stat = Self::put(&mut state, resource, encoding::encode(content, encoding), mtime);
                state.written.push((resource.clone(), content.to_owned()));
                (stat, existed)
            };

            self.counters.writes.fetch_add(1, Ordering::SeqCst);
            let kind = if existed {
                FileChangeType::Updated
            } else {
                FileChangeType::Added
            };
            self.emit(FileChanges::single(resource.clone(), kind));
            Ok(stat)
        })
    }

    fn touch<'a>(
        &'a self,
        resource: &'a Resource,
        options: TouchOptions,
    ) -> BoxFuture<'a, Result<FileStat, FileOperationError>> {
        Box::pin(async move {
            self.counters.touches.fetch_add(1, Ordering::SeqCst);
            let mut state = self.lock();
            let disk = match state.files.get(resource) {
                Some(file) => file.stat(),
                None => {
                    return Err(FileOperationError::NotFound {
                        resource: resource.clone(),
                    })
                }
            };
            check_modified_since(resource, options.mtime, &options.etag, &disk)?;

            let mtime = state.tick();
            let file = state
                .files
                .get_mut(resource)
                .ok_or_else(|| FileOperationError::NotFound {
                    resource: resource.clone(),
                })?;
            file.mtime = mtime;
            Ok(file.stat())
        })
    }

    fn stat<'a>(
        &'a self,
        resource: &'a Resource,
    ) -> BoxFuture<'a, Result<FileStat, FileOperationError>> {
        Box::pin(async move {
            self.stat_of(resource).ok_or_else(|| FileOperationError::NotFound {
                resource: resource.clone(),
            })
        })
    }

    fn exists<'a>(&'a self, resource: &'a Resource) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.counters.exists.fetch_add(1, Ordering::SeqCst);
            self.lock().files.contains_key(resource)
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<FileChanges> {
        self.changes.subscribe()
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackupStore {
    backups: Mutex<BTreeMap<Resource, Backup>>,
    resolves: AtomicUsize,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<Resource, Backup>> {
        self.backups.lock().expect("memory backup store lock poisoned")
    }

    pub fn insert(&self, resource: &Resource, backup: Backup) {
        self.lock().insert(resource.clone(), backup);
    }

    pub fn get(&self, resource: &Resource) -> Option<Backup> {
        self.lock().get(resource).cloned()
    }

    pub fn contains(&self, resource: &Resource) -> bool {
        self.lock().contains_key(resource)
    }

    pub fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

impl BackupStore for MemoryBackupStore {
    fn resolve<'a>(&'a self, resource: &'a Resource) -> BoxFuture<'a, io::Result<Option<Backup>>> {
        Box::pin(async move {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            Ok(self.get(resource))
        })
    }

    fn backup<'a>(&'a self, resource: &'a Resource, backup: Backup) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            self.insert(resource, backup);
            Ok(())
        })
    }

    fn discard<'a>(&'a self, resource: &'a Resource) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            self.lock().remove(resource);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::MemoryFileService;
    use crate::model::encoding::{self, Encoding};
    use crate::model::{Etag, Resource};
    use crate::store::{
        FileChangeType, FileOperationResult, FileService, ReadOptions, TouchOptions, WriteOptions,
    };

    fn foo() -> Resource {
        Resource::new("/w/foo.txt").unwrap()
    }

    #[tokio::test]
    async fn read_honours_etag_and_binary_checks() {
        let files = MemoryFileService::new();
        let stat = files.insert(&foo(), "hello");

        let content = files.read(&foo(), ReadOptions::default()).await.unwrap();
        assert_eq!(content.value, "hello");
        assert_eq!(content.stat, stat);

        let options = ReadOptions {
            etag: stat.etag.clone(),
            ..ReadOptions::default()
        };
        let err = files.read(&foo(), options).await.unwrap_err();
        assert_eq!(err.result(), FileOperationResult::NotModifiedSince);

        files.insert_bytes(&foo(), vec![b'a', 0, b'b']);
        let err = files.read(&foo(), ReadOptions::default()).await.unwrap_err();
        assert_eq!(err.result(), FileOperationResult::Binary);

        let options = ReadOptions {
            accept_text_only: false,
            ..ReadOptions::default()
        };
        assert!(files.read(&foo(), options).await.is_ok());
        assert_eq!(files.read_count(), 4);
    }

    #[tokio::test]
    async fn write_detects_external_modification() {
        let files = MemoryFileService::new();
        let held = files.insert_with_mtime(&foo(), "v1", 100);
        files.write_external(&foo(), "someone else", 200);

        let options = WriteOptions {
            mtime: Some(held.mtime),
            etag: held.etag.clone(),
            ..WriteOptions::default()
        };
        let err = files.write(&foo(), "mine", options.clone()).await.unwrap_err();
        assert_eq!(err.result(), FileOperationResult::ModifiedSince);
        assert_eq!(files.content(&foo()).as_deref(), Some("someone else"));

        let forced = WriteOptions {
            etag: Etag::disabled(),
            ..options
        };
        let stat = files.write(&foo(), "mine", forced).await.unwrap();
        assert!(stat.mtime > 200);
        assert_eq!(files.written(), vec!["mine".to_owned()]);
    }

    #[tokio::test]
    async fn write_respects_readonly_and_injected_failures() {
        let files = MemoryFileService::new();
        files.insert(&foo(), "x");
        files.set_readonly(&foo(), true);

        let err = files.write(&foo(), "y", WriteOptions::default()).await.unwrap_err();
        assert_eq!(err.result(), FileOperationResult::Readonly);

        let options = WriteOptions {
            overwrite_readonly: true,
            ..WriteOptions::default()
        };
        files.write(&foo(), "y", options.clone()).await.unwrap();

        files.fail_next_write(io::ErrorKind::StorageFull);
        let err = files.write(&foo(), "z", options).await.unwrap_err();
        assert_eq!(err.result(), FileOperationResult::Other);
        assert_eq!(files.content(&foo()).as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn write_preserves_bom_unless_overwriting_encoding() {
        let files = MemoryFileService::new();
        files.insert_bytes(&foo(), encoding::encode("old", Encoding::Utf8Bom));

        files.write(&foo(), "new", WriteOptions::default()).await.unwrap();
        assert_eq!(files.bytes(&foo()).unwrap(), encoding::encode("new", Encoding::Utf8Bom));

        let options = WriteOptions {
            overwrite_encoding: true,
            ..WriteOptions::default()
        };
        files.write(&foo(), "new", options).await.unwrap();
        assert_eq!(files.bytes(&foo()).unwrap(), b"new".to_vec());
    }

    #[tokio::test]
    async fn touch_bumps_mtime_only() {
        let files = MemoryFileService::new();
        let held = files.insert(&foo(), "same");
        let options = TouchOptions {
            mtime: Some(held.mtime),
            etag: held.etag.clone(),
        };
        let touched = files.touch(&foo(), options).await.unwrap();
        assert!(touched.mtime > held.mtime);
        assert_eq!(touched.size, held.size);
        assert_eq!(files.write_count(), 0);
        assert_eq!(files.touch_count(), 1);
    }

    #[tokio::test]
    async fn external_changes_are_broadcast() {
        let files = MemoryFileService::new();
        let mut rx = files.subscribe();

        files.write_external(&foo(), "a", 10);
        files.delete_external(&foo());

        let added = rx.try_recv().unwrap();
        assert!(added.contains(&foo(), FileChangeType::Added));
        let deleted = rx.try_recv().unwrap();
        assert!(deleted.contains(&foo(), FileChangeType::Deleted));
        assert!(!files.exists(&foo()).await);
    }
}
