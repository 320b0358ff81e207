// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Filesystem-backed collaborators.
//!
//! Writes go through a temp file in the target directory that is renamed into place, so a reader
//! never observes a half-written file. There is no OS watcher: the change stream carries this
//! service's own writes plus anything a host forwards through [`DiskFileService::notify`].

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::broadcast;

use super::{
    change_channel, check_modified_since, check_not_modified, check_readonly, Backup, BackupMeta,
    BackupStore, BoxFuture, FileChangeType, FileChanges, FileOperationError, FileService,
    ReadOptions, TextContent, TouchOptions, WriteOptions,
};
use crate::config::WriteDurability;
use crate::model::encoding;
use crate::model::{FileStat, Resource};

const TMP_PREFIX: &str = ".proteus.tmp";

fn millis(time: io::Result<SystemTime>) -> Option<u64> {
    let time = time.ok()?;
    let since = time.duration_since(UNIX_EPOCH).ok()?;
    u64::try_from(since.as_millis()).ok()
}

fn stat_from_metadata(metadata: &std::fs::Metadata) -> FileStat {
    let mtime = millis(metadata.modified()).unwrap_or_default();
    let ctime = millis(metadata.created()).unwrap_or(mtime);
    FileStat::new(mtime, ctime, metadata.len()).with_readonly(metadata.permissions().readonly())
}

/// Reads at most `len` leading bytes.
async fn read_head(path: &Path, len: usize) -> io::Result<Vec<u8>> {
    let file = fs::File::open(path).await?;
    let mut head = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut head).await?;
    Ok(head)
}

async fn rename_overwrite(from: &Path, to: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        match fs::rename(from, to).await {
            Ok(()) => Ok(()),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::AlreadyExists | io::ErrorKind::PermissionDenied
                ) =>
            {
                let _ = fs::remove_file(to).await;
                fs::rename(from, to).await
            }
            Err(err) => Err(err),
        }
    }

    #[cfg(not(windows))]
    {
        fs::rename(from, to).await
    }
}

/// Writes `contents` to a sibling temp file and renames it over `path`.
pub(crate) async fn write_atomic(
    path: &Path,
    contents: &[u8],
    durability: WriteDurability,
) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Err(io::Error::other("path has no parent"));
    };
    let Some(file_name) = path.file_name() else {
        return Err(io::Error::other("path has no file name"));
    };

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let tmp_path = parent.join(format!(
        "{TMP_PREFIX}.{}.{}",
        file_name.to_string_lossy(),
        nanos
    ));

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp_path)
        .await?;
    let written = async {
        file.write_all(contents).await?;
        file.flush().await?;
        if durability == WriteDurability::Durable {
            file.sync_all().await?;
        }
        Ok::<_, io::Error>(())
    }
    .await;
    drop(file);
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err);
    }

    if let Err(err) = rename_overwrite(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err);
    }

    if durability == WriteDurability::Durable {
        #[cfg(unix)]
        {
            let dir = fs::File::open(parent).await?;
            dir.sync_all().await?;
        }
    }

    Ok(())
}

#[derive(Debug)]
pub struct DiskFileService {
    durability: WriteDurability,
    changes: broadcast::Sender<FileChanges>,
}

impl Default for DiskFileService {
    fn default() -> Self {
        Self::new(WriteDurability::default())
    }
}

impl DiskFileService {
    pub fn new(durability: WriteDurability) -> Self {
        Self {
            durability,
            changes: change_channel(),
        }
    }

    pub fn durability(&self) -> WriteDurability {
        self.durability
    }

    /// Forwards notifications observed by a host watcher.
    pub fn notify(&self, changes: FileChanges) {
        let _ = self.changes.send(changes);
    }

    async fn metadata(resource: &Resource) -> Result<Option<FileStat>, FileOperationError> {
        match fs::metadata(resource.as_path()).await {
            Ok(metadata) => Ok(Some(stat_from_metadata(&metadata))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(FileOperationError::io(resource, err)),
        }
    }
}

impl FileService for DiskFileService {
    fn read<'a>(
        &'a self,
        resource: &'a Resource,
        options: ReadOptions,
    ) -> BoxFuture<'a, Result<TextContent, FileOperationError>> {
        Box::pin(async move {
            let stat = Self::metadata(resource)
                .await?
                .ok_or_else(|| FileOperationError::NotFound {
                    resource: resource.clone(),
                })?;
            check_not_modified(resource, &options, &stat)?;

            let bytes = fs::read(resource.as_path())
                .await
                .map_err(|err| FileOperationError::io(resource, err))?;
            if options.accept_text_only && encoding::looks_binary(&bytes) {
                return Err(FileOperationError::Binary {
                    resource: resource.clone(),
                });
            }
            let (value, encoding) = encoding::decode(&bytes, options.encoding);
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
            let path = resource.as_path();
            let disk = Self::metadata(resource).await?;
            let existing = match &disk {
                Some(disk) => {
                    check_readonly(resource, &options, disk)?;
                    check_modified_since(resource, options.mtime, &options.etag, disk)?;
                    Some(
                        read_head(path, encoding::BOM_MAX_LEN)
                            .await
                            .map_err(|err| FileOperationError::io(resource, err))?,
                    )
                }
                None => None,
            };

            let encoding = encoding::resolve_write_encoding(
                existing.as_deref(),
                options.encoding,
                options.overwrite_encoding,
            );
            let bytes = encoding::encode(content, encoding);
            write_atomic(path, &bytes, self.durability)
                .await
                .map_err(|err| FileOperationError::io(resource, err))?;

            let stat = Self::metadata(resource)
                .await?
                .ok_or_else(|| FileOperationError::NotFound {
                    resource: resource.clone(),
                })?;
            let kind = if disk.is_some() {
                FileChangeType::Updated
            } else {
                FileChangeType::Added
            };
            self.notify(FileChanges::single(resource.clone(), kind));
            Ok(stat)
        })
    }

    fn touch<'a>(
        &'a self,
        resource: &'a Resource,
        options: TouchOptions,
    ) -> BoxFuture<'a, Result<FileStat, FileOperationError>> {
        Box::pin(async move {
            let disk = Self::metadata(resource)
                .await?
                .ok_or_else(|| FileOperationError::NotFound {
                    resource: resource.clone(),
                })?;
            check_modified_since(resource, options.mtime, &options.etag, &disk)?;

            let file = fs::OpenOptions::new()
                .append(true)
                .open(resource.as_path())
                .await
                .map_err(|err| FileOperationError::io(resource, err))?;
            let file = file.into_std().await;
            tokio::task::spawn_blocking(move || file.set_modified(SystemTime::now()))
                .await
                .map_err(|err| FileOperationError::io(resource, io::Error::other(err)))?
                .map_err(|err| FileOperationError::io(resource, err))?;

            Self::metadata(resource)
                .await?
                .ok_or_else(|| FileOperationError::NotFound {
                    resource: resource.clone(),
                })
        })
    }

    fn stat<'a>(
        &'a self,
        resource: &'a Resource,
    ) -> BoxFuture<'a, Result<FileStat, FileOperationError>> {
        Box::pin(async move {
            Self::metadata(resource)
                .await?
                .ok_or_else(|| FileOperationError::NotFound {
                    resource: resource.clone(),
                })
        })
    }

    fn exists<'a>(&'a self, resource: &'a Resource) -> BoxFuture<'a, bool> {
        Box::pin(async move { fs::metadata(resource.as_path()).await.is_ok() })
    }

    fn subscribe(&self) -> broadcast::Receiver<FileChanges> {
        self.changes.subscribe()
    }
}

/// Backups as one file per resource inside a directory.
///
/// The file name is the base64url-encoded resource; the first line holds the JSON metadata
/// (`null` when there is none) and the rest is the content verbatim.
#[derive(Debug, Clone)]
pub struct DiskBackupStore {
    dir: PathBuf,
    durability: WriteDurability,
}

impl DiskBackupStore {
    pub fn new(dir: impl Into<PathBuf>, durability: WriteDurability) -> Self {
        Self {
            dir: dir.into(),
            durability,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn backup_path(&self, resource: &Resource) -> PathBuf {
        let name = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(resource.as_str());
        self.dir.join(name)
    }
}

fn parse_backup(raw: &str) -> io::Result<Backup> {
    let (header, content) = raw.split_once('\n').unwrap_or((raw, ""));
    let meta: Option<BackupMeta> = serde_json::from_str(header)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    Ok(Backup {
        content: content.to_owned(),
        meta,
    })
}

fn render_backup(backup: &Backup) -> io::Result<String> {
    let header = serde_json::to_string(&backup.meta)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    let mut out = String::with_capacity(header.len() + 1 + backup.content.len());
    out.push_str(&header);
    out.push('\n');
    out.push_str(&backup.content);
    Ok(out)
}

impl BackupStore for DiskBackupStore {
    fn resolve<'a>(&'a self, resource: &'a Resource) -> BoxFuture<'a, io::Result<Option<Backup>>> {
        Box::pin(async move {
            match fs::read_to_string(self.backup_path(resource)).await {
                Ok(raw) => parse_backup(&raw).map(Some),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(err),
            }
        })
    }

    fn backup<'a>(&'a self, resource: &'a Resource, backup: Backup) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            fs::create_dir_all(&self.dir).await?;
            let raw = render_backup(&backup)?;
            write_atomic(&self.backup_path(resource), raw.as_bytes(), self.durability).await
        })
    }

    fn discard<'a>(&'a self, resource: &'a Resource) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            match fs::remove_file(self.backup_path(resource)).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{read_head, DiskBackupStore, DiskFileService, TMP_PREFIX};
    use crate::config::WriteDurability;
    use crate::model::{Etag, Resource};
    use crate::store::{
        Backup, BackupMeta, BackupStore, FileOperationResult, FileService, ReadOptions,
        WriteOptions,
    };

    static TEMP_DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

    struct TempDir {
        path: PathBuf,
    }

    impl TempDir {
        fn new() -> Self {
            let n = TEMP_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "proteus-disk-test-{}-{}",
                std::process::id(),
                n
            ));
            let _ = std::fs::remove_dir_all(&path);
            std::fs::create_dir_all(&path).unwrap();
            Self { path }
        }

        fn path(&self) -> &Path {
            &self.path
        }

        fn resource(&self, name: &str) -> Resource {
            Resource::from_path(&self.path.join(name)).unwrap()
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trips_through_disk() {
        let dir = TempDir::new();
        let resource = dir.resource("a.txt");
        let files = DiskFileService::new(WriteDurability::Durable);

        let stat = files
            .write(&resource, "hello disk", WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(stat.size, 10);

        let content = files.read(&resource, ReadOptions::default()).await.unwrap();
        assert_eq!(content.value, "hello disk");
        assert_eq!(content.stat.etag, stat.etag);

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(TMP_PREFIX))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn missing_file_reports_not_found() {
        let dir = TempDir::new();
        let resource = dir.resource("missing.txt");
        let files = DiskFileService::default();

        let err = files.read(&resource, ReadOptions::default()).await.unwrap_err();
        assert_eq!(err.result(), FileOperationResult::NotFound);
        assert!(!files.exists(&resource).await);
    }

    #[tokio::test]
    async fn stale_etag_on_write_is_rejected() {
        let dir = TempDir::new();
        let resource = dir.resource("b.txt");
        let files = DiskFileService::default();
        files
            .write(&resource, "first", WriteOptions::default())
            .await
            .unwrap();

        let options = WriteOptions {
            mtime: Some(0),
            etag: Etag::from_parts(0, 1),
            ..WriteOptions::default()
        };
        let err = files.write(&resource, "second", options).await.unwrap_err();
        assert_eq!(err.result(), FileOperationResult::ModifiedSince);
        assert_eq!(std::fs::read_to_string(resource.as_path()).unwrap(), "first");
    }

    #[tokio::test]
    async fn write_keeps_existing_utf8_bom_from_file_head() {
        let dir = TempDir::new();
        let resource = dir.resource("bom.txt");
        let mut seeded = vec![0xEF, 0xBB, 0xBF];
        seeded.extend(std::iter::repeat(b'x').take(4096));
        std::fs::write(resource.as_path(), &seeded).unwrap();

        let head = read_head(resource.as_path(), 3).await.unwrap();
        assert_eq!(head, vec![0xEF, 0xBB, 0xBF]);

        let files = DiskFileService::default();
        files
            .write(&resource, "short", WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(resource.as_path()).unwrap(),
            b"\xEF\xBB\xBFshort".to_vec()
        );
    }

    #[tokio::test]
    async fn backups_persist_meta_and_content() {
        let dir = TempDir::new();
        let store = DiskBackupStore::new(dir.path().join("backups"), WriteDurability::BestEffort);
        let resource = dir.resource("c.txt");

        assert_eq!(store.resolve(&resource).await.unwrap(), None);

        let backup = Backup {
            content: "line one\nline two".to_owned(),
            meta: Some(BackupMeta {
                mtime: 5,
                ctime: 1,
                size: 3,
                etag: Etag::from_parts(5, 3),
                orphaned: false,
            }),
        };
        store.backup(&resource, backup.clone()).await.unwrap();
        assert_eq!(store.resolve(&resource).await.unwrap(), Some(backup));

        store.discard(&resource).await.unwrap();
        assert_eq!(store.resolve(&resource).await.unwrap(), None);
        store.discard(&resource).await.unwrap();
    }
}
