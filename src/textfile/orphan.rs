// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Orphan detection from file change notifications.
//!
//! Some filesystems report a delete followed by a re-create for what is really an in-place
//! update. A delete therefore only orphans the model if the file is still gone after a short
//! settle delay; a re-create un-orphans immediately.

use std::time::Duration;

use crate::model::Resource;
use crate::store::{FileChangeType, FileChanges, FileService};

use super::TextFileModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanSignal {
    /// The file was reported deleted; confirm after settling.
    Deleted,
    /// The file was reported added while orphaned.
    Added,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrphanDetector {
    settle: Duration,
}

impl OrphanDetector {
    pub fn new(settle: Duration) -> Self {
        Self { settle }
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }

    pub fn signal(
        &self,
        changes: &FileChanges,
        resource: &Resource,
        orphaned: bool,
    ) -> Option<OrphanSignal> {
        if !orphaned && changes.contains(resource, FileChangeType::Deleted) {
            Some(OrphanSignal::Deleted)
        } else if orphaned && changes.contains(resource, FileChangeType::Added) {
            Some(OrphanSignal::Added)
        } else {
            None
        }
    }

    /// Waits out the settle delay and reports whether the file is really gone.
    ///
    /// A model disposed in the meantime is reported orphaned without asking the file service.
    pub async fn confirm_deleted(
        &self,
        files: &dyn FileService,
        resource: &Resource,
        is_disposed: impl Fn() -> bool,
    ) -> bool {
        tokio::time::sleep(self.settle).await;
        if is_disposed() {
            return true;
        }
        !files.exists(resource).await
    }
}

impl TextFileModel {
    /// Applies add/delete notifications for this model's resource.
    pub async fn handle_file_changes(&self, changes: &FileChanges) {
        let signal = {
            let state = self.lock();
            if state.disposed {
                return;
            }
            self.inner
                .orphan_detector
                .signal(changes, &self.inner.resource, state.orphaned)
        };

        match signal {
            None => {}
            Some(OrphanSignal::Added) => {
                let mut state = self.lock();
                if !state.disposed {
                    self.set_orphaned(&mut state, false);
                }
            }
            Some(OrphanSignal::Deleted) => {
                let orphaned = self
                    .inner
                    .orphan_detector
                    .confirm_deleted(self.inner.files.as_ref(), &self.inner.resource, || {
                        self.is_disposed()
                    })
                    .await;

                let mut state = self.lock();
                if state.disposed {
                    return;
                }
                log::trace!(
                    "{}: delete notification settled, orphaned: {orphaned}",
                    self.inner.resource
                );
                self.set_orphaned(&mut state, orphaned);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::{OrphanDetector, OrphanSignal};
    use crate::model::Resource;
    use crate::store::{FileChangeType, FileChanges, MemoryFileService};

    fn foo() -> Resource {
        Resource::new("/w/foo.txt").unwrap()
    }

    #[test]
    fn delete_only_matters_when_not_orphaned() {
        let detector = OrphanDetector::new(Duration::from_millis(100));
        let deleted = FileChanges::single(foo(), FileChangeType::Deleted);
        let added = FileChanges::single(foo(), FileChangeType::Added);
        let other = FileChanges::single(Resource::new("/w/bar.txt").unwrap(), FileChangeType::Deleted);

        assert_eq!(detector.signal(&deleted, &foo(), false), Some(OrphanSignal::Deleted));
        assert_eq!(detector.signal(&deleted, &foo(), true), None);
        assert_eq!(detector.signal(&added, &foo(), true), Some(OrphanSignal::Added));
        assert_eq!(detector.signal(&added, &foo(), false), None);
        assert_eq!(detector.signal(&other, &foo(), false), None);
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_deleted_rechecks_existence_after_settling() {
        let detector = OrphanDetector::new(Duration::from_millis(100));
        let files = MemoryFileService::new();
        files.insert(&foo(), "still here");

        let start = tokio::time::Instant::now();
        assert!(!detector.confirm_deleted(&files, &foo(), || false).await);
        assert!(start.elapsed() >= Duration::from_millis(100));

        files.remove_silently(&foo());
        assert!(detector.confirm_deleted(&files, &foo(), || false).await);
        assert_eq!(files.exists_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disposed_model_is_finalized_without_query() {
        let detector = OrphanDetector::new(Duration::from_millis(100));
        let files = MemoryFileService::new();
        files.insert(&foo(), "x");
        let disposed = AtomicBool::new(true);

        assert!(
            detector
                .confirm_deleted(&files, &foo(), || disposed.load(Ordering::SeqCst))
                .await
        );
        assert_eq!(files.exists_count(), 0);
    }
}
