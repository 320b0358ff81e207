// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Dirty/conflict/error bookkeeping.
//!
//! This is pure state: it never fires events itself. Callers compare [`DirtyState::is_dirty`]
//! before and after a transition to decide whether a `DirtyChanged` event is due.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyStatus {
    Clean,
    Dirty,
    /// Last write was rejected because the file changed on disk.
    Conflict,
    /// Last write failed for another reason.
    Error,
}

/// Result of feeding a content change through the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentChange {
    /// The buffer is back at the saved alternative version.
    RevertedToSaved { was_dirty: bool },
    BecameDirty { was_dirty: bool },
    /// Tracking was suppressed; flags untouched.
    Ignored,
}

/// Flags as they were before a `set_dirty`, used to roll back a failed revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtySnapshot {
    dirty: bool,
    in_conflict_mode: bool,
    in_error_mode: bool,
    buffer_saved_version_id: Option<u64>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DirtyState {
    dirty: bool,
    in_conflict_mode: bool,
    in_error_mode: bool,
    buffer_saved_version_id: Option<u64>,
}

impl DirtyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn in_conflict_mode(&self) -> bool {
        self.in_conflict_mode
    }

    pub fn in_error_mode(&self) -> bool {
        self.in_error_mode
    }

    pub fn buffer_saved_version_id(&self) -> Option<u64> {
        self.buffer_saved_version_id
    }

    pub fn status(&self) -> DirtyStatus {
        if self.in_conflict_mode {
            DirtyStatus::Conflict
        } else if self.in_error_mode {
            DirtyStatus::Error
        } else if self.dirty {
            DirtyStatus::Dirty
        } else {
            DirtyStatus::Clean
        }
    }

    /// Marks the state dirty or clean.
    ///
    /// Clearing also clears conflict and error and records `alternative_version_id` (the buffer's
    /// current marker, `None` when no buffer exists yet) as the saved version.
    pub fn set_dirty(&mut self, dirty: bool, alternative_version_id: Option<u64>) -> DirtySnapshot {
        let snapshot = self.snapshot();
        if dirty {
            self.dirty = true;
        } else {
            self.dirty = false;
            self.in_conflict_mode = false;
            self.in_error_mode = false;
            self.update_saved_version(alternative_version_id);
        }
        snapshot
    }

    pub fn update_saved_version(&mut self, alternative_version_id: Option<u64>) {
        if let Some(id) = alternative_version_id {
            self.buffer_saved_version_id = Some(id);
        }
    }

    pub fn on_content_changed(
        &mut self,
        alternative_version_id: u64,
        tracking_suppressed: bool,
    ) -> ContentChange {
        if tracking_suppressed {
            return ContentChange::Ignored;
        }

        let was_dirty = self.dirty;
        if self.buffer_saved_version_id == Some(alternative_version_id) {
            self.set_dirty(false, Some(alternative_version_id));
            ContentChange::RevertedToSaved { was_dirty }
        } else {
            self.dirty = true;
            ContentChange::BecameDirty { was_dirty }
        }
    }

    /// Records a failed write. The state is always left dirty since the write may have truncated
    /// the file.
    pub fn mark_save_failed(&mut self, conflict: bool) {
        self.dirty = true;
        self.in_error_mode = true;
        if conflict {
            self.in_conflict_mode = true;
        }
    }

    /// A new save attempt starts; the previous error no longer describes the model.
    pub fn clear_error(&mut self) {
        self.in_error_mode = false;
    }

    pub fn snapshot(&self) -> DirtySnapshot {
        DirtySnapshot {
            dirty: self.dirty,
            in_conflict_mode: self.in_conflict_mode,
            in_error_mode: self.in_error_mode,
            buffer_saved_version_id: self.buffer_saved_version_id,
        }
    }

    pub fn restore(&mut self, snapshot: DirtySnapshot) {
        self.dirty = snapshot.dirty;
        self.in_conflict_mode = snapshot.in_conflict_mode;
        self.in_error_mode = snapshot.in_error_mode;
        self.buffer_saved_version_id = snapshot.buffer_saved_version_id;
    }
}
