// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

/// Monotonic counter of observed buffer mutations.
///
/// The value is captured before every suspension point (save start, load start, auto-save
/// scheduling) and compared afterwards; a mismatch means someone edited in between and the
/// continuation must not clobber that edit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VersionTracker {
    current: u64,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    /// Records one mutation. Never skips, even for undo or visually empty changes.
    pub fn bump(&mut self) -> u64 {
        self.current += 1;
        self.current
    }

    pub fn is_current(&self, captured: u64) -> bool {
        self.current == captured
    }
}
