// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! On-disk metadata snapshots and etags.

use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// The etag value that turns off both not-modified checks on read and modified-since checks on
/// write.
pub const ETAG_DISABLED: &str = "";

/// Opaque token identifying one on-disk content version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Etag(SmolStr);

impl Etag {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(SmolStr::new(value))
    }

    pub fn disabled() -> Self {
        Self(SmolStr::new_inline(ETAG_DISABLED))
    }

    /// Derives the etag of a file from its modification time and size.
    pub fn from_parts(mtime: u64, size: u64) -> Self {
        let mut mtime_buf = itoa::Buffer::new();
        let mut size_buf = itoa::Buffer::new();
        let mtime = mtime_buf.format(mtime);
        let size = size_buf.format(size);

        let mut out = String::with_capacity(mtime.len() + size.len() + 1);
        out.push_str(mtime);
        out.push('-');
        out.push_str(size);
        Self(SmolStr::new(out))
    }

    pub fn is_disabled(&self) -> bool {
        self.0 == ETAG_DISABLED
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable snapshot of a file's on-disk metadata.
///
/// Times are milliseconds since the unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub mtime: u64,
    pub ctime: u64,
    pub size: u64,
    pub etag: Etag,
    #[serde(default)]
    pub readonly: bool,
}

impl FileStat {
    pub fn new(mtime: u64, ctime: u64, size: u64) -> Self {
        Self {
            mtime,
            ctime,
            size,
            etag: Etag::from_parts(mtime, size),
            readonly: false,
        }
    }

    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Whether `candidate` may replace `held` as the last resolved stat.
    ///
    /// Adoption is monotonic on mtime so a late completion (e.g. a save finishing after a revert
    /// already read newer metadata) cannot move the recorded disk state backwards.
    pub fn should_adopt(held: Option<&FileStat>, candidate: &FileStat) -> bool {
        match held {
            None => true,
            Some(held) => held.mtime <= candidate.mtime,
        }
    }
}
