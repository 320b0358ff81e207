// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

#![allow(dead_code)]

// Shared deterministic benchmark fixtures (no RNG).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new(prefix: &str) -> Self {
        let pid = std::process::id();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut path = std::env::temp_dir();
        path.push(format!("proteus_bench_{prefix}_{pid}_{nanos}_{counter}"));
        std::fs::create_dir_all(&path).expect("create temp dir");

        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Case {
    /// ~4 KiB, a typical source file.
    Small,
    /// ~1 MiB, a large log or generated file.
    Large,
}

impl Case {
    fn lines(self) -> usize {
        match self {
            Self::Small => 64,
            Self::Large => 16_384,
        }
    }
}

/// Deterministic multi-line text with mixed ASCII and non-ASCII content.
pub fn document(case: Case) -> String {
    let mut out = String::with_capacity(case.lines() * 64);
    for line in 0..case.lines() {
        out.push_str("line ");
        out.push_str(itoa::Buffer::new().format(line));
        out.push_str(": ");
        let fill = if line % 7 == 0 { 'é' } else { 'x' };
        for _ in 0..(40 + line % 13) {
            out.push(fill);
        }
        out.push('\n');
    }
    out
}
