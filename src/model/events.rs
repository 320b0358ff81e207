// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Model events.
//!
//! All observable state changes of a model are published as one [`ModelEvent`] stream, in the
//! order the transitions happened.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::encoding::Encoding;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Why a save was requested.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveReason {
    #[default]
    Explicit,
    Auto,
    FocusChange,
    WindowChange,
}

impl SaveReason {
    /// Implicit saves are not backed by a user action and must not paper over a conflict or
    /// error state.
    pub fn is_implicit(self) -> bool {
        !matches!(self, Self::Explicit)
    }
}

/// Why a load was requested.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadReason {
    Editor,
    Reference,
    FileChange,
    #[default]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    ContentChanged { version_id: u64 },
    DirtyChanged { dirty: bool },
    Loaded { reason: LoadReason },
    Saved { reason: SaveReason },
    SaveError,
    Reverted,
    EncodingChanged { encoding: Encoding },
    OrphanChanged { orphaned: bool },
    Disposed,
}

/// The single subscription point of a model.
#[derive(Debug, Clone)]
pub struct ModelEvents {
    sender: broadcast::Sender<ModelEvent>,
}

impl Default for ModelEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModelEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ModelEvent) {
        // No subscribers is the common case for headless use.
        let _ = self.sender.send(event);
    }
}

/// Drains everything currently buffered in `receiver` without waiting.
pub fn drain(receiver: &mut broadcast::Receiver<ModelEvent>) -> Vec<ModelEvent> {
    let mut out = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => out.push(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                log::warn!("event receiver lagged, {skipped} events dropped");
            }
            Err(_) => break,
        }
    }
    out
}
