// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Core value types shared by the text file model and its collaborators.

pub mod buffer;
pub mod dirty;
pub mod encoding;
pub mod events;
pub mod resource;
pub mod stat;
pub mod version;

pub use buffer::{default_buffer_factory, BufferFactory, EditError, TextBuffer, TextEdit, UndoBuffer};
pub use dirty::{ContentChange, DirtySnapshot, DirtyState, DirtyStatus};
pub use encoding::{Encoding, UnknownEncoding};
pub use events::{LoadReason, ModelEvent, ModelEvents, SaveReason};
pub use resource::{Resource, ResourceError};
pub use stat::{Etag, FileStat, ETAG_DISABLED};
pub use version::VersionTracker;
