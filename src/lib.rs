// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Proteus: the save and dirty lifecycle of text file models.
//!
//! [`textfile::TextFileModel`] tracks one open file: edits, the dirty flag, sequenced saves with
//! conflict detection, and orphan state. [`manager::ModelManager`] keeps one model per resource
//! and feeds them file change notifications. Disk and in-memory collaborators live in [`store`].

pub mod config;
pub mod manager;
pub mod model;
pub mod store;
pub mod textfile;

pub use config::{ModelConfig, Settings};
pub use manager::ModelManager;
pub use model::{Resource, TextEdit};
pub use textfile::{LoadOptions, ModelError, SaveOptions, TextFileModel};
