// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! In-memory text buffers.
//!
//! The text file model only needs a narrow slice of a buffer: read the text, replace it, and an
//! *alternative version id* that returns to an earlier value when undo/redo lands exactly on an
//! earlier state. That id is what lets the model notice "the user undid back to what is on disk".

use std::fmt;
use std::ops::Range;

/// A single replacement of a byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub range: Range<usize>,
    pub text: String,
}

impl TextEdit {
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self {
            range: offset..offset,
            text: text.into(),
        }
    }

    pub fn delete(range: Range<usize>) -> Self {
        Self {
            range,
            text: String::new(),
        }
    }

    pub fn replace(range: Range<usize>, text: impl Into<String>) -> Self {
        Self {
            range,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("edit range {start}..{end} is out of bounds for length {len}")]
    OutOfBounds { start: usize, end: usize, len: usize },
    #[error("edit range {start}..{end} does not fall on char boundaries")]
    NotCharBoundary { start: usize, end: usize },
}

/// Buffer abstraction the model drives.
///
/// Every successful mutating call is reported to the model, which counts it as one content
/// change. Implementations must keep `alternative_version_id` stable across reads and must make
/// undo/redo restore the id that the restored state had.
pub trait TextBuffer: Send + fmt::Debug {
    fn text(&self) -> String;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn apply(&mut self, edit: &TextEdit) -> Result<(), EditError>;

    /// Replaces the whole content. Resets undo history.
    fn set_content(&mut self, text: &str);

    /// Returns `false` if there was nothing to undo.
    fn undo(&mut self) -> bool;

    /// Returns `false` if there was nothing to redo.
    fn redo(&mut self) -> bool;

    fn alternative_version_id(&self) -> u64;

    /// Closes the current undo element so later edits start a new one.
    fn push_undo_checkpoint(&mut self);
}

pub type BufferFactory = std::sync::Arc<dyn Fn(&str) -> Box<dyn TextBuffer> + Send + Sync>;

pub fn default_buffer_factory() -> BufferFactory {
    std::sync::Arc::new(|text: &str| Box::new(UndoBuffer::new(text)) as Box<dyn TextBuffer>)
}

#[derive(Debug, Clone)]
struct UndoElement {
    before_text: String,
    before_alt: u64,
    after_text: String,
    after_alt: u64,
}

/// Plain `String` buffer with coalescing undo elements.
///
/// Consecutive edits merge into one undo element until [`TextBuffer::push_undo_checkpoint`] is
/// called, mirroring how editors group typing.
#[derive(Debug, Clone)]
pub struct UndoBuffer {
    text: String,
    version_id: u64,
    alternative_version_id: u64,
    undo_stack: Vec<UndoElement>,
    redo_stack: Vec<UndoElement>,
    element_open: bool,
}

impl UndoBuffer {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_owned(),
            version_id: 1,
            alternative_version_id: 1,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            element_open: false,
        }
    }

    pub fn version_id(&self) -> u64 {
        self.version_id
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }
}

impl TextBuffer for UndoBuffer {
    fn text(&self) -> String {
        self.text.clone()
    }

    fn len(&self) -> usize {
        self.text.len()
    }

    fn apply(&mut self, edit: &TextEdit) -> Result<(), EditError> {
        let Range { start, end } = edit.range.clone();
        let len = self.text.len();
        if start > end || end > len {
            return Err(EditError::OutOfBounds { start, end, len });
        }
        if !self.text.is_char_boundary(start) || !self.text.is_char_boundary(end) {
            return Err(EditError::NotCharBoundary { start, end });
        }

        let before_text = self.text.clone();
        let before_alt = self.alternative_version_id;

        self.text.replace_range(start..end, &edit.text);
        self.version_id += 1;
        self.alternative_version_id = self.version_id;
        self.redo_stack.clear();

        match self.undo_stack.last_mut() {
            Some(open) if self.element_open => {
                open.after_text = self.text.clone();
                open.after_alt = self.alternative_version_id;
            }
            _ => {
                self.undo_stack.push(UndoElement {
                    before_text,
                    before_alt,
                    after_text: self.text.clone(),
                    after_alt: self.alternative_version_id,
                });
                self.element_open = true;
            }
        }
        Ok(())
    }

    fn set_content(&mut self, text: &str) {
        self.text = text.to_owned();
        self.version_id += 1;
        self.alternative_version_id = self.version_id;
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.element_open = false;
    }

    fn undo(&mut self) -> bool {
        let Some(element) = self.undo_stack.pop() else {
            return false;
        };
        self.text = element.before_text.clone();
        self.version_id += 1;
        self.alternative_version_id = element.before_alt;
        self.redo_stack.push(element);
        self.element_open = false;
        true
    }

    fn redo(&mut self) -> bool {
        let Some(element) = self.redo_stack.pop() else {
            return false;
        };
        self.text = element.after_text.clone();
        self.version_id += 1;
        self.alternative_version_id = element.after_alt;
        self.undo_stack.push(element);
        self.element_open = false;
        true
    }

    fn alternative_version_id(&self) -> u64 {
        self.alternative_version_id
    }

    fn push_undo_checkpoint(&mut self) {
        self.element_open = false;
    }
}
