//! The buffer and window core seen by plugins.
//!
//! [`EditorCore`] is the narrow surface the callback service drives on a
//! plugin's behalf. Every method performs the same operation a keystroke
//! would and returns fresh [`BufferInfo`] snapshots, never references into
//! editor state. [`MemoryEditor`] is a small in-memory implementation used by
//! the `quill-host` binary and by tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::iter;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use quill_plugins::{BufferEdit, BufferInfo};
use serde_json::Value;
use thiserror::Error;

/// Name of the buffer every [`MemoryEditor`] starts with.
pub const SCRATCH_BUFFER: &str = "*scratch*";

/// Editor state shared by every plugin's callback service.
pub type SharedEditor = Arc<Mutex<dyn EditorCore>>;

/// Failures reported by editor operations.
#[derive(Debug, Error)]
pub enum EditorError {
    /// No buffer has the given name.
    #[error("no buffer named '{name}'")]
    NoSuchBuffer {
        /// Requested buffer.
        name: String,
    },

    /// A buffer with the name already exists.
    #[error("buffer '{name}' already exists")]
    BufferExists {
        /// Requested buffer.
        name: String,
    },

    /// The buffer has no backing file.
    #[error("buffer '{name}' is not visiting a file")]
    NoFile {
        /// Buffer that was saved.
        name: String,
    },

    /// A position lies beyond the end of the buffer.
    #[error("position {position} is outside buffer '{name}' of length {length}")]
    OutOfRange {
        /// Buffer being edited.
        name: String,
        /// Offending position.
        position: usize,
        /// Buffer length in characters.
        length: usize,
    },

    /// A range ends before it starts.
    #[error("range {start}..{end} is reversed")]
    ReversedRange {
        /// Range start.
        start: usize,
        /// Range end.
        end: usize,
    },

    /// Reading or writing a file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// File involved.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// Operations the host exposes to plugins.
pub trait EditorCore: Send {
    /// Snapshot of the current buffer.
    fn current_buffer(&self) -> Option<BufferInfo>;

    /// Snapshot of a named buffer.
    fn find_buffer(&self, name: &str) -> Option<BufferInfo>;

    /// Creates an empty buffer without switching to it.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::BufferExists`] if the name is taken.
    fn create_buffer(&mut self, name: &str) -> Result<BufferInfo, EditorError>;

    /// Makes a buffer current.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::NoSuchBuffer`] if it does not exist.
    fn switch_to_buffer(&mut self, name: &str) -> Result<(), EditorError>;

    /// Reads a file into a buffer named after it and makes it current.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::Io`] if the file cannot be read.
    fn open_file(&mut self, path: &Utf8Path) -> Result<BufferInfo, EditorError>;

    /// Writes a buffer to its file and clears its modified flag.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::NoFile`] for buffers without a file, or
    /// [`EditorError::Io`] if writing fails.
    fn save_buffer(&mut self, name: &str) -> Result<(), EditorError>;

    /// Replaces the status line.
    fn set_status(&mut self, text: &str);

    /// Shows a message.
    fn show_message(&mut self, text: &str);

    /// Selects the major mode of the named buffer.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::NoSuchBuffer`] for unknown buffers.
    fn set_major_mode(&mut self, buffer: &str, mode: &str) -> Result<(), EditorError>;

    /// Toggles a minor mode on the named buffer, returning the new state.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::NoSuchBuffer`] for unknown buffers.
    fn toggle_minor_mode(&mut self, buffer: &str, mode: &str) -> Result<bool, EditorError>;

    /// Reads an option.
    fn option(&self, name: &str) -> Option<Value>;

    /// Writes an option.
    fn set_option(&mut self, name: &str, value: Value);

    /// Applies an edit and returns the resulting snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::NoSuchBuffer`] or a range error.
    fn edit_buffer(&mut self, name: &str, edit: &BufferEdit) -> Result<BufferInfo, EditorError>;
}

#[derive(Debug, Default, Clone)]
struct MemoryBuffer {
    content: String,
    position: usize,
    dirty: bool,
    filename: Option<Utf8PathBuf>,
    major_mode: Option<String>,
    minor_modes: BTreeSet<String>,
}

impl MemoryBuffer {
    fn snapshot(&self, name: &str) -> BufferInfo {
        BufferInfo {
            name: name.to_owned(),
            content: self.content.clone(),
            position: self.position,
            is_dirty: self.dirty,
            filename: self.filename.as_ref().map(ToString::to_string),
        }
    }

    fn length(&self) -> usize {
        self.content.chars().count()
    }

    /// Byte offset of the character at `position`; `length` maps to the end.
    fn byte_offset(&self, name: &str, position: usize) -> Result<usize, EditorError> {
        self.content
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(iter::once(self.content.len()))
            .nth(position)
            .ok_or_else(|| EditorError::OutOfRange {
                name: name.to_owned(),
                position,
                length: self.length(),
            })
    }

    fn apply(&mut self, name: &str, edit: &BufferEdit) -> Result<(), EditorError> {
        match edit {
            BufferEdit::SetContent { content } => {
                content.clone_into(&mut self.content);
                self.position = self.position.min(self.length());
                self.dirty = true;
            }
            BufferEdit::Insert { position, text } => {
                let offset = self.byte_offset(name, *position)?;
                self.content.insert_str(offset, text);
                if self.position >= *position {
                    self.position += text.chars().count();
                }
                self.dirty = true;
            }
            BufferEdit::Delete { start, end } => {
                if end < start {
                    return Err(EditorError::ReversedRange {
                        start: *start,
                        end: *end,
                    });
                }
                let from = self.byte_offset(name, *start)?;
                let to = self.byte_offset(name, *end)?;
                self.content.replace_range(from..to, "");
                if self.position >= *end {
                    self.position -= end - start;
                } else if self.position > *start {
                    self.position = *start;
                }
                self.dirty = true;
            }
            BufferEdit::SetCursor { position } => {
                if *position > self.length() {
                    return Err(EditorError::OutOfRange {
                        name: name.to_owned(),
                        position: *position,
                        length: self.length(),
                    });
                }
                self.position = *position;
            }
            BufferEdit::MarkDirty { dirty } => self.dirty = *dirty,
        }
        Ok(())
    }
}

/// An in-memory [`EditorCore`].
///
/// Starts with an empty current buffer named [`SCRATCH_BUFFER`].
#[derive(Debug, Clone)]
pub struct MemoryEditor {
    buffers: BTreeMap<String, MemoryBuffer>,
    current: Option<String>,
    status: Option<String>,
    messages: Vec<String>,
    options: HashMap<String, Value>,
}

impl Default for MemoryEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEditor {
    /// Creates an editor holding only the scratch buffer.
    #[must_use]
    pub fn new() -> Self {
        let mut buffers = BTreeMap::new();
        buffers.insert(String::from(SCRATCH_BUFFER), MemoryBuffer::default());
        Self {
            buffers,
            current: Some(String::from(SCRATCH_BUFFER)),
            status: None,
            messages: Vec::new(),
            options: HashMap::new(),
        }
    }

    /// Wraps the editor for sharing with callback services.
    #[must_use]
    pub fn shared(self) -> SharedEditor {
        Arc::new(Mutex::new(self))
    }

    /// Names of every buffer, sorted.
    #[must_use]
    pub fn buffer_names(&self) -> Vec<String> {
        self.buffers.keys().cloned().collect()
    }

    /// The status line, if set.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Messages shown so far, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Major mode of a buffer.
    #[must_use]
    pub fn major_mode(&self, buffer: &str) -> Option<&str> {
        self.buffers.get(buffer)?.major_mode.as_deref()
    }

    /// Returns `true` if the minor mode is on in the buffer.
    #[must_use]
    pub fn minor_mode_enabled(&self, buffer: &str, mode: &str) -> bool {
        self.buffers
            .get(buffer)
            .is_some_and(|state| state.minor_modes.contains(mode))
    }

    fn buffer_mut(&mut self, name: &str) -> Result<&mut MemoryBuffer, EditorError> {
        self.buffers
            .get_mut(name)
            .ok_or_else(|| EditorError::NoSuchBuffer {
                name: name.to_owned(),
            })
    }
}

impl EditorCore for MemoryEditor {
    fn current_buffer(&self) -> Option<BufferInfo> {
        let name = self.current.as_deref()?;
        self.find_buffer(name)
    }

    fn find_buffer(&self, name: &str) -> Option<BufferInfo> {
        self.buffers.get(name).map(|buffer| buffer.snapshot(name))
    }

    fn create_buffer(&mut self, name: &str) -> Result<BufferInfo, EditorError> {
        if self.buffers.contains_key(name) {
            return Err(EditorError::BufferExists {
                name: name.to_owned(),
            });
        }
        let buffer = MemoryBuffer::default();
        let snapshot = buffer.snapshot(name);
        self.buffers.insert(name.to_owned(), buffer);
        Ok(snapshot)
    }

    fn switch_to_buffer(&mut self, name: &str) -> Result<(), EditorError> {
        if !self.buffers.contains_key(name) {
            return Err(EditorError::NoSuchBuffer {
                name: name.to_owned(),
            });
        }
        self.current = Some(name.to_owned());
        Ok(())
    }

    fn open_file(&mut self, path: &Utf8Path) -> Result<BufferInfo, EditorError> {
        let content = fs::read_to_string(path).map_err(|source| EditorError::Io {
            path: path.to_owned(),
            source: Arc::new(source),
        })?;
        let name = path.file_name().unwrap_or(path.as_str()).to_owned();
        let buffer = MemoryBuffer {
            content,
            filename: Some(path.to_owned()),
            ..MemoryBuffer::default()
        };
        let snapshot = buffer.snapshot(&name);
        self.buffers.insert(name.clone(), buffer);
        self.current = Some(name);
        Ok(snapshot)
    }

    fn save_buffer(&mut self, name: &str) -> Result<(), EditorError> {
        let buffer = self
            .buffers
            .get_mut(name)
            .ok_or_else(|| EditorError::NoSuchBuffer {
                name: name.to_owned(),
            })?;
        let Some(path) = buffer.filename.clone() else {
            return Err(EditorError::NoFile {
                name: name.to_owned(),
            });
        };
        fs::write(&path, &buffer.content).map_err(|source| EditorError::Io {
            path,
            source: Arc::new(source),
        })?;
        buffer.dirty = false;
        Ok(())
    }

    fn set_status(&mut self, text: &str) {
        self.status = Some(text.to_owned());
    }

    fn show_message(&mut self, text: &str) {
        self.messages.push(text.to_owned());
    }

    fn set_major_mode(&mut self, buffer: &str, mode: &str) -> Result<(), EditorError> {
        self.buffer_mut(buffer)?.major_mode = Some(mode.to_owned());
        Ok(())
    }

    fn toggle_minor_mode(&mut self, buffer: &str, mode: &str) -> Result<bool, EditorError> {
        let target = self.buffer_mut(buffer)?;
        if target.minor_modes.remove(mode) {
            Ok(false)
        } else {
            target.minor_modes.insert(mode.to_owned());
            Ok(true)
        }
    }

    fn option(&self, name: &str) -> Option<Value> {
        self.options.get(name).cloned()
    }

    fn set_option(&mut self, name: &str, value: Value) {
        self.options.insert(name.to_owned(), value);
    }

    fn edit_buffer(&mut self, name: &str, edit: &BufferEdit) -> Result<BufferInfo, EditorError> {
        let buffer = self
            .buffers
            .get_mut(name)
            .ok_or_else(|| EditorError::NoSuchBuffer {
                name: name.to_owned(),
            })?;
        buffer.apply(name, edit)?;
        Ok(buffer.snapshot(name))
    }
}
