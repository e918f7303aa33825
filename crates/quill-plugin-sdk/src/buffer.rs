//! Value-semantics view of one host buffer.
//!
//! A [`BufferProxy`] wraps a snapshot taken when the host answered. Reads
//! never leave the process. Mutators send an `EditBuffer` callback and adopt
//! the snapshot the host returns, so the proxy always reflects the host's
//! state after its own last edit. Changes made by anyone else only show up
//! after [`BufferProxy::refresh`].

use quill_plugins::{BufferEdit, BufferInfo};
use quill_rpc::RpcError;

use crate::host::HostClient;

/// A buffer snapshot plus the client used to edit it.
#[derive(Debug, Clone)]
pub struct BufferProxy {
    snapshot: BufferInfo,
    host: HostClient,
}

impl BufferProxy {
    /// Wraps a snapshot.
    #[must_use]
    pub const fn new(snapshot: BufferInfo, host: HostClient) -> Self {
        Self { snapshot, host }
    }

    /// Buffer name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.snapshot.name.as_str()
    }

    /// Text as of the last snapshot.
    #[must_use]
    pub const fn content(&self) -> &str {
        self.snapshot.content.as_str()
    }

    /// Cursor position as of the last snapshot.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.snapshot.position
    }

    /// Modified flag as of the last snapshot.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.snapshot.is_dirty
    }

    /// Backing file, if any.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.snapshot.filename.as_deref()
    }

    /// The underlying snapshot.
    #[must_use]
    pub const fn snapshot(&self) -> &BufferInfo {
        &self.snapshot
    }

    /// Consumes the proxy, keeping the snapshot.
    #[must_use]
    pub fn into_snapshot(self) -> BufferInfo {
        self.snapshot
    }

    /// Replaces the buffer text.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the callback; the snapshot is left
    /// unchanged.
    pub fn set_content(&mut self, content: impl Into<String>) -> Result<(), RpcError> {
        self.apply(BufferEdit::SetContent {
            content: content.into(),
        })
    }

    /// Inserts `text` at `position`.
    ///
    /// # Errors
    ///
    /// See [`BufferProxy::set_content`].
    pub fn insert_at(&mut self, position: usize, text: impl Into<String>) -> Result<(), RpcError> {
        self.apply(BufferEdit::Insert {
            position,
            text: text.into(),
        })
    }

    /// Deletes the half-open range `start..end`.
    ///
    /// # Errors
    ///
    /// See [`BufferProxy::set_content`].
    pub fn delete_range(&mut self, start: usize, end: usize) -> Result<(), RpcError> {
        self.apply(BufferEdit::Delete { start, end })
    }

    /// Moves the cursor.
    ///
    /// # Errors
    ///
    /// See [`BufferProxy::set_content`].
    pub fn set_cursor_position(&mut self, position: usize) -> Result<(), RpcError> {
        self.apply(BufferEdit::SetCursor { position })
    }

    /// Flags the buffer as modified.
    ///
    /// # Errors
    ///
    /// See [`BufferProxy::set_content`].
    pub fn mark_dirty(&mut self) -> Result<(), RpcError> {
        self.apply(BufferEdit::MarkDirty { dirty: true })
    }

    /// Re-reads the buffer from the host.
    ///
    /// Returns `false`, keeping the old snapshot, if the buffer no longer
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns the [`RpcError`] raised by the callback.
    pub fn refresh(&mut self) -> Result<bool, RpcError> {
        match self.host.find_buffer(self.name())? {
            Some(snapshot) => {
                self.snapshot = snapshot;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn apply(&mut self, edit: BufferEdit) -> Result<(), RpcError> {
        self.snapshot = self.host.edit_buffer(self.name(), edit)?;
        Ok(())
    }
}
