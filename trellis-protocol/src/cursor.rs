//! Byte-level cursors used by template encoding and decoding.
//!
//! Reads are bounds-checked and return `None` on exhaustion; the template layer turns that into
//! errors naming the field being walked.

/// Widest unsigned integer a template field can hold, in bytes.
pub(crate) const MAX_UINT_WIDTH: usize = 8;

/// Reads big-endian values from a byte slice, tracking an offset.
#[derive(Debug)]
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Returns the next `length` bytes and advances, or `None` when fewer remain.
    pub(crate) fn read_slice(&mut self, length: usize) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(length)?;
        if end > self.data.len() {
            return None;
        }
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Some(slice)
    }

    /// Reads a big-endian unsigned integer occupying exactly `width` bytes.
    pub(crate) fn read_uint(&mut self, width: usize) -> Option<u64> {
        debug_assert!((1..=MAX_UINT_WIDTH).contains(&width));
        let bytes = self.read_slice(width)?;
        Some(
            bytes
                .iter()
                .fold(0u64, |value, &byte| (value << 8) | u64::from(byte)),
        )
    }

    /// Bytes not yet consumed.
    pub(crate) fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    /// True when every byte has been consumed.
    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

/// Appends big-endian values to an owned buffer.
#[derive(Debug, Default)]
pub(crate) struct ByteWriter {
    buffer: Vec<u8>,
}

impl ByteWriter {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn write_slice(&mut self, slice: &[u8]) {
        self.buffer.extend_from_slice(slice);
    }

    /// Writes `value` big-endian into exactly `width` bytes.
    ///
    /// Returns `false` without writing when the value does not fit the width.
    pub(crate) fn write_uint(&mut self, value: u64, width: usize) -> bool {
        debug_assert!((1..=MAX_UINT_WIDTH).contains(&width));
        if width < MAX_UINT_WIDTH && value >> (width * 8) != 0 {
            return false;
        }
        self.buffer
            .extend_from_slice(&value.to_be_bytes()[MAX_UINT_WIDTH - width..]);
        true
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}
