//! Shared byte buffers and the views into them

use core::cell::RefCell;
use core::fmt;
use std::rc::Rc;

use byteorder::ByteOrder;
use log::trace;

use crate::error::{Error, Result};

/// Slice view into a shared chunk of memory
///
/// A `Buffer` is an `(offset, len)` window into a reference counted chunk of bytes. Cloning a
/// buffer or narrowing it (`slice`, `slice_from`, `remaining_after`) never copies: all the views
/// alias the same chunk and a write through one of them is visible through every other view that
/// overlaps the written range.
///
/// This is what makes dissection zero copy. The header of each layer and the opaque payload at the
/// end of a packet are all views into the chunk that was handed to the dissector.
///
/// A view can be narrowed but it's never widened in place. Growing a view (see `resize`) moves it
/// into a freshly allocated chunk so the bytes that follow it in the old chunk, which may belong to
/// another layer, are left untouched.
///
/// `Buffer` is not `Send` nor `Sync`. Use one packet per thread.
#[derive(Clone)]
pub struct Buffer {
    chunk: Rc<RefCell<Vec<u8>>>,
    offset: usize,
    len: usize,
}

impl Buffer {
    /* Constructors */
    /// Allocates a new zeroed chunk of `len` bytes and returns a view that spans all of it
    pub fn new(len: usize) -> Self {
        Buffer::from_vec(vec![0; len])
    }

    /// Copies `bytes` into a new chunk and returns a view that spans all of it
    pub fn from_bytes<B>(bytes: B) -> Self
    where
        B: AsRef<[u8]>,
    {
        Buffer::from_vec(bytes.as_ref().to_vec())
    }

    /// Takes ownership of `bytes` and returns a view that spans all of it
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Buffer {
            chunk: Rc::new(RefCell::new(bytes)),
            offset: 0,
            len,
        }
    }

    /* Getters */
    /// Returns the length of this view
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks if this view is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the position of this view within its chunk
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the size of the whole chunk backing this view
    pub fn capacity(&self) -> usize {
        self.chunk.borrow().len()
    }

    /// Checks if both views are backed by the same chunk of memory
    pub fn aliases(&self, other: &Buffer) -> bool {
        Rc::ptr_eq(&self.chunk, &other.chunk)
    }

    /// Reads the byte at `at`
    pub fn read_u8(&self, at: usize) -> Result<u8> {
        self.check(at, 1)?;
        Ok(self.chunk.borrow()[self.offset + at])
    }

    /// Reads a 16-bit integer, in `E` byte order, starting at `at`
    pub fn read_u16<E>(&self, at: usize) -> Result<u16>
    where
        E: ByteOrder,
    {
        let start = self.check(at, 2)?;
        Ok(E::read_u16(&self.chunk.borrow()[start..start + 2]))
    }

    /// Reads a 32-bit integer, in `E` byte order, starting at `at`
    pub fn read_u32<E>(&self, at: usize) -> Result<u32>
    where
        E: ByteOrder,
    {
        let start = self.check(at, 4)?;
        Ok(E::read_u32(&self.chunk.borrow()[start..start + 4]))
    }

    /// Copies `n` bytes starting at `at` out of the view
    pub fn read_bytes(&self, at: usize, n: usize) -> Result<Vec<u8>> {
        let start = self.check(at, n)?;
        Ok(self.chunk.borrow()[start..start + n].to_vec())
    }

    /// Copies `N` bytes starting at `at` into an array
    pub fn read_array<const N: usize>(&self, at: usize) -> Result<[u8; N]> {
        let start = self.check(at, N)?;
        let mut array = [0; N];
        array.copy_from_slice(&self.chunk.borrow()[start..start + N]);
        Ok(array)
    }

    /// Returns an owned copy of the bytes in this view
    ///
    /// The copy is isolated: it doesn't alias the chunk
    pub fn byte_copy(&self) -> Vec<u8> {
        self.with(|bytes| bytes.to_vec())
    }

    /// Runs `f` on the bytes of this view
    pub fn with<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        let chunk = self.chunk.borrow();
        f(&chunk[self.offset..self.offset + self.len])
    }

    /* Setters */
    /// Writes `byte` at `at`
    pub fn write_u8(&mut self, at: usize, byte: u8) -> Result<()> {
        let start = self.check(at, 1)?;
        self.chunk.borrow_mut()[start] = byte;
        Ok(())
    }

    /// Writes a 16-bit integer, in `E` byte order, starting at `at`
    pub fn write_u16<E>(&mut self, at: usize, value: u16) -> Result<()>
    where
        E: ByteOrder,
    {
        let start = self.check(at, 2)?;
        E::write_u16(&mut self.chunk.borrow_mut()[start..start + 2], value);
        Ok(())
    }

    /// Writes a 32-bit integer, in `E` byte order, starting at `at`
    pub fn write_u32<E>(&mut self, at: usize, value: u32) -> Result<()>
    where
        E: ByteOrder,
    {
        let start = self.check(at, 4)?;
        E::write_u32(&mut self.chunk.borrow_mut()[start..start + 4], value);
        Ok(())
    }

    /// Copies `bytes` into the view starting at `at`
    pub fn write_bytes(&mut self, at: usize, bytes: &[u8]) -> Result<()> {
        let start = self.check(at, bytes.len())?;
        self.chunk.borrow_mut()[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Runs `f` on the bytes of this view, mutably
    pub fn with_mut<R, F>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut chunk = self.chunk.borrow_mut();
        f(&mut chunk[self.offset..self.offset + self.len])
    }

    /* Resizing */
    /// Returns a narrower view: `len` bytes starting `offset` bytes into this view
    pub fn slice(&self, offset: usize, len: usize) -> Result<Buffer> {
        let start = self.check(offset, len)?;
        Ok(Buffer {
            chunk: self.chunk.clone(),
            offset: start,
            len,
        })
    }

    /// Returns the view that starts `offset` bytes into this one and ends where this one ends
    pub fn slice_from(&self, offset: usize) -> Result<Buffer> {
        if offset > self.len {
            return Err(Error::range(offset, self.len, self.len));
        }

        self.slice(offset, self.len - offset)
    }

    /// Returns the view that covers everything past the end of this view up to the end of the
    /// chunk
    pub fn remaining_after(&self) -> Buffer {
        let start = self.offset + self.len;
        Buffer {
            chunk: self.chunk.clone(),
            offset: start,
            len: self.capacity() - start,
        }
    }

    /// Truncates the view to the specified length
    ///
    /// This is a no-op if `len` is greater than the current length
    pub fn truncate(&mut self, len: usize) {
        if self.len > len {
            self.len = len;
        }
    }

    /// Resizes the view to `len` bytes
    ///
    /// Shrinking happens in place. Growing moves the view into a new chunk: the current content is
    /// copied forward and the new tail is zeroed. The new chunk is private to this view.
    pub fn resize(&mut self, len: usize) {
        if len <= self.len {
            self.len = len;
            return;
        }

        trace!("reallocating a {} byte view to {} bytes", self.len, len);
        let mut bytes = self.byte_copy();
        bytes.resize(len, 0);
        *self = Buffer::from_vec(bytes);
    }

    /* Private */
    // checks that `n` bytes starting at `at` are within the view; returns the chunk index of `at`
    fn check(&self, at: usize, n: usize) -> Result<usize> {
        match at.checked_add(n) {
            Some(end) if end <= self.len => Ok(self.offset + at),
            _ => Err(Error::range(at, at.saturating_add(n), self.len)),
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(bytes: Vec<u8>) -> Self {
        Buffer::from_vec(bytes)
    }
}

impl From<&[u8]> for Buffer {
    fn from(bytes: &[u8]) -> Self {
        Buffer::from_bytes(bytes)
    }
}
