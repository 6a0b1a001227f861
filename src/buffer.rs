//! Growable, cursor-based byte buffer shared by socket reads and response
//! assembly.
//!
//! ```text
//! +-------------------+------------------+------------------+
//! | prependable bytes |  readable bytes  |  writable bytes  |
//! +-------------------+------------------+------------------+
//! 0      <=      read_pos    <=     write_pos    <=     data.len()
//! ```

use std::io::{self, IoSliceMut, Read, Write};

/// Size of the on-stack spill region used by [`Buffer::read_from`].
const EXTRA_BUF_SIZE: usize = 64 * 1024;

/// A resizable buffer with a read cursor and a write cursor
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Buffer {
    /// Default capacity of a fresh buffer
    pub const INITIAL_SIZE: usize = 1024;

    /// Create a new buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Number of bytes available to read
    pub fn readable_bytes(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Number of bytes that can be written without growing or compacting
    pub fn writable_bytes(&self) -> usize {
        self.data.len() - self.write_pos
    }

    /// Number of already consumed bytes in front of the readable region
    pub fn prependable_bytes(&self) -> usize {
        self.read_pos
    }

    /// Get the total capacity of the buffer
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The readable region
    pub fn peek(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// The writable region
    pub fn begin_write(&mut self) -> &mut [u8] {
        &mut self.data[self.write_pos..]
    }

    /// Advance the write cursor after writing into [`Buffer::begin_write`]
    pub fn has_written(&mut self, len: usize) {
        self.write_pos += len.min(self.writable_bytes());
    }

    /// Advance the read cursor by `len`, collapsing to empty when drained.
    ///
    /// Over-reads are clamped to the readable length.
    pub fn retrieve(&mut self, len: usize) {
        if len < self.readable_bytes() {
            self.read_pos += len;
        } else {
            self.retrieve_all();
        }
    }

    /// Reset both cursors to the start of the storage
    pub fn retrieve_all(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Consume `len` bytes and return them as a (lossy) UTF-8 string
    pub fn retrieve_as_string(&mut self, len: usize) -> String {
        let len = len.min(self.readable_bytes());
        let result = String::from_utf8_lossy(&self.peek()[..len]).into_owned();
        self.retrieve(len);
        result
    }

    /// Consume everything readable as a (lossy) UTF-8 string
    pub fn retrieve_all_as_string(&mut self) -> String {
        self.retrieve_as_string(self.readable_bytes())
    }

    /// Append bytes, growing or compacting as needed
    pub fn append(&mut self, data: impl AsRef<[u8]>) {
        let data = data.as_ref();
        self.ensure_writable(data.len());
        self.data[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
        self.write_pos += data.len();
    }

    /// Make sure at least `len` bytes are writable.
    ///
    /// Compacts the readable region to offset 0 when the consumed prefix
    /// plus the writable tail is enough; grows to `write_pos + len + 1`
    /// otherwise.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() < len {
            self.make_space(len);
        }
        debug_assert!(self.writable_bytes() >= len);
    }

    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.prependable_bytes() < len {
            self.data.resize(self.write_pos + len + 1, 0);
        } else {
            let readable = self.readable_bytes();
            self.data.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        }
    }

    /// Shrink storage to the readable bytes plus `reserve`
    pub fn shrink(&mut self, reserve: usize) {
        let readable = self.readable_bytes();
        self.data.copy_within(self.read_pos..self.write_pos, 0);
        self.read_pos = 0;
        self.write_pos = readable;
        self.data.truncate(readable);
        self.data.resize(readable + reserve, 0);
        self.data.shrink_to_fit();
    }

    /// Read from `reader` with a single vectored read.
    ///
    /// The writable tail is filled first; when it is smaller than the
    /// 64 KiB stack region, the overflow lands there and is appended
    /// afterwards. Returns 0 on end of stream.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        let mut extra = [0u8; EXTRA_BUF_SIZE];
        let writable = self.writable_bytes();

        let bytes_read = if writable < extra.len() {
            let write_pos = self.write_pos;
            let mut slices = [
                IoSliceMut::new(&mut self.data[write_pos..]),
                IoSliceMut::new(&mut extra),
            ];
            reader.read_vectored(&mut slices)?
        } else {
            let write_pos = self.write_pos;
            reader.read(&mut self.data[write_pos..])?
        };

        if bytes_read <= writable {
            self.write_pos += bytes_read;
        } else {
            self.write_pos = self.data.len();
            self.append(&extra[..bytes_read - writable]);
        }

        Ok(bytes_read)
    }

    /// Write readable data to a writer, consuming what was written
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        if self.readable_bytes() == 0 {
            return Ok(0);
        }

        let bytes_written = writer.write(self.peek())?;
        self.retrieve(bytes_written);

        Ok(bytes_written)
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new(Self::INITIAL_SIZE)
    }
}
