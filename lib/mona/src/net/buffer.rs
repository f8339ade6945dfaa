use std::io;

// Keep dead space in front of the data bounded before compacting.
const COMPACT_LIMIT: usize = 65536;

/// A buffered FIFO byte queue over a plain byte sequence with head/tail
/// indices. Data is appended at the tail and read from the head; consumed
/// space is reclaimed lazily.
pub struct Buffer {
    data: Vec<u8>,
    head: usize,
}

impl Buffer {
    #[inline]
    pub fn new() -> Buffer {
        Buffer {
            data: Vec::new(),
            head: 0,
        }
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Buffer {
        Buffer {
            data: Vec::with_capacity(capacity),
            head: 0,
        }
    }

    /// The number of unread bytes in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.head
    }

    /// Returns true in case the buffer is empty, false otherwise.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.data.len()
    }

    /// Append data at the tail.
    #[inline]
    pub fn push(&mut self, bytes: &[u8]) {
        if self.is_empty() {
            self.data.clear();
            self.head = 0;
        }
        self.data.extend_from_slice(bytes);
    }

    /// Slice containing the unread data.
    #[inline]
    pub fn read_slice(&self) -> &[u8] {
        &self.data[self.head..]
    }

    /// Advance the head past `count` consumed bytes.
    #[inline]
    pub fn consume(&mut self, count: usize) {
        self.head = (self.head + count).min(self.data.len());

        if self.head == self.data.len() {
            self.data.clear();
            self.head = 0;
        } else if self.head >= COMPACT_LIMIT {
            self.data.drain(..self.head);
            self.head = 0;
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
        self.head = 0;
    }

    /// Write the buffered data to the supplied writer, advancing the head.
    /// A zero-length write is surfaced as `WriteZero`.
    #[inline]
    pub fn egress<W: io::Write>(&mut self, mut writer: W) -> io::Result<usize> {
        let orig_len = self.len();

        while !self.is_empty() {
            let write_count = writer.write(self.read_slice())?;

            if write_count == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }

            self.consume(write_count);
        }

        Ok(orig_len)
    }
}

impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}
