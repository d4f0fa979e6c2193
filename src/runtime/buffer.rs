//! Per-session receive buffer and CRLF line framing.
//!
//! Each session owns one fixed-capacity `LineBuffer`. Socket reads land in
//! the spare space after the unconsumed bytes; complete lines are taken from
//! the front and the remainder is shifted back to the start of the buffer.
//!
//! ## Overflow
//!
//! A buffer that fills up without a CRLF cannot make progress. Its contents
//! are dropped and the buffer discards input until the next CRLF, at which
//! point it yields a single `Frame::Overflow`.

/// One framing result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line without its terminator.
    Line(String),
    /// A line longer than the buffer was dropped.
    Overflow,
}

/// Fixed-capacity line buffer.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Box<[u8]>,
    /// Number of valid bytes at the start of `buf`.
    filled: usize,
    /// Dropping input until the end of an oversized line.
    discarding: bool,
}

impl LineBuffer {
    /// Create a buffer holding up to `capacity` bytes.
    ///
    /// # Panics
    /// Panics if `capacity < 3`, which could not hold a line plus CRLF.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 3, "line buffer capacity must be at least 3");
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            filled: 0,
            discarding: false,
        }
    }

    /// Bytes received but not yet framed.
    pub fn pending(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.buf.len()
    }

    /// Space available for the next read.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.filled..]
    }

    /// Record that `n` bytes were written into `spare_mut()`.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.filled + n <= self.buf.len(), "commit past capacity");
        self.filled += n;
    }

    /// Copy as much of `data` as fits; returns the number of bytes taken.
    #[cfg(test)]
    pub fn extend(&mut self, data: &[u8]) -> usize {
        let spare = self.spare_mut();
        let n = spare.len().min(data.len());
        spare[..n].copy_from_slice(&data[..n]);
        self.commit(n);
        n
    }

    /// Take the next frame, if one is complete.
    ///
    /// Returning `None` guarantees there is spare room for another read.
    pub fn next_frame(&mut self) -> Option<Frame> {
        if let Some(pos) = find_crlf(self.pending()) {
            let frame = if self.discarding {
                self.discarding = false;
                Frame::Overflow
            } else {
                Frame::Line(String::from_utf8_lossy(&self.buf[..pos]).into_owned())
            };
            self.consume(pos + 2);
            return Some(frame);
        }

        if self.is_full() {
            // Keep a trailing CR: its LF may be in the next read.
            let keep = usize::from(self.buf[self.filled - 1] == b'\r');
            self.consume(self.filled - keep);
            self.discarding = true;
        }
        None
    }

    /// Drop the first `n` bytes, shifting the rest to the front.
    fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.filled);
        self.buf.copy_within(n..self.filled, 0);
        self.filled -= n;
    }
}

/// Find \r\n in buffer, returning the position of \r.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}
