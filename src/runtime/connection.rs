//! Client sessions and the registry that tracks them.
//!
//! Each session owns its socket, its receive buffer and a queue of outbound
//! bytes, and records whether the username handshake has completed. The
//! registry allocates sessions in a slab (the slab key doubles as the mio
//! token) and keeps an index from username to the sessions bound to it.

use crate::protocol;
use crate::runtime::buffer::LineBuffer;
use bytes::{Buf, BytesMut};
use slab::Slab;
use std::collections::HashMap;
use std::io::{self, Read, Write};

/// Where a session is in the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// The next line is the username.
    AwaitingUsername,
    /// Handshake done; lines are commands issued as this user.
    Bound(String),
}

/// Outcome of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// Everything queued has been written.
    Drained,
    /// The socket would block with output still queued.
    Pending,
}

/// A single client connection.
#[derive(Debug)]
pub struct Session<S> {
    pub stream: S,
    /// Received bytes not yet framed into lines.
    pub buffer: LineBuffer,
    state: SessionState,
    /// Encoded lines waiting to be written.
    outbound: BytesMut,
    /// Registered for writable readiness as well as readable.
    pub write_interest: bool,
    /// The client quit; close once the output queue drains.
    pub closing: bool,
}

impl<S> Session<S> {
    /// Create a new session awaiting its username.
    pub fn new(stream: S, buffer_size: usize) -> Self {
        Self {
            stream,
            buffer: LineBuffer::new(buffer_size),
            state: SessionState::AwaitingUsername,
            outbound: BytesMut::new(),
            write_interest: false,
            closing: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Name of the bound user, if the handshake has completed.
    pub fn username(&self) -> Option<&str> {
        match &self.state {
            SessionState::Bound(name) => Some(name),
            SessionState::AwaitingUsername => None,
        }
    }

    /// Queue a message as CRLF-terminated lines.
    pub fn queue(&mut self, message: &str) {
        protocol::encode(message, &mut self.outbound);
    }

    /// Bytes queued but not yet written.
    pub fn pending_output(&self) -> usize {
        self.outbound.len()
    }
}

impl<S: Read> Session<S> {
    /// Read from the socket into the spare space of the receive buffer.
    ///
    /// `Ok(0)` means the peer closed the connection.
    pub fn fill_buffer(&mut self) -> io::Result<usize> {
        let n = self.stream.read(self.buffer.spare_mut())?;
        self.buffer.commit(n);
        Ok(n)
    }
}

impl<S: Write> Session<S> {
    /// Write queued output until it is drained or the socket would block.
    pub fn flush(&mut self) -> io::Result<FlushStatus> {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => self.outbound.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(FlushStatus::Pending)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(FlushStatus::Drained)
    }
}

/// Registry of live sessions.
///
/// Provides O(1) lookup by session id and by bound username.
#[derive(Debug)]
pub struct SessionRegistry<S> {
    sessions: Slab<Session<S>>,
    /// Username -> ids of the sessions bound to it, in binding order.
    by_user: HashMap<String, Vec<usize>>,
    max_sessions: usize,
}

impl<S> SessionRegistry<S> {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Slab::with_capacity(max_sessions.min(1024)),
            by_user: HashMap::new(),
            max_sessions,
        }
    }

    /// Insert a new session.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, session: Session<S>) -> Option<usize> {
        if self.sessions.len() >= self.max_sessions {
            return None;
        }
        Some(self.sessions.insert(session))
    }

    #[cfg(test)]
    pub fn get(&self, id: usize) -> Option<&Session<S>> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Session<S>> {
        self.sessions.get_mut(id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.sessions.contains(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Bind a session to a username.
    ///
    /// A session binds at most once; returns `false` if it is unknown or
    /// already bound.
    pub fn bind(&mut self, id: usize, username: &str) -> bool {
        let Some(session) = self.sessions.get_mut(id) else {
            return false;
        };
        if session.state != SessionState::AwaitingUsername {
            return false;
        }
        session.state = SessionState::Bound(username.to_string());
        self.by_user.entry(username.to_string()).or_default().push(id);
        true
    }

    /// Ids of the sessions currently bound to `username`.
    pub fn bound_to(&self, username: &str) -> &[usize] {
        match self.by_user.get(username) {
            Some(ids) => ids,
            None => &[],
        }
    }

    /// Remove a session, unlinking it from the username index.
    pub fn remove(&mut self, id: usize) -> Option<Session<S>> {
        let session = self.sessions.try_remove(id)?;
        if let Some(name) = session.username() {
            if let Some(ids) = self.by_user.get_mut(name) {
                ids.retain(|&other| other != id);
                if ids.is_empty() {
                    self.by_user.remove(name);
                }
            }
        }
        Some(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Accepts `limit` bytes, then reports `WouldBlock`.
    struct Throttled {
        written: Vec<u8>,
        limit: usize,
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.limit - self.written.len();
            if room == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = room.min(buf.len());
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_session_bind_once() {
        let mut registry = SessionRegistry::new(4);
        let id = registry.insert(Session::new((), 64)).unwrap();

        assert_eq!(registry.get(id).unwrap().username(), None);
        assert!(registry.bind(id, "alice"));
        assert_eq!(registry.get(id).unwrap().username(), Some("alice"));

        assert!(!registry.bind(id, "bob"));
        assert_eq!(registry.get(id).unwrap().username(), Some("alice"));
        assert!(registry.bound_to("bob").is_empty());
        assert!(!registry.bind(99, "bob"));
    }

    #[test]
    fn test_registry_capacity() {
        let mut registry = SessionRegistry::new(2);
        let id1 = registry.insert(Session::new((), 64)).unwrap();
        registry.insert(Session::new((), 64)).unwrap();
        assert!(registry.insert(Session::new((), 64)).is_none());

        registry.remove(id1);
        assert!(!registry.contains(id1));
        assert_eq!(registry.len(), 1);
        assert!(registry.insert(Session::new((), 64)).is_some());
    }

    #[test]
    fn test_username_index() {
        let mut registry = SessionRegistry::new(8);
        let a1 = registry.insert(Session::new((), 64)).unwrap();
        let b = registry.insert(Session::new((), 64)).unwrap();
        let a2 = registry.insert(Session::new((), 64)).unwrap();
        let unbound = registry.insert(Session::new((), 64)).unwrap();

        registry.bind(a1, "alice");
        registry.bind(b, "bob");
        registry.bind(a2, "alice");

        assert_eq!(registry.bound_to("alice"), &[a1, a2]);
        assert_eq!(registry.bound_to("bob"), &[b]);

        registry.remove(a1);
        assert_eq!(registry.bound_to("alice"), &[a2]);
        registry.remove(a2);
        assert!(registry.bound_to("alice").is_empty());

        assert!(registry.remove(unbound).is_some());
        assert!(registry.remove(unbound).is_none());
        assert_eq!(registry.bound_to("bob"), &[b]);
    }

    #[test]
    fn test_fill_buffer() {
        let mut session = Session::new(Cursor::new(b"hi\r\n".to_vec()), 64);
        assert_eq!(session.fill_buffer().unwrap(), 4);
        assert_eq!(session.buffer.pending(), b"hi\r\n");
        assert_eq!(session.fill_buffer().unwrap(), 0);
    }

    #[test]
    fn test_flush_drains() {
        let mut session = Session::new(Vec::new(), 64);
        session.queue("Welcome!");
        session.queue("a\nb\n");
        assert_eq!(session.pending_output(), 16);

        assert_eq!(session.flush().unwrap(), FlushStatus::Drained);
        assert_eq!(session.stream, b"Welcome!\r\na\r\nb\r\n");
        assert_eq!(session.pending_output(), 0);
    }

    #[test]
    fn test_flush_would_block_keeps_remainder() {
        let stream = Throttled {
            written: Vec::new(),
            limit: 4,
        };
        let mut session = Session::new(stream, 64);
        session.queue("Welcome!");

        assert_eq!(session.flush().unwrap(), FlushStatus::Pending);
        assert_eq!(session.stream.written, b"Welc");
        assert_eq!(session.pending_output(), 6);

        session.stream.limit = 64;
        assert_eq!(session.flush().unwrap(), FlushStatus::Drained);
        assert_eq!(session.stream.written, b"Welcome!\r\n");
    }

    #[test]
    fn test_flush_error() {
        let mut session = Session::new(Broken, 64);
        session.queue("x");
        assert!(session.flush().is_err());

        // Nothing queued, nothing written
        let mut idle = Session::new(Broken, 64);
        assert_eq!(idle.flush().unwrap(), FlushStatus::Drained);
    }
}
