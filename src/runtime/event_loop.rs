//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Everything runs on one thread. A readable session is read until the
//! socket would block; every complete line is dispatched as soon as it is
//! framed, and the resulting output is flushed before the next line. Output
//! a socket cannot take yet stays queued on the session, which then also
//! waits for writable readiness.

use crate::config::Config;
use crate::protocol::Reply;
use crate::runtime::buffer::Frame;
use crate::runtime::connection::{FlushStatus, Session, SessionRegistry};
use crate::runtime::notify;
use crate::runtime::request::{self, Action};
use crate::storage::Store;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// The friend server: listener, sessions and the social graph.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    sessions: SessionRegistry<TcpStream>,
    store: Store,
    events_capacity: usize,
    buffer_size: usize,
    max_args: usize,
    max_pending_output: usize,
}

impl Server {
    /// Bind the listening socket and set up an empty server.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let poll = Poll::new()?;
        let mut listener = TcpListener::from_std(create_listener(addr, config.backlog)?);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            listener,
            sessions: SessionRegistry::new(config.max_connections),
            store: Store::new(config.limits()),
            events_capacity: config.events_capacity,
            buffer_size: config.buffer_size,
            max_args: config.max_args,
            max_pending_output: config.max_pending_output,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the event loop. Only returns on a fatal error.
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(self.events_capacity);

        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "Poll failed");
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_connections()?,
                    Token(conn_id) => {
                        if let Err(e) = self.handle_connection_event(conn_id, event) {
                            debug!(conn_id, error = %e, "Connection error");
                            self.close_connection(conn_id);
                        }
                    }
                }
            }
        }
    }

    /// Accept every pending connection and greet it.
    fn accept_connections(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    let session = Session::new(stream, self.buffer_size);
                    let Some(conn_id) = self.sessions.insert(session) else {
                        warn!(peer = %peer_addr, "Connection limit reached, rejecting");
                        continue;
                    };

                    if let Err(e) = self.open_connection(conn_id) {
                        debug!(conn_id, error = %e, "Failed to open connection");
                        self.close_connection(conn_id);
                        continue;
                    }
                    debug!(
                        conn_id,
                        peer = %peer_addr,
                        sessions = self.sessions.len(),
                        "Accepted connection"
                    );
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn open_connection(&mut self, conn_id: usize) -> io::Result<()> {
        let conn = self
            .sessions
            .get_mut(conn_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;
        self.poll
            .registry()
            .register(&mut conn.stream, Token(conn_id), Interest::READABLE)?;
        conn.queue(Reply::prompt());
        self.flush_connection(conn_id)
    }

    fn handle_connection_event(
        &mut self,
        conn_id: usize,
        event: &mio::event::Event,
    ) -> io::Result<()> {
        if !self.sessions.contains(conn_id) {
            return Ok(());
        }

        if event.is_readable() || event.is_read_closed() {
            self.handle_readable(conn_id)?;
        }

        // Re-check connection exists (may have been removed)
        if !self.sessions.contains(conn_id) {
            return Ok(());
        }

        if event.is_writable() || event.is_write_closed() {
            self.flush_connection(conn_id)?;
        }

        Ok(())
    }

    /// Read until the socket would block, dispatching each complete line.
    fn handle_readable(&mut self, conn_id: usize) -> io::Result<()> {
        loop {
            if self.connection(conn_id)?.closing {
                return Ok(());
            }
            match self.connection(conn_id)?.fill_buffer() {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"));
                }
                Ok(_) => self.process_frames(conn_id)?,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Drain every complete frame from the connection's buffer.
    fn process_frames(&mut self, conn_id: usize) -> io::Result<()> {
        loop {
            let conn = self.connection(conn_id)?;
            if conn.closing {
                break;
            }
            let Some(frame) = conn.buffer.next_frame() else {
                break;
            };
            let actions = match frame {
                Frame::Line(line) => {
                    let state = self.connection(conn_id)?.state().clone();
                    request::process_line(&state, &line, &mut self.store, self.max_args)
                }
                Frame::Overflow => {
                    warn!(conn_id, "Discarded line longer than the receive buffer");
                    vec![Action::Reply(Reply::line_too_long().to_string())]
                }
            };
            self.apply(conn_id, actions)?;
        }
        Ok(())
    }

    /// Carry out the actions produced by one line, then flush every session
    /// that received output.
    ///
    /// Failing to flush another session closes only that session; an error
    /// for `conn_id` itself is returned.
    fn apply(&mut self, conn_id: usize, actions: Vec<Action>) -> io::Result<()> {
        let mut touched = Vec::new();
        let mut quit = false;

        for action in actions {
            match action {
                Action::Reply(message) => self.connection(conn_id)?.queue(&message),
                Action::Notify { user, message } => {
                    touched.extend(notify::notify(&mut self.sessions, &user, &message));
                }
                Action::Bind(name) => {
                    if self.sessions.bind(conn_id, &name) {
                        info!(conn_id, user = %name, "Session bound to user");
                    }
                }
                Action::Quit => {
                    quit = true;
                    break;
                }
            }
        }

        touched.sort_unstable();
        touched.dedup();
        for other in touched.into_iter().filter(|&id| id != conn_id) {
            if let Err(e) = self.flush_connection(other) {
                debug!(conn_id = other, error = %e, "Failed to deliver notification");
                self.close_connection(other);
            }
        }

        if quit {
            debug!(conn_id, "Client quit");
            self.connection(conn_id)?.closing = true;
        }
        self.flush_connection(conn_id)?;
        debug!(conn_id, "Processed line");
        Ok(())
    }

    /// Write queued output and keep writable interest in step with it.
    ///
    /// A closing session returns `ConnectionAborted` once its queue drains.
    fn flush_connection(&mut self, conn_id: usize) -> io::Result<()> {
        let max_pending_output = self.max_pending_output;
        let conn = self
            .sessions
            .get_mut(conn_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

        match conn.flush()? {
            FlushStatus::Drained => {
                if conn.closing {
                    return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "client quit"));
                }
                if conn.write_interest {
                    self.poll
                        .registry()
                        .reregister(&mut conn.stream, Token(conn_id), Interest::READABLE)?;
                    conn.write_interest = false;
                }
            }
            FlushStatus::Pending => {
                if conn.pending_output() > max_pending_output {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("output queue over {} bytes", max_pending_output),
                    ));
                }
                if !conn.write_interest {
                    self.poll.registry().reregister(
                        &mut conn.stream,
                        Token(conn_id),
                        Interest::READABLE | Interest::WRITABLE,
                    )?;
                    conn.write_interest = true;
                }
            }
        }
        Ok(())
    }

    fn connection(&mut self, conn_id: usize) -> io::Result<&mut Session<TcpStream>> {
        self.sessions
            .get_mut(conn_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))
    }

    fn close_connection(&mut self, conn_id: usize) {
        if let Some(mut conn) = self.sessions.remove(conn_id) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            debug!(conn_id, user = ?conn.username(), "Connection closed");
        }
    }
}

/// Create a non-blocking TCP listener with the given backlog.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
