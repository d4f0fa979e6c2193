//! Single-threaded runtime for the friend server.
//!
//! A mio readiness loop (epoll on Linux, kqueue on macOS) drives every
//! session:
//! - `LineBuffer`: per-session receive buffer and CRLF framing
//! - `Session` / `SessionRegistry`: connection state, keyed by token and username
//! - `request`: line dispatch against the social graph
//! - `notify`: fan-out to every session of a user

mod buffer;
mod connection;
mod event_loop;
mod notify;
mod request;

pub use event_loop::Server;

use crate::config::Config;
use tracing::info;

/// Bind the configured address and serve until a fatal error.
pub fn run(config: Config) -> std::io::Result<()> {
    let server = Server::bind(&config)?;
    info!(
        addr = %server.local_addr()?,
        backlog = config.backlog,
        max_connections = config.max_connections,
        "Listening"
    );
    server.run()
}
