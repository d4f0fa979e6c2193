//! friend-server: a tiny social network over a line protocol
//!
//! Clients connect over TCP, pick a username and then:
//! - list every registered user
//! - befriend other users (up to a fixed number of friends)
//! - post messages to a friend's profile
//! - view profiles
//!
//! Friends are notified live on every session bound to their username.
//! All state is held in memory for the lifetime of the process.

mod config;
mod protocol;
mod runtime;
mod storage;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        buffer_size = config.buffer_size,
        max_name = config.max_name,
        max_friends = config.max_friends,
        "Starting friend-server"
    );

    runtime::run(config)?;
    Ok(())
}
