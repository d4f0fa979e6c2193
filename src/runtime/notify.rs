//! Delivery of notifications to every session bound to a user.

use crate::runtime::connection::SessionRegistry;
use tracing::trace;

/// Queue `message` on every live session bound to `username`.
///
/// Returns the ids of the sessions that received it so the caller can
/// flush them. A user with no live session is not an error; the message is
/// simply dropped.
pub fn notify<S>(sessions: &mut SessionRegistry<S>, username: &str, message: &str) -> Vec<usize> {
    let targets = sessions.bound_to(username).to_vec();
    for &id in &targets {
        if let Some(session) = sessions.get_mut(id) {
            session.queue(message);
        }
    }
    trace!(user = username, sessions = targets.len(), "Queued notification");
    targets
}
