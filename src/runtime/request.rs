//! Request dispatch for the event loop.
//!
//! Turns one decoded line into an ordered list of actions against the
//! store. The event loop carries the actions out: replies go to the
//! session that sent the line, notifications to every session bound to the
//! named user. Nothing here touches a socket.

use crate::protocol::{Command, Parser, Reply};
use crate::runtime::connection::SessionState;
use crate::storage::Store;
use tracing::{debug, warn};

/// Something the event loop must do after a line is processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send text to the invoking session.
    Reply(String),
    /// Send text to every session bound to `user`.
    Notify { user: String, message: String },
    /// Bind the invoking session to this username.
    Bind(String),
    /// Close the invoking session.
    Quit,
}

/// Process one line from a session in the given state.
pub fn process_line(
    state: &SessionState,
    line: &str,
    store: &mut Store,
    max_args: usize,
) -> Vec<Action> {
    match state {
        SessionState::AwaitingUsername => process_username(line, store),
        SessionState::Bound(username) => process_command(username, line, store, max_args),
    }
}

/// Handshake: resolve or register the username.
fn process_username(line: &str, store: &mut Store) -> Vec<Action> {
    let max_name = store.limits().max_name;
    let mut actions = Vec::with_capacity(4);

    let mut name = line;
    if name.len() >= max_name {
        name = truncate(name, max_name - 1);
        actions.push(Action::Reply(Reply::username_truncated(name.len())));
    }

    if store.find_user(name).is_some() {
        actions.push(Action::Reply(Reply::welcome_back().to_string()));
    } else {
        match store.create_user(name) {
            Ok(id) => {
                debug!(name, id, users = store.len(), "Registered user");
                actions.push(Action::Reply(Reply::welcome().to_string()));
            }
            Err(e) => {
                warn!(name, error = %e, "Failed to register user");
                actions.push(Action::Reply(e.to_string()));
                return actions;
            }
        }
    }

    actions.push(Action::Reply(Reply::ready().to_string()));
    actions.push(Action::Bind(name.to_string()));
    actions
}

/// Execute a command issued by `username`.
fn process_command(username: &str, line: &str, store: &mut Store, max_args: usize) -> Vec<Action> {
    let command = match Parser::parse(line, max_args) {
        Ok(Some(command)) => command,
        Ok(None) => return Vec::new(),
        Err(e) => {
            debug!(user = username, error = %e, "Rejected command");
            return vec![Action::Reply(e.to_string())];
        }
    };

    match command {
        Command::Quit => vec![Action::Quit],

        Command::ListUsers => vec![Action::Reply(store.list_users())],

        Command::MakeFriends { name } => match store.make_friends(username, &name) {
            Ok(()) => vec![
                Action::Notify {
                    user: name.clone(),
                    message: Reply::now_friends(username),
                },
                Action::Notify {
                    user: username.to_string(),
                    message: Reply::now_friends(&name),
                },
            ],
            Err(e) => vec![Action::Reply(e.to_string())],
        },

        Command::Post { target, contents } => {
            let message = Reply::message_from(username, &contents);
            match store.make_post(username, &target, contents) {
                Ok(()) => vec![Action::Notify {
                    user: target,
                    message,
                }],
                Err(e) => vec![Action::Reply(e.to_string())],
            }
        }

        Command::Profile { name } => {
            let text = store
                .profile(&name)
                .unwrap_or_else(|| Reply::user_not_found().to_string());
            vec![Action::Reply(text)]
        }
    }
}

/// Cut `s` to at most `max` bytes without splitting a character.
fn truncate(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
