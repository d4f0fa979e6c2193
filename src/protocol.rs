//! Friend protocol command parser and reply text.
//!
//! Every message in either direction is a text line terminated by CRLF.
//! After the username handshake a client sends commands:
//! - `quit`
//! - `list_users`
//! - `make_friends <name>`
//! - `post <name> <words...>`
//! - `profile <name>`

use bytes::BytesMut;
use thiserror::Error;

/// Parsed client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// End the session
    Quit,

    /// List every registered user
    ListUsers,

    /// Befriend another user
    MakeFriends { name: String },

    /// Post a message to a friend's profile
    Post { target: String, contents: String },

    /// Show a user's profile
    Profile { name: String },
}

/// Command parsing errors. `Display` is the reply sent to the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Too many arguments!")]
    TooManyArguments,

    #[error("Incorrect syntax")]
    IncorrectSyntax,
}

/// Parser for command lines
pub struct Parser;

impl Parser {
    /// Parse one command line (terminator already stripped).
    ///
    /// Returns `Ok(None)` for a blank line. More than `max_args` tokens is
    /// rejected before the command name is looked at.
    pub fn parse(line: &str, max_args: usize) -> Result<Option<Command>, ParseError> {
        let mut parts = Vec::with_capacity(max_args);
        for token in line.split_ascii_whitespace() {
            if parts.len() >= max_args {
                return Err(ParseError::TooManyArguments);
            }
            parts.push(token);
        }

        let command = match parts.as_slice() {
            [] => return Ok(None),
            ["quit"] => Command::Quit,
            ["list_users"] => Command::ListUsers,
            ["make_friends", name] => Command::MakeFriends {
                name: name.to_string(),
            },
            ["post", target, words @ ..] if !words.is_empty() => Command::Post {
                target: target.to_string(),
                contents: words.join(" "),
            },
            ["profile", name] => Command::Profile {
                name: name.to_string(),
            },
            _ => return Err(ParseError::IncorrectSyntax),
        };
        Ok(Some(command))
    }
}

/// Reply and notification text.
///
/// Messages are plain text, possibly spanning several `\n`-separated lines;
/// `encode` turns them into wire lines.
pub struct Reply;

impl Reply {
    /// Sent as soon as a connection is accepted
    pub fn prompt() -> &'static str {
        "Please enter your username:"
    }

    pub fn welcome() -> &'static str {
        "Welcome!"
    }

    pub fn welcome_back() -> &'static str {
        "Welcome Back!"
    }

    pub fn ready() -> &'static str {
        "You may enter user commands now:"
    }

    pub fn username_truncated(len: usize) -> String {
        format!("Username too long, truncated to {} characters.", len)
    }

    pub fn user_not_found() -> &'static str {
        "user not found"
    }

    /// Sent after a line that did not fit in the receive buffer was dropped
    pub fn line_too_long() -> &'static str {
        "Line too long, discarded."
    }

    pub fn now_friends(name: &str) -> String {
        format!("You are now friends with {}!", name)
    }

    pub fn message_from(author: &str, contents: &str) -> String {
        format!("Message from {}: {}", author, contents)
    }
}

/// Append `message` to `out` as CRLF-terminated lines.
///
/// Each `\n`-separated line of the message becomes its own wire line; a
/// trailing `\n` does not produce an extra empty line.
pub fn encode(message: &str, out: &mut BytesMut) {
    for line in message.split_terminator('\n') {
        out.reserve(line.len() + 2);
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}
