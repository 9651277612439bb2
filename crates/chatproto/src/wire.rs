//! Line formats that cross the network.
//!
//! The only structured payload is the login handshake; everything else is
//! either chat (no leading `#`) or a human-readable notice the server
//! pushes to a connection.

use crate::MARKER;

/// The handshake command word. On the wire `#login` is parameterized
/// (`#login <id>`); the client console's bare `#login` is a different
/// grammar and lives in [`crate::command`].
pub const LOGIN_WORD: &str = "#login";

/// Prefix for operator chat broadcast from the server console.
pub const SERVER_TAG: &str = "SERVER MSG>";

pub const ERR_LOGIN_FIRST: &str = "error: log in before chatting";
pub const ERR_DUPLICATE_LOGIN: &str = "error: already logged in";
pub const ERR_EMPTY_LOGIN: &str = "error: login id must not be empty";

/// True if the line is a command of either grammar rather than chat.
pub fn is_command(line: &str) -> bool {
    line.starts_with(MARKER)
}

/// Parse a `#login <id>` handshake line.
///
/// Returns the identifier trimmed, possibly empty; empty is a protocol
/// violation the caller rejects. `None` if the line is not a login at
/// all. The command word must be exactly `#login`, so `#loginabc` is not
/// a handshake attempt.
pub fn parse_login(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(LOGIN_WORD)?;
    match rest.chars().next() {
        None => Some(""),
        Some(c) if c.is_whitespace() => Some(rest.trim()),
        Some(_) => None,
    }
}

pub fn login_line(id: &str) -> String {
    format!("{LOGIN_WORD} {id}")
}

/// Broadcast form of one chat message: `<sender> > <body>`.
pub fn chat_line(sender: &str, body: &str) -> String {
    format!("{sender} > {body}")
}

/// Broadcast form of operator chat: no identity, fixed tag, body verbatim.
pub fn server_line(body: &str) -> String {
    format!("{SERVER_TAG} {body}")
}

pub fn logon_notice(id: &str) -> String {
    format!("{id} has logged on.")
}

pub fn logoff_notice(id: &str) -> String {
    format!("{id} has logged off.")
}

pub fn disconnect_notice(id: &str) -> String {
    format!("{id} has disconnected.")
}

pub fn unknown_command_notice(word: &str) -> String {
    format!("error: unknown command: {word}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_parses_and_trims() {
        assert_eq!(parse_login("#login alice"), Some("alice"));
        assert_eq!(parse_login("#login   alice  "), Some("alice"));
        assert_eq!(parse_login("#login"), Some(""));
        assert_eq!(parse_login("#login  "), Some(""));
    }

    #[test]
    fn login_requires_word_boundary() {
        assert_eq!(parse_login("#loginalice"), None);
        assert_eq!(parse_login("#log in alice"), None);
        assert_eq!(parse_login("hello"), None);
        // Bare commands are case-insensitive, but the wire handshake word
        // is fixed; `#LOGIN` is not a handshake.
        assert_eq!(parse_login("#LOGIN alice"), None);
    }

    #[test]
    fn line_formats() {
        assert_eq!(chat_line("alice", "hello"), "alice > hello");
        assert_eq!(server_line("back in 5"), "SERVER MSG> back in 5");
        assert_eq!(logon_notice("alice"), "alice has logged on.");
        assert_eq!(login_line("bob"), "#login bob");
    }

    #[test]
    fn command_marker() {
        assert!(is_command("#quit"));
        assert!(!is_command("quit"));
        assert!(!is_command(" #quit"));
    }
}
