//! Console command grammars, table-driven.
//!
//! Each console owns a static table of [`CommandDef`]s: name, arity, and
//! a build function that validates the argument and produces the typed
//! command. Bare command words match case-insensitively; parameterized
//! ones match their name exactly.
//!
//! Resolution never executes anything; the binaries interpret the typed
//! command against their own state.

use crate::MARKER;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Line does not start with the marker; route it as chat.
    NotACommand,
    Unknown(String),
    Usage(&'static str),
    BadPort(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::NotACommand => write!(f, "not a command"),
            CommandError::Unknown(word) => write!(f, "unknown command: {word}"),
            CommandError::Usage(usage) => write!(f, "usage: {usage}"),
            CommandError::BadPort(value) => write!(f, "invalid port number: {value}"),
        }
    }
}

impl std::error::Error for CommandError {}

pub struct CommandDef<C> {
    pub name: &'static str,
    pub usage: &'static str,
    /// Parameterized commands take exactly one value token.
    pub takes_value: bool,
    pub build: fn(&str) -> Result<C, CommandError>,
}

/// Client console grammar. The bare `#login` here (reconnect with the
/// configured id) is deliberately distinct from the wire handshake
/// `#login <id>` in [`crate::wire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Quit,
    Logoff,
    SetHost(String),
    SetPort(u16),
    Login,
    GetHost,
    GetPort,
}

pub const CLIENT_COMMANDS: &[CommandDef<ClientCommand>] = &[
    CommandDef {
        name: "#quit",
        usage: "#quit",
        takes_value: false,
        build: |_| Ok(ClientCommand::Quit),
    },
    CommandDef {
        name: "#logoff",
        usage: "#logoff",
        takes_value: false,
        build: |_| Ok(ClientCommand::Logoff),
    },
    CommandDef {
        name: "#sethost",
        usage: "#sethost <host>",
        takes_value: true,
        build: |v| Ok(ClientCommand::SetHost(v.to_string())),
    },
    CommandDef {
        name: "#setport",
        usage: "#setport <port>",
        takes_value: true,
        build: |v| Ok(ClientCommand::SetPort(parse_port(v)?)),
    },
    CommandDef {
        name: "#login",
        usage: "#login",
        takes_value: false,
        build: |_| Ok(ClientCommand::Login),
    },
    CommandDef {
        name: "#gethost",
        usage: "#gethost",
        takes_value: false,
        build: |_| Ok(ClientCommand::GetHost),
    },
    CommandDef {
        name: "#getport",
        usage: "#getport",
        takes_value: false,
        build: |_| Ok(ClientCommand::GetPort),
    },
];

/// Server console grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    Quit,
    Stop,
    Close,
    SetPort(u16),
    Start,
    GetPort,
}

pub const SERVER_COMMANDS: &[CommandDef<ServerCommand>] = &[
    CommandDef {
        name: "#quit",
        usage: "#quit",
        takes_value: false,
        build: |_| Ok(ServerCommand::Quit),
    },
    CommandDef {
        name: "#stop",
        usage: "#stop",
        takes_value: false,
        build: |_| Ok(ServerCommand::Stop),
    },
    CommandDef {
        name: "#close",
        usage: "#close",
        takes_value: false,
        build: |_| Ok(ServerCommand::Close),
    },
    CommandDef {
        name: "#setport",
        usage: "#setport <port>",
        takes_value: true,
        build: |v| Ok(ServerCommand::SetPort(parse_port(v)?)),
    },
    CommandDef {
        name: "#start",
        usage: "#start",
        takes_value: false,
        build: |_| Ok(ServerCommand::Start),
    },
    CommandDef {
        name: "#getport",
        usage: "#getport",
        takes_value: false,
        build: |_| Ok(ServerCommand::GetPort),
    },
];

fn parse_port(value: &str) -> Result<u16, CommandError> {
    value
        .parse()
        .map_err(|_| CommandError::BadPort(value.to_string()))
}

/// Resolve one console line against a grammar table.
pub fn resolve<C>(table: &[CommandDef<C>], line: &str) -> Result<C, CommandError> {
    if !line.starts_with(MARKER) {
        return Err(CommandError::NotACommand);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let Some(def) = table.iter().find(|d| {
        if d.takes_value {
            d.name == word
        } else {
            d.name.eq_ignore_ascii_case(word)
        }
    }) else {
        return Err(CommandError::Unknown(word.to_string()));
    };

    if !def.takes_value {
        if !rest.is_empty() {
            return Err(CommandError::Usage(def.usage));
        }
        return (def.build)("");
    }

    let mut tokens = rest.split_whitespace();
    let (Some(value), None) = (tokens.next(), tokens.next()) else {
        return Err(CommandError::Usage(def.usage));
    };
    (def.build)(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_commands_ignore_case() {
        assert_eq!(
            resolve(CLIENT_COMMANDS, "#quit"),
            Ok(ClientCommand::Quit)
        );
        assert_eq!(
            resolve(CLIENT_COMMANDS, "#QUIT"),
            Ok(ClientCommand::Quit)
        );
        assert_eq!(
            resolve(SERVER_COMMANDS, "#Close"),
            Ok(ServerCommand::Close)
        );
    }

    #[test]
    fn parameterized_commands_are_case_sensitive() {
        assert_eq!(
            resolve(CLIENT_COMMANDS, "#sethost example.org"),
            Ok(ClientCommand::SetHost("example.org".to_string()))
        );
        assert_eq!(
            resolve(CLIENT_COMMANDS, "#SETHOST example.org"),
            Err(CommandError::Unknown("#SETHOST".to_string()))
        );
    }

    #[test]
    fn port_is_validated_in_the_table() {
        assert_eq!(
            resolve(SERVER_COMMANDS, "#setport 9999"),
            Ok(ServerCommand::SetPort(9999))
        );
        assert_eq!(
            resolve(SERVER_COMMANDS, "#setport nope"),
            Err(CommandError::BadPort("nope".to_string()))
        );
        assert_eq!(
            resolve(SERVER_COMMANDS, "#setport 70000"),
            Err(CommandError::BadPort("70000".to_string()))
        );
    }

    #[test]
    fn arity_is_enforced() {
        assert_eq!(
            resolve(SERVER_COMMANDS, "#setport"),
            Err(CommandError::Usage("#setport <port>"))
        );
        assert_eq!(
            resolve(SERVER_COMMANDS, "#setport 1 2"),
            Err(CommandError::Usage("#setport <port>"))
        );
        // Console `#login` is bare; a trailing id is not forwarded to the
        // wire, it is a usage error.
        assert_eq!(
            resolve(CLIENT_COMMANDS, "#login bob"),
            Err(CommandError::Usage("#login"))
        );
        assert_eq!(
            resolve(CLIENT_COMMANDS, "#login"),
            Ok(ClientCommand::Login)
        );
    }

    #[test]
    fn unknown_and_chat() {
        assert_eq!(
            resolve(SERVER_COMMANDS, "#frobnicate now"),
            Err(CommandError::Unknown("#frobnicate".to_string()))
        );
        assert_eq!(
            resolve(SERVER_COMMANDS, "hello everyone"),
            Err(CommandError::NotACommand)
        );
        // Client grammar does not know the server's commands.
        assert_eq!(
            resolve(CLIENT_COMMANDS, "#start"),
            Err(CommandError::Unknown("#start".to_string()))
        );
    }
}
