//! Lines typed into an interactive `join` session.
//!
//! Plain text is shouted to the current plane; lines starting with `/`
//! are commands.

use crate::infrastructure::{CliError, Result};
use omniverse_p2p::{PeerId, PlaneId};
use serde_json::Value;

/// Scope used for plain chat lines
pub const SHOUT_SCOPE: &str = "shout";

#[derive(Debug, Clone, PartialEq)]
pub enum InputCommand {
    Shout(String),
    Peers,
    Offers,
    Connect(PeerId),
    Call {
        peer: PeerId,
        method: String,
        payload: Value,
    },
    Enter(PlaneId),
    Leave(PlaneId),
    Ping(String),
    Help,
    Quit,
}

impl InputCommand {
    /// `Ok(None)` for blank lines
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(command) = line.strip_prefix('/') else {
            return Ok(Some(InputCommand::Shout(line.to_string())));
        };

        let mut words = command.splitn(2, char::is_whitespace);
        let name = words.next().unwrap_or_default();
        let rest = words.next().map(str::trim).unwrap_or_default();

        let parsed = match name {
            "peers" => InputCommand::Peers,
            "offers" => InputCommand::Offers,
            "connect" => InputCommand::Connect(required(rest, "/connect <peer>")?.into()),
            "call" => {
                let mut parts = rest.splitn(3, char::is_whitespace);
                let peer = required(parts.next().unwrap_or_default(), "/call <peer> <method>")?;
                let method = required(parts.next().unwrap_or_default(), "/call <peer> <method>")?;
                InputCommand::Call {
                    peer: peer.into(),
                    method: method.to_string(),
                    payload: parse_payload(parts.next().unwrap_or_default()),
                }
            }
            "enter" => InputCommand::Enter(required(rest, "/enter <plane>")?.into()),
            "leave" => InputCommand::Leave(required(rest, "/leave <plane>")?.into()),
            "ping" => InputCommand::Ping(if rest.is_empty() { "lub" } else { rest }.to_string()),
            "help" | "?" => InputCommand::Help,
            "quit" | "exit" => InputCommand::Quit,
            other => return Err(CliError::invalid_command(format!("unknown command /{other}"))),
        };
        Ok(Some(parsed))
    }
}

fn required<'a>(value: &'a str, usage: &str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        Err(CliError::invalid_command(format!("usage: {usage}")))
    } else {
        Ok(value)
    }
}

/// JSON when it parses, otherwise the raw text as a string
fn parse_payload(text: &str) -> Value {
    let text = text.trim();
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

pub const HELP: &str = "\
  <text>                      shout to the current plane
  /peers                      list known peers
  /offers                     show connection offers
  /connect <peer>             open a direct connection
  /call <peer> <method> [json] call a remote procedure
  /enter <plane>              enter a plane
  /leave <plane>              leave a plane
  /ping [memo]                heartbeat the relay
  /quit                       leave";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_text_is_a_shout() {
        assert_eq!(
            InputCommand::parse("  hello there ").unwrap(),
            Some(InputCommand::Shout("hello there".to_string()))
        );
        assert_eq!(InputCommand::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_call_payload() {
        assert_eq!(
            InputCommand::parse("/call bob sum [1, 2]").unwrap(),
            Some(InputCommand::Call {
                peer: PeerId::from("bob"),
                method: "sum".to_string(),
                payload: json!([1, 2]),
            })
        );
        assert_eq!(
            InputCommand::parse("/call bob echo not json").unwrap(),
            Some(InputCommand::Call {
                peer: PeerId::from("bob"),
                method: "echo".to_string(),
                payload: json!("not json"),
            })
        );
        assert_eq!(
            InputCommand::parse("/call bob ping").unwrap(),
            Some(InputCommand::Call {
                peer: PeerId::from("bob"),
                method: "ping".to_string(),
                payload: Value::Null,
            })
        );
    }

    #[test]
    fn test_missing_arguments() {
        assert!(matches!(
            InputCommand::parse("/connect"),
            Err(CliError::InvalidCommand(_))
        ));
        assert!(matches!(
            InputCommand::parse("/call bob"),
            Err(CliError::InvalidCommand(_))
        ));
        assert!(matches!(
            InputCommand::parse("/dance"),
            Err(CliError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_ping_default_memo() {
        assert_eq!(
            InputCommand::parse("/ping").unwrap(),
            Some(InputCommand::Ping("lub".to_string()))
        );
        assert_eq!(
            InputCommand::parse("/enter red").unwrap(),
            Some(InputCommand::Enter(PlaneId::from("red")))
        );
    }
}
