//! The closed action vocabulary and its wire form.
//!
//! Peers exchange actions as a verb plus a list of loosely typed parameters, so that an
//! older peer can still carry a verb it does not understand. Locally every action is an
//! [`Action`] variant; a verb nobody recognises becomes [`Action::Unknown`] and runs through
//! the "no such action" path instead of failing to decode.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ChessError;
use crate::network::codec;
use crate::rules::Coord;
use crate::{ParticipantId, Player};

/// One loosely typed action parameter as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Param {
    /// Free text. Numbers and squares typed as text are coerced when the action is decoded.
    Text(String),
    /// A signed integer.
    Int(i64),
    /// A board square.
    Square(Coord),
    /// Opaque bytes, carried through untouched.
    Bytes(Vec<u8>),
}

impl Param {
    fn as_text(&self) -> Option<&str> {
        match self {
            Param::Text(text) => Some(text),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Param::Int(n) => Some(*n),
            Param::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_square(&self) -> Option<Coord> {
        match self {
            Param::Square(c) => Some(*c),
            Param::Text(text) => text.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Text(text) => f.write_str(text),
            Param::Int(n) => write!(f, "{}", n),
            Param::Square(c) => write!(f, "{}", c),
            Param::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

/// The wire form of an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WireAction {
    /// Lower-case verb such as `move` or `nick`.
    pub verb: String,
    /// Positional parameters.
    pub params: Vec<Param>,
}

/// Every action a participant can put into the ledger.
///
/// Actions serialize through [`WireAction`], so the encoded form is stable even when new
/// variants are added.
///
/// ```
/// use lockstep_chess::{Action, Coord};
///
/// let action = Action::parse_command("/move 1,0 2,2").unwrap();
/// assert_eq!(action, Action::Move { src: Coord::new(1, 0), dst: Coord::new(2, 2) });
/// assert!(action.is_quiet());
///
/// let chat = Action::parse_command("good luck").unwrap();
/// assert_eq!(chat, Action::Msg { text: "good luck".to_owned() });
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "WireAction", from = "WireAction")]
pub enum Action {
    /// Move the piece on `src` to `dst`.
    Move {
        /// Source square.
        src: Coord,
        /// Destination square.
        dst: Coord,
    },
    /// Start a fresh match, optionally with a different number of boards.
    Reset {
        /// Boards for the new match; `None` keeps the current count.
        num_boards: Option<u8>,
    },
    /// Take a seat, or leave it to spectate.
    Become {
        /// The seat to take; `None` means spectator.
        player: Option<Player>,
    },
    /// A chat line.
    Msg {
        /// What was said.
        text: String,
    },
    /// Change the name shown for this participant.
    Nick {
        /// The new name.
        name: String,
    },
    /// Show the credits.
    Credits,
    /// List the commands.
    Help,
    /// Concede: the participant's King counts as captured.
    Surrender,
    /// Replay the match so far, then resume live play.
    Replay,
    /// Stop watching a replay. Never enters the ledger.
    EndReplay,
    /// Admit a joining peer. Queued by the peer that received its hello.
    Welcome {
        /// The joiner's address, as text.
        peer: String,
        /// The joiner's participant ID.
        participant: ParticipantId,
        /// Boards for the fresh match every peer starts, the joiner included.
        num_boards: u8,
        /// The welcoming peer's other peers, so the joiner can reach them too.
        roster: Vec<String>,
    },
    /// A verb this build does not know, or a known verb with parameters it cannot read.
    Unknown {
        /// The verb as received.
        verb: String,
        /// The parameters as received.
        params: Vec<Param>,
    },
}

/// Verbs with a dedicated variant.
const KNOWN_VERBS: [&str; 11] = [
    "move",
    "reset",
    "become",
    "msg",
    "nick",
    "credits",
    "help",
    "surrender",
    "replay",
    "endreplay",
    "welcome",
];

impl Action {
    /// The verb this action travels under.
    #[must_use]
    pub fn verb(&self) -> &str {
        match self {
            Action::Move { .. } => "move",
            Action::Reset { .. } => "reset",
            Action::Become { .. } => "become",
            Action::Msg { .. } => "msg",
            Action::Nick { .. } => "nick",
            Action::Credits => "credits",
            Action::Help => "help",
            Action::Surrender => "surrender",
            Action::Replay => "replay",
            Action::EndReplay => "endreplay",
            Action::Welcome { .. } => "welcome",
            Action::Unknown { verb, .. } => verb,
        }
    }

    /// Quiet actions do not get the default "did VERB" message when their handler says nothing.
    #[must_use]
    pub const fn is_quiet(&self) -> bool {
        matches!(
            self,
            Action::Move { .. }
                | Action::Become { .. }
                | Action::Msg { .. }
                | Action::Nick { .. }
                | Action::Welcome { .. }
        )
    }

    /// Bytes the action takes up inside a window packet.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        codec::encode(self).map_or(usize::MAX, |bytes| bytes.len())
    }

    /// Whether the verb has a dedicated variant. `Unknown` actions with a known verb carried
    /// parameters that could not be read.
    #[must_use]
    pub fn is_known_verb(verb: &str) -> bool {
        KNOWN_VERBS.contains(&verb)
    }

    /// Parses a typed command line.
    ///
    /// Lines starting with `/` are `/verb arg…`; anything else is a chat message.
    pub fn parse_command(line: &str) -> Result<Action, ChessError> {
        let line = line.trim();
        let Some(command) = line.strip_prefix('/') else {
            return Ok(Action::Msg {
                text: line.to_owned(),
            });
        };
        let (verb, rest) = match command.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (command, ""),
        };
        let verb = verb.to_lowercase();
        let args: Vec<&str> = rest.split_whitespace().collect();
        let bad = |what: &str| ChessError::InvalidRequest {
            info: format!("/{} {}", verb, what),
        };

        let action = match verb.as_str() {
            "move" => match args.as_slice() {
                [src, dst] => Action::Move {
                    src: src
                        .parse()
                        .map_err(|e| bad(&format!("source square: {}", e)))?,
                    dst: dst
                        .parse()
                        .map_err(|e| bad(&format!("destination square: {}", e)))?,
                },
                _ => return Err(bad("expects two squares")),
            },
            "reset" => Action::Reset {
                num_boards: optional_number(&args).map_err(|e| bad(&format!("board count: {}", e)))?,
            },
            "become" => Action::Become {
                player: optional_number(&args)
                    .map_err(|e| bad(&format!("seat number: {}", e)))?
                    .map(Player::new),
            },
            "msg" => Action::Msg {
                text: rest.to_owned(),
            },
            "nick" if !rest.is_empty() => Action::Nick {
                name: rest.to_owned(),
            },
            "nick" => return Err(bad("expects a name")),
            "credits" => Action::Credits,
            "help" => Action::Help,
            "surrender" => Action::Surrender,
            "replay" => Action::Replay,
            "endreplay" => Action::EndReplay,
            _ => Action::Unknown {
                verb: verb.clone(),
                params: args.iter().map(|a| Param::Text((*a).to_owned())).collect(),
            },
        };
        Ok(action)
    }

    fn from_wire(wire: &WireAction) -> Option<Action> {
        let p = wire.params.as_slice();
        let action = match (wire.verb.as_str(), p) {
            ("move", [src, dst]) => Action::Move {
                src: src.as_square()?,
                dst: dst.as_square()?,
            },
            ("reset", []) => Action::Reset { num_boards: None },
            ("reset", [n]) => Action::Reset {
                num_boards: Some(u8::try_from(n.as_int()?).ok()?),
            },
            ("become", []) => Action::Become { player: None },
            ("become", [n]) => Action::Become {
                player: Some(Player::new(u8::try_from(n.as_int()?).ok()?)),
            },
            ("msg", [text]) => Action::Msg {
                text: text.as_text()?.to_owned(),
            },
            ("nick", [name]) => Action::Nick {
                name: name.as_text()?.to_owned(),
            },
            ("credits", []) => Action::Credits,
            ("help", []) => Action::Help,
            ("surrender", []) => Action::Surrender,
            ("replay", []) => Action::Replay,
            ("endreplay", []) => Action::EndReplay,
            ("welcome", [peer, participant, num_boards, roster @ ..]) => Action::Welcome {
                peer: peer.as_text()?.to_owned(),
                participant: ParticipantId::new(participant.as_int()? as u64),
                num_boards: u8::try_from(num_boards.as_int()?).ok()?,
                roster: roster
                    .iter()
                    .map(|r| r.as_text().map(str::to_owned))
                    .collect::<Option<_>>()?,
            },
            _ => return None,
        };
        Some(action)
    }
}

fn optional_number(args: &[&str]) -> Result<Option<u8>, std::num::ParseIntError> {
    args.first().map(|a| a.parse()).transpose()
}

impl From<WireAction> for Action {
    fn from(wire: WireAction) -> Self {
        Action::from_wire(&wire).unwrap_or(Action::Unknown {
            verb: wire.verb,
            params: wire.params,
        })
    }
}

impl From<Action> for WireAction {
    fn from(action: Action) -> Self {
        let verb = action.verb().to_owned();
        let params = match action {
            Action::Move { src, dst } => vec![Param::Square(src), Param::Square(dst)],
            Action::Reset { num_boards } => num_boards.map(|n| Param::Int(i64::from(n))).into_iter().collect(),
            Action::Become { player } => player
                .map(|p| Param::Int(i64::from(p.index())))
                .into_iter()
                .collect(),
            Action::Msg { text } => vec![Param::Text(text)],
            Action::Nick { name } => vec![Param::Text(name)],
            Action::Credits | Action::Help | Action::Surrender | Action::Replay | Action::EndReplay => {
                Vec::new()
            },
            Action::Welcome {
                peer,
                participant,
                num_boards,
                roster,
            } => {
                let mut params = vec![
                    Param::Text(peer),
                    Param::Int(participant.as_u64() as i64),
                    Param::Int(i64::from(num_boards)),
                ];
                params.extend(roster.into_iter().map(Param::Text));
                params
            },
            Action::Unknown { params, .. } => params,
        };
        WireAction { verb, params }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wire = WireAction::from(self.clone());
        write!(f, "/{}", wire.verb)?;
        for param in &wire.params {
            write!(f, " {}", param)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_chat() {
        assert_eq!(
            Action::parse_command("  hello there ").unwrap(),
            Action::Msg {
                text: "hello there".to_owned()
            }
        );
    }

    #[test]
    fn nick_keeps_spaces() {
        assert_eq!(
            Action::parse_command("/nick Sir Lancelot").unwrap(),
            Action::Nick {
                name: "Sir Lancelot".to_owned()
            }
        );
    }

    #[test]
    fn become_without_seat_is_spectator() {
        assert_eq!(
            Action::parse_command("/become").unwrap(),
            Action::Become { player: None }
        );
        assert_eq!(
            Action::parse_command("/become 3").unwrap(),
            Action::Become {
                player: Some(Player::new(3))
            }
        );
    }

    #[test]
    fn malformed_known_command_is_rejected() {
        assert!(Action::parse_command("/move 1,0").is_err());
        assert!(Action::parse_command("/reset lots").is_err());
        assert!(Action::parse_command("/nick").is_err());
    }

    #[test]
    fn unknown_command_keeps_its_arguments() {
        let action = Action::parse_command("/dance wildly now").unwrap();
        assert_eq!(action.verb(), "dance");
        assert!(!Action::is_known_verb(action.verb()));
        assert!(!action.is_quiet());
    }

    #[test]
    fn text_params_are_coerced() {
        let wire = WireAction {
            verb: "move".to_owned(),
            params: vec![Param::Text("(1, 0)".to_owned()), Param::Text("2,2".to_owned())],
        };
        assert_eq!(
            Action::from(wire),
            Action::Move {
                src: Coord::new(1, 0),
                dst: Coord::new(2, 2)
            }
        );
        let wire = WireAction {
            verb: "reset".to_owned(),
            params: vec![Param::Text("2".to_owned())],
        };
        assert_eq!(Action::from(wire), Action::Reset { num_boards: Some(2) });
    }

    #[test]
    fn unreadable_params_fall_back_to_unknown() {
        let wire = WireAction {
            verb: "move".to_owned(),
            params: vec![Param::Bytes(vec![1, 2, 3])],
        };
        let action = Action::from(wire.clone());
        assert!(matches!(action, Action::Unknown { ref verb, .. } if verb == "move"));
        assert_eq!(WireAction::from(action), wire);
    }

    #[test]
    fn welcome_survives_the_wire_form() {
        let action = Action::Welcome {
            peer: "10.0.0.2:7000".to_owned(),
            participant: ParticipantId::new(u64::MAX - 3),
            num_boards: 2,
            roster: vec!["10.0.0.3:7000".to_owned()],
        };
        assert_eq!(Action::from(WireAction::from(action.clone())), action);
    }

    #[test]
    fn encoded_len_grows_with_text() {
        let short = Action::Msg { text: "hi".to_owned() };
        let long = Action::Msg { text: "hi".repeat(100) };
        assert_eq!(long.encoded_len() - short.encoded_len(), 198);
        assert!(Action::Help.encoded_len() < short.encoded_len());
    }

    #[test]
    fn display_reads_like_a_command() {
        let action = Action::Move {
            src: Coord::new(1, 0),
            dst: Coord::new(2, 2),
        };
        assert_eq!(action.to_string(), "/move 1,0 2,2");
        assert_eq!(Action::Help.to_string(), "/help");
    }
}
