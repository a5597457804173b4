//! Parsing of the lines typed at the prompt.

use geoparty_core::identity::{LobbyId, UserId};
use geoparty_core::protocol::LobbySettings;
use thiserror::Error;

pub const HELP: &str = "\
commands:
  join <lobby-id> [code]     join a lobby (from the lobby list)
  leave                      leave the lobby
  start                      start the game (host)
  settings key=value ...     change settings (host): rounds, players, time, mode, private
  cards                      list the round cards on offer
  card <id>                  pick the round card (chooser)
  action <card> [user-id]    play an action card
  done                       finish playing action cards
  guess <lat> <lon>          place your guess
  leaderboard                show the global leaderboard
  next                       back to the lobby list (final results)
  dismiss <notice-id>        hide a notice
  retry                      reconnect after the connection was lost
  help                       this text
  quit                       exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Join { lobby_id: LobbyId, code: Option<String> },
    Leave,
    Start,
    Settings(LobbySettings),
    Cards,
    Card(String),
    Action { card: String, target: Option<UserId> },
    Done,
    Guess { latitude: f64, longitude: f64 },
    Leaderboard,
    Next,
    Dismiss(u64),
    Retry,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("unknown command `{0}` (try `help`)")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("`{value}` is not a valid {what}")]
    Invalid { what: &'static str, value: String },
    #[error("unknown setting `{0}`")]
    UnknownSetting(String),
}

fn parse_arg<T: std::str::FromStr>(value: &str, what: &'static str) -> Result<T, InputError> {
    value.parse().map_err(|_| InputError::Invalid {
        what,
        value: value.to_string(),
    })
}

fn parse_settings(pairs: &[&str]) -> Result<LobbySettings, InputError> {
    const USAGE: &str = "settings key=value ...";
    if pairs.is_empty() {
        return Err(InputError::Usage(USAGE));
    }
    let mut settings = LobbySettings::default();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or(InputError::Usage(USAGE))?;
        match key {
            "rounds" => settings.max_rounds = Some(parse_arg(value, "round count")?),
            "players" => settings.max_players = Some(parse_arg(value, "player count")?),
            "time" => settings.round_time_secs = Some(parse_arg(value, "round time")?),
            "mode" => settings.game_mode = Some(value.to_string()),
            "private" => settings.is_private = Some(parse_arg(value, "boolean")?),
            other => return Err(InputError::UnknownSetting(other.to_string())),
        }
    }
    Ok(settings)
}

/// Parse one line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Input>, InputError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&command, args)) = words.split_first() else {
        return Ok(None);
    };
    let input = match (command.to_ascii_lowercase().as_str(), args) {
        ("join", [lobby]) => Input::Join {
            lobby_id: parse_arg(lobby, "lobby id")?,
            code: None,
        },
        ("join", [lobby, code]) => Input::Join {
            lobby_id: parse_arg(lobby, "lobby id")?,
            code: Some(code.to_string()),
        },
        ("join", _) => return Err(InputError::Usage("join <lobby-id> [code]")),
        ("leave", []) => Input::Leave,
        ("start", []) => Input::Start,
        ("settings", pairs) => Input::Settings(parse_settings(pairs)?),
        ("cards", []) => Input::Cards,
        ("card", [id]) => Input::Card(id.to_string()),
        ("card", _) => return Err(InputError::Usage("card <id>")),
        ("action", [card]) => Input::Action {
            card: card.to_string(),
            target: None,
        },
        ("action", [card, target]) => Input::Action {
            card: card.to_string(),
            target: Some(parse_arg(target, "user id")?),
        },
        ("action", _) => return Err(InputError::Usage("action <card> [user-id]")),
        ("done", []) => Input::Done,
        ("guess", [lat, lon]) => Input::Guess {
            latitude: parse_arg(lat, "latitude")?,
            longitude: parse_arg(lon, "longitude")?,
        },
        ("guess", _) => return Err(InputError::Usage("guess <lat> <lon>")),
        ("leaderboard", []) => Input::Leaderboard,
        ("next", []) => Input::Next,
        ("dismiss", [id]) => Input::Dismiss(parse_arg(id, "notice id")?),
        ("dismiss", _) => return Err(InputError::Usage("dismiss <notice-id>")),
        ("retry", []) => Input::Retry,
        ("help" | "?", _) => Input::Help,
        ("quit" | "exit" | "q", _) => Input::Quit,
        _ => return Err(InputError::Unknown(command.to_string())),
    };
    Ok(Some(input))
}
