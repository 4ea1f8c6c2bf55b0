//! HTTP endpoints that trigger outgoing MIDI.
//!
//! | Path     | Query                    | Sends                              |
//! |----------|--------------------------|------------------------------------|
//! | `/note/` | `key`                    | note-on, then note-off after hold  |
//! | `/pc/`   | `program`                | program change                     |
//! | `/cc/`   | `controller`, `value`    | control change                     |
//! | `/ports/`| none                     | JSON port listing                  |
//!
//! Each path also answers without the trailing slash and for anything below
//! it (`/note/anything?key=60`). When a parameter is repeated the first value
//! wins. Handlers answer as soon as the command is queued; the write itself
//! happens on the dispatch worker.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use thiserror::Error;

use crate::dispatch::{DispatchError, Dispatcher};
use crate::ports::PortListing;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("Invalid value for parameter [{0}]")]
    Invalid(&'static str),

    #[error("Value for parameter [{0}] out of MIDI range (0-127)")]
    OutOfRange(&'static str),

    #[error("Dispatch queue full")]
    Busy,

    #[error("MIDI output unavailable")]
    Unavailable,
}

impl ParamError {
    fn from_dispatch(name: &'static str, err: DispatchError) -> Self {
        match err {
            DispatchError::DataOutOfRange { .. } => ParamError::OutOfRange(name),
            DispatchError::QueueFull => ParamError::Busy,
            DispatchError::Closed | DispatchError::Write(_) => ParamError::Unavailable,
        }
    }
}

impl IntoResponse for ParamError {
    fn into_response(self) -> Response {
        let status = match self {
            ParamError::Invalid(_) | ParamError::OutOfRange(_) => StatusCode::BAD_REQUEST,
            ParamError::Busy | ParamError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        log::warn!("Rejected request: {}", self);
        (status, self.to_string()).into_response()
    }
}

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct BridgeState {
    pub dispatcher: Dispatcher,
    pub note_velocity: u8,
    pub note_hold: Duration,
    pub ports: PortListing,
}

pub fn router(state: BridgeState) -> Router {
    Router::new()
        .route("/note", get(note))
        .route("/note/", get(note))
        .route("/note/*rest", get(note))
        .route("/pc", get(program_change))
        .route("/pc/", get(program_change))
        .route("/pc/*rest", get(program_change))
        .route("/cc", get(control_change))
        .route("/cc/", get(control_change))
        .route("/cc/*rest", get(control_change))
        .route("/ports", get(ports))
        .route("/ports/", get(ports))
        .with_state(state)
}

/// Parse an unsigned integer literal that must fit in 8 bits.
///
/// Accepts `0x`/`0o`/`0b` prefixes (either case), a leading `0` for octal, and
/// `_` between digits.
pub fn parse_u8_literal(text: &str) -> Option<u8> {
    let (digits, radix) = match text.as_bytes() {
        [b'0', b'x' | b'X', ..] => (&text[2..], 16),
        [b'0', b'o' | b'O', ..] => (&text[2..], 8),
        [b'0', b'b' | b'B', ..] => (&text[2..], 2),
        [b'0', _, ..] => (&text[1..], 8),
        _ => (text, 10),
    };

    if !underscores_ok(digits, digits.len() != text.len()) {
        return None;
    }

    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u8::from_str_radix(&cleaned, radix).ok()
}

// `_` must sit between digits; a base prefix counts as a digit.
fn underscores_ok(digits: &str, prefixed: bool) -> bool {
    let mut prev_digit = prefixed;
    let mut prev_underscore = false;
    for c in digits.chars() {
        if c == '_' {
            if !prev_digit {
                return false;
            }
            prev_digit = false;
            prev_underscore = true;
        } else {
            prev_digit = true;
            prev_underscore = false;
        }
    }
    !prev_underscore
}

/// Query pairs in the order they appeared in the URL.
pub type QueryPairs = Vec<(String, String)>;

pub fn query_u8(query: &[(String, String)], name: &'static str) -> Result<u8, ParamError> {
    query
        .iter()
        .find(|(key, _)| key == name)
        .and_then(|(_, value)| parse_u8_literal(value))
        .ok_or(ParamError::Invalid(name))
}

async fn note(
    State(state): State<BridgeState>,
    Query(query): Query<QueryPairs>,
) -> Result<&'static str, ParamError> {
    let key = query_u8(&query, "key")?;
    state
        .dispatcher
        .play_note(key, state.note_velocity, state.note_hold)
        .map_err(|e| ParamError::from_dispatch("key", e))?;
    log::info!("Played Note [{}]", key);
    Ok("OK")
}

async fn program_change(
    State(state): State<BridgeState>,
    Query(query): Query<QueryPairs>,
) -> Result<&'static str, ParamError> {
    let program = query_u8(&query, "program")?;
    state
        .dispatcher
        .send_program_change(program)
        .map_err(|e| ParamError::from_dispatch("program", e))?;
    log::info!("Sent PC [{}]", program);
    Ok("OK")
}

async fn control_change(
    State(state): State<BridgeState>,
    Query(query): Query<QueryPairs>,
) -> Result<&'static str, ParamError> {
    let controller = query_u8(&query, "controller")?;
    let value = query_u8(&query, "value")?;
    state
        .dispatcher
        .send_control_change(controller, value)
        .map_err(|e| match e {
            DispatchError::DataOutOfRange { name, .. } => ParamError::OutOfRange(name),
            other => ParamError::from_dispatch("controller", other),
        })?;
    log::info!("Sent CC [{}] [{}]", controller, value);
    Ok("OK")
}

async fn ports(State(state): State<BridgeState>) -> Json<PortListing> {
    Json(state.ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal_range() {
        for n in 0..=255u16 {
            assert_eq!(parse_u8_literal(&n.to_string()), Some(n as u8));
        }
        assert_eq!(parse_u8_literal("256"), None);
        assert_eq!(parse_u8_literal("999"), None);
    }

    #[test]
    fn test_parse_base_prefixes() {
        assert_eq!(parse_u8_literal("0x3C"), Some(60));
        assert_eq!(parse_u8_literal("0XfF"), Some(255));
        assert_eq!(parse_u8_literal("0o74"), Some(60));
        assert_eq!(parse_u8_literal("074"), Some(60));
        assert_eq!(parse_u8_literal("0b111100"), Some(60));
        assert_eq!(parse_u8_literal("0"), Some(0));
        assert_eq!(parse_u8_literal("0x100"), None);
    }

    #[test]
    fn test_parse_rejects_junk() {
        for text in [
            "", "-1", "+5", " 60", "60 ", "abc", "0x", "0b2", "08", "1.0", "1e2", "٣",
        ] {
            assert_eq!(parse_u8_literal(text), None, "accepted {:?}", text);
        }
    }

    #[test]
    fn test_parse_underscores() {
        assert_eq!(parse_u8_literal("0x_3_C"), Some(60));
        assert_eq!(parse_u8_literal("0_74"), Some(60));
        assert_eq!(parse_u8_literal("1_0"), Some(10));
        assert_eq!(parse_u8_literal("_10"), None);
        assert_eq!(parse_u8_literal("0x3C_"), None);
        assert_eq!(parse_u8_literal("0x3__C"), None);
    }

    #[test]
    fn test_query_u8_names_parameter() {
        let query = vec![("key".to_string(), "60".to_string())];
        assert_eq!(query_u8(&query, "key"), Ok(60));
        assert_eq!(query_u8(&query, "program"), Err(ParamError::Invalid("program")));
        assert_eq!(
            ParamError::Invalid("program").to_string(),
            "Invalid value for parameter [program]"
        );
    }

    #[test]
    fn test_query_u8_takes_first_value() {
        let query = vec![
            ("program".to_string(), "5".to_string()),
            ("program".to_string(), "7".to_string()),
        ];
        assert_eq!(query_u8(&query, "program"), Ok(5));

        // An empty first value is not skipped
        let query = vec![
            ("key".to_string(), String::new()),
            ("key".to_string(), "60".to_string()),
        ];
        assert_eq!(query_u8(&query, "key"), Err(ParamError::Invalid("key")));
    }
}
