//! # Rotor Command Protocol
//!
//! ASCII commands understood by the rotor controller. Every command and
//! every reply ends with `;`.
//!
//! | Command          | Meaning                          |
//! |------------------|----------------------------------|
//! | `AP<i><DDD.D>\r;`| move rotor `i` to a heading      |
//! | `BI<i>;`         | query heading (`AI<i>;` on some) |
//! | `;`              | stop                             |
//! | `WU1<DDD>;`      | over-travel limit                |
//! | `WI1<DDD>;`      | clockwise limit                  |
//! | `WH1<DDD>;`      | counter-clockwise limit          |

use serde::Deserialize;

use crate::angle::normalize_degrees;

/// Terminates every command and reply
pub const TERMINATOR: u8 = b';';

/// Bare terminator: halts motion
pub const STOP_COMMAND: &[u8] = b";";

/// Longest integer part accepted in a heading reply
const MAX_INTEGER_DIGITS: usize = 3;

/// Heading query variant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadingQuery {
    /// `BI<index>;`
    #[default]
    Bi,
    /// `AI<index>;`
    Ai,
}

impl HeadingQuery {
    fn prefix(self) -> &'static str {
        match self {
            HeadingQuery::Bi => "BI",
            HeadingQuery::Ai => "AI",
        }
    }
}

/// Travel limit settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    OverTravel,
    Clockwise,
    CounterClockwise,
}

impl Limit {
    fn code(self) -> &'static str {
        match self {
            Limit::OverTravel => "WU1",
            Limit::Clockwise => "WI1",
            Limit::CounterClockwise => "WH1",
        }
    }

    /// Name used in logs
    pub fn label(self) -> &'static str {
        match self {
            Limit::OverTravel => "over-travel",
            Limit::Clockwise => "CW limit",
            Limit::CounterClockwise => "CCW limit",
        }
    }
}

/// Move command with a fixed-width, one-decimal heading field
///
/// # Examples
///
/// ```
/// use moonraker::rotor::protocol::format_move;
///
/// assert_eq!(format_move(1, 45.0), "AP1045.0\r;");
/// assert_eq!(format_move(2, 359.94), "AP2359.9\r;");
/// ```
#[must_use]
pub fn format_move(index: u8, heading: f64) -> String {
    format!("AP{}{:05.1}\r;", index, heading)
}

/// Heading query command
#[must_use]
pub fn format_query(query: HeadingQuery, index: u8) -> String {
    format!("{}{};", query.prefix(), index)
}

/// Limit setter with a three-digit integer field
#[must_use]
pub fn format_limit(limit: Limit, degrees: u16) -> String {
    format!("{}{:03};", limit.code(), degrees)
}

/// Parse a heading reply such as `045.0;`
///
/// Returns `None` unless the reply is a plain non-negative decimal with at
/// most three integer digits. The result is normalized into `[0, 360)`.
#[must_use]
pub fn parse_heading_response(response: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(response).ok()?;
    let text = text.trim_matches(|c: char| c == ';' || c.is_whitespace());

    if !is_degrees(text) {
        return None;
    }

    text.parse::<f64>().ok().map(normalize_degrees)
}

fn is_degrees(text: &str) -> bool {
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());

    let (integer, fraction) = match text.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (text, None),
    };

    !integer.is_empty()
        && integer.len() <= MAX_INTEGER_DIGITS
        && all_digits(integer)
        && fraction.map_or(true, |f| !f.is_empty() && all_digits(f))
}
