//! Port wire protocol: command encoding and response/event decoding.
//!
//! Every message is one `\n`-terminated line. Commands are
//! `<name> <arg1> <arg2> …`; the helper answers each with exactly one
//! response line and may interleave `EVENT` lines at any time.
//!
//! | Inbound line                         | Decodes to              |
//! |--------------------------------------|-------------------------|
//! | `OK`                                 | [`Response::Ok`]        |
//! | `OK_WIDTH <int>`                     | [`Response::Width`]     |
//! | `OK_HEIGHT <int>`                    | [`Response::Height`]    |
//! | `OK_CELL <x> <y> <glyph> <fg> <bg>`  | [`Response::Cell`]      |
//! | `ERROR <reason>`                     | [`Response::Error`]     |
//! | `EVENT <payload>`                    | [`Response::Event`]     |
//! | *(any other)*                        | [`Response::Unrecognized`] |
//!
//! A known keyword followed by a malformed body is a decode error, not an
//! unrecognized line.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Foreground/background attribute word as understood by termbox.
pub type Attribute = u16;

// ── Commands ──────────────────────────────────────────────────────────────────

/// Response shape a command waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// Plain `OK`.
    Ack,
    /// `OK_WIDTH <int>`.
    Width,
    /// `OK_HEIGHT <int>`.
    Height,
    /// `OK_CELL …`.
    Cell,
    /// No response line; the command is fire-and-forget.
    Nothing,
}

/// Command name, used as the correlation key for the pending slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// `present`
    Present,
    /// `clear`
    Clear,
    /// `print`
    Print,
    /// `change_cell`
    ChangeCell,
    /// `get_cell`
    GetCell,
    /// `width`
    Width,
    /// `height`
    Height,
    /// `set_cursor`
    SetCursor,
    /// `set_input_mode`
    SetInputMode,
    /// `set_output_mode`
    SetOutputMode,
    /// `set_clear_attributes`
    SetClearAttributes,
    /// `shutdown`
    Shutdown,
    /// `DEBUG_SEND_EVENT`
    DebugSendEvent,
}

impl CommandKind {
    const ALL: [Self; 13] = [
        Self::Present,
        Self::Clear,
        Self::Print,
        Self::ChangeCell,
        Self::GetCell,
        Self::Width,
        Self::Height,
        Self::SetCursor,
        Self::SetInputMode,
        Self::SetOutputMode,
        Self::SetClearAttributes,
        Self::Shutdown,
        Self::DebugSendEvent,
    ];

    /// Wire name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Clear => "clear",
            Self::Print => "print",
            Self::ChangeCell => "change_cell",
            Self::GetCell => "get_cell",
            Self::Width => "width",
            Self::Height => "height",
            Self::SetCursor => "set_cursor",
            Self::SetInputMode => "set_input_mode",
            Self::SetOutputMode => "set_output_mode",
            Self::SetClearAttributes => "set_clear_attributes",
            Self::Shutdown => "shutdown",
            Self::DebugSendEvent => "DEBUG_SEND_EVENT",
        }
    }

    /// Look up a kind by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Response shape this command is answered with.
    #[must_use]
    pub fn expected(self) -> Expected {
        match self {
            Self::GetCell => Expected::Cell,
            Self::Width => Expected::Width,
            Self::Height => Expected::Height,
            Self::DebugSendEvent => Expected::Nothing,
            _ => Expected::Ack,
        }
    }
}

/// Outbound request to the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Flush the back buffer to the terminal.
    Present,
    /// Clear the back buffer with the clear attributes.
    Clear,
    /// Write `text` starting at `(x, y)`, one cell per character.
    Print {
        /// Column.
        x: i32,
        /// Row.
        y: i32,
        /// Foreground attribute.
        fg: Attribute,
        /// Background attribute.
        bg: Attribute,
        /// Single-line text; never contains `\n` or `\r`.
        text: String,
    },
    /// Set one cell.
    ChangeCell {
        /// Column.
        x: i32,
        /// Row.
        y: i32,
        /// Character written to the cell.
        ch: char,
        /// Foreground attribute.
        fg: Attribute,
        /// Background attribute.
        bg: Attribute,
    },
    /// Read back one cell.
    GetCell {
        /// Column.
        x: i32,
        /// Row.
        y: i32,
    },
    /// Query the terminal width.
    Width,
    /// Query the terminal height.
    Height,
    /// Move the cursor.
    SetCursor {
        /// Column.
        x: i32,
        /// Row.
        y: i32,
    },
    /// Select the termbox input mode.
    SetInputMode(i32),
    /// Select the termbox output mode.
    SetOutputMode(i32),
    /// Attributes used by `clear`.
    SetClearAttributes {
        /// Foreground attribute.
        fg: Attribute,
        /// Background attribute.
        bg: Attribute,
    },
    /// Ask the helper to exit; answered with `OK`, then the channel closes.
    Shutdown,
    /// Make the helper emit `event` as if the terminal had produced it.
    DebugSendEvent(Event),
}

impl Command {
    /// Build a `print` command, replacing line terminators in `text` with
    /// spaces so the command stays on one line.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Decode`] when `text` is empty.
    pub fn print(x: i32, y: i32, fg: Attribute, bg: Attribute, text: &str) -> Result<Self> {
        let command = Self::Print {
            x,
            y,
            fg,
            bg,
            text: text.replace(['\n', '\r'], " "),
        };
        command.validate()?;
        Ok(command)
    }

    /// Check that the command can go on the wire.
    ///
    /// The helper answers a `print` without text with
    /// `ERROR invalid_args_print`, and [`Command::parse_line`] cannot read
    /// its encoding back, so it is refused here.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Decode`] for a `print` with empty text.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Print { text, .. } if text.is_empty() => {
                Err(AppError::Decode("print requires non-empty text".into()))
            }
            _ => Ok(()),
        }
    }

    /// Correlation key.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Present => CommandKind::Present,
            Self::Clear => CommandKind::Clear,
            Self::Print { .. } => CommandKind::Print,
            Self::ChangeCell { .. } => CommandKind::ChangeCell,
            Self::GetCell { .. } => CommandKind::GetCell,
            Self::Width => CommandKind::Width,
            Self::Height => CommandKind::Height,
            Self::SetCursor { .. } => CommandKind::SetCursor,
            Self::SetInputMode(_) => CommandKind::SetInputMode,
            Self::SetOutputMode(_) => CommandKind::SetOutputMode,
            Self::SetClearAttributes { .. } => CommandKind::SetClearAttributes,
            Self::Shutdown => CommandKind::Shutdown,
            Self::DebugSendEvent(_) => CommandKind::DebugSendEvent,
        }
    }

    /// Serialise to a wire line without the terminator.
    #[must_use]
    pub fn encode(&self) -> String {
        let name = self.kind().name();
        match self {
            Self::Present | Self::Clear | Self::Width | Self::Height | Self::Shutdown => {
                name.to_owned()
            }
            Self::Print { x, y, fg, bg, text } => {
                let text = text.replace(['\n', '\r'], " ");
                format!("{name} {x} {y} {fg} {bg} {text}")
            }
            Self::ChangeCell { x, y, ch, fg, bg } => {
                format!("{name} {x} {y} {} {fg} {bg}", u32::from(*ch))
            }
            Self::GetCell { x, y } | Self::SetCursor { x, y } => format!("{name} {x} {y}"),
            Self::SetInputMode(mode) | Self::SetOutputMode(mode) => format!("{name} {mode}"),
            Self::SetClearAttributes { fg, bg } => format!("{name} {fg} {bg}"),
            Self::DebugSendEvent(event) => format!("{name} {}", event.to_fields()),
        }
    }

    /// Parse a command line as produced by [`Command::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Decode`] for an unknown name, wrong argument
    /// count, or an argument that does not fit its type.
    pub fn parse_line(line: &str) -> Result<Self> {
        let (name, rest) = match line.split_once(' ') {
            Some((name, rest)) => (name, rest),
            None => (line, ""),
        };
        let kind = CommandKind::from_name(name)
            .ok_or_else(|| AppError::Decode(format!("unknown command {name:?}")))?;

        let args: Vec<&str> = rest.split_whitespace().collect();
        let want = match kind {
            CommandKind::ChangeCell => 5,
            CommandKind::DebugSendEvent => 8,
            CommandKind::GetCell | CommandKind::SetCursor | CommandKind::SetClearAttributes => 2,
            CommandKind::SetInputMode | CommandKind::SetOutputMode => 1,
            _ => 0,
        };
        if kind != CommandKind::Print && args.len() != want {
            return Err(arity_error(kind, want, args.len()));
        }

        let command = match kind {
            CommandKind::Present => Self::Present,
            CommandKind::Clear => Self::Clear,
            CommandKind::Width => Self::Width,
            CommandKind::Height => Self::Height,
            CommandKind::Shutdown => Self::Shutdown,
            CommandKind::ChangeCell => {
                let code: u32 = parse_field("ch", args[2])?;
                Self::ChangeCell {
                    x: parse_field("x", args[0])?,
                    y: parse_field("y", args[1])?,
                    ch: char::from_u32(code).ok_or_else(|| {
                        AppError::Decode(format!("ch {code} is not a unicode scalar value"))
                    })?,
                    fg: parse_field("fg", args[3])?,
                    bg: parse_field("bg", args[4])?,
                }
            }
            CommandKind::GetCell => Self::GetCell {
                x: parse_field("x", args[0])?,
                y: parse_field("y", args[1])?,
            },
            CommandKind::SetCursor => Self::SetCursor {
                x: parse_field("x", args[0])?,
                y: parse_field("y", args[1])?,
            },
            CommandKind::SetInputMode => Self::SetInputMode(parse_field("mode", args[0])?),
            CommandKind::SetOutputMode => Self::SetOutputMode(parse_field("mode", args[0])?),
            CommandKind::SetClearAttributes => Self::SetClearAttributes {
                fg: parse_field("fg", args[0])?,
                bg: parse_field("bg", args[1])?,
            },
            CommandKind::DebugSendEvent => Self::DebugSendEvent(Event::from_fields(&args)?),
            CommandKind::Print => Self::parse_print(rest)?,
        };
        Ok(command)
    }

    /// `x y fg bg text`, where `text` runs to the end of the line and may
    /// contain spaces.
    fn parse_print(rest: &str) -> Result<Self> {
        let parts: Vec<&str> = rest.splitn(5, ' ').collect();
        let [x, y, fg, bg, text] = parts.as_slice() else {
            return Err(arity_error(CommandKind::Print, 5, parts.len()));
        };
        if text.is_empty() {
            return Err(AppError::Decode("print requires non-empty text".into()));
        }
        Ok(Self::Print {
            x: parse_field("x", x)?,
            y: parse_field("y", y)?,
            fg: parse_field("fg", fg)?,
            bg: parse_field("bg", bg)?,
            text: (*text).to_owned(),
        })
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// Contents of one screen cell as reported by `OK_CELL`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
    /// UTF-8 glyph; empty for code point 0, `?` when the helper could not
    /// encode the code point.
    pub ch: String,
    /// Foreground attribute.
    pub fg: Attribute,
    /// Background attribute.
    pub bg: Attribute,
}

/// One decoded inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Plain acknowledgement.
    Ok,
    /// Terminal width.
    Width(i32),
    /// Terminal height.
    Height(i32),
    /// Cell contents.
    Cell(Cell),
    /// Command failed with an opaque reason token.
    Error(String),
    /// Asynchronous event.
    Event(Event),
    /// Line with no known keyword.
    Unrecognized(String),
}

impl Response {
    /// Whether this response answers a command expecting `expected`.
    ///
    /// `ERROR` answers any command; events and unrecognized lines answer
    /// none.
    #[must_use]
    pub fn answers(&self, expected: Expected) -> bool {
        matches!(
            (self, expected),
            (Self::Error(_), Expected::Ack | Expected::Width | Expected::Height | Expected::Cell)
                | (Self::Ok, Expected::Ack)
                | (Self::Width(_), Expected::Width)
                | (Self::Height(_), Expected::Height)
                | (Self::Cell(_), Expected::Cell)
        )
    }

    /// Short label for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Width(_) => "OK_WIDTH",
            Self::Height(_) => "OK_HEIGHT",
            Self::Cell(_) => "OK_CELL",
            Self::Error(_) => "ERROR",
            Self::Event(_) => "EVENT",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

/// Decode one inbound line (terminator already stripped).
///
/// # Errors
///
/// Returns [`AppError::Decode`] when a known keyword carries a malformed
/// body. Unknown keywords are not errors; they decode to
/// [`Response::Unrecognized`].
pub fn decode_line(line: &str) -> Result<Response> {
    let (keyword, body) = match line.split_once(' ') {
        Some((keyword, body)) => (keyword, Some(body)),
        None => (line, None),
    };

    match keyword {
        "OK" => match body {
            None => Ok(Response::Ok),
            Some(body) => Err(AppError::Decode(format!(
                "unexpected payload after OK: {body:?}"
            ))),
        },
        "OK_WIDTH" => Ok(Response::Width(parse_scalar("width", body)?)),
        "OK_HEIGHT" => Ok(Response::Height(parse_scalar("height", body)?)),
        "OK_CELL" => decode_cell(body.unwrap_or_default()).map(Response::Cell),
        "ERROR" => Ok(Response::Error(body.unwrap_or_default().trim().to_owned())),
        "EVENT" => Event::parse_payload(body.unwrap_or_default()).map(Response::Event),
        _ => Ok(Response::Unrecognized(line.to_owned())),
    }
}

fn parse_scalar(name: &str, body: Option<&str>) -> Result<i32> {
    let raw = body.map(str::trim).unwrap_or_default();
    if raw.is_empty() || raw.contains(' ') {
        return Err(AppError::Decode(format!(
            "OK_{} expects one integer, got {raw:?}",
            name.to_uppercase()
        )));
    }
    parse_field(name, raw)
}

/// `<x> <y> <glyph> <fg> <bg>` where the glyph itself may be a space. A
/// cell holding code point 0 has an empty glyph (`<x> <y>  <fg> <bg>`).
fn decode_cell(body: &str) -> Result<Cell> {
    let malformed = || AppError::Decode(format!("malformed OK_CELL body: {body:?}"));

    let mut head = body.splitn(3, ' ');
    let (Some(x), Some(y), Some(tail)) = (head.next(), head.next(), head.next()) else {
        return Err(malformed());
    };
    let mut back = tail.rsplitn(3, ' ');
    let (Some(bg), Some(fg), Some(glyph)) = (back.next(), back.next(), back.next()) else {
        return Err(malformed());
    };

    Ok(Cell {
        x: parse_field("x", x)?,
        y: parse_field("y", y)?,
        ch: glyph.to_owned(),
        fg: parse_field("fg", fg)?,
        bg: parse_field("bg", bg)?,
    })
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Event type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Key press (termbox type 1).
    Key,
    /// Terminal resize (termbox type 2).
    Resize,
    /// Mouse action (termbox type 3).
    Mouse,
    /// Any other type code.
    Unknown(u8),
}

impl EventKind {
    /// Wire code.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Key => 1,
            Self::Resize => 2,
            Self::Mouse => 3,
            Self::Unknown(code) => code,
        }
    }
}

impl From<u8> for EventKind {
    fn from(code: u8) -> Self {
        match code {
            1 => Self::Key,
            2 => Self::Resize,
            3 => Self::Mouse,
            other => Self::Unknown(other),
        }
    }
}

/// Asynchronous notification from the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Type tag.
    pub kind: EventKind,
    /// Modifier bits.
    pub modifier: u8,
    /// Special key code; 0 for character input.
    pub key: u16,
    /// Unicode code point; 0 when `key` is set.
    pub ch: u32,
    /// New width (resize).
    pub width: i32,
    /// New height (resize).
    pub height: i32,
    /// Column (mouse).
    pub x: i32,
    /// Row (mouse).
    pub y: i32,
}

/// JSON payload layout the helper writes after `EVENT `.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EventPayload {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(rename = "mod")]
    modifier: u8,
    key: u16,
    ch: u32,
    w: i32,
    h: i32,
    x: i32,
    y: i32,
}

impl Event {
    /// Build a key event.
    #[must_use]
    pub fn key(modifier: u8, key: u16, ch: u32) -> Self {
        Self {
            kind: EventKind::Key,
            modifier,
            key,
            ch,
            width: 0,
            height: 0,
            x: 0,
            y: 0,
        }
    }

    /// Build a resize event.
    #[must_use]
    pub fn resize(width: i32, height: i32) -> Self {
        Self {
            kind: EventKind::Resize,
            modifier: 0,
            key: 0,
            ch: 0,
            width,
            height,
            x: 0,
            y: 0,
        }
    }

    /// Character typed, if this is a character key event.
    #[must_use]
    pub fn character(&self) -> Option<char> {
        if self.ch == 0 {
            None
        } else {
            char::from_u32(self.ch)
        }
    }

    /// Decode an `EVENT` payload.
    ///
    /// Accepts either the helper's JSON object or eight space-separated
    /// integers in the order `type mod key ch w h x y`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Decode`] for a wrong field count, a missing or
    /// unknown field, an out-of-range integer, or an invalid code point.
    pub fn parse_payload(payload: &str) -> Result<Self> {
        let payload = payload.trim();
        let event = if payload.starts_with('{') {
            let raw: EventPayload = serde_json::from_str(payload)
                .map_err(|e| AppError::Decode(format!("malformed event payload: {e}")))?;
            Self {
                kind: EventKind::from(raw.kind),
                modifier: raw.modifier,
                key: raw.key,
                ch: raw.ch,
                width: raw.w,
                height: raw.h,
                x: raw.x,
                y: raw.y,
            }
        } else {
            let fields: Vec<&str> = payload.split_whitespace().collect();
            Self::from_fields(&fields)?
        };

        if event.ch != 0 && char::from_u32(event.ch).is_none() {
            return Err(AppError::Decode(format!(
                "event ch {} is not a unicode scalar value",
                event.ch
            )));
        }
        Ok(event)
    }

    fn from_fields(fields: &[&str]) -> Result<Self> {
        let [kind, modifier, key, ch, w, h, x, y] = fields else {
            return Err(AppError::Decode(format!(
                "event payload needs 8 fields, got {}",
                fields.len()
            )));
        };
        Ok(Self {
            kind: EventKind::from(parse_field::<u8>("type", kind)?),
            modifier: parse_field("mod", modifier)?,
            key: parse_field("key", key)?,
            ch: parse_field("ch", ch)?,
            width: parse_field("w", w)?,
            height: parse_field("h", h)?,
            x: parse_field("x", x)?,
            y: parse_field("y", y)?,
        })
    }

    fn to_fields(&self) -> String {
        format!(
            "{} {} {} {} {} {} {} {}",
            self.kind.code(),
            self.modifier,
            self.key,
            self.ch,
            self.width,
            self.height,
            self.x,
            self.y
        )
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn parse_field<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse()
        .map_err(|e| AppError::Decode(format!("field `{name}` {raw:?}: {e}")))
}

fn arity_error(kind: CommandKind, want: usize, got: usize) -> AppError {
    AppError::Decode(format!(
        "{} expects {want} argument(s), got {got}",
        kind.name()
    ))
}
