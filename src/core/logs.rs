/// Framing convention for console-origin log entries
///
/// The console never hands plain text to the shared logger. Every entry is a
/// byte buffer whose first two bytes form a header:
///
/// - byte 0: origin flag, `1` when the logger should mirror the line to
///   standard output, `0` when it is console-only (already visible to the
///   operator, e.g. echoed input)
/// - byte 1: severity, one of [`LogLevel`]
///
/// The literal text follows the header. Loggers strip the header, route by
/// the origin flag and filter by the embedded severity.
use anyhow::{anyhow, Result};
use bytes::{BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Length of the console entry header in bytes.
pub const HEADER_LEN: usize = 2;

/// Initial capacity of a freshly framed buffer, header included.
const DEFAULT_CAPACITY: usize = 25;

/// Log severity with the integer values used by the server's logger.
///
/// Lower values are more severe. A logger whose minimum level is `Info`
/// accepts `Error`, `Warn` and `Info` entries.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "UPPERCASE")]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
}

impl LogLevel {
    /// Parse an operator-supplied integer such as the argument of `log <n>`.
    ///
    /// Returns `None` for non-numeric text and for integers outside the
    /// known levels.
    pub fn parse_level(text: &str) -> Option<Self> {
        let value = text.trim().parse::<i64>().ok()?;
        let value = u8::try_from(value).ok()?;
        Self::try_from(value).ok()
    }

    /// Whether an entry at `self` passes a filter set to `minimum`.
    pub fn passes(self, minimum: LogLevel) -> bool {
        self <= minimum
    }
}

/// Destination of framed entries. Level filtering, formatting and output
/// sinks belong to the implementor.
pub trait LogSink: Send + Sync {
    /// Accept one framed entry.
    fn push(&self, entry: BytesMut);

    /// Change the minimum level entries must meet to be written.
    fn set_level(&self, level: LogLevel);

    /// Current minimum level.
    fn level(&self) -> LogLevel;
}

/// Allocate a buffer holding only the console header.
///
/// Console entries are always framed at `Info`.
pub fn make_log_buffer(mirror: bool) -> BytesMut {
    make_leveled_buffer(mirror, LogLevel::Info)
}

/// Allocate a buffer holding a header with an explicit level.
pub fn make_leveled_buffer(mirror: bool, level: LogLevel) -> BytesMut {
    let mut buf = BytesMut::with_capacity(DEFAULT_CAPACITY);
    buf.put_u8(u8::from(mirror));
    buf.put_u8(level.into());
    buf
}

/// Frame `text` as a console entry.
pub fn console_entry(mirror: bool, text: &str) -> BytesMut {
    let mut buf = make_log_buffer(mirror);
    buf.put_slice(text.as_bytes());
    buf
}

/// A decoded framed entry borrowing its text from the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleEntry<'a> {
    pub mirror: bool,
    pub level: LogLevel,
    pub text: Cow<'a, str>,
}

impl<'a> ConsoleEntry<'a> {
    /// Split a framed buffer into header fields and text.
    pub fn decode(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(anyhow!(
                "framed entry is {} bytes, shorter than the {HEADER_LEN}-byte header",
                bytes.len()
            ));
        }

        let mirror = match bytes[0] {
            0 => false,
            1 => true,
            other => return Err(anyhow!("invalid origin flag {other:#04x}")),
        };
        let level = LogLevel::try_from(bytes[1])
            .map_err(|_| anyhow!("invalid log level {:#04x}", bytes[1]))?;

        Ok(Self {
            mirror,
            level,
            text: String::from_utf8_lossy(&bytes[HEADER_LEN..]),
        })
    }
}
