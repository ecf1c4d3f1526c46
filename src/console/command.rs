use once_cell::sync::Lazy;
use strum::{AsRefStr, EnumIter, EnumMessage, EnumProperty, EnumString, IntoEnumIterator};

use crate::core::LogLevel;

/// Verbs recognised by the console.
///
/// Verbs with a message appear in the help text; `cmd` is a debugging aid and
/// stays unlisted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString, EnumIter, EnumMessage, EnumProperty,
)]
#[strum(serialize_all = "lowercase")]
pub enum Verb {
    #[strum(message = "Show help")]
    Help,
    #[strum(message = "Quit the terminal")]
    Exit,
    #[strum(message = "Print memory stats")]
    Mem,
    #[strum(message = "Show info")]
    Info,
    #[strum(message = "Set log level", props(usage = "log <n>"))]
    Log,
    Cmd,
}

impl Verb {
    fn usage(&self) -> &str {
        self.get_str("usage").unwrap_or_else(|| self.as_ref())
    }
}

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Exit,
    Mem,
    Info,
    /// `None` when the level argument is missing or malformed.
    Log(Option<LogLevel>),
    Cmd,
    Unknown(String),
}

impl Command {
    /// Tokenise a line on whitespace. Returns `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next()?;

        let command = match verb.parse::<Verb>() {
            Ok(Verb::Help) => Command::Help,
            Ok(Verb::Exit) => Command::Exit,
            Ok(Verb::Mem) => Command::Mem,
            Ok(Verb::Info) => Command::Info,
            Ok(Verb::Log) => Command::Log(tokens.next().and_then(LogLevel::parse_level)),
            // Arguments after `cmd` are ignored.
            Ok(Verb::Cmd) => Command::Cmd,
            Err(_) => Command::Unknown(verb.to_string()),
        };
        Some(command)
    }
}

/// Usage summary printed by `help`.
pub static HELP_TEXT: Lazy<String> = Lazy::new(|| {
    let mut text = String::from("Available commands:\n");
    for verb in Verb::iter() {
        if let Some(message) = verb.get_message() {
            text.push_str(&format!("  {:<10} {message}\n", verb.usage()));
        }
    }
    text
});
