use anyhow::Result;
use std::io::{self, IsTerminal};

/// Something that can display a single-line status as a title.
pub trait TitleSink: Send {
    fn set_title(&mut self, title: &str) -> Result<()>;
}

/// The controlling terminal's window title.
pub struct TerminalTitle;

impl TerminalTitle {
    /// Returns `None` when stdout is not a terminal.
    pub fn detect() -> Option<Self> {
        io::stdout().is_terminal().then_some(Self)
    }
}

impl TitleSink for TerminalTitle {
    fn set_title(&mut self, title: &str) -> Result<()> {
        crossterm::execute!(io::stdout(), crossterm::terminal::SetTitle(title))?;
        Ok(())
    }
}
