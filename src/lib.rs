//! Hatch — interactive operator console for long-running servers
//!
//! This crate embeds an operator console into a server process. The console
//! reads commands from standard input on its own thread, echoes them into the
//! server's shared log stream using a small framing header, and either handles
//! them locally (help, stats, log level, shutdown) or forwards a message to
//! the server's bus. Where the host exposes process and CPU counters, a second
//! thread keeps the terminal title updated with memory and CPU figures.
//!
//! The server and the shared logger are collaborators supplied by the host
//! through the [`Server`] and [`LogSink`] traits. A reference logger,
//! [`SharedLogger`], is included for hosts that do not have one.

pub mod console;
pub mod core;

pub use crate::console::{Command, Console, ConsoleBuilder, Diagnostics, InputEvent, LineSource};
pub use crate::core::{
    CancellationToken, ConsoleConfig, ConsoleEntry, LogLevel, LogSink, Message, Server,
    SharedLogger,
};
