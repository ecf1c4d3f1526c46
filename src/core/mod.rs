/// Collaborator interfaces and shared infrastructure
///
/// This module contains everything the console needs that is not the console
/// itself:
/// - The server trait and message envelope
/// - Log entry framing and the log sink trait
/// - A reference shared logger
/// - Cancellation and thread helpers
/// - Configuration
pub mod bus;
pub mod cancel;
pub mod config;
pub mod logger;
pub mod logs;
pub mod task_manager;

pub use bus::{Message, Server, BOOTSTRAP_ADDR, CONSOLE_ADDR};
pub use cancel::CancellationToken;
pub use config::ConsoleConfig;
pub use logger::{LogOutputs, SharedLogger};
pub use logs::{console_entry, make_log_buffer, ConsoleEntry, LogLevel, LogSink, HEADER_LEN};
