use anyhow::Result;
use bytes::Bytes;

/// Address of the server's bootstrap service.
pub const BOOTSTRAP_ADDR: u32 = 1;

/// Sender address used for messages originating from the console.
pub const CONSOLE_ADDR: u32 = 0;

/// Message type tags understood by the bootstrap service.
pub mod kind {
    /// Fixed test command injected by the `cmd` verb.
    pub const CONSOLE_TEST: u8 = 14;
}

/// A message handed to the server's bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: u32,
    pub receiver: u32,
    pub session: i32,
    pub kind: u8,
    pub payload: Bytes,
}

impl Message {
    pub fn new(sender: u32, receiver: u32, kind: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            sender,
            receiver,
            session: 0,
            kind,
            payload: payload.into(),
        }
    }
}

/// The server the console is attached to.
///
/// The server outlives the console and must tolerate concurrent callers; the
/// console adds no locking of its own.
pub trait Server: Send + Sync {
    /// Whether the server finished starting and accepts operator commands.
    fn is_ready(&self) -> bool;

    /// Route a message onto the server's bus.
    fn send(&self, message: Message) -> Result<()>;

    /// Ask the server to stop with the given exit code.
    fn stop(&self, code: i32);

    /// Human-readable status summary.
    fn info(&self) -> String;
}
