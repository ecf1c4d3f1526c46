use anyhow::Result;
use flume::{Receiver, Sender};
use std::io::{self, BufRead};

use crate::core::{cancel::CancellationToken, task_manager::spawn_thread};

/// Outcome of one line request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// A line without its trailing newline.
    Line(String),
    /// End of stream or read failure.
    Closed,
}

/// Line-oriented operator input.
pub trait LineSource: Send {
    /// Request the next line and wait for it.
    ///
    /// Returns `None` when `cancel` fires before a line arrives. No read is
    /// attempted before this is called.
    fn read_line(&mut self, cancel: &CancellationToken) -> Option<InputEvent>;
}

/// Wait for `rx` or for cancellation, whichever comes first.
fn recv_or_cancel(rx: &Receiver<InputEvent>, cancel: &CancellationToken) -> Option<InputEvent> {
    if cancel.is_cancelled() {
        return None;
    }
    flume::Selector::new()
        .recv(rx, |event| Some(event.unwrap_or(InputEvent::Closed)))
        .recv(cancel.receiver(), |_| None)
        .wait()
}

/// Standard input, read on a helper thread one line per request.
///
/// The helper only touches stdin after the console asks for a line, so
/// nothing is consumed while the server is not ready. A blocking read cannot
/// be interrupted portably: after cancellation the console stops waiting at
/// once, while the helper stays parked in its read and exits after the next
/// line, end-of-stream, or process exit.
pub struct StdinSource {
    requests: Option<Sender<()>>,
    lines: Option<Receiver<InputEvent>>,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            requests: None,
            lines: None,
        }
    }

    fn start_reader(&mut self) -> Result<()> {
        let (req_tx, req_rx) = flume::bounded::<()>(1);
        let (line_tx, line_rx) = flume::bounded::<InputEvent>(1);

        spawn_thread("console-stdin", move || {
            log::info!("⌨️ Stdin reader started");
            let stdin = io::stdin();
            while req_rx.recv().is_ok() {
                let event = read_event(&mut stdin.lock());
                if line_tx.send(event).is_err() {
                    break;
                }
            }
            log::debug!("Stdin reader exited");
        })?;

        self.requests = Some(req_tx);
        self.lines = Some(line_rx);
        Ok(())
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LineSource for StdinSource {
    fn read_line(&mut self, cancel: &CancellationToken) -> Option<InputEvent> {
        if self.requests.is_none() {
            if let Err(err) = self.start_reader() {
                log::warn!("{err:#}");
                return Some(InputEvent::Closed);
            }
        }

        let (Some(requests), Some(lines)) = (&self.requests, &self.lines) else {
            return Some(InputEvent::Closed);
        };
        if requests.send(()).is_err() {
            return Some(InputEvent::Closed);
        }
        recv_or_cancel(lines, cancel)
    }
}

/// Lines delivered over a channel, for hosts that feed the console from
/// somewhere other than stdin. A disconnected channel reads as
/// [`InputEvent::Closed`].
pub struct ChannelSource {
    lines: Receiver<InputEvent>,
    requests: Option<Sender<()>>,
}

impl ChannelSource {
    pub fn new(lines: Receiver<InputEvent>) -> Self {
        Self {
            lines,
            requests: None,
        }
    }

    /// Report every line request on `tap`.
    pub fn with_request_tap(mut self, tap: Sender<()>) -> Self {
        self.requests = Some(tap);
        self
    }
}

impl LineSource for ChannelSource {
    fn read_line(&mut self, cancel: &CancellationToken) -> Option<InputEvent> {
        if let Some(tap) = &self.requests {
            if tap.send(()).is_err() {
                log::debug!("Line request tap disconnected");
            }
        }
        recv_or_cancel(&self.lines, cancel)
    }
}

/// Read one line from `reader`. Bytes that are not valid UTF-8 are replaced
/// rather than failing the read.
fn read_event<R: BufRead>(reader: &mut R) -> InputEvent {
    let mut buf = Vec::new();
    match reader.read_until(b'\n', &mut buf) {
        Ok(0) => InputEvent::Closed,
        Ok(_) => InputEvent::Line(trim_newline(String::from_utf8_lossy(&buf).into_owned())),
        Err(err) => {
            log::warn!("Failed to read from stdin: {err}");
            InputEvent::Closed
        }
    }
}

fn trim_newline(mut line: String) -> String {
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    line
}
