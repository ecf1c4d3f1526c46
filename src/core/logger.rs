//! Reference shared logger
//!
//! A queue-backed [`LogSink`] whose writer thread strips the console header,
//! applies the level filter and routes each line. Mirrored entries go to the
//! terminal writer and the journal; console-only entries go to the journal
//! alone, since the operator already sees what they typed.

use anyhow::{anyhow, Context, Result};
use bytes::{BufMut, BytesMut};
use chrono::Local;
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use std::{
    io::{self, Write},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use super::{
    logs::{make_leveled_buffer, ConsoleEntry, LogLevel, LogSink},
    task_manager::spawn_thread,
};

type Output = Box<dyn Write + Send>;

enum Record {
    Entry(BytesMut),
    Flush(oneshot::Sender<()>),
}

/// Output targets of a [`SharedLogger`].
pub struct LogOutputs {
    /// Receives mirrored entries verbatim.
    pub terminal: Output,
    /// Receives every entry that passes the filter, timestamped.
    pub journal: Option<Output>,
}

impl LogOutputs {
    pub fn stdout() -> Self {
        Self {
            terminal: Box::new(io::stdout()),
            journal: None,
        }
    }
}

pub struct SharedLogger {
    tx: Option<Sender<Record>>,
    level: Arc<AtomicU8>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SharedLogger {
    /// Start the writer thread.
    pub fn spawn(level: LogLevel, outputs: LogOutputs) -> Result<Self> {
        let (tx, rx) = flume::unbounded();
        let level = Arc::new(AtomicU8::new(level.into()));

        let worker = {
            let level = level.clone();
            spawn_thread("shared-logger", move || run_writer(rx, level, outputs))
                .context("Failed to start shared logger")?
        };

        Ok(Self {
            tx: Some(tx),
            level,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Logger writing mirrored lines to standard output only.
    pub fn stdout(level: LogLevel) -> Result<Self> {
        Self::spawn(level, LogOutputs::stdout())
    }

    /// Push an application line at `level`, mirrored to the terminal.
    pub fn line(&self, level: LogLevel, text: &str) {
        let mut buf = make_leveled_buffer(true, level);
        buf.put_slice(text.as_bytes());
        self.push(buf);
    }

    /// Block until every entry pushed so far has been written.
    pub fn flush(&self) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow!("shared logger already closed"))?;
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(Record::Flush(ack_tx))
            .map_err(|err| anyhow!("shared logger writer is gone: {err}"))?;
        ack_rx
            .recv()
            .map_err(|err| anyhow!("shared logger dropped flush request: {err}"))
    }
}

impl LogSink for SharedLogger {
    fn push(&self, entry: BytesMut) {
        if let Some(tx) = &self.tx {
            if tx.send(Record::Entry(entry)).is_err() {
                log::warn!("Shared logger writer exited; dropping entry");
            }
        }
    }

    fn set_level(&self, level: LogLevel) {
        log::debug!("Shared logger level set to {level}");
        self.level.store(level.into(), Ordering::Release);
    }

    fn level(&self) -> LogLevel {
        LogLevel::try_from(self.level.load(Ordering::Acquire)).unwrap_or(LogLevel::Info)
    }
}

impl Drop for SharedLogger {
    fn drop(&mut self) {
        // Closing the queue lets the writer drain and exit.
        self.tx.take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                log::error!("Shared logger writer panicked");
            }
        }
    }
}

fn run_writer(rx: Receiver<Record>, level: Arc<AtomicU8>, mut outputs: LogOutputs) {
    while let Ok(record) = rx.recv() {
        match record {
            Record::Entry(buf) => {
                let minimum =
                    LogLevel::try_from(level.load(Ordering::Acquire)).unwrap_or(LogLevel::Info);
                if let Err(err) = write_entry(&buf, minimum, &mut outputs) {
                    log::warn!("Shared logger failed to write entry: {err}");
                }
            }
            Record::Flush(ack) => {
                if let Err(err) = outputs.terminal.flush() {
                    log::debug!("Shared logger failed to flush terminal: {err}");
                }
                if let Some(journal) = outputs.journal.as_mut() {
                    if let Err(err) = journal.flush() {
                        log::debug!("Shared logger failed to flush journal: {err}");
                    }
                }
                if ack.send(()).is_err() {
                    log::debug!("Flush requester went away before the ack");
                }
            }
        }
    }
}

fn write_entry(buf: &[u8], minimum: LogLevel, outputs: &mut LogOutputs) -> Result<()> {
    let entry = ConsoleEntry::decode(buf)?;
    if !entry.level.passes(minimum) {
        return Ok(());
    }

    if entry.mirror {
        writeln!(outputs.terminal, "{}", entry.text)?;
        outputs.terminal.flush()?;
    }
    if let Some(journal) = outputs.journal.as_mut() {
        let level = entry.level.to_string();
        writeln!(
            journal,
            "{} | {level:<5} | {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            entry.text
        )?;
    }
    Ok(())
}
