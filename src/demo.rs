//! Stand-in server for running the console on its own

use anyhow::Result;
use flume::{Receiver, Sender};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use hatch::{
    core::{bus::BOOTSTRAP_ADDR, LogLevel, LogSink},
    Message, Server, SharedLogger,
};

pub struct DemoServer {
    name: String,
    started: Instant,
    ready_after: Duration,
    logger: Arc<SharedLogger>,
    received: AtomicU64,
    exit_tx: Sender<i32>,
}

impl DemoServer {
    /// Returns the server and the receiver of its exit code.
    pub fn new(
        name: &str,
        ready_after: Duration,
        logger: Arc<SharedLogger>,
    ) -> (Arc<Self>, Receiver<i32>) {
        let (exit_tx, exit_rx) = flume::bounded(1);
        let server = Arc::new(Self {
            name: name.to_string(),
            started: Instant::now(),
            ready_after,
            logger,
            received: AtomicU64::new(0),
            exit_tx,
        });
        (server, exit_rx)
    }
}

impl Server for DemoServer {
    fn is_ready(&self) -> bool {
        self.started.elapsed() >= self.ready_after
    }

    fn send(&self, message: Message) -> Result<()> {
        self.received.fetch_add(1, Ordering::Relaxed);
        if message.receiver == BOOTSTRAP_ADDR {
            self.logger.line(
                LogLevel::Info,
                &format!(
                    "[bootstrap] type {} from {:08x}: {}",
                    message.kind,
                    message.sender,
                    String::from_utf8_lossy(&message.payload)
                ),
            );
        }
        Ok(())
    }

    fn stop(&self, code: i32) {
        log::info!("Stop requested with exit code {code}");
        // Only the first stop request decides the exit code.
        if self.exit_tx.try_send(code).is_err() {
            log::debug!("Exit code already decided; ignoring {code}");
        }
    }

    fn info(&self) -> String {
        format!(
            "{}: uptime {}s, {} message(s) received, log level {}",
            self.name,
            self.started.elapsed().as_secs(),
            self.received.load(Ordering::Relaxed),
            self.logger.level()
        )
    }
}
