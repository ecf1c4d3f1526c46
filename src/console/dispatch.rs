use anyhow::Result;
use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use std::{
    io::{self, Write},
    sync::Arc,
};

use super::command::{Command, HELP_TEXT};
use crate::core::{
    bus::{kind, Message, Server, BOOTSTRAP_ADDR, CONSOLE_ADDR},
    logs::LogSink,
};

/// Payload of the `cmd` test message.
pub const TEST_PAYLOAD: &str = "test";

/// The process's own diagnostic output, separate from the shared log stream.
#[derive(Clone)]
pub struct Diagnostics {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Diagnostics {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
        }
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Write `text`, terminated by exactly one newline.
    pub fn emit(&self, text: &str) {
        let mut out = self.out.lock();
        let result = if text.ends_with('\n') {
            out.write_all(text.as_bytes())
        } else {
            writeln!(out, "{text}")
        }
        .and_then(|_| out.flush());

        if let Err(err) = result {
            log::warn!("Failed to write console diagnostic: {err}");
        }
    }
}

/// Allocator introspection used by `mem`.
pub trait AllocatorStats: Send + Sync {
    /// Collect a human-readable statistics report.
    fn report(&self) -> Result<String>;
}

/// Executes parsed commands against the server and logger.
#[derive(Clone)]
pub struct Dispatcher {
    server: Arc<dyn Server>,
    logger: Arc<dyn LogSink>,
    diagnostics: Diagnostics,
    allocator: Option<Arc<dyn AllocatorStats>>,
}

impl Dispatcher {
    pub fn new(
        server: Arc<dyn Server>,
        logger: Arc<dyn LogSink>,
        diagnostics: Diagnostics,
        allocator: Option<Arc<dyn AllocatorStats>>,
    ) -> Self {
        Self {
            server,
            logger,
            diagnostics,
            allocator,
        }
    }

    pub fn dispatch(&self, command: &Command) {
        log::debug!("Dispatching console command {command:?}");
        match command {
            Command::Help => self.diagnostics.emit(&HELP_TEXT),
            Command::Exit => {
                log::info!("🛑 Operator requested shutdown");
                self.server.stop(0);
            }
            Command::Mem => self.print_mem_stats(),
            Command::Info => self.diagnostics.emit(&self.server.info()),
            Command::Log(Some(level)) => self.logger.set_level(*level),
            Command::Log(None) => {}
            Command::Cmd => self.send_test_command(),
            Command::Unknown(verb) => self.diagnostics.emit(&format!("Unknown command: {verb}")),
        }
    }

    fn print_mem_stats(&self) {
        let Some(allocator) = &self.allocator else {
            self.diagnostics
                .emit("Memory stats are not supported by the current allocator");
            return;
        };

        match allocator.report() {
            Ok(stats) => self
                .diagnostics
                .emit(&format!("Allocator memory stats:\n{stats}")),
            Err(err) => self
                .diagnostics
                .emit(&format!("Failed to collect memory stats: {err:#}")),
        }
    }

    fn send_test_command(&self) {
        let mut payload = BytesMut::with_capacity(TEST_PAYLOAD.len());
        payload.put_slice(TEST_PAYLOAD.as_bytes());

        let message = Message::new(
            CONSOLE_ADDR,
            BOOTSTRAP_ADDR,
            kind::CONSOLE_TEST,
            payload.freeze(),
        );
        if let Err(err) = self.server.send(message) {
            log::warn!("Failed to send test command to bootstrap: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::logs::LogLevel;
    use anyhow::anyhow;

    #[derive(Default)]
    struct MockServer {
        sent: Mutex<Vec<Message>>,
        stops: Mutex<Vec<i32>>,
    }

    impl Server for MockServer {
        fn is_ready(&self) -> bool {
            true
        }

        fn send(&self, message: Message) -> Result<()> {
            self.sent.lock().push(message);
            Ok(())
        }

        fn stop(&self, code: i32) {
            self.stops.lock().push(code);
        }

        fn info(&self) -> String {
            "mock: 3 services".to_string()
        }
    }

    struct MockLogger {
        level: Mutex<LogLevel>,
    }

    impl LogSink for MockLogger {
        fn push(&self, _entry: BytesMut) {}

        fn set_level(&self, level: LogLevel) {
            *self.level.lock() = level;
        }

        fn level(&self) -> LogLevel {
            *self.level.lock()
        }
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        server: Arc<MockServer>,
        logger: Arc<MockLogger>,
        capture: Capture,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                server: Arc::new(MockServer::default()),
                logger: Arc::new(MockLogger {
                    level: Mutex::new(LogLevel::Debug),
                }),
                capture: Capture::default(),
            }
        }

        fn dispatcher(&self, allocator: Option<Arc<dyn AllocatorStats>>) -> Dispatcher {
            Dispatcher::new(
                self.server.clone(),
                self.logger.clone(),
                Diagnostics::new(self.capture.clone()),
                allocator,
            )
        }

        fn output(&self) -> String {
            String::from_utf8_lossy(&self.capture.0.lock()).into_owned()
        }
    }

    fn run(fixture: &Fixture, line: &str) {
        let command = Command::parse(line).expect("non-blank line");
        fixture.dispatcher(None).dispatch(&command);
    }

    #[test]
    fn test_help_prints_once_and_sends_nothing() {
        let fixture = Fixture::new();
        run(&fixture, "help");

        let output = fixture.output();
        assert_eq!(output.matches("Available commands:").count(), 1);
        for verb in ["help", "exit", "mem", "info", "log <n>"] {
            assert!(output.contains(verb), "missing {verb} in {output}");
        }
        assert!(fixture.server.sent.lock().is_empty());
    }

    #[test]
    fn test_exit_stops_with_zero() {
        let fixture = Fixture::new();
        run(&fixture, "exit");

        assert_eq!(*fixture.server.stops.lock(), vec![0]);
        assert!(fixture.server.sent.lock().is_empty());
    }

    #[test]
    fn test_log_level_changes() {
        let fixture = Fixture::new();

        run(&fixture, "log 3");
        assert_eq!(fixture.logger.level(), LogLevel::Info);

        run(&fixture, "log abc");
        run(&fixture, "log");
        run(&fixture, "log 99");
        assert_eq!(fixture.logger.level(), LogLevel::Info);

        run(&fixture, "log 1");
        assert_eq!(fixture.logger.level(), LogLevel::Error);
        assert!(fixture.output().is_empty());
    }

    #[test]
    fn test_cmd_sends_fixed_payload() {
        let fixture = Fixture::new();
        run(&fixture, "cmd whatever you type");

        let sent = fixture.server.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sender, CONSOLE_ADDR);
        assert_eq!(sent[0].receiver, BOOTSTRAP_ADDR);
        assert_eq!(sent[0].kind, kind::CONSOLE_TEST);
        assert_eq!(sent[0].session, 0);
        assert_eq!(&sent[0].payload[..], b"test");
    }

    #[test]
    fn test_unknown_verb_reports_once() {
        let fixture = Fixture::new();
        run(&fixture, "foobar --force");

        assert_eq!(fixture.output(), "Unknown command: foobar\n");
        assert!(fixture.server.sent.lock().is_empty());
        assert!(fixture.server.stops.lock().is_empty());
    }

    #[test]
    fn test_info_prints_server_summary() {
        let fixture = Fixture::new();
        run(&fixture, "info");
        assert_eq!(fixture.output(), "mock: 3 services\n");
    }

    struct FixedStats(Result<String, String>);

    impl AllocatorStats for FixedStats {
        fn report(&self) -> Result<String> {
            self.0.clone().map_err(|err| anyhow!(err))
        }
    }

    #[test]
    fn test_mem_without_allocator_support() {
        let fixture = Fixture::new();
        run(&fixture, "mem");
        assert!(fixture.output().contains("not supported"));
    }

    #[test]
    fn test_mem_with_allocator_report() {
        let fixture = Fixture::new();
        let ok: Arc<dyn AllocatorStats> = Arc::new(FixedStats(Ok("reserved: 4 MiB".into())));
        fixture.dispatcher(Some(ok)).dispatch(&Command::Mem);
        assert!(fixture.output().contains("reserved: 4 MiB"));

        let failing: Arc<dyn AllocatorStats> = Arc::new(FixedStats(Err("arena locked".into())));
        fixture.dispatcher(Some(failing)).dispatch(&Command::Mem);
        assert!(fixture.output().contains("Failed to collect memory stats: arena locked"));
    }
}
