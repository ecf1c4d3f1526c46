use anyhow::Result;
use bytes::BytesMut;
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use std::{
    io::{self, Write},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use hatch::{
    console::{
        ChannelSource, Console, CpuTimes, Diagnostics, InputEvent, SystemProbe, SystemSnapshot,
        TitleSink, INPUT_CLOSED_WARNING,
    },
    core::{
        bus::{kind, BOOTSTRAP_ADDR},
        ConsoleConfig, ConsoleEntry, LogLevel, LogSink, Message, Server,
    },
};

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingLog {
    entries: Mutex<Vec<BytesMut>>,
    level: Mutex<Option<LogLevel>>,
}

impl RecordingLog {
    fn decoded(&self) -> Vec<(bool, String)> {
        self.entries
            .lock()
            .iter()
            .map(|buf| {
                let entry = ConsoleEntry::decode(buf).expect("framed entry");
                assert_eq!(entry.level, LogLevel::Info);
                (entry.mirror, entry.text.into_owned())
            })
            .collect()
    }

    fn echoes(&self) -> Vec<String> {
        self.decoded()
            .into_iter()
            .filter(|(mirror, _)| !mirror)
            .map(|(_, text)| text)
            .collect()
    }

    fn count(&self, mirror: bool, text: &str) -> usize {
        self.decoded()
            .iter()
            .filter(|(m, t)| *m == mirror && t == text)
            .count()
    }
}

impl LogSink for RecordingLog {
    fn push(&self, entry: BytesMut) {
        self.entries.lock().push(entry);
    }

    fn set_level(&self, level: LogLevel) {
        *self.level.lock() = Some(level);
    }

    fn level(&self) -> LogLevel {
        self.level.lock().unwrap_or(LogLevel::Debug)
    }
}

struct FakeServer {
    ready: AtomicBool,
    sent: Mutex<Vec<Message>>,
    stops: Mutex<Vec<i32>>,
    log: Arc<RecordingLog>,
    /// Echo entries present when `info` was last called.
    echoes_at_info: Mutex<Vec<String>>,
}

impl Server for FakeServer {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn send(&self, message: Message) -> Result<()> {
        self.sent.lock().push(message);
        Ok(())
    }

    fn stop(&self, code: i32) {
        self.stops.lock().push(code);
    }

    fn info(&self) -> String {
        *self.echoes_at_info.lock() = self.log.echoes();
        "fake-server: ready".to_string()
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

impl Capture {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn test_config() -> ConsoleConfig {
    ConsoleConfig {
        server_name: "test-node".to_string(),
        poll_interval_ms: 10,
        stats: false,
        ..ConsoleConfig::default()
    }
}

struct Harness {
    server: Arc<FakeServer>,
    log: Arc<RecordingLog>,
    diagnostics: Capture,
    lines: Option<Sender<InputEvent>>,
    requests: Receiver<()>,
    console: Option<Console>,
}

impl Harness {
    fn start(ready: bool) -> Result<Self> {
        let log = Arc::new(RecordingLog::default());
        let server = Arc::new(FakeServer {
            ready: AtomicBool::new(ready),
            sent: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
            log: log.clone(),
            echoes_at_info: Mutex::new(Vec::new()),
        });
        let diagnostics = Capture::default();
        let (line_tx, line_rx) = flume::unbounded();
        let (tap_tx, tap_rx) = flume::unbounded();

        let console = Console::builder(server.clone(), log.clone())
            .config(test_config())
            .input(Box::new(ChannelSource::new(line_rx).with_request_tap(tap_tx)))
            .diagnostics(Diagnostics::new(diagnostics.clone()))
            .start()?;

        Ok(Self {
            server,
            log,
            diagnostics,
            lines: Some(line_tx),
            requests: tap_rx,
            console: Some(console),
        })
    }

    /// Start with a ready server and wait for the first prompt.
    fn ready() -> Result<Self> {
        let harness = Self::start(true)?;
        harness.await_request();
        Ok(harness)
    }

    fn await_request(&self) {
        self.requests
            .recv_timeout(TIMEOUT)
            .expect("console never asked for input");
    }

    /// Type a line and wait until the console asks for the next one.
    fn type_line(&self, line: &str) {
        self.lines
            .as_ref()
            .expect("input still open")
            .send(InputEvent::Line(line.to_string()))
            .expect("console input channel");
        self.await_request();
    }

    fn shutdown(&mut self) {
        if let Some(console) = self.console.take() {
            console.shutdown();
        }
    }
}

#[test]
fn test_no_prompt_until_server_ready() -> Result<()> {
    let harness = Harness::start(false)?;

    thread::sleep(Duration::from_millis(80));
    assert!(harness.log.decoded().is_empty());
    assert!(harness.requests.is_empty());

    harness.server.ready.store(true, Ordering::SeqCst);
    harness.await_request();
    assert_eq!(harness.log.decoded(), vec![(true, ">".to_string())]);

    thread::sleep(Duration::from_millis(50));
    assert!(harness.requests.is_empty());
    assert_eq!(harness.log.decoded().len(), 1);
    Ok(())
}

#[test]
fn test_echo_precedes_dispatch() -> Result<()> {
    let harness = Harness::ready()?;

    harness.type_line("info");

    assert_eq!(*harness.server.echoes_at_info.lock(), vec!["info".to_string()]);
    assert_eq!(harness.log.count(false, "info"), 1);
    assert_eq!(
        harness.log.decoded(),
        vec![
            (true, ">".to_string()),
            (false, "info".to_string()),
            (true, ">".to_string()),
        ]
    );
    assert!(harness.diagnostics.text().contains("fake-server: ready"));
    Ok(())
}

#[test]
fn test_empty_line_is_ignored() -> Result<()> {
    let harness = Harness::ready()?;

    harness.type_line("");

    assert!(harness.log.echoes().is_empty());
    assert_eq!(harness.log.count(true, ">"), 2);
    assert!(harness.diagnostics.text().is_empty());
    assert!(harness.server.sent.lock().is_empty());
    Ok(())
}

#[test]
fn test_help_and_unknown_commands() -> Result<()> {
    let harness = Harness::ready()?;

    harness.type_line("help");
    harness.type_line("foobar now");

    let output = harness.diagnostics.text();
    assert_eq!(output.matches("Available commands:").count(), 1);
    assert_eq!(output.matches("Unknown command: foobar").count(), 1);
    assert!(harness.server.sent.lock().is_empty());
    assert_eq!(harness.log.echoes(), vec!["help", "foobar now"]);
    Ok(())
}

#[test]
fn test_replaced_bytes_still_dispatch() -> Result<()> {
    let harness = Harness::ready()?;

    harness.type_line("\u{FFFD}mem");

    let output = harness.diagnostics.text();
    assert_eq!(output.matches("Unknown command: \u{FFFD}mem").count(), 1);
    assert_eq!(harness.log.count(true, INPUT_CLOSED_WARNING), 0);
    assert_eq!(harness.log.echoes(), vec!["\u{FFFD}mem"]);
    Ok(())
}

#[test]
fn test_exit_requests_stop_once() -> Result<()> {
    let harness = Harness::ready()?;

    harness.type_line("exit");

    assert_eq!(*harness.server.stops.lock(), vec![0]);
    assert!(harness.server.sent.lock().is_empty());
    Ok(())
}

#[test]
fn test_cmd_forwards_test_message() -> Result<()> {
    let harness = Harness::ready()?;

    harness.type_line("cmd please ignore these");

    let sent = harness.server.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].receiver, BOOTSTRAP_ADDR);
    assert_eq!(sent[0].kind, kind::CONSOLE_TEST);
    assert_eq!(&sent[0].payload[..], b"test");
    Ok(())
}

#[test]
fn test_log_level_commands() -> Result<()> {
    let harness = Harness::ready()?;

    harness.type_line("log abc");
    harness.type_line("log");
    assert_eq!(*harness.log.level.lock(), None);

    harness.type_line("log 3");
    assert_eq!(*harness.log.level.lock(), Some(LogLevel::Info));

    harness.type_line("log nope");
    assert_eq!(*harness.log.level.lock(), Some(LogLevel::Info));
    Ok(())
}

#[test]
fn test_closed_input_warns_and_keeps_polling() -> Result<()> {
    let mut harness = Harness::ready()?;

    harness.lines.take();
    assert!(wait_until(|| harness.log.count(true, INPUT_CLOSED_WARNING) >= 1));
    // The loop goes around again after the back-off.
    harness.await_request();
    harness.await_request();
    assert!(harness.log.count(true, INPUT_CLOSED_WARNING) >= 2);
    assert!(harness.server.stops.lock().is_empty());

    harness.shutdown();
    assert!(harness.diagnostics.text().contains("Quit console thread!"));
    Ok(())
}

#[test]
fn test_shutdown_interrupts_pending_read() -> Result<()> {
    let mut harness = Harness::ready()?;

    let started = Instant::now();
    harness.shutdown();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(harness.diagnostics.text().ends_with("Quit console thread!\n"));
    Ok(())
}

struct CountingProbe {
    available: bool,
    ticks: Arc<AtomicU64>,
}

impl SystemProbe for CountingProbe {
    fn is_available(&self) -> bool {
        self.available
    }

    fn sample(&mut self) -> Result<SystemSnapshot> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SystemSnapshot {
            working_set: 32 * 1024 * 1024,
            peak_working_set: 40 * 1024 * 1024,
            cpus: 4,
            times: CpuTimes {
                idle: tick * 10,
                kernel: tick * 60,
                user: tick * 30,
            },
            usage: None,
        })
    }
}

#[derive(Clone, Default)]
struct RecordingTitle(Arc<Mutex<Vec<String>>>);

impl TitleSink for RecordingTitle {
    fn set_title(&mut self, title: &str) -> Result<()> {
        self.0.lock().push(title.to_string());
        Ok(())
    }
}

fn start_with_stats(
    server: Arc<FakeServer>,
    probe: CountingProbe,
    title: RecordingTitle,
    diagnostics: Capture,
) -> Result<Console> {
    let (_line_tx, line_rx) = flume::unbounded::<InputEvent>();
    Console::builder(server.clone(), server.log.clone())
        .config(ConsoleConfig {
            stats: true,
            ..test_config()
        })
        .input(Box::new(ChannelSource::new(line_rx)))
        .diagnostics(Diagnostics::new(diagnostics))
        .probe(Box::new(probe))
        .title(Box::new(title))
        .start()
}

fn idle_server() -> Arc<FakeServer> {
    let log = Arc::new(RecordingLog::default());
    Arc::new(FakeServer {
        ready: AtomicBool::new(false),
        sent: Mutex::new(Vec::new()),
        stops: Mutex::new(Vec::new()),
        log,
        echoes_at_info: Mutex::new(Vec::new()),
    })
}

#[test]
fn test_stats_loop_updates_title_once_ready() -> Result<()> {
    let server = idle_server();
    let ticks = Arc::new(AtomicU64::new(0));
    let title = RecordingTitle::default();
    let diagnostics = Capture::default();

    let console = start_with_stats(
        server.clone(),
        CountingProbe {
            available: true,
            ticks: ticks.clone(),
        },
        title.clone(),
        diagnostics.clone(),
    )?;
    assert!(console.stats_enabled());

    thread::sleep(Duration::from_millis(60));
    assert_eq!(ticks.load(Ordering::SeqCst), 0);
    assert!(title.0.lock().is_empty());

    server.ready.store(true, Ordering::SeqCst);
    assert!(wait_until(|| title.0.lock().len() >= 2));

    console.shutdown();
    let titles = title.0.lock();
    assert!(titles[0].starts_with("test-node[Memory:32/40M][CPU:4, usage: "));
    // Each later sample adds Δidle=10, Δkernel=60, Δuser=30.
    assert!(titles[1].contains("[CPU:4, usage: 89%]"), "{}", titles[1]);
    assert!(titles[1].contains("[ServerTime:"));
    assert!(diagnostics.text().contains("Quit stats thread!"));
    Ok(())
}

#[test]
fn test_stats_loop_disabled_without_capability() -> Result<()> {
    let server = idle_server();
    let title = RecordingTitle::default();

    let console = start_with_stats(
        server,
        CountingProbe {
            available: false,
            ticks: Arc::new(AtomicU64::new(0)),
        },
        title.clone(),
        Capture::default(),
    )?;
    assert!(!console.stats_enabled());
    console.shutdown();
    assert!(title.0.lock().is_empty());
    Ok(())
}
