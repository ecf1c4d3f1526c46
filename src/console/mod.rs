//! Interactive operator console
//!
//! [`Console`] runs two threads next to the server:
//! - the console thread prompts, reads one line at a time, echoes it into
//!   the shared log stream and dispatches it as a [`Command`]
//! - the stats thread mirrors memory and CPU figures into the terminal
//!   title, when the host supports it
//!
//! Both threads poll the server's readiness and stop when the console's
//! [`CancellationToken`] is cancelled.

pub mod command;
pub mod dispatch;
pub mod input;
pub mod probe;
pub mod stats;
pub mod title;

use anyhow::Result;
use std::{sync::Arc, thread::JoinHandle};

pub use command::{Command, Verb, HELP_TEXT};
pub use dispatch::{AllocatorStats, Diagnostics, Dispatcher};
pub use input::{ChannelSource, InputEvent, LineSource, StdinSource};
pub use probe::HostProbe;
pub use stats::{CpuTimes, CpuUsage, SystemProbe, SystemSnapshot};
pub use title::{TerminalTitle, TitleSink};

use crate::core::{
    bus::Server,
    cancel::CancellationToken,
    config::ConsoleConfig,
    logs::{console_entry, LogSink},
    task_manager::{join_thread, spawn_thread},
};
use stats::StatsLoop;

/// Warning pushed when standard input is closed or unreadable.
pub const INPUT_CLOSED_WARNING: &str = "[warning] standard input closed or failed to read";

struct ConsoleLoop {
    server: Arc<dyn Server>,
    logger: Arc<dyn LogSink>,
    dispatcher: Dispatcher,
    diagnostics: Diagnostics,
    config: ConsoleConfig,
}

impl ConsoleLoop {
    fn run(self, mut source: Box<dyn LineSource>, cancel: CancellationToken) {
        log::info!("🖥️ Console thread started");
        let interval = self.config.poll_interval();

        while !cancel.is_cancelled() {
            if !self.server.is_ready() {
                cancel.wait(interval);
                continue;
            }

            self.logger.push(console_entry(true, &self.config.prompt));

            let Some(event) = source.read_line(&cancel) else {
                break;
            };
            match event {
                InputEvent::Closed => {
                    self.logger.push(console_entry(true, INPUT_CLOSED_WARNING));
                    cancel.wait(interval);
                }
                InputEvent::Line(line) if line.is_empty() => {}
                InputEvent::Line(line) => {
                    self.logger.push(console_entry(false, &line));
                    if let Some(command) = Command::parse(&line) {
                        self.dispatcher.dispatch(&command);
                    }
                }
            }
        }

        self.diagnostics.emit("Quit console thread!");
    }
}

/// Configures and starts a [`Console`].
pub struct ConsoleBuilder {
    server: Arc<dyn Server>,
    logger: Arc<dyn LogSink>,
    config: ConsoleConfig,
    input: Option<Box<dyn LineSource>>,
    diagnostics: Option<Diagnostics>,
    allocator: Option<Arc<dyn AllocatorStats>>,
    probe: Option<Box<dyn SystemProbe>>,
    title: Option<Box<dyn TitleSink>>,
}

impl ConsoleBuilder {
    pub fn config(mut self, config: ConsoleConfig) -> Self {
        self.config = config;
        self
    }

    /// Read commands from `input` instead of standard input.
    pub fn input(mut self, input: Box<dyn LineSource>) -> Self {
        self.input = Some(input);
        self
    }

    /// Write help, info and other reports to `diagnostics` instead of
    /// standard error.
    pub fn diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Enable allocator statistics for `mem`.
    pub fn allocator(mut self, allocator: Arc<dyn AllocatorStats>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn probe(mut self, probe: Box<dyn SystemProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn title(mut self, title: Box<dyn TitleSink>) -> Self {
        self.title = Some(title);
        self
    }

    /// Spawn the console thread and, if the host supports it, the stats
    /// thread.
    pub fn start(self) -> Result<Console> {
        let cancel = CancellationToken::new();
        let diagnostics = self.diagnostics.unwrap_or_else(Diagnostics::stderr);

        let stats = if self.config.stats {
            let probe = self
                .probe
                .unwrap_or_else(|| Box::new(HostProbe::new()) as Box<dyn SystemProbe>);
            let title = self
                .title
                .or_else(|| TerminalTitle::detect().map(|t| Box::new(t) as Box<dyn TitleSink>));
            match title {
                Some(title) if probe.is_available() => Some(StatsLoop {
                    server: self.server.clone(),
                    probe,
                    title,
                    config: self.config.clone(),
                    diagnostics: diagnostics.clone(),
                }),
                _ => {
                    log::info!("System stats unavailable on this host; title updates disabled");
                    None
                }
            }
        } else {
            None
        };

        let console_loop = ConsoleLoop {
            dispatcher: Dispatcher::new(
                self.server.clone(),
                self.logger.clone(),
                diagnostics.clone(),
                self.allocator,
            ),
            server: self.server,
            logger: self.logger,
            diagnostics,
            config: self.config,
        };
        let source = self
            .input
            .unwrap_or_else(|| Box::new(StdinSource::new()) as Box<dyn LineSource>);

        let console_thread = {
            let cancel = cancel.clone();
            spawn_thread("console", move || console_loop.run(source, cancel))?
        };

        let stats_thread = match stats {
            Some(stats) => {
                let cancel_stats = cancel.clone();
                match spawn_thread("console-stats", move || stats.run(cancel_stats)) {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        cancel.cancel();
                        join_thread("console", console_thread);
                        return Err(err);
                    }
                }
            }
            None => None,
        };

        Ok(Console {
            cancel,
            console_thread: Some(console_thread),
            stats_thread,
        })
    }
}

/// A running console. Dropping it stops both threads.
pub struct Console {
    cancel: CancellationToken,
    console_thread: Option<JoinHandle<()>>,
    stats_thread: Option<JoinHandle<()>>,
}

impl Console {
    pub fn builder(server: Arc<dyn Server>, logger: Arc<dyn LogSink>) -> ConsoleBuilder {
        ConsoleBuilder {
            server,
            logger,
            config: ConsoleConfig::default(),
            input: None,
            diagnostics: None,
            allocator: None,
            probe: None,
            title: None,
        }
    }

    /// Start a console on stdin with default collaborators.
    pub fn init(
        server: Arc<dyn Server>,
        logger: Arc<dyn LogSink>,
        config: ConsoleConfig,
    ) -> Result<Self> {
        Self::builder(server, logger).config(config).start()
    }

    pub fn stats_enabled(&self) -> bool {
        self.stats_thread.is_some()
    }

    /// Cancel both loops and wait for them to finish.
    pub fn shutdown(mut self) {
        self.stop_threads();
    }

    fn stop_threads(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.console_thread.take() {
            join_thread("console", handle);
        }
        if let Some(handle) = self.stats_thread.take() {
            join_thread("console-stats", handle);
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.stop_threads();
    }
}
