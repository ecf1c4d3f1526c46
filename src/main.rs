mod demo;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use std::{path::Path, sync::Arc, time::Duration};

use hatch::{Console, ConsoleConfig, LogLevel, Server, SharedLogger};

fn parse_args() -> ArgMatches {
    Command::new("hatch")
        .about("Run a demo server with the operator console attached")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Console configuration file (TOML)")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("name")
                .long("name")
                .short('n')
                .help("Server name shown in the terminal title")
                .value_name("NAME"),
        )
        .arg(
            Arg::new("ready-after")
                .long("ready-after")
                .help("Milliseconds before the demo server reports ready")
                .value_name("MS")
                .default_value("1000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("no-stats")
                .long("no-stats")
                .help("Do not update the terminal title with system stats")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches()
}

fn load_config(matches: &ArgMatches) -> Result<ConsoleConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => ConsoleConfig::load(Path::new(path))?,
        None => ConsoleConfig::default(),
    };
    if let Some(name) = matches.get_one::<String>("name") {
        config.server_name = name.clone();
    }
    if matches.get_flag("no-stats") {
        config.stats = false;
    }
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::init();
    let matches = parse_args();
    let config = load_config(&matches)?;
    let ready_after = matches.get_one::<u64>("ready-after").copied().unwrap_or(1000);

    let logger = Arc::new(SharedLogger::stdout(LogLevel::Info)?);
    let (server, exit_rx) = demo::DemoServer::new(
        &config.server_name,
        Duration::from_millis(ready_after),
        logger.clone(),
    );

    {
        let server = server.clone();
        ctrlc::set_handler(move || server.stop(130))
            .context("Failed to install Ctrl+C handler")?;
    }

    logger.line(
        LogLevel::Info,
        &format!("{} started, type `help` for commands", config.server_name),
    );
    let console = Console::init(server.clone(), logger.clone(), config)?;

    let code = exit_rx.recv().unwrap_or(0);
    log::info!("Shutting down with exit code {code}");
    console.shutdown();
    logger.flush()?;

    // The stdin reader may still be parked in a read; exiting ends it.
    std::process::exit(code)
}
