/*
 * This file is part of Autofan.
 *
 * Copyright (C) 2025 Autofan contributors
 *
 * Autofan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Autofan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Autofan. If not, see <https://www.gnu.org/licenses/>.
 */

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::Context;
use tracing::{error, info, warn};

use autofan::config::{self, Config};
use autofan::controller::{Controller, Recovery};
use autofan::gpio::SysfsGpioFan;
use autofan::logger;
use autofan::marker::FlagFileMarker;
use autofan::sensor::{self, TemperatureSource};
use autofan::service;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Raised by SIGINT/SIGTERM/SIGHUP, polled by the control loop
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Debug, PartialEq, Eq)]
enum CliAction {
    Run { config: Option<PathBuf>, dump_config: bool },
    Help,
    Version,
}

fn parse_args(args: &[String]) -> Result<CliAction, String> {
    let mut config = None;
    let mut dump_config = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Ok(CliAction::Help),
            "-v" | "--version" => return Ok(CliAction::Version),
            "--dump-config" => dump_config = true,
            "-c" | "--config" => {
                i += 1;
                let path = args.get(i).ok_or("--config requires a path argument")?;
                config = Some(PathBuf::from(path));
            }
            arg => return Err(format!("Unknown argument: {}", arg)),
        }
        i += 1;
    }
    Ok(CliAction::Run { config, dump_config })
}

fn print_help() {
    eprintln!("autofan {} - hysteresis fan control daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    autofan [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH   Configuration file (default {})", config::DEFAULT_CONFIG_PATH);
    eprintln!("        --dump-config   Print the resolved configuration and exit");
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    {}      Configuration file path", config::CONFIG_ENV_VAR);
    eprintln!("    {}         Log level (trace, debug, info, warn, error)", logger::LOG_ENV_VAR);
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        error!(%location, "PANIC: {}", message);
    }));
}

fn run_daemon(cfg: &Config) -> anyhow::Result<()> {
    let thresholds = cfg.thresholds()?;

    if let Err(e) = service::install_signal_handler(&SHUTDOWN) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not stop the fan.", e);
    }

    let source = sensor::from_config(&cfg.sensor).context("setting up temperature source")?;
    let fan = SysfsGpioFan::open(&cfg.gpio_root, cfg.gpio_pin, cfg.gpio_base)
        .with_context(|| format!("opening GPIO pin {}", cfg.gpio_pin))?;
    let marker = FlagFileMarker::new(&cfg.marker_path);

    info!(
        source = %source.describe(),
        gpio_line = fan.line(),
        marker = %cfg.marker_path.display(),
        recovery = ?cfg.recovery,
        "STARTUP: collaborators ready"
    );

    let (controller, recovery) = Controller::start(thresholds, cfg.recovery, source, fan, marker)
        .context("reconciling fan state with marker")?;
    if recovery != Recovery::Clean {
        info!(?recovery, "STARTUP: recovered state from previous run");
    }

    service::run(controller, cfg.poll_interval(), &SHUTDOWN)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config_path, dump_config) = match parse_args(&args) {
        Ok(CliAction::Help) => {
            print_help();
            return Ok(());
        }
        Ok(CliAction::Version) => {
            println!("autofan {}", VERSION);
            return Ok(());
        }
        Ok(CliAction::Run { config, dump_config }) => (config, dump_config),
        Err(msg) => {
            eprintln!("Error: {}", msg);
            print_help();
            std::process::exit(1);
        }
    };

    let cfg = config::load_config(config_path.as_deref()).context("loading configuration")?;
    if dump_config {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(());
    }

    let sinks = logger::init_logging(&cfg.log_path);
    install_panic_hook();

    info!("STARTUP: autofan {} starting", VERSION);
    match &sinks.file {
        Some(path) => info!("STARTUP: Logging to {}", path.display()),
        None => warn!("STARTUP: No log file could be opened, logging to console only"),
    }
    info!(
        start_temp = cfg.start_temp,
        end_temp = cfg.end_temp,
        interval_secs = cfg.poll_interval_secs,
        "STARTUP: thresholds"
    );

    // SAFETY: geteuid has no preconditions and only returns the effective user ID.
    if unsafe { libc::geteuid() } != 0 {
        warn!("Not running as root; GPIO export and the marker path usually require it");
    }

    if let Err(e) = run_daemon(&cfg) {
        error!("autofan terminated: {:#}", e);
        std::process::exit(1);
    }

    info!("SHUTDOWN: autofan stopped");
    Ok(())
}
