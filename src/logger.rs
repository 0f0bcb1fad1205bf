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

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV_VAR: &str = "AUTOFAN_LOG";
const FALLBACK_LOG_PATH: &str = "/tmp/autofan.log";
const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";

/// Where log lines ended up, for the startup banner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSinks {
    pub file: Option<PathBuf>,
    pub journald: bool,
}

fn open_truncated(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    OpenOptions::new().create(true).write(true).truncate(true).open(path)
}

/// Stream sinks installed next to the log file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSinks {
    pub console: bool,
    pub journald: bool,
}

/// The console is always written; journald is added when it can be reached.
pub fn select_stream_sinks(journald_available: bool) -> StreamSinks {
    StreamSinks { console: true, journald: journald_available }
}

/// Open the log file fresh for this run, falling back to `fallback` if the
/// configured location is not writable.
pub fn open_log_file(path: &Path, fallback: &Path) -> Option<(PathBuf, File)> {
    match open_truncated(path) {
        Ok(f) => Some((path.to_path_buf(), f)),
        Err(e) => {
            eprintln!("autofan: cannot open log file {}: {}", path.display(), e);
            open_truncated(fallback).ok().map(|f| (fallback.to_path_buf(), f))
        }
    }
}

/// Install the global subscriber: console, journald under systemd, and a log file.
pub fn init_logging(log_path: &Path) -> LogSinks {
    let level = env::var(LOG_ENV_VAR).unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_path, file_layer) = match open_log_file(log_path, Path::new(FALLBACK_LOG_PATH)) {
        Some((path, file)) => {
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (Some(path), Some(layer))
        }
        None => (None, None),
    };

    let journald_layer = if Path::new(JOURNALD_SOCKET).exists() {
        match tracing_journald::layer() {
            Ok(layer) => Some(layer),
            Err(e) => {
                eprintln!("autofan: failed to create journald layer: {}, logging to console and file", e);
                None
            }
        }
    } else {
        None
    };
    let sinks = select_stream_sinks(journald_layer.is_some());
    let console_layer = sinks
        .console
        .then(|| fmt::layer().with_target(false).with_level(true));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(journald_layer)
        .with(file_layer)
        .try_init();

    LogSinks { file: file_path, journald: sinks.journald }
}
