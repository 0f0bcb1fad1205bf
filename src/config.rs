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
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controller::Thresholds;
use crate::error::{AutofanError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/autofan/config.json";
pub const CONFIG_ENV_VAR: &str = "AUTOFAN_CONFIG";

/// Where the temperature comes from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorConfig {
    /// Millidegree integer in a sysfs pseudo-file
    ThermalZone {
        #[serde(default = "default_thermal_path")]
        path: PathBuf,
    },
    /// `vcgencmd measure_temp` on Raspberry Pi firmware.
    ///
    /// The default is the legacy firmware location. A bare name is looked up
    /// on the daemon's `PATH`, which under systemd is usually minimal; binaries
    /// under `/opt/vc` are run with `LD_LIBRARY_PATH=/opt/vc/lib`.
    Vcgencmd {
        #[serde(default = "default_vcgencmd_command")]
        command: String,
        #[serde(default = "default_vcgencmd_timeout_ms")]
        timeout_ms: u64,
    },
}

impl Default for SensorConfig {
    fn default() -> Self {
        SensorConfig::ThermalZone { path: default_thermal_path() }
    }
}

/// What a marker left behind by a previous run means at startup
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Unclean shutdown while the fan was on: drive it off and clear the marker
    #[default]
    ForceOff,
    /// The fan was on when we stopped: pick up in the ON state
    ResumeOn,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Line offset on the GPIO chip (BCM numbering on a Pi)
    pub gpio_pin: u32,
    /// Sysfs number of the chip's first line; detected from `gpio_root` when unset
    pub gpio_base: Option<u32>,
    pub gpio_root: PathBuf,
    /// Fan turns on strictly above this (°C)
    pub start_temp: f64,
    /// Fan turns off strictly below this (°C)
    pub end_temp: f64,
    pub poll_interval_secs: u64,
    pub marker_path: PathBuf,
    pub log_path: PathBuf,
    pub sensor: SensorConfig,
    pub recovery: RecoveryPolicy,
}

fn default_thermal_path() -> PathBuf { PathBuf::from("/sys/class/thermal/thermal_zone0/temp") }
fn default_vcgencmd_command() -> String { "/opt/vc/bin/vcgencmd".to_string() }
fn default_vcgencmd_timeout_ms() -> u64 { 2000 }

impl Default for Config {
    fn default() -> Self {
        Self {
            gpio_pin: 14,
            gpio_base: None,
            gpio_root: PathBuf::from("/sys/class/gpio"),
            start_temp: 50.0,
            end_temp: 43.0,
            poll_interval_secs: 10,
            marker_path: PathBuf::from("/usr/local/IS_HIGH_FLAG"),
            log_path: PathBuf::from("/var/log/autofan.log"),
            sensor: SensorConfig::default(),
            recovery: RecoveryPolicy::default(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn thresholds(&self) -> Result<Thresholds> {
        Thresholds::new(self.start_temp, self.end_temp)
    }

    pub fn validate(&self) -> Result<()> {
        self.thresholds()?;
        if self.poll_interval_secs == 0 {
            return Err(AutofanError::invalid_config("poll_interval_secs", "must be at least 1"));
        }
        if !self.marker_path.is_absolute() {
            return Err(AutofanError::invalid_config("marker_path", "must be an absolute path"));
        }
        if !self.log_path.is_absolute() {
            return Err(AutofanError::invalid_config("log_path", "must be an absolute path"));
        }
        if !self.gpio_root.is_absolute() {
            return Err(AutofanError::invalid_config("gpio_root", "must be an absolute path"));
        }
        match &self.sensor {
            SensorConfig::ThermalZone { path } if path.as_os_str().is_empty() => {
                return Err(AutofanError::invalid_config("sensor.path", "must not be empty"));
            }
            SensorConfig::Vcgencmd { command, .. } if command.trim().is_empty() => {
                return Err(AutofanError::invalid_config("sensor.command", "must not be empty"));
            }
            SensorConfig::Vcgencmd { timeout_ms: 0, .. } => {
                return Err(AutofanError::invalid_config("sensor.timeout_ms", "must be greater than 0"));
            }
            _ => {}
        }
        Ok(())
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(p) = env::var(CONFIG_ENV_VAR) {
        if !p.is_empty() {
            return PathBuf::from(p);
        }
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

/// Parse and validate a config file
pub fn load_config_from(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)?;
    let cfg: Config = serde_json::from_str(&data)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Resolve the configuration the daemon should run with.
///
/// An explicit path (flag or env var) must exist. The default location is
/// optional and falls back to built-in defaults when absent.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let explicit = explicit
        .map(Path::to_path_buf)
        .or_else(|| env::var(CONFIG_ENV_VAR).ok().filter(|s| !s.is_empty()).map(PathBuf::from));

    match explicit {
        Some(path) => load_config_from(&path).map_err(|e| match e {
            AutofanError::Io(io_err) => {
                AutofanError::Config(format!("cannot read {}: {}", path.display(), io_err))
            }
            other => other,
        }),
        None => {
            let path = config_path();
            match load_config_from(&path) {
                Ok(cfg) => Ok(cfg),
                Err(AutofanError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                    let cfg = Config::default();
                    cfg.validate()?;
                    Ok(cfg)
                }
                Err(e) => Err(e),
            }
        }
    }
}
