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

//! CPU temperature sources
//!
//! Two backends are supported: the kernel thermal zone pseudo-file (default) and
//! the Raspberry Pi firmware's `vcgencmd measure_temp`.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::debug;

use crate::config::SensorConfig;
use crate::error::{AutofanError, Result};

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[cfg_attr(test, mockall::automock)]
pub trait TemperatureSource {
    /// Current CPU temperature in degrees Celsius
    fn read_celsius(&mut self) -> Result<f64>;

    /// Short human-readable name for log lines
    fn describe(&self) -> String;
}

/// Reading formatted with one decimal place, e.g. `48.3 ℃`
pub fn format_celsius(temp: f64) -> String {
    format!("{:.1} ℃", temp)
}

pub fn from_config(cfg: &SensorConfig) -> Result<Box<dyn TemperatureSource + Send>> {
    Ok(match cfg {
        SensorConfig::ThermalZone { path } => Box::new(ThermalZoneSensor::new(path)),
        SensorConfig::Vcgencmd { command, timeout_ms } => {
            Box::new(VcgencmdSensor::new(command, Duration::from_millis(*timeout_ms))?)
        }
    })
}

impl<T: TemperatureSource + ?Sized> TemperatureSource for Box<T> {
    fn read_celsius(&mut self) -> Result<f64> {
        (**self).read_celsius()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

// ============================================================================
// Thermal zone
// ============================================================================

#[derive(Debug, Clone)]
pub struct ThermalZoneSensor {
    path: PathBuf,
}

impl ThermalZoneSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse the millidegree integer the kernel exposes
pub fn parse_millidegrees(raw: &str) -> Option<f64> {
    raw.trim().parse::<i64>().ok().map(|m| m as f64 / 1000.0)
}

impl TemperatureSource for ThermalZoneSensor {
    fn read_celsius(&mut self) -> Result<f64> {
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| AutofanError::sensor(self.describe(), e.to_string()))?;
        parse_millidegrees(&raw).ok_or_else(|| {
            AutofanError::sensor(self.describe(), format!("not a millidegree integer: {:?}", raw.trim()))
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ============================================================================
// vcgencmd
// ============================================================================

const VC_PREFIX: &str = "/opt/vc/";
const VC_LIBRARY_PATH: &str = "/opt/vc/lib";

/// Legacy firmware tools need their bundled libraries on the loader path
fn library_path_for(command: &str) -> Option<&'static str> {
    command.starts_with(VC_PREFIX).then_some(VC_LIBRARY_PATH)
}

#[derive(Debug)]
pub struct VcgencmdSensor {
    command: String,
    timeout: Duration,
    pattern: Regex,
}

impl VcgencmdSensor {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Result<Self> {
        let pattern = Regex::new(r"temp=(-?\d+(?:\.\d+)?)")
            .map_err(|e| AutofanError::Config(format!("vcgencmd pattern: {}", e)))?;
        Ok(Self { command: command.into(), timeout, pattern })
    }

    /// Extract degrees from output like `temp=48.3'C`
    pub fn parse_output(&self, output: &str) -> Option<f64> {
        let caps = self.pattern.captures(output)?;
        caps.get(1)?.as_str().parse::<f64>().ok()
    }

    fn run_with_timeout(&self) -> Result<String> {
        let mut cmd = Command::new(&self.command);
        if let Some(lib) = library_path_for(&self.command) {
            cmd.env("LD_LIBRARY_PATH", lib);
        }
        let mut child = cmd
            .arg("measure_temp")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AutofanError::sensor(self.describe(), e.to_string()))?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(AutofanError::SensorTimeout {
                        source_name: self.describe(),
                        timeout: self.timeout,
                    });
                }
                Ok(None) => thread::sleep(CHILD_POLL_INTERVAL),
                Err(e) => return Err(AutofanError::sensor(self.describe(), e.to_string())),
            }
        };

        let mut out = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout
                .read_to_string(&mut out)
                .map_err(|e| AutofanError::sensor(self.describe(), e.to_string()))?;
        }
        if !status.success() {
            return Err(AutofanError::sensor(
                self.describe(),
                format!("exited with {}: {}", status, out.trim()),
            ));
        }
        Ok(out)
    }
}

impl TemperatureSource for VcgencmdSensor {
    fn read_celsius(&mut self) -> Result<f64> {
        let out = self.run_with_timeout()?;
        debug!(output = %out.trim(), "vcgencmd answered");
        self.parse_output(&out).ok_or_else(|| {
            AutofanError::sensor(self.describe(), format!("unexpected output: {:?}", out.trim()))
        })
    }

    fn describe(&self) -> String {
        format!("{} measure_temp", self.command)
    }
}
