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

//! Fan power line driven through the sysfs GPIO interface

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{AutofanError, Result};

/// How long to wait for udev to create `gpioN/` after an export
const EXPORT_SETTLE_ATTEMPTS: u32 = 20;
const EXPORT_SETTLE_DELAY: Duration = Duration::from_millis(50);

#[cfg_attr(test, mockall::automock)]
pub trait FanActuator {
    /// Drive the fan line. Idempotent.
    fn set_power(&mut self, on: bool) -> Result<()>;
}

impl<T: FanActuator + ?Sized> FanActuator for Box<T> {
    fn set_power(&mut self, on: bool) -> Result<()> {
        (**self).set_power(on)
    }
}

#[derive(Debug)]
pub struct SysfsGpioFan {
    root: PathBuf,
    line: u32,
    line_dir: PathBuf,
    exported_by_us: bool,
}

fn read_u32(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn line_number(chip_base: u32, pin: u32) -> Result<u32> {
    chip_base.checked_add(pin).ok_or_else(|| {
        AutofanError::ActuatorUnavailable(format!(
            "pin {} at base {} exceeds the GPIO line range",
            pin, chip_base
        ))
    })
}

/// Global sysfs line number for `pin` on the first GPIO chip.
///
/// With an explicit `base` this is just `base + pin`; otherwise the chip with the
/// lowest `base` under `root` is used, which is the SoC controller on a Pi.
pub fn resolve_line(root: &Path, pin: u32, base: Option<u32>) -> Result<u32> {
    if let Some(b) = base {
        return line_number(b, pin);
    }

    let entries = fs::read_dir(root).map_err(|e| AutofanError::actuator(root, e))?;
    let mut best: Option<(u32, Option<u32>)> = None;
    for ent in entries.flatten() {
        let name = ent.file_name();
        if !name.to_string_lossy().starts_with("gpiochip") {
            continue;
        }
        let dir = ent.path();
        let Some(chip_base) = read_u32(&dir.join("base")) else { continue };
        let ngpio = read_u32(&dir.join("ngpio"));
        if best.map_or(true, |(b, _)| chip_base < b) {
            best = Some((chip_base, ngpio));
        }
    }

    match best {
        Some((chip_base, Some(ngpio))) if pin >= ngpio => Err(AutofanError::ActuatorUnavailable(
            format!("pin {} out of range for chip at base {} ({} lines)", pin, chip_base, ngpio),
        )),
        Some((chip_base, _)) => line_number(chip_base, pin),
        None => Err(AutofanError::ActuatorUnavailable(format!(
            "no gpiochip found under {}",
            root.display()
        ))),
    }
}

impl SysfsGpioFan {
    /// Export the line if needed and configure it as an output driven low.
    pub fn open(root: impl Into<PathBuf>, pin: u32, base: Option<u32>) -> Result<Self> {
        let root = root.into();
        let line = resolve_line(&root, pin, base)?;
        let line_dir = root.join(format!("gpio{}", line));

        let mut exported_by_us = false;
        if !line_dir.exists() {
            let export = root.join("export");
            fs::write(&export, line.to_string()).map_err(|e| AutofanError::actuator(&export, e))?;
            exported_by_us = true;
            wait_for_dir(&line_dir)?;
            debug!(line, "Exported GPIO line");
        }

        // "low" sets direction=out with the level already at 0, so the fan never glitches on
        let direction = line_dir.join("direction");
        fs::write(&direction, "low").map_err(|e| AutofanError::actuator(&direction, e))?;

        info!(pin, line, path = %line_dir.display(), "GPIO fan line ready (off)");
        Ok(Self { root, line, line_dir, exported_by_us })
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn value_path(&self) -> PathBuf {
        self.line_dir.join("value")
    }
}

impl Drop for SysfsGpioFan {
    /// Unexport the line if we exported it. Errors are logged, not returned.
    fn drop(&mut self) {
        if !self.exported_by_us {
            return;
        }
        let unexport = self.root.join("unexport");
        if let Err(e) = fs::write(&unexport, self.line.to_string()) {
            warn!(line = self.line, error = %e, "Failed to unexport GPIO line");
        } else {
            debug!(line = self.line, "Unexported GPIO line");
        }
    }
}

fn wait_for_dir(dir: &Path) -> Result<()> {
    for _ in 0..EXPORT_SETTLE_ATTEMPTS {
        if dir.join("direction").exists() {
            return Ok(());
        }
        thread::sleep(EXPORT_SETTLE_DELAY);
    }
    Err(AutofanError::actuator(
        dir,
        io::Error::new(io::ErrorKind::NotFound, "line did not appear after export"),
    ))
}

impl FanActuator for SysfsGpioFan {
    fn set_power(&mut self, on: bool) -> Result<()> {
        let value = self.value_path();
        fs::write(&value, if on { "1" } else { "0" }).map_err(|e| AutofanError::actuator(&value, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_chip(root: &Path, name: &str, base: u32, ngpio: u32) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("base"), format!("{}\n", base)).unwrap();
        fs::write(dir.join("ngpio"), format!("{}\n", ngpio)).unwrap();
    }

    fn fake_line(root: &Path, line: u32) -> PathBuf {
        let dir = root.join(format!("gpio{}", line));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("direction"), "in").unwrap();
        fs::write(dir.join("value"), "0").unwrap();
        dir
    }

    #[test]
    fn test_resolve_line_explicit_base() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(resolve_line(tmp.path(), 14, Some(512)).unwrap(), 526);
    }

    #[test]
    fn test_resolve_line_picks_lowest_chip() {
        let tmp = TempDir::new().unwrap();
        fake_chip(tmp.path(), "gpiochip570", 570, 8);
        fake_chip(tmp.path(), "gpiochip512", 512, 54);
        assert_eq!(resolve_line(tmp.path(), 14, None).unwrap(), 526);
    }

    #[test]
    fn test_resolve_line_out_of_range() {
        let tmp = TempDir::new().unwrap();
        fake_chip(tmp.path(), "gpiochip0", 0, 8);
        assert!(matches!(
            resolve_line(tmp.path(), 14, None),
            Err(AutofanError::ActuatorUnavailable(_))
        ));
    }

    #[test]
    fn test_resolve_line_overflow_is_unavailable() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            resolve_line(tmp.path(), 14, Some(u32::MAX)),
            Err(AutofanError::ActuatorUnavailable(_))
        ));

        fake_chip(tmp.path(), "gpiochip4294967290", u32::MAX - 5, 54);
        assert!(matches!(
            resolve_line(tmp.path(), 14, None),
            Err(AutofanError::ActuatorUnavailable(_))
        ));
    }

    #[test]
    fn test_resolve_line_no_chips() {
        let tmp = TempDir::new().unwrap();
        assert!(resolve_line(tmp.path(), 14, None).is_err());
    }

    #[test]
    fn test_open_existing_line_drives_low() {
        let tmp = TempDir::new().unwrap();
        let dir = fake_line(tmp.path(), 14);
        let fan = SysfsGpioFan::open(tmp.path(), 14, Some(0)).unwrap();
        assert_eq!(fs::read_to_string(dir.join("direction")).unwrap(), "low");
        assert_eq!(fan.line(), 14);
        // Not exported by us, so dropping leaves no unexport behind
        drop(fan);
        assert!(!tmp.path().join("unexport").exists());
    }

    #[test]
    fn test_set_power_writes_value() {
        let tmp = TempDir::new().unwrap();
        let dir = fake_line(tmp.path(), 14);
        let mut fan = SysfsGpioFan::open(tmp.path(), 14, Some(0)).unwrap();
        fan.set_power(true).unwrap();
        assert_eq!(fs::read_to_string(dir.join("value")).unwrap(), "1");
        fan.set_power(true).unwrap();
        assert_eq!(fs::read_to_string(dir.join("value")).unwrap(), "1");
        fan.set_power(false).unwrap();
        assert_eq!(fs::read_to_string(dir.join("value")).unwrap(), "0");
    }

    #[test]
    fn test_open_fails_when_export_never_appears() {
        let tmp = TempDir::new().unwrap();
        // export accepts the write but nothing creates gpio14/
        let err = SysfsGpioFan::open(tmp.path(), 14, Some(0)).unwrap_err();
        assert!(matches!(err, AutofanError::Actuator { .. }));
        assert_eq!(fs::read_to_string(tmp.path().join("export")).unwrap(), "14");
    }

    #[test]
    fn test_set_power_failure_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let dir = fake_line(tmp.path(), 14);
        let mut fan = SysfsGpioFan::open(tmp.path(), 14, Some(0)).unwrap();
        fs::remove_dir_all(&dir).unwrap();
        let err = fan.set_power(true).unwrap_err();
        assert!(!err.is_recoverable());
    }
}
