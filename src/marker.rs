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

//! Durable "fan is on" flag that survives restarts and crashes

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{AutofanError, Result};

#[cfg_attr(test, mockall::automock)]
pub trait StateMarker {
    fn exists(&self) -> Result<bool>;
    /// No-op when already present
    fn create(&mut self) -> Result<()>;
    /// No-op when already absent
    fn remove(&mut self) -> Result<()>;
}

impl<T: StateMarker + ?Sized> StateMarker for Box<T> {
    fn exists(&self) -> Result<bool> {
        (**self).exists()
    }

    fn create(&mut self) -> Result<()> {
        (**self).create()
    }

    fn remove(&mut self) -> Result<()> {
        (**self).remove()
    }
}

/// Marker encoded as the presence of a file
#[derive(Debug, Clone)]
pub struct FlagFileMarker {
    path: PathBuf,
}

impl FlagFileMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn err(&self, e: io::Error) -> AutofanError {
        AutofanError::persistence(&self.path, e)
    }
}

/// Make a create/unlink durable by syncing the containing directory
#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

impl StateMarker for FlagFileMarker {
    fn exists(&self) -> Result<bool> {
        self.path.try_exists().map_err(|e| self.err(e))
    }

    fn create(&mut self) -> Result<()> {
        if self.exists()? {
            return Ok(());
        }
        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| self.err(e))?;
        writeln!(f, "{}", std::process::id()).map_err(|e| self.err(e))?;
        f.sync_all().map_err(|e| self.err(e))?;
        sync_parent(&self.path).map_err(|e| self.err(e))?;
        debug!(path = %self.path.display(), "State marker created");
        Ok(())
    }

    fn remove(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                sync_parent(&self.path).map_err(|e| self.err(e))?;
                debug!(path = %self.path.display(), "State marker removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.err(e)),
        }
    }
}
