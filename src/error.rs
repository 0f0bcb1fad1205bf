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

//! Unified error handling for Autofan
//!
//! Every fallible operation in the library returns [`Result`]. The variants are
//! grouped by the collaborator that produced them so the poll loop can tell a
//! per-cycle hiccup from a failure that must stop the daemon.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Result type alias using AutofanError
pub type Result<T> = std::result::Result<T, AutofanError>;

/// Unified error type for all Autofan operations
#[derive(thiserror::Error, Debug)]
pub enum AutofanError {
    // ============================================================================
    // Temperature Source Errors (recoverable per cycle)
    // ============================================================================
    #[error("Failed to read temperature from {source_name}: {reason}")]
    SensorRead {
        source_name: String,
        reason: String,
    },

    #[error("Temperature source {source_name} did not answer within {timeout:?}")]
    SensorTimeout {
        source_name: String,
        timeout: Duration,
    },

    // ============================================================================
    // Fan Actuator Errors (fatal)
    // ============================================================================
    #[error("Failed to drive GPIO line at {path}: {source}")]
    Actuator {
        path: PathBuf,
        source: io::Error,
    },

    #[error("GPIO line not available: {0}")]
    ActuatorUnavailable(String),

    // ============================================================================
    // Persistent State Marker Errors (fatal)
    // ============================================================================
    #[error("Failed to update state marker {path}: {source}")]
    Persistence {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AutofanError {
    /// Create a sensor read error
    pub fn sensor(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SensorRead {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Create an actuator error for a sysfs path
    pub fn actuator(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Actuator {
            path: path.into(),
            source,
        }
    }

    /// Create a persistence error for the marker path
    pub fn persistence(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the poll loop may skip this cycle and carry on.
    ///
    /// Only temperature source failures qualify; anything touching the fan
    /// line or the marker could leave the two out of sync.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SensorRead { .. } | Self::SensorTimeout { .. })
    }
}
