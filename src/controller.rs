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

//! Hysteresis controller
//!
//! Two thresholds form a dead band: the fan turns on strictly above `start` and
//! off strictly below `end`. Every transition updates the fan line and the
//! on-disk marker together, ordered so that a crash in between always leaves
//! the marker set while the fan might still be running:
//!
//! - OFF → ON: create marker, then drive the line high
//! - ON → OFF: drive the line low, then remove marker
//!
//! A marker found at startup is resolved by [`RecoveryPolicy`] before the first
//! sample is taken.

use std::fmt;

use tracing::{error, info, warn};

use crate::config::RecoveryPolicy;
use crate::error::{AutofanError, Result};
use crate::gpio::FanActuator;
use crate::marker::StateMarker;
use crate::sensor::{format_celsius, TemperatureSource};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FanState {
    Off,
    On,
}

impl FanState {
    pub fn is_on(self) -> bool {
        self == FanState::On
    }
}

impl fmt::Display for FanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FanState::Off => "OFF",
            FanState::On => "ON",
        })
    }
}

/// Validated hysteresis band, `end < start`
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Thresholds {
    start: f64,
    end: f64,
}

impl Thresholds {
    pub fn new(start: f64, end: f64) -> Result<Self> {
        if !start.is_finite() || !end.is_finite() {
            return Err(AutofanError::invalid_config("start_temp/end_temp", "must be finite numbers"));
        }
        if end >= start {
            return Err(AutofanError::invalid_config(
                "end_temp",
                format!("must be below start_temp ({} >= {})", end, start),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transition {
    NoChange,
    TransitionedTo(FanState),
}

/// What startup reconciliation did
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// No marker: fan assumed off, nothing touched
    Clean,
    /// Marker found and cleared, fan driven off
    ForcedOff,
    /// Marker found and kept, fan driven on
    ResumedOn,
}

/// Outcome of one poll cycle
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Cycle {
    Sampled { temp: f64, transition: Transition },
    /// Temperature source failed; nothing was evaluated
    Skipped,
}

/// Pure state machine step. Boundary values never transition.
pub fn next_transition(state: FanState, thresholds: &Thresholds, temp: f64) -> Transition {
    match state {
        FanState::Off if temp > thresholds.start => Transition::TransitionedTo(FanState::On),
        FanState::On if temp < thresholds.end => Transition::TransitionedTo(FanState::Off),
        _ => Transition::NoChange,
    }
}

pub struct Controller<S, A, M> {
    state: FanState,
    thresholds: Thresholds,
    /// Set by every transition, cleared by the first quiet sample after it
    idle_notice_pending: bool,
    source: S,
    actuator: A,
    marker: M,
}

impl<S, A, M> Controller<S, A, M>
where
    S: TemperatureSource,
    A: FanActuator,
    M: StateMarker,
{
    /// Build a controller and reconcile with the marker left by a previous run.
    ///
    /// This is the only constructor, so reconciliation happens exactly once and
    /// always before the first sample. If it fails, the fan is driven off on a
    /// best-effort basis before the error is returned.
    pub fn start(
        thresholds: Thresholds,
        policy: RecoveryPolicy,
        source: S,
        actuator: A,
        marker: M,
    ) -> Result<(Self, Recovery)> {
        let mut ctl = Self {
            state: FanState::Off,
            thresholds,
            idle_notice_pending: true,
            source,
            actuator,
            marker,
        };
        match ctl.reconcile(policy) {
            Ok(recovery) => Ok((ctl, recovery)),
            Err(e) => {
                error!(error = %e, "Startup reconciliation failed");
                ctl.shutdown();
                Err(e)
            }
        }
    }

    fn reconcile(&mut self, policy: RecoveryPolicy) -> Result<Recovery> {
        if !self.marker.exists()? {
            info!("No state marker found, fan assumed off");
            return Ok(Recovery::Clean);
        }
        match policy {
            RecoveryPolicy::ForceOff => {
                self.actuator.set_power(false)?;
                self.marker.remove()?;
                self.state = FanState::Off;
                warn!("State marker left by a previous run: fan forced off and marker cleared");
                Ok(Recovery::ForcedOff)
            }
            RecoveryPolicy::ResumeOn => {
                self.actuator.set_power(true)?;
                self.state = FanState::On;
                info!("State marker left by a previous run: resuming with fan on");
                Ok(Recovery::ResumedOn)
            }
        }
    }

    pub fn state(&self) -> FanState {
        self.state
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn source_description(&self) -> String {
        self.source.describe()
    }

    /// Feed one temperature sample through the state machine.
    ///
    /// On a transition the fan line and marker are updated before the in-memory
    /// state changes; on error the state is left as it was.
    pub fn evaluate(&mut self, temp: f64) -> Result<Transition> {
        let transition = next_transition(self.state, &self.thresholds, temp);
        match transition {
            Transition::TransitionedTo(target) => {
                self.apply(target)?;
                self.state = target;
                self.idle_notice_pending = true;
                match target {
                    FanState::On => info!(temp = %format_celsius(temp), "Fan started"),
                    FanState::Off => info!(temp = %format_celsius(temp), "Fan stopped"),
                }
            }
            Transition::NoChange => {
                if self.idle_notice_pending {
                    self.idle_notice_pending = false;
                    info!(
                        temp = %format_celsius(temp),
                        state = %self.state,
                        "Nothing to do, skipping now"
                    );
                }
            }
        }
        Ok(transition)
    }

    fn apply(&mut self, target: FanState) -> Result<()> {
        match target {
            FanState::On => {
                self.marker.create()?;
                self.actuator.set_power(true)
            }
            FanState::Off => {
                self.actuator.set_power(false)?;
                self.marker.remove()
            }
        }
    }

    /// Read the sensor and evaluate. Sensor failures skip the cycle.
    pub fn poll_once(&mut self) -> Result<Cycle> {
        match self.source.read_celsius() {
            Ok(temp) if temp.is_finite() => {
                let transition = self.evaluate(temp)?;
                Ok(Cycle::Sampled { temp, transition })
            }
            Ok(temp) => {
                warn!(value = temp, "Temperature source returned a non-finite value, skipping cycle");
                Ok(Cycle::Skipped)
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Temperature read failed, skipping cycle");
                Ok(Cycle::Skipped)
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort shutdown: fan off, then clear the marker.
    ///
    /// The marker is only cleared once the line is confirmed low, so a failed
    /// shutdown is still caught by the next startup.
    pub fn shutdown(&mut self) {
        match self.actuator.set_power(false) {
            Ok(()) => {
                self.state = FanState::Off;
                info!("Fan stopped");
                if let Err(e) = self.marker.remove() {
                    error!(error = %e, "Failed to clear state marker during shutdown");
                }
            }
            Err(e) => error!(error = %e, "Failed to stop fan during shutdown"),
        }
    }

    pub fn into_parts(self) -> (S, A, M) {
        (self.source, self.actuator, self.marker)
    }
}
