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

//! Autofan - hysteresis fan control for single-board computers
//!
//! Polls the CPU temperature, switches a GPIO fan line on above one threshold
//! and off below a lower one, and keeps a marker file in step with the fan so a
//! restart after a crash knows what state it was left in.

pub mod config;
pub mod controller;
pub mod error;
pub mod gpio;
pub mod logger;
pub mod marker;
pub mod sensor;
pub mod service;

pub use error::{AutofanError, Result};
