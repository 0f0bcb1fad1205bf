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

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::controller::Controller;
use crate::error::Result;
use crate::gpio::FanActuator;
use crate::marker::StateMarker;
use crate::sensor::TemperatureSource;

/// Granularity of the between-sample sleep; bounds how long a shutdown request waits
const SLEEP_SLICE: Duration = Duration::from_millis(50);

fn sleep_until_next_poll(interval: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + interval;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

/// Raise `shutdown` on SIGINT, SIGTERM or SIGHUP. Can only be installed once per process.
pub fn install_signal_handler(shutdown: &'static AtomicBool) -> std::result::Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        info!("SIGNAL: Received termination signal - initiating shutdown");
        shutdown.store(true, Ordering::SeqCst);
    })
}

/// Poll until `shutdown` is raised or a fatal error occurs.
pub fn run_loop<S, A, M>(
    ctl: &mut Controller<S, A, M>,
    interval: Duration,
    shutdown: &AtomicBool,
) -> Result<()>
where
    S: TemperatureSource,
    A: FanActuator,
    M: StateMarker,
{
    while !shutdown.load(Ordering::SeqCst) {
        ctl.poll_once()?;
        sleep_until_next_poll(interval, shutdown);
    }
    info!("Shutdown requested, leaving control loop");
    Ok(())
}

/// Run the control loop under a guard that always stops the fan on the way out.
///
/// Clean exits, fatal errors and panics all go through [`Controller::shutdown`]
/// before the handles are released. Errors are returned and panics resumed
/// after that, never swallowed.
pub fn run<S, A, M>(mut ctl: Controller<S, A, M>, interval: Duration, shutdown: &AtomicBool) -> Result<()>
where
    S: TemperatureSource,
    A: FanActuator,
    M: StateMarker,
{
    info!(
        start = ctl.thresholds().start(),
        end = ctl.thresholds().end(),
        interval_secs = interval.as_secs_f64(),
        state = %ctl.state(),
        "Control loop started"
    );

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_loop(&mut ctl, interval, shutdown)));

    match &outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Fatal error in control loop"),
        Err(_) => error!("Control loop panicked"),
    }

    ctl.shutdown();
    drop(ctl);
    info!("Controller closed");

    match outcome {
        Ok(result) => result,
        Err(payload) => panic::resume_unwind(payload),
    }
}
