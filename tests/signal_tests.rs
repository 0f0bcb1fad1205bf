/*
 * Signal handling tests for Autofan
 *
 * A termination signal must go through the shutdown path: fan line low, marker
 * removed. These run in their own test binary because a signal handler can only
 * be installed once per process.
 */

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::{Duration, Instant};

use autofan::config::RecoveryPolicy;
use autofan::controller::{Controller, Thresholds};
use autofan::gpio::SysfsGpioFan;
use autofan::marker::FlagFileMarker;
use autofan::sensor::ThermalZoneSensor;
use autofan::service;
use serial_test::serial;
use tempfile::TempDir;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

struct Board {
    tmp: TempDir,
    thermal: PathBuf,
    gpio_root: PathBuf,
    marker: PathBuf,
}

impl Board {
    fn hot() -> Self {
        let tmp = TempDir::new().unwrap();
        let thermal = tmp.path().join("thermal_zone0_temp");
        let gpio_root = tmp.path().join("gpio");
        let line = gpio_root.join("gpio14");
        fs::create_dir_all(&line).unwrap();
        fs::write(line.join("direction"), "in").unwrap();
        fs::write(line.join("value"), "0").unwrap();
        fs::write(&thermal, "60000\n").unwrap();
        let marker = tmp.path().join("IS_HIGH_FLAG");
        Board { thermal, gpio_root, marker, tmp }
    }

    fn fan_value(&self) -> String {
        fs::read_to_string(self.gpio_root.join("gpio14").join("value")).unwrap_or_default()
    }

    fn write_config(&self) -> PathBuf {
        let path = self.tmp.path().join("config.json");
        let json = serde_json::json!({
            "gpio_base": 0,
            "gpio_root": self.gpio_root,
            "poll_interval_secs": 1,
            "marker_path": self.marker,
            "log_path": self.tmp.path().join("autofan.log"),
            "sensor": { "kind": "thermal_zone", "path": self.thermal },
        });
        fs::write(&path, json.to_string()).unwrap();
        path
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    cond()
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait().unwrap() {
            return Some(status);
        }
        thread::sleep(Duration::from_millis(20));
    }
    let _ = child.kill();
    None
}

fn send_sigterm(pid: u32) {
    // SAFETY: kill has no memory preconditions; pid belongs to a process we own.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    assert_eq!(rc, 0, "kill failed");
}

#[test]
#[serial]
fn test_sigterm_in_process_stops_fan() {
    service::install_signal_handler(&SHUTDOWN).unwrap();

    let board = Board::hot();
    let fan = SysfsGpioFan::open(&board.gpio_root, 14, Some(0)).unwrap();
    let (ctl, _) = Controller::start(
        Thresholds::new(50.0, 43.0).unwrap(),
        RecoveryPolicy::ForceOff,
        ThermalZoneSensor::new(&board.thermal),
        fan,
        FlagFileMarker::new(&board.marker),
    )
    .unwrap();

    let handle = thread::spawn(|| service::run(ctl, Duration::from_millis(10), &SHUTDOWN));
    assert!(wait_until(Duration::from_secs(5), || board.fan_value() == "1"));
    assert!(board.marker.exists());

    send_sigterm(std::process::id());
    handle.join().unwrap().unwrap();

    assert_eq!(board.fan_value(), "0");
    assert!(!board.marker.exists());
}

#[test]
#[serial]
fn test_sigterm_to_daemon_stops_fan() {
    let board = Board::hot();
    let config = board.write_config();

    let mut child = Command::new(env!("CARGO_BIN_EXE_autofan"))
        .arg("--config")
        .arg(&config)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let started = wait_until(Duration::from_secs(10), || board.fan_value() == "1");
    if !started {
        let _ = child.kill();
        panic!("daemon never turned the fan on");
    }
    assert!(board.marker.exists());

    send_sigterm(child.id());
    let status = wait_for_exit(&mut child, Duration::from_secs(10)).expect("daemon did not exit");

    assert!(status.success(), "exit status {:?}", status);
    assert_eq!(board.fan_value(), "0");
    assert!(!Path::new(&board.marker).exists());
    let log = fs::read_to_string(board.tmp.path().join("autofan.log")).unwrap();
    assert!(log.contains("Controller closed"));
}
