use std::path::Path;
use std::time::Instant;

use tracing::{debug, error, info, trace, warn};

use crate::clock::Clock;
use crate::config::WatchdogConfig;
use crate::sentinel::{Action, SentinelBox};
use crate::supervisor::{EXIT_CRASHED, EXIT_NORMALLY, EXIT_REBOOT, EXIT_RESTART};

/// Run the named self-test and return the process exit code. The `exit_*`
/// tests exist so an outer launcher can be exercised end to end.
pub fn run(name: &str, config_path: &Path) -> i32 {
    println!("Test: {name}");
    let code = dispatch(name, config_path);
    println!("Test finished");
    code
}

fn dispatch(name: &str, config_path: &Path) -> i32 {
    match name {
        "config" => test_config(config_path),
        "filecmd" => test_filecmd(),
        "log" => test_log(),
        "delay" => test_delay(),
        "exit_normal" => {
            println!("Exit normal");
            EXIT_NORMALLY
        }
        "exit_crash" => {
            println!("Exit crash");
            EXIT_CRASHED
        }
        "exit_restart" => {
            println!("Exit restart");
            EXIT_RESTART
        }
        "exit_reboot" => {
            println!("Exit reboot");
            EXIT_REBOOT
        }
        "exit_unknown" => {
            println!("Exit unknown");
            123
        }
        _ => {
            eprintln!("Invalid testname!");
            EXIT_CRASHED
        }
    }
}

fn test_config(config_path: &Path) -> i32 {
    let config = match WatchdogConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error on reading the ini: {e}");
            return EXIT_CRASHED;
        }
    };

    println!("udp_port = {}", config.udp_port);
    println!("periodic_reboot = {:?}", config.reboot);
    for (i, p) in config.programs.iter().enumerate() {
        println!("## Program info [{i}]");
        println!("{i}- name              : {}", p.name);
        println!("{i}- start_delay       : {}", p.start_delay_sec);
        println!("{i}- heartbeat_delay   : {}", p.heartbeat_delay_sec);
        println!("{i}- heartbeat_interval: {}", p.heartbeat_interval_sec);
        println!("{i}- cmd               : {}", p.cmd);
    }
    EXIT_NORMALLY
}

fn test_filecmd() -> i32 {
    let inbox = SentinelBox::new(Path::new("."));
    let name = "selftest";

    for action in [Action::Start, Action::Stop, Action::Restart] {
        inbox.create(action, name);
        if !inbox.present(action, name) {
            println!("Fail!");
            return EXIT_CRASHED;
        }
        inbox.remove(action, name);
        if inbox.present(action, name) {
            println!("Fail!");
            return EXIT_CRASHED;
        }
    }
    println!("Success");
    EXIT_NORMALLY
}

fn test_log() -> i32 {
    for i in 0..5 {
        trace!(iteration = i, "log test");
        debug!(iteration = i, "log test");
        info!(iteration = i, "log test");
        warn!(iteration = i, "log test");
        error!(iteration = i, "log test");
    }
    EXIT_NORMALLY
}

fn test_delay() -> i32 {
    let ms = 1500u64;
    let clock = Clock::new();
    let started = Instant::now();
    std::thread::sleep(std::time::Duration::from_millis(ms));
    let measured = started.elapsed().as_millis();
    println!("Waited\t\t{ms} ms");
    println!("Measured\t{measured} ms");
    println!("Clock\t\t{} s", clock.now_monotonic_seconds());
    EXIT_NORMALLY
}
