mod clock;
mod command;
mod config;
mod fsops;
mod heartbeat;
mod logging;
mod process;
mod reboot;
mod rusage;
mod selftest;
mod sentinel;
mod server;
mod stats;
mod supervisor;

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{error, info};

use crate::config::WatchdogConfig;
use crate::supervisor::Supervisor;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Process watchdog: starts the programs declared in the INI file,
/// restarts them on crash or missed heartbeat, and reports run statistics.
///
/// Supervised programs must periodically send `p<pid>` to the configured
/// UDP port. Sentinel files in the working directory (`start<app>`,
/// `stop<app>`, `restart<app>`, `wdtstop`, `wdtrestart`, `wdtreboot`)
/// command the supervisor. Exit codes: 0 normal, 2 restart me, 3 reboot
/// the host.
#[derive(Parser, Debug)]
#[command(name = "wdt", disable_version_flag = true)]
struct Cli {
    /// Path to the INI configuration file.
    #[arg(
        short = 'i',
        long = "config",
        value_name = "file.ini",
        default_value = config::DEFAULT_CONFIG_FILE
    )]
    config: PathBuf,

    /// Run a named self-test and exit.
    #[arg(short = 't', long = "test", value_name = "testname")]
    test: Option<String>,

    /// Print the version and exit.
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Also append log output to wdt.log (rotated past 100 KiB).
    #[arg(long = "log-file")]
    log_file: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.version {
        eprintln!("wdt version : {VERSION}");
        std::process::exit(supervisor::EXIT_NORMALLY);
    }

    // A peer closing the socket mid-send must not take the supervisor down.
    // SAFETY: ignoring SIGPIPE before any other thread exists.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    logging::init(cli.log_file, Path::new("."));

    if let Some(test) = cli.test.as_deref() {
        std::process::exit(selftest::run(test, &cli.config));
    }

    info!(version = VERSION, "wdt started");

    let config = match WatchdogConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration load failed");
            std::process::exit(supervisor::EXIT_CRASHED);
        }
    };

    // Current-thread runtime: the supervisor is a single-threaded loop and
    // every piece of state stays on it.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            std::process::exit(supervisor::EXIT_CRASHED);
        }
    };

    let code = runtime.block_on(async {
        let sup = match Supervisor::new(config, Path::new(".")) {
            Ok(sup) => sup,
            Err(e) => {
                // A fresh supervisor gets a fresh socket; let the outer
                // launcher try again.
                error!(error = %e, "UDP start failed");
                return supervisor::EXIT_RESTART;
            }
        };
        sup.run().await
    });

    info!(code, "wdt ended");
    std::process::exit(code);
}
