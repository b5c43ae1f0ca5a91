use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use chrono::Timelike;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::command::Command;
use crate::config::WatchdogConfig;
use crate::heartbeat;
use crate::process::{self, ProgramRuntime};
use crate::rusage::ResourceSampler;
use crate::sentinel::{self, Action, SentinelBox};
use crate::server::{Poll, UdpEndpoint};
use crate::stats::StatsStore;

/// Exit codes: the contract with any outer launcher.
pub const EXIT_NORMALLY: i32 = 0;
/// Reserved for supervised children's own crash reporting.
pub const EXIT_CRASHED: i32 = 1;
pub const EXIT_RESTART: i32 = 2;
pub const EXIT_REBOOT: i32 = 3;

/// UDP poll timeout; this is the loop's tick length.
pub const SOCKET_TIMEOUT_MS: u64 = 500;

/// Flush stats files every this many minutes of loop uptime.
const STATS_FLUSH_PERIOD_MIN: u64 = 15;

/// Graceful SIGUSR1 exit requests tolerated per run; the next delivery
/// after these stops waiting for a clean shutdown and exits on the spot.
const USR1_HARD_EXIT_COUNT: u32 = 10;

/// Exit request shared between the loop and the signal listener tasks.
/// Handlers only flip the flag and store the code; all real work happens
/// on the loop's shutdown path.
#[derive(Debug, Clone)]
pub struct ShutdownFlag {
    alive: Arc<AtomicBool>,
    code: Arc<AtomicI32>,
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
            code: Arc::new(AtomicI32::new(EXIT_NORMALLY)),
        }
    }

    pub fn request(&self, code: i32) {
        self.code.store(code, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn exit_code(&self) -> i32 {
        self.code.load(Ordering::SeqCst)
    }
}

/// Listener tasks for the operator signals. They interleave with the loop
/// at its await points; the current-thread runtime keeps all state on one
/// thread.
fn install_signal_handlers(flag: &ShutdownFlag) -> io::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;

    let f = flag.clone();
    tokio::spawn(async move {
        loop {
            interrupt.recv().await;
            info!("INT detected, restarting");
            f.request(EXIT_RESTART);
        }
    });

    let f = flag.clone();
    tokio::spawn(async move {
        loop {
            terminate.recv().await;
            info!("TERM detected, restarting");
            f.request(EXIT_RESTART);
        }
    });

    let f = flag.clone();
    tokio::spawn(async move {
        loop {
            quit.recv().await;
            info!("QUIT detected, rebooting");
            f.request(EXIT_REBOOT);
        }
    });

    let f = flag.clone();
    tokio::spawn(async move {
        let mut strikes = 0u32;
        loop {
            usr1.recv().await;
            info!("USR1 detected, terminating");
            f.request(EXIT_NORMALLY);
            strikes += 1;
            if strikes > USR1_HARD_EXIT_COUNT {
                error!("10x USR1 detected, terminating forcefully");
                std::process::exit(EXIT_NORMALLY);
            }
        }
    });

    tokio::spawn(async move {
        loop {
            usr2.recv().await;
            debug!("USR2 detected");
        }
    });

    Ok(())
}

/// The supervisor: owns every piece of mutable state and drives the
/// 500 ms tick loop. One tick is: receive and dispatch at most one
/// datagram, scan all programs in index order, poll the global sentinels,
/// consult the reboot schedule on minute boundaries.
pub struct Supervisor {
    config: WatchdogConfig,
    clock: Clock,
    endpoint: UdpEndpoint,
    inbox: SentinelBox,
    programs: Vec<ProgramRuntime>,
    stats: StatsStore,
    sampler: ResourceSampler,
    shutdown: ShutdownFlag,
    start_tick: u64,
    last_minute: u64,
}

impl Supervisor {
    /// Bind the socket and load persisted statistics. `workdir` hosts the
    /// sentinel inbox and the stats files.
    pub fn new(config: WatchdogConfig, workdir: &Path) -> io::Result<Supervisor> {
        let endpoint = UdpEndpoint::bind(config.udp_port)?;

        debug!(
            config = %config.path.display(),
            mtime = ?config.mtime,
            "using configuration"
        );
        for (i, p) in config.programs.iter().enumerate() {
            debug!(
                index = i,
                program = %p.name,
                start_delay = p.start_delay_sec,
                heartbeat_delay = p.heartbeat_delay_sec,
                heartbeat_interval = p.heartbeat_interval_sec,
                cmd = %p.cmd,
                "program configured"
            );
        }

        let names: Vec<String> = config.programs.iter().map(|p| p.name.clone()).collect();
        let mut stats = StatsStore::new(workdir, names);
        stats.load_all();

        let count = config.programs.len();
        let clock = Clock::new();
        let start_tick = clock.now_monotonic_seconds();

        Ok(Supervisor {
            sampler: ResourceSampler::new(count),
            programs: (0..count).map(|_| ProgramRuntime::default()).collect(),
            inbox: SentinelBox::new(workdir),
            stats,
            endpoint,
            config,
            clock,
            shutdown: ShutdownFlag::new(),
            start_tick,
            last_minute: 0,
        })
    }

    /// Run until an exit is requested; returns the process exit code.
    pub async fn run(mut self) -> i32 {
        if let Err(e) = install_signal_handlers(&self.shutdown) {
            error!(error = %e, "failed to install signal handlers");
            return EXIT_RESTART;
        }

        info!(
            programs = self.config.programs.len(),
            port = self.endpoint.local_port().unwrap_or(self.config.udp_port),
            "supervisor running"
        );

        while self.shutdown.alive() {
            let polled = self.endpoint.poll(SOCKET_TIMEOUT_MS).await;
            match polled {
                Poll::Message(data) => self.dispatch(Command::parse(&data)),
                Poll::Timeout => {}
                Poll::Error(e) => {
                    error!(error = %e, "UDP poll failed");
                    self.shutdown.request(EXIT_RESTART);
                    break;
                }
            }
            if !self.shutdown.alive() {
                break;
            }
            self.tick().await;
        }

        self.shutdown_all().await;
        self.shutdown.exit_code()
    }

    /// One post-receive tick: scan, global sentinels, reboot schedule.
    async fn tick(&mut self) {
        let now = self.clock.now_monotonic_seconds();
        let uptime = now.saturating_sub(self.start_tick);
        let minute = uptime / 60;
        let minute_boundary = minute != self.last_minute;
        self.last_minute = minute;
        let flush_boundary = minute_boundary && minute % STATS_FLUSH_PERIOD_MIN == 0;

        self.scan(now, uptime, minute_boundary, flush_boundary).await;
        self.poll_global_sentinels();
        if minute_boundary {
            self.check_reboot_schedule(minute);
        }
    }

    /// Apply one parsed command. Heartbeats are applied before the scan of
    /// the same tick, so a heartbeat and a timeout cannot both fire.
    fn dispatch(&mut self, command: Command) {
        match command {
            Command::Heartbeat { pid } => {
                let now = self.clock.now_monotonic_seconds();
                let Some(i) = self.find_pid(pid) else {
                    // Possibly a previous incarnation still draining.
                    debug!(pid, "heartbeat from unknown pid ignored");
                    return;
                };

                let gap = heartbeat::elapsed(&self.programs[i], now);
                if self.programs[i].first_heartbeat_seen {
                    debug!(program = %self.config.programs[i].name, gap, "heartbeat");
                    self.stats.update_heartbeat_time(i, gap);
                } else {
                    debug!(
                        program = %self.config.programs[i].name,
                        latency = gap,
                        "first heartbeat"
                    );
                    self.stats.update_first_heartbeat_time(i, gap);
                    self.programs[i].first_heartbeat_seen = true;
                }
                heartbeat::update(&mut self.programs[i], now);
            }
            // Reserved for operator-directed control; not wired up.
            Command::Start { name } => debug!(%name, "start command received, ignored"),
            Command::Stop { name } => debug!(%name, "stop command received, ignored"),
            Command::Restart { name } => debug!(%name, "restart command received, ignored"),
            // Already logged with a payload dump by the parser.
            Command::Unknown => {}
        }
    }

    fn find_pid(&self, pid: i32) -> Option<usize> {
        self.programs
            .iter()
            .position(|rt| rt.pid > 0 && rt.pid == pid)
    }

    fn is_running(&mut self, i: usize) -> bool {
        process::is_running(&self.config.programs[i].name, &mut self.programs[i])
    }

    /// Visit every program in index order and settle its state.
    async fn scan(&mut self, now: u64, uptime: u64, minute_boundary: bool, flush_boundary: bool) {
        for i in 0..self.config.programs.len() {
            let name = self.config.programs[i].name.clone();

            if self.programs[i].started {
                if minute_boundary && self.is_running(i) {
                    let pid = self.programs[i].pid;
                    if let Some(sample) = self.sampler.sample(i, pid) {
                        self.stats
                            .update_resource_usage(i, sample.cpu_percent, sample.rss_kb);
                    }
                }
                if flush_boundary {
                    self.stats.flush(i);
                }

                if !self.is_running(i) {
                    error!(program = %name, "process has crashed, restarting");
                    let wall = self.clock.wall_time_seconds();
                    self.stats.crashed_at(i, wall);
                    self.restart_program(i).await;
                } else if heartbeat::is_timeout(&self.config.programs[i], &self.programs[i], now) {
                    error!(
                        program = %name,
                        "process has not sent a heartbeat in time, restarting"
                    );
                    let wall = self.clock.wall_time_seconds();
                    self.stats.heartbeat_reset_at(i, wall);
                    self.restart_program(i).await;
                } else if self.inbox.present(Action::Stop, &name) {
                    info!(program = %name, "process stopped by sentinel");
                    process::terminate(&name, &mut self.programs[i]).await;
                } else if self.inbox.present(Action::Restart, &name) {
                    info!(program = %name, "process restarted by sentinel");
                    self.restart_program(i).await;
                    self.inbox.remove(Action::Restart, &name);
                }
            } else {
                let due = uptime >= self.config.programs[i].start_delay_sec;
                if !self.inbox.present(Action::Stop, &name)
                    && (self.inbox.present(Action::Start, &name) || due)
                {
                    self.start_program(i, now);
                }
            }
        }
    }

    /// Spawn program `i` and account for it. Sentinels that requested the
    /// start are consumed on success.
    fn start_program(&mut self, i: usize, now: u64) {
        let spec = &self.config.programs[i];
        let rt = &mut self.programs[i];
        match process::spawn(spec, rt) {
            Ok(()) => {
                heartbeat::update(rt, now);
                info!(
                    program = %spec.name,
                    pid = rt.pid,
                    cmd = %spec.cmd,
                    "process started"
                );
                let wall = self.clock.wall_time_seconds();
                self.stats.started_at(i, wall);
                self.inbox.remove(Action::Start, &spec.name);
                self.inbox.remove(Action::Restart, &spec.name);
            }
            Err(e) => {
                error!(program = %spec.name, error = %e, "failed to start process");
            }
        }
    }

    /// Terminate (if needed), spawn, and wait for the program to show up
    /// as running.
    async fn restart_program(&mut self, i: usize) {
        let name = self.config.programs[i].name.clone();
        debug!(program = %name, "restarting process");

        if self.is_running(i) {
            process::terminate(&name, &mut self.programs[i]).await;
        }

        let spawned = {
            let spec = &self.config.programs[i];
            let rt = &mut self.programs[i];
            match process::spawn(spec, rt) {
                Ok(()) => {
                    info!(
                        program = %spec.name,
                        pid = rt.pid,
                        "process started"
                    );
                    true
                }
                Err(e) => {
                    error!(program = %spec.name, error = %e, "failed to start process");
                    false
                }
            }
        };
        if !spawned {
            return;
        }

        let now = self.clock.now_monotonic_seconds();
        heartbeat::update(&mut self.programs[i], now);
        let wall = self.clock.wall_time_seconds();
        self.stats.started_at(i, wall);

        if process::await_started(&name, &mut self.programs[i]).await {
            // Fresh warm-up tick once the process is confirmed up.
            let now = self.clock.now_monotonic_seconds();
            heartbeat::update(&mut self.programs[i], now);
            info!(program = %name, "process restarted");
        } else {
            error!(program = %name, "restarted process did not come up");
        }
    }

    /// The supervisor's own operator inbox, one command per tick.
    fn poll_global_sentinels(&mut self) {
        if self.inbox.consume_global(sentinel::GLOBAL_STOP) {
            info!("supervisor stopped by sentinel");
            self.shutdown.request(EXIT_NORMALLY);
        } else if self.inbox.consume_global(sentinel::GLOBAL_RESTART) {
            info!("supervisor restart requested by sentinel");
            self.shutdown.request(EXIT_RESTART);
        } else if self.inbox.consume_global(sentinel::GLOBAL_REBOOT) {
            info!("host reboot requested by sentinel");
            self.shutdown.request(EXIT_REBOOT);
        }
    }

    fn check_reboot_schedule(&mut self, uptime_minutes: u64) {
        let local = chrono::Local::now();
        if self
            .config
            .reboot
            .should_fire(uptime_minutes, (local.hour(), local.minute()))
        {
            warn!("periodic reboot schedule fired");
            self.shutdown.request(EXIT_REBOOT);
        }
    }

    /// Flush statistics and take every child down before returning the
    /// exit code. No child outlives a successful shutdown.
    async fn shutdown_all(&mut self) {
        debug!("supervisor ending");
        for i in 0..self.config.programs.len() {
            self.stats.flush(i);
            let name = self.config.programs[i].name.clone();
            process::terminate(&name, &mut self.programs[i]).await;
            if !self.is_running(i) {
                info!(program = %name, "process ended");
            }
        }
        info!(code = self.shutdown.exit_code(), "supervisor ended");
    }

    #[cfg(test)]
    fn stats(&self) -> &StatsStore {
        &self.stats
    }

    #[cfg(test)]
    fn runtime(&self, i: usize) -> &ProgramRuntime {
        &self.programs[i]
    }
}
