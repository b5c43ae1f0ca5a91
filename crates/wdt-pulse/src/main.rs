use std::io;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Exit code the watchdog's test harness reads as "crashed".
const EXIT_CRASHED: i32 = 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Heartbeat every interval, forever.
    Steady,
    /// Never send a heartbeat; exercises the watchdog's timeout path.
    Silent,
    /// Delay the first heartbeat by `--after` seconds, then run steady.
    Late,
    /// Heartbeat until `--after` seconds have passed, then exit 1.
    Crash,
}

/// Heartbeat test child for the process watchdog.
///
/// Sends `p<pid>` datagrams to the watchdog's UDP port so supervision
/// scenarios (steady operation, warm-up, missed heartbeats, crashes) can
/// be exercised without real workloads.
#[derive(Parser, Debug)]
#[command(name = "wdt-pulse")]
struct Cli {
    /// Watchdog UDP port.
    #[arg(short, long, default_value_t = 12345)]
    port: u16,

    /// Seconds between heartbeats.
    #[arg(short, long, default_value_t = 5)]
    interval: u64,

    /// Behaviour to simulate.
    #[arg(short, long, value_enum, default_value = "steady")]
    mode: Mode,

    /// Seconds before crashing (crash mode) or before the first
    /// heartbeat (late mode).
    #[arg(short, long, default_value_t = 10)]
    after: u64,
}

fn heartbeat_payload(pid: u32) -> String {
    format!("p{pid}")
}

async fn send_heartbeat(socket: &UdpSocket, port: u16, pid: u32) -> io::Result<()> {
    socket
        .send_to(heartbeat_payload(pid).as_bytes(), ("127.0.0.1", port))
        .await?;
    Ok(())
}

async fn beat_forever(socket: &UdpSocket, port: u16, pid: u32, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        match send_heartbeat(socket, port, pid).await {
            Ok(()) => debug!(pid, port, "heartbeat sent"),
            Err(e) => warn!(error = %e, "failed to send heartbeat"),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let pid = std::process::id();
    let socket = UdpSocket::bind("127.0.0.1:0").await?;

    info!(pid, port = cli.port, mode = ?cli.mode, "wdt-pulse started");

    match cli.mode {
        Mode::Steady => beat_forever(&socket, cli.port, pid, cli.interval).await,
        Mode::Silent => loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        },
        Mode::Late => {
            tokio::time::sleep(Duration::from_secs(cli.after)).await;
            beat_forever(&socket, cli.port, pid, cli.interval).await;
        }
        Mode::Crash => {
            tokio::select! {
                _ = beat_forever(&socket, cli.port, pid, cli.interval) => {}
                _ = tokio::time::sleep(Duration::from_secs(cli.after)) => {
                    info!(pid, "simulating a crash");
                    std::process::exit(EXIT_CRASHED);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_pid() {
        assert_eq!(heartbeat_payload(1234), "p1234");
    }

    #[tokio::test]
    async fn heartbeat_reaches_listener() {
        let listener = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        listener
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = listener.local_addr().unwrap().port();

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send_heartbeat(&socket, port, 4321).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = listener.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"p4321");
    }
}
