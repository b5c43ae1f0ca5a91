use std::io;
use std::time::Instant;

/// One resource snapshot for a supervised child.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// CPU utilization over the window since the previous sample. The
    /// first sample of a pid has no baseline and reports 0.0.
    pub cpu_percent: f64,
    /// Current resident set size in KB.
    pub rss_kb: u64,
}

/// Parse CPU time (utime + stime) from /proc/{pid}/stat content.
/// Returns time in clock ticks.
pub fn parse_cpu_ticks(stat: &str) -> io::Result<u64> {
    // Format: pid (comm) state ppid ... utime(14th) stime(15th) ...
    // comm can contain spaces/parens, so find the last ')' first.
    let after_comm = stat
        .rfind(')')
        .and_then(|i| stat.get(i + 2..))
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed /proc stat"))?;

    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // After ')': state(0) ppid(1) ... utime(11) stime(12)
    if fields.len() < 13 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "too few fields in /proc stat",
        ));
    }

    let utime: u64 = fields[11]
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let stime: u64 = fields[12]
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    Ok(utime + stime)
}

/// Read CPU time (utime + stime) from /proc/{pid}/stat, in clock ticks.
pub fn read_cpu_ticks(pid: i32) -> io::Result<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat"))?;
    parse_cpu_ticks(&stat)
}

/// Parse resident set size (VmRSS) from /proc/{pid}/status content.
/// Returns KB.
pub fn parse_rss_kb(status: &str) -> io::Result<u64> {
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let trimmed = rest.trim();
            let kb_str = trimmed.strip_suffix(" kB").unwrap_or(trimmed);
            let kb: u64 = kb_str
                .trim()
                .parse()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            return Ok(kb);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        "VmRSS not found in /proc status",
    ))
}

/// Read resident set size (VmRSS) from /proc/{pid}/status, in KB.
pub fn read_rss_kb(pid: i32) -> io::Result<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status"))?;
    parse_rss_kb(&status)
}

/// Get the number of clock ticks per second (typically 100 on Linux).
pub fn clock_ticks_per_sec() -> u64 {
    // SAFETY: sysconf(_SC_CLK_TCK) is always safe to call.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as u64
    } else {
        100
    }
}

#[derive(Debug, Clone, Copy)]
struct Baseline {
    pid: i32,
    cpu_ticks: u64,
    at: Instant,
}

/// Per-program `/proc` sampler. Keeps a pid-keyed CPU-tick baseline per
/// slot so a restarted program starts a fresh measurement window.
#[derive(Debug)]
pub struct ResourceSampler {
    ticks_per_sec: u64,
    baselines: Vec<Option<Baseline>>,
}

impl ResourceSampler {
    pub fn new(slots: usize) -> Self {
        Self {
            ticks_per_sec: clock_ticks_per_sec(),
            baselines: vec![None; slots],
        }
    }

    /// Sample the pid behind slot `i`. Returns `None` when `/proc` cannot
    /// be read (process gone between probe and sample).
    pub fn sample(&mut self, i: usize, pid: i32) -> Option<ResourceSample> {
        let rss_kb = read_rss_kb(pid).ok()?;
        let cpu_ticks = read_cpu_ticks(pid).ok()?;
        let now = Instant::now();

        let cpu_percent = match self.baselines[i] {
            Some(prev) if prev.pid == pid => {
                let window = now.duration_since(prev.at).as_secs_f64();
                let delta = cpu_ticks.saturating_sub(prev.cpu_ticks) as f64;
                if window > 0.0 {
                    100.0 * delta / (self.ticks_per_sec as f64 * window)
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        self.baselines[i] = Some(Baseline { pid, cpu_ticks, at: now });
        Some(ResourceSample { cpu_percent, rss_kb })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Real /proc stat line from a bash process.
    const SAMPLE_STAT: &str =
        "12345 (bash) S 1 12345 12345 0 -1 4194304 500 0 0 0 150 30 0 0 20 0 1 0 100 1234567 200 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0";

    #[test]
    fn parse_cpu_ticks_normal() {
        // utime=150, stime=30
        assert_eq!(parse_cpu_ticks(SAMPLE_STAT).unwrap(), 180);
    }

    #[test]
    fn parse_cpu_ticks_comm_with_spaces() {
        let stat = "999 (Web Content) S 1 999 999 0 -1 0 0 0 0 0 42 8 0 0 20 0 1 0 100 0 0 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0";
        assert_eq!(parse_cpu_ticks(stat).unwrap(), 50);
    }

    #[test]
    fn parse_cpu_ticks_comm_with_parens() {
        let stat = "888 (my (app)) S 1 888 888 0 -1 0 0 0 0 0 10 5 0 0 20 0 1 0 100 0 0 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0";
        assert_eq!(parse_cpu_ticks(stat).unwrap(), 15);
    }

    #[test]
    fn parse_cpu_ticks_malformed() {
        assert!(parse_cpu_ticks("garbage data").is_err());
        assert!(parse_cpu_ticks("1 (bash) S 0 1").is_err());
    }

    const SAMPLE_STATUS: &str = "\
Name:\tbash
Umask:\t0022
State:\tS (sleeping)
VmPeak:\t 10000 kB
VmSize:\t  9000 kB
VmHWM:\t  4096 kB
VmRSS:\t  3000 kB
Threads:\t1";

    #[test]
    fn parse_rss_normal() {
        assert_eq!(parse_rss_kb(SAMPLE_STATUS).unwrap(), 3000);
    }

    #[test]
    fn parse_rss_missing() {
        let status = "Name:\tbash\nVmPeak:\t10000 kB\n";
        assert_eq!(
            parse_rss_kb(status).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn parse_rss_no_kb_suffix() {
        assert_eq!(parse_rss_kb("VmRSS:\t 512\n").unwrap(), 512);
    }

    #[test]
    fn parse_rss_invalid_value() {
        assert!(parse_rss_kb("VmRSS:\t notanumber kB\n").is_err());
    }

    #[test]
    fn clock_ticks_positive() {
        assert!(clock_ticks_per_sec() > 0);
    }

    #[test]
    fn sampler_reads_own_process() {
        let mut sampler = ResourceSampler::new(1);
        let pid = std::process::id() as i32;

        let first = sampler.sample(0, pid).expect("own /proc should be readable");
        assert!(first.rss_kb > 0);
        assert_eq!(first.cpu_percent, 0.0);

        // Second sample has a baseline; CPU% is finite and non-negative.
        std::thread::sleep(std::time::Duration::from_millis(50));
        let second = sampler.sample(0, pid).unwrap();
        assert!(second.cpu_percent >= 0.0);
        assert!(second.cpu_percent.is_finite());
    }

    #[test]
    fn sampler_resets_baseline_on_pid_change() {
        let mut sampler = ResourceSampler::new(1);
        let pid = std::process::id() as i32;

        sampler.sample(0, pid).unwrap();
        // A different pid in the same slot must not inherit the baseline.
        // Pid 1 is init; its /proc may not be readable, in which case the
        // sample is None and the baseline stays pid-tagged.
        if let Some(sample) = sampler.sample(0, 1) {
            assert_eq!(sample.cpu_percent, 0.0);
        }
    }

    #[test]
    fn sampler_missing_pid_returns_none() {
        let mut sampler = ResourceSampler::new(1);
        // Pid from the reserved high range, almost certainly absent.
        assert!(sampler.sample(0, i32::MAX - 7).is_none());
    }
}
