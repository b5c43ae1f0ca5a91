use tracing::debug;

use crate::config::ProgramSpec;
use crate::process::ProgramRuntime;

/// Heartbeat timing policy.
///
/// All functions take `now` (monotonic seconds) explicitly so the timing
/// rules can be tested without sleeping.

/// Record a heartbeat (or a spawn, which starts the warm-up clock).
pub fn update(rt: &mut ProgramRuntime, now: u64) {
    rt.last_heartbeat = now;
}

/// Seconds since the last accepted heartbeat.
pub fn elapsed(rt: &ProgramRuntime, now: u64) -> u64 {
    now.saturating_sub(rt.last_heartbeat)
}

/// Whether the program has missed its heartbeat deadline.
///
/// Before the first heartbeat of an instance the threshold is
/// `max(heartbeat_interval, heartbeat_delay)`: programs may need a long
/// warm-up, and the `max` keeps a misconfigured `delay < interval` from
/// shortening the grace period. After the first heartbeat only the
/// interval applies.
pub fn is_timeout(spec: &ProgramSpec, rt: &ProgramRuntime, now: u64) -> bool {
    if !rt.started {
        return false;
    }
    if spec.heartbeat_interval_sec == 0 {
        return false;
    }

    let threshold = if rt.first_heartbeat_seen {
        spec.heartbeat_interval_sec
    } else {
        spec.heartbeat_interval_sec.max(spec.heartbeat_delay_sec)
    };

    if elapsed(rt, now) >= threshold {
        debug!(program = %spec.name, threshold, "heartbeat deadline passed");
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(interval: u64, delay: u64) -> ProgramSpec {
        ProgramSpec {
            name: "Test".to_string(),
            cmd: "/bin/true".to_string(),
            start_delay_sec: 0,
            heartbeat_delay_sec: delay,
            heartbeat_interval_sec: interval,
        }
    }

    fn started_at(spawn_tick: u64) -> ProgramRuntime {
        ProgramRuntime {
            started: true,
            last_heartbeat: spawn_tick,
            ..Default::default()
        }
    }

    #[test]
    fn not_started_never_times_out() {
        let rt = ProgramRuntime::default();
        assert!(!is_timeout(&spec(2, 5), &rt, 1_000_000));
    }

    #[test]
    fn zero_interval_never_times_out() {
        let rt = started_at(0);
        assert!(!is_timeout(&spec(0, 5), &rt, 1_000_000));
    }

    #[test]
    fn first_heartbeat_uses_max_of_interval_and_delay() {
        // interval=2, delay=5: grace period before the first heartbeat is 5.
        let s = spec(2, 5);
        let rt = started_at(0);

        assert!(!is_timeout(&s, &rt, 4));
        assert!(is_timeout(&s, &rt, 5));
        assert!(is_timeout(&s, &rt, 6));
    }

    #[test]
    fn misconfigured_delay_below_interval_is_tolerated() {
        // delay=1 < interval=10: max() keeps the threshold at 10.
        let s = spec(10, 1);
        let rt = started_at(0);

        assert!(!is_timeout(&s, &rt, 9));
        assert!(is_timeout(&s, &rt, 10));
    }

    #[test]
    fn after_first_heartbeat_only_interval_applies() {
        let s = spec(2, 60);
        let mut rt = started_at(0);
        rt.first_heartbeat_seen = true;
        update(&mut rt, 10);

        assert!(!is_timeout(&s, &rt, 11));
        assert!(is_timeout(&s, &rt, 12));
    }

    #[test]
    fn heartbeat_resets_the_deadline() {
        let s = spec(3, 3);
        let mut rt = started_at(0);
        rt.first_heartbeat_seen = true;

        update(&mut rt, 2);
        assert!(!is_timeout(&s, &rt, 4));
        update(&mut rt, 4);
        assert!(!is_timeout(&s, &rt, 6));
        assert!(is_timeout(&s, &rt, 7));
    }

    #[test]
    fn elapsed_is_saturating() {
        let mut rt = ProgramRuntime::default();
        update(&mut rt, 100);
        // A now earlier than last-seen cannot underflow.
        assert_eq!(elapsed(&rt, 50), 0);
        assert_eq!(elapsed(&rt, 100), 0);
        assert_eq!(elapsed(&rt, 103), 3);
    }

    #[test]
    fn stale_clock_does_not_time_out() {
        let s = spec(2, 2);
        let rt = started_at(100);
        // now behind the spawn tick: elapsed saturates to zero.
        assert!(!is_timeout(&s, &rt, 50));
    }
}
