use tracing::warn;

/// Upper bound on the reboot interval: one year in minutes.
const MAX_REBOOT_MINUTES: u64 = 525_600;

/// Scheduled self-termination with the reboot exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootMode {
    Disabled,
    /// Fire when the local wall clock matches this time, to the minute.
    DailyTime { hour: u32, minute: u32 },
    /// Fire every `minutes` of loop uptime.
    Interval { minutes: u64 },
}

impl RebootMode {
    /// Parse a `periodic_reboot` config value.
    ///
    /// `HH:MM` selects a daily local-time reboot. An integer with an
    /// optional `h|d|w|m` unit suffix (hours, days, weeks, 30-day months;
    /// bare numbers mean days) selects an interval, capped at one year.
    /// Anything else, including `OFF`, disables the schedule.
    pub fn parse(value: &str) -> RebootMode {
        let value = value.trim();

        if let Some((h, m)) = value.split_once(':') {
            // Trailing bytes after the minutes ("12:30:00", "12:30 x") are
            // ignored; only the two leading numbers matter.
            if let (Some(hour), Some(minute)) = (leading_number(h), leading_number(m)) {
                if hour <= 23 && minute <= 59 {
                    return RebootMode::DailyTime { hour, minute };
                }
            }
            warn!(value, "invalid daily reboot time, periodic reboot disabled");
            return RebootMode::Disabled;
        }

        let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return RebootMode::Disabled;
        }
        let Ok(interval) = digits.parse::<u64>() else {
            warn!(value, "reboot interval too large, periodic reboot disabled");
            return RebootMode::Disabled;
        };

        let unit = value[digits.len()..].chars().next().unwrap_or('d');
        let multiplier: u64 = match unit {
            'h' | 'H' => 60,
            'd' | 'D' => 24 * 60,
            'w' | 'W' => 7 * 24 * 60,
            'm' | 'M' => 30 * 24 * 60,
            _ => 0,
        };

        if multiplier == 0 || interval == 0 {
            return RebootMode::Disabled;
        }

        let Some(minutes) = interval.checked_mul(multiplier) else {
            warn!(value, "reboot interval overflows, periodic reboot disabled");
            return RebootMode::Disabled;
        };
        if minutes > MAX_REBOOT_MINUTES {
            warn!(
                minutes,
                max = MAX_REBOOT_MINUTES,
                "reboot interval too long, periodic reboot disabled"
            );
            return RebootMode::Disabled;
        }

        RebootMode::Interval { minutes }
    }

    /// Decide whether the schedule fires. Consulted once per 60-second
    /// boundary of loop uptime; `local` is the current local (hour, minute).
    pub fn should_fire(&self, loop_uptime_minutes: u64, local: (u32, u32)) -> bool {
        match *self {
            RebootMode::Disabled => false,
            RebootMode::DailyTime { hour, minute } => local.0 == hour && local.1 == minute,
            RebootMode::Interval { minutes } => {
                loop_uptime_minutes > 0 && loop_uptime_minutes % minutes == 0
            }
        }
    }
}

/// The leading decimal run of a string, whitespace-skipped. `None` when
/// no digits lead (or the run overflows).
fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
