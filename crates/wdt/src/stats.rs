use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone};
use tracing::{debug, error, info};

use crate::fsops;

/// Format sentinel. A record whose magic does not match is treated as
/// uninitialized and reset; bump this constant when the layout changes.
pub const STATS_MAGIC: u32 = 0xA50F_AA55;

/// Smoothing factor for the CPU usage average. CPU is noisy between
/// samples; memory uses a plain arithmetic mean instead.
const CPU_EMA_ALPHA: f64 = 0.1;

/// Serialized size of one record.
pub const RECORD_SIZE: usize = 196;

/// Per-program persisted statistics.
///
/// Persisted as a fixed little-endian layout with no padding, fields in
/// declaration order, magic first. Timestamps are wall-clock epoch
/// seconds (0 = never); durations are whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatsRecord {
    pub magic: u32,
    pub started_at: i64,
    pub crashed_at: i64,
    pub heartbeat_reset_at: i64,
    pub avg_first_heartbeat_time: u64,
    pub max_first_heartbeat_time: u64,
    pub min_first_heartbeat_time: u64,
    pub avg_heartbeat_time: u64,
    pub max_heartbeat_time: u64,
    pub min_heartbeat_time: u64,
    pub start_count: u64,
    pub crash_count: u64,
    pub heartbeat_reset_count: u64,
    pub heartbeat_count: u64,
    pub heartbeat_count_old: u64,
    pub avg_heartbeat_count_old: u64,
    pub cpu_current: f64,
    pub cpu_max: f64,
    pub cpu_min: f64,
    pub cpu_avg: f64,
    pub mem_current_kb: u64,
    pub mem_max_kb: u64,
    pub mem_min_kb: u64,
    pub mem_avg_kb: u64,
    pub resource_sample_count: u64,
}

impl StatsRecord {
    fn fresh() -> Self {
        Self {
            magic: STATS_MAGIC,
            ..Default::default()
        }
    }

    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        let mut off = 0;
        put_u32(&mut buf, &mut off, self.magic);
        put_i64(&mut buf, &mut off, self.started_at);
        put_i64(&mut buf, &mut off, self.crashed_at);
        put_i64(&mut buf, &mut off, self.heartbeat_reset_at);
        put_u64(&mut buf, &mut off, self.avg_first_heartbeat_time);
        put_u64(&mut buf, &mut off, self.max_first_heartbeat_time);
        put_u64(&mut buf, &mut off, self.min_first_heartbeat_time);
        put_u64(&mut buf, &mut off, self.avg_heartbeat_time);
        put_u64(&mut buf, &mut off, self.max_heartbeat_time);
        put_u64(&mut buf, &mut off, self.min_heartbeat_time);
        put_u64(&mut buf, &mut off, self.start_count);
        put_u64(&mut buf, &mut off, self.crash_count);
        put_u64(&mut buf, &mut off, self.heartbeat_reset_count);
        put_u64(&mut buf, &mut off, self.heartbeat_count);
        put_u64(&mut buf, &mut off, self.heartbeat_count_old);
        put_u64(&mut buf, &mut off, self.avg_heartbeat_count_old);
        put_f64(&mut buf, &mut off, self.cpu_current);
        put_f64(&mut buf, &mut off, self.cpu_max);
        put_f64(&mut buf, &mut off, self.cpu_min);
        put_f64(&mut buf, &mut off, self.cpu_avg);
        put_u64(&mut buf, &mut off, self.mem_current_kb);
        put_u64(&mut buf, &mut off, self.mem_max_kb);
        put_u64(&mut buf, &mut off, self.mem_min_kb);
        put_u64(&mut buf, &mut off, self.mem_avg_kb);
        put_u64(&mut buf, &mut off, self.resource_sample_count);
        debug_assert_eq!(off, RECORD_SIZE);
        buf
    }

    /// Decode a raw file image. `None` for anything but an exact-size blob;
    /// the magic is checked by the caller so it can log what it healed.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() != RECORD_SIZE {
            return None;
        }
        let mut off = 0;
        Some(Self {
            magic: take_u32(data, &mut off),
            started_at: take_i64(data, &mut off),
            crashed_at: take_i64(data, &mut off),
            heartbeat_reset_at: take_i64(data, &mut off),
            avg_first_heartbeat_time: take_u64(data, &mut off),
            max_first_heartbeat_time: take_u64(data, &mut off),
            min_first_heartbeat_time: take_u64(data, &mut off),
            avg_heartbeat_time: take_u64(data, &mut off),
            max_heartbeat_time: take_u64(data, &mut off),
            min_heartbeat_time: take_u64(data, &mut off),
            start_count: take_u64(data, &mut off),
            crash_count: take_u64(data, &mut off),
            heartbeat_reset_count: take_u64(data, &mut off),
            heartbeat_count: take_u64(data, &mut off),
            heartbeat_count_old: take_u64(data, &mut off),
            avg_heartbeat_count_old: take_u64(data, &mut off),
            cpu_current: take_f64(data, &mut off),
            cpu_max: take_f64(data, &mut off),
            cpu_min: take_f64(data, &mut off),
            cpu_avg: take_f64(data, &mut off),
            mem_current_kb: take_u64(data, &mut off),
            mem_max_kb: take_u64(data, &mut off),
            mem_min_kb: take_u64(data, &mut off),
            mem_avg_kb: take_u64(data, &mut off),
            resource_sample_count: take_u64(data, &mut off),
        })
    }

    /// Roll the heartbeat counter into its `_old` slot. Runs on every
    /// lifecycle event (start, crash, heartbeat reset).
    fn roll_heartbeat_count(&mut self) {
        self.heartbeat_count_old = self.heartbeat_count;
        self.heartbeat_count = 0;
    }
}

fn put_u32(buf: &mut [u8], off: &mut usize, v: u32) {
    buf[*off..*off + 4].copy_from_slice(&v.to_le_bytes());
    *off += 4;
}

fn put_u64(buf: &mut [u8], off: &mut usize, v: u64) {
    buf[*off..*off + 8].copy_from_slice(&v.to_le_bytes());
    *off += 8;
}

fn put_i64(buf: &mut [u8], off: &mut usize, v: i64) {
    buf[*off..*off + 8].copy_from_slice(&v.to_le_bytes());
    *off += 8;
}

fn put_f64(buf: &mut [u8], off: &mut usize, v: f64) {
    buf[*off..*off + 8].copy_from_slice(&v.to_le_bytes());
    *off += 8;
}

fn take_u32(buf: &[u8], off: &mut usize) -> u32 {
    let v = u32::from_le_bytes(buf[*off..*off + 4].try_into().unwrap());
    *off += 4;
    v
}

fn take_u64(buf: &[u8], off: &mut usize) -> u64 {
    let v = u64::from_le_bytes(buf[*off..*off + 8].try_into().unwrap());
    *off += 8;
    v
}

fn take_i64(buf: &[u8], off: &mut usize) -> i64 {
    let v = i64::from_le_bytes(buf[*off..*off + 8].try_into().unwrap());
    *off += 8;
    v
}

fn take_f64(buf: &[u8], off: &mut usize) -> f64 {
    let v = f64::from_le_bytes(buf[*off..*off + 8].try_into().unwrap());
    *off += 8;
    v
}

/// In-memory statistics for every program, persisted to
/// `stats_<name>.raw` (binary) and `stats_<name>.log` (human-readable).
#[derive(Debug)]
pub struct StatsStore {
    dir: PathBuf,
    names: Vec<String>,
    records: Vec<StatsRecord>,
}

impl StatsStore {
    pub fn new(dir: &Path, names: Vec<String>) -> Self {
        let records = vec![StatsRecord::fresh(); names.len()];
        Self {
            dir: dir.to_path_buf(),
            names,
            records,
        }
    }

    pub fn record(&self, i: usize) -> &StatsRecord {
        &self.records[i]
    }

    fn raw_path(&self, i: usize) -> PathBuf {
        self.dir.join(format!("stats_{}.raw", self.names[i]))
    }

    fn report_path(&self, i: usize) -> PathBuf {
        self.dir.join(format!("stats_{}.log", self.names[i]))
    }

    /// Load one record from disk. A missing file is created; a record with
    /// a mismatched magic is zeroed and rewritten.
    pub fn load(&mut self, i: usize) {
        let path = self.raw_path(i);
        if !fsops::exists(&path) {
            self.flush(i);
            return;
        }

        match fsops::read_all(&path) {
            Ok(data) => match StatsRecord::decode(&data) {
                Some(record) if record.magic == STATS_MAGIC => {
                    self.records[i] = record;
                    debug!(program = %self.names[i], "statistics loaded");
                }
                other => {
                    let found = other.map(|r| r.magic).unwrap_or(0);
                    info!(
                        program = %self.names[i],
                        found_magic = %format_args!("{found:X}"),
                        expected_magic = %format_args!("{STATS_MAGIC:X}"),
                        "statistics reset"
                    );
                    self.records[i] = StatsRecord::fresh();
                    self.flush(i);
                }
            },
            Err(e) => {
                error!(program = %self.names[i], error = %e, "failed to read statistics");
                self.records[i] = StatsRecord::fresh();
            }
        }
    }

    pub fn load_all(&mut self) {
        for i in 0..self.records.len() {
            self.load(i);
        }
    }

    /// Write the binary record and regenerate the text report. Failures
    /// are logged; the next flush retries.
    pub fn flush(&mut self, i: usize) {
        if self.records[i].magic != STATS_MAGIC {
            info!(program = %self.names[i], "statistics record reinitialized");
            self.records[i] = StatsRecord::fresh();
        }

        let raw = self.records[i].encode();
        if let Err(e) = fsops::write_all(&self.raw_path(i), &raw) {
            error!(program = %self.names[i], error = %e, "failed to write statistics");
        }
        if let Err(e) = fsops::write_all(&self.report_path(i), self.report(i).as_bytes()) {
            error!(program = %self.names[i], error = %e, "failed to write statistics report");
        }
    }

    pub fn flush_all(&mut self) {
        for i in 0..self.records.len() {
            self.flush(i);
        }
    }

    pub fn started_at(&mut self, i: usize, wall_now: i64) {
        let rec = &mut self.records[i];
        rec.started_at = wall_now;
        rec.start_count += 1;
        rec.roll_heartbeat_count();
    }

    pub fn crashed_at(&mut self, i: usize, wall_now: i64) {
        let rec = &mut self.records[i];
        rec.crashed_at = wall_now;
        rec.crash_count += 1;
        rec.roll_heartbeat_count();
        fold_heartbeat_count_old(rec);
    }

    pub fn heartbeat_reset_at(&mut self, i: usize, wall_now: i64) {
        let rec = &mut self.records[i];
        rec.heartbeat_reset_at = wall_now;
        rec.heartbeat_reset_count += 1;
        rec.roll_heartbeat_count();
        fold_heartbeat_count_old(rec);
    }

    /// Record a steady-state heartbeat gap.
    pub fn update_heartbeat_time(&mut self, i: usize, gap: u64) {
        let rec = &mut self.records[i];
        rec.heartbeat_count += 1;
        let n = rec.heartbeat_count;
        rec.avg_heartbeat_time = (rec.avg_heartbeat_time * (n - 1) + gap) / n;
        if gap > rec.max_heartbeat_time {
            rec.max_heartbeat_time = gap;
        }
        if gap < rec.min_heartbeat_time || n == 1 {
            rec.min_heartbeat_time = gap;
        }
    }

    /// Record the first-heartbeat latency of a fresh instance. Averaged
    /// over every instance this program has had (starts, crash restarts,
    /// heartbeat resets).
    pub fn update_first_heartbeat_time(&mut self, i: usize, latency: u64) {
        let rec = &mut self.records[i];
        let n = (rec.start_count + rec.crash_count + rec.heartbeat_reset_count).max(1);
        rec.avg_first_heartbeat_time =
            (rec.avg_first_heartbeat_time * (n - 1) + latency) / n;
        if latency > rec.max_first_heartbeat_time {
            rec.max_first_heartbeat_time = latency;
        }
        if latency < rec.min_first_heartbeat_time || rec.start_count == 1 {
            rec.min_first_heartbeat_time = latency;
        }
    }

    /// Fold one `/proc` sample into the gauges.
    pub fn update_resource_usage(&mut self, i: usize, cpu_percent: f64, rss_kb: u64) {
        let rec = &mut self.records[i];
        let first = rec.resource_sample_count == 0;

        rec.cpu_current = cpu_percent;
        if first {
            rec.cpu_max = cpu_percent;
            rec.cpu_min = cpu_percent;
            rec.cpu_avg = cpu_percent;
            rec.mem_max_kb = rss_kb;
            rec.mem_min_kb = rss_kb;
            rec.mem_avg_kb = rss_kb;
        } else {
            rec.cpu_max = rec.cpu_max.max(cpu_percent);
            rec.cpu_min = rec.cpu_min.min(cpu_percent);
            rec.cpu_avg = (1.0 - CPU_EMA_ALPHA) * rec.cpu_avg + CPU_EMA_ALPHA * cpu_percent;
            rec.mem_max_kb = rec.mem_max_kb.max(rss_kb);
            rec.mem_min_kb = rec.mem_min_kb.min(rss_kb);
            let n = rec.resource_sample_count;
            rec.mem_avg_kb = (rec.mem_avg_kb * n + rss_kb) / (n + 1);
        }
        rec.mem_current_kb = rss_kb;
        rec.resource_sample_count += 1;
    }

    fn report(&self, i: usize) -> String {
        let rec = &self.records[i];
        let mut out = String::new();

        out.push_str(&format!(
            "Statistics for program {} {}:\n",
            i, self.names[i]
        ));
        out.push_str(&format!("Started at: {}\n", format_date(rec.started_at)));
        out.push_str(&format!("Crashed at: {}\n", format_date(rec.crashed_at)));
        out.push_str(&format!(
            "Heartbeat reset at: {}\n",
            format_date(rec.heartbeat_reset_at)
        ));
        out.push_str(&format!("Start count: {}\n", rec.start_count));
        out.push_str(&format!("Crash count: {}\n", rec.crash_count));
        out.push_str(&format!(
            "Heartbeat reset count: {}\n",
            rec.heartbeat_reset_count
        ));
        out.push_str(&format!("Heartbeat count: {}\n", rec.heartbeat_count));
        out.push_str(&format!(
            "Heartbeat count old: {}\n",
            rec.heartbeat_count_old
        ));
        out.push_str(&format!(
            "Average heartbeat count old: {}\n",
            rec.avg_heartbeat_count_old
        ));
        out.push_str(&format!(
            "Average first heartbeat time: {} seconds\n",
            rec.avg_first_heartbeat_time
        ));
        out.push_str(&format!(
            "Maximum first heartbeat time: {} seconds\n",
            rec.max_first_heartbeat_time
        ));
        out.push_str(&format!(
            "Minimum first heartbeat time: {} seconds\n",
            rec.min_first_heartbeat_time
        ));
        out.push_str(&format!(
            "Average heartbeat time: {} seconds\n",
            rec.avg_heartbeat_time
        ));
        out.push_str(&format!(
            "Maximum heartbeat time: {} seconds\n",
            rec.max_heartbeat_time
        ));
        out.push_str(&format!(
            "Minimum heartbeat time: {} seconds\n",
            rec.min_heartbeat_time
        ));
        out.push_str(&format!(
            "CPU usage: current {:.2} %, avg {:.2} %, min {:.2} %, max {:.2} %\n",
            rec.cpu_current, rec.cpu_avg, rec.cpu_min, rec.cpu_max
        ));
        out.push_str(&format!(
            "Memory usage: current {} KB, avg {} KB, min {} KB, max {} KB\n",
            rec.mem_current_kb, rec.mem_avg_kb, rec.mem_min_kb, rec.mem_max_kb
        ));
        out.push_str(&format!(
            "Resource samples: {}\n",
            rec.resource_sample_count
        ));
        out.push_str(&format!("Magic: {:X}\n", rec.magic));
        out
    }
}

/// Running average of heartbeats-per-instance, folded on crash and
/// heartbeat-reset events after the counter roll.
fn fold_heartbeat_count_old(rec: &mut StatsRecord) {
    let n = (rec.crash_count + rec.heartbeat_reset_count).max(1);
    rec.avg_heartbeat_count_old =
        (rec.avg_heartbeat_count_old * (n - 1) + rec.heartbeat_count_old) / n;
}

fn format_date(epoch: i64) -> String {
    if epoch <= 0 {
        return "Never".to_string();
    }
    match Local.timestamp_opt(epoch, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => "Never".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> StatsStore {
        StatsStore::new(dir, vec!["Alpha".to_string(), "Beta".to_string()])
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut rec = StatsRecord::fresh();
        rec.started_at = 1_700_000_000;
        rec.crashed_at = 1_700_000_100;
        rec.start_count = 7;
        rec.heartbeat_count = 42;
        rec.cpu_avg = 1.5;
        rec.mem_max_kb = 8192;
        rec.resource_sample_count = 3;

        let decoded = StatsRecord::decode(&rec.encode()).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn decode_rejects_wrong_size() {
        assert!(StatsRecord::decode(&[0u8; RECORD_SIZE - 1]).is_none());
        assert!(StatsRecord::decode(&[0u8; RECORD_SIZE + 1]).is_none());
        assert!(StatsRecord::decode(&[]).is_none());
    }

    #[test]
    fn magic_is_first_field() {
        let rec = StatsRecord::fresh();
        let raw = rec.encode();
        assert_eq!(
            u32::from_le_bytes(raw[0..4].try_into().unwrap()),
            STATS_MAGIC
        );
    }

    #[test]
    fn load_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        store.load(0);

        let path = dir.path().join("stats_Alpha.raw");
        assert!(path.exists());
        assert_eq!(store.record(0).magic, STATS_MAGIC);
        assert_eq!(store.record(0).start_count, 0);
    }

    #[test]
    fn load_heals_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());

        // A full-size record with a wrong magic and nonzero garbage.
        let mut bogus = StatsRecord::fresh();
        bogus.magic = 0xDEAD_BEEF;
        bogus.start_count = 99;
        bogus.cpu_avg = 77.7;
        fsops::write_all(&dir.path().join("stats_Alpha.raw"), &bogus.encode()).unwrap();

        store.load(0);
        // Everything zeroed except the magic.
        assert_eq!(*store.record(0), StatsRecord::fresh());

        // The healed record was rewritten.
        let on_disk = fsops::read_all(&dir.path().join("stats_Alpha.raw")).unwrap();
        assert_eq!(
            StatsRecord::decode(&on_disk).unwrap(),
            StatsRecord::fresh()
        );
    }

    #[test]
    fn load_heals_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        fsops::write_all(&dir.path().join("stats_Alpha.raw"), b"short").unwrap();

        store.load(0);
        assert_eq!(*store.record(0), StatsRecord::fresh());
    }

    #[test]
    fn persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = store_in(dir.path());
            store.load_all();
            for _ in 0..7 {
                store.started_at(0, 1_700_000_000);
            }
            store.flush_all();
        }

        let mut store = store_in(dir.path());
        store.load_all();
        assert_eq!(store.record(0).start_count, 7);
        assert_eq!(store.record(1).start_count, 0);

        store.started_at(0, 1_700_000_500);
        assert_eq!(store.record(0).start_count, 8);
    }

    #[test]
    fn started_at_rolls_heartbeat_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());

        store.started_at(0, 100);
        for _ in 0..5 {
            store.update_heartbeat_time(0, 2);
        }
        assert_eq!(store.record(0).heartbeat_count, 5);

        store.started_at(0, 200);
        assert_eq!(store.record(0).heartbeat_count, 0);
        assert_eq!(store.record(0).heartbeat_count_old, 5);
        assert_eq!(store.record(0).started_at, 200);
        assert_eq!(store.record(0).start_count, 2);
    }

    #[test]
    fn crashed_at_folds_average_of_old_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());

        store.started_at(0, 100);
        for _ in 0..10 {
            store.update_heartbeat_time(0, 1);
        }
        store.crashed_at(0, 150);

        let rec = store.record(0);
        assert_eq!(rec.crash_count, 1);
        assert_eq!(rec.crashed_at, 150);
        assert_eq!(rec.heartbeat_count, 0);
        assert_eq!(rec.heartbeat_count_old, 10);
        assert_eq!(rec.avg_heartbeat_count_old, 10);

        // Second instance heartbeats 4 times, then a heartbeat reset.
        for _ in 0..4 {
            store.update_heartbeat_time(0, 1);
        }
        store.heartbeat_reset_at(0, 180);
        let rec = store.record(0);
        assert_eq!(rec.heartbeat_reset_count, 1);
        // Average over 2 lifecycle events: (10 + 4) / 2.
        assert_eq!(rec.avg_heartbeat_count_old, 7);
    }

    #[test]
    fn heartbeat_time_incremental_mean() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());

        for gap in [1u64, 2, 2] {
            store.update_heartbeat_time(0, gap);
        }
        let rec = store.record(0);
        // Integer mean of 1,2,2.
        assert_eq!(rec.avg_heartbeat_time, (1 + 2 + 2) / 3);
        assert_eq!(rec.max_heartbeat_time, 2);
        assert_eq!(rec.min_heartbeat_time, 1);
        assert_eq!(rec.heartbeat_count, 3);
    }

    #[test]
    fn heartbeat_time_constant_series() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        for _ in 0..9 {
            store.update_heartbeat_time(0, 5);
        }
        assert_eq!(store.record(0).avg_heartbeat_time, 5);
    }

    #[test]
    fn heartbeat_time_min_initializes_on_first_sample() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());

        // Without initialization min would stay at the default 0.
        store.update_heartbeat_time(0, 9);
        assert_eq!(store.record(0).min_heartbeat_time, 9);
        store.update_heartbeat_time(0, 3);
        assert_eq!(store.record(0).min_heartbeat_time, 3);
    }

    #[test]
    fn first_heartbeat_time_tracks_instances() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());

        store.started_at(0, 100);
        store.update_first_heartbeat_time(0, 3);
        let rec = store.record(0);
        assert_eq!(rec.avg_first_heartbeat_time, 3);
        assert_eq!(rec.min_first_heartbeat_time, 3);
        assert_eq!(rec.max_first_heartbeat_time, 3);

        // Crash restart: second instance is slower to heartbeat.
        store.crashed_at(0, 150);
        store.started_at(0, 151);
        store.update_first_heartbeat_time(0, 9);
        let rec = store.record(0);
        // Averaged over start_count + crash_count + reset_count = 3 events.
        assert_eq!(rec.avg_first_heartbeat_time, (3 * 2 + 9) / 3);
        assert_eq!(rec.max_first_heartbeat_time, 9);
        assert_eq!(rec.min_first_heartbeat_time, 3);
    }

    #[test]
    fn resource_usage_first_sample_initializes_gauges() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());

        store.update_resource_usage(0, 2.0, 1024);
        let rec = store.record(0);
        assert_eq!(rec.cpu_current, 2.0);
        assert_eq!(rec.cpu_min, 2.0);
        assert_eq!(rec.cpu_max, 2.0);
        assert_eq!(rec.cpu_avg, 2.0);
        assert_eq!(rec.mem_current_kb, 1024);
        assert_eq!(rec.mem_min_kb, 1024);
        assert_eq!(rec.mem_avg_kb, 1024);
        assert_eq!(rec.resource_sample_count, 1);
    }

    #[test]
    fn resource_usage_cpu_is_smoothed() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());

        store.update_resource_usage(0, 10.0, 1000);
        store.update_resource_usage(0, 20.0, 1000);
        let rec = store.record(0);
        // EMA with alpha 0.1: 0.9 * 10 + 0.1 * 20.
        assert!((rec.cpu_avg - 11.0).abs() < 1e-9);
        assert_eq!(rec.cpu_max, 20.0);
        assert_eq!(rec.cpu_min, 10.0);
    }

    #[test]
    fn resource_usage_memory_is_arithmetic_mean() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());

        store.update_resource_usage(0, 0.0, 1000);
        store.update_resource_usage(0, 0.0, 2000);
        store.update_resource_usage(0, 0.0, 3000);
        let rec = store.record(0);
        assert_eq!(rec.mem_avg_kb, 2000);
        assert_eq!(rec.mem_min_kb, 1000);
        assert_eq!(rec.mem_max_kb, 3000);
        assert_eq!(rec.mem_current_kb, 3000);
        assert_eq!(rec.resource_sample_count, 3);
    }

    #[test]
    fn flush_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());
        store.started_at(0, 1_700_000_000);
        store.flush(0);

        let report =
            String::from_utf8(fsops::read_all(&dir.path().join("stats_Alpha.log")).unwrap())
                .unwrap();
        assert!(report.contains("Statistics for program 0 Alpha:"));
        assert!(report.contains("Start count: 1"));
        assert!(report.contains("Crashed at: Never"));
        assert!(report.contains(&format!("Magic: {:X}", STATS_MAGIC)));
    }

    #[test]
    fn format_date_zero_is_never() {
        assert_eq!(format_date(0), "Never");
        assert_eq!(format_date(-5), "Never");
    }
}
