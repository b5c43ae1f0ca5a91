use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::fsops;

/// Log file written when file logging is enabled, and its rotation target.
pub const LOG_FILE: &str = "wdt.log";
pub const OLD_LOG_FILE: &str = "wdt.old.log";

/// Rotate once the log grows past this size.
const MAX_LOG_SIZE: u64 = 100 * 1024;

/// Append-only log sink that renames itself aside when it grows too big.
#[derive(Debug)]
struct RotatingFile {
    path: PathBuf,
    old_path: PathBuf,
    max_size: u64,
}

impl RotatingFile {
    fn new(dir: &Path, max_size: u64) -> Self {
        Self {
            path: dir.join(LOG_FILE),
            old_path: dir.join(OLD_LOG_FILE),
            max_size,
        }
    }

    fn append(&self, buf: &[u8]) -> io::Result<()> {
        if fsops::size(&self.path).unwrap_or(0) > self.max_size {
            let _ = fsops::rename(&self.path, &self.old_path);
        }
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        file.write_all(buf)
    }
}

/// `MakeWriter` that always writes to stdout and, when enabled, mirrors
/// every formatted event into the rotating log file.
#[derive(Clone)]
pub struct TeeWriter {
    file: Option<Arc<RotatingFile>>,
}

pub struct TeeIo {
    file: Option<Arc<RotatingFile>>,
}

impl Write for TeeIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = io::stdout().write(buf)?;
        if let Some(file) = &self.file {
            // File logging is best-effort; console output already happened.
            let _ = file.append(buf);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

impl<'a> MakeWriter<'a> for TeeWriter {
    type Writer = TeeIo;

    fn make_writer(&'a self) -> TeeIo {
        TeeIo {
            file: self.file.clone(),
        }
    }
}

/// Install the global subscriber: env-filtered (default `info`), stdout,
/// plus `wdt.log` in `dir` when `file_logging` is set.
pub fn init(file_logging: bool, dir: &Path) {
    let file = file_logging.then(|| Arc::new(RotatingFile::new(dir, MAX_LOG_SIZE)));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(TeeWriter { file })
        .init();
}
