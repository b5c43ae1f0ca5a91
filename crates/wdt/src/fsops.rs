use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::SystemTime;

/// Small synchronous file primitives for sentinel and stats I/O.
///
/// Everything here is best-effort from the supervisor's point of view:
/// callers log failures and carry on; a failed stats write is retried on
/// the next flush.

pub fn exists(path: &Path) -> bool {
    path.exists()
}

/// Create an empty file, truncating any existing content.
pub fn create_empty(path: &Path) -> io::Result<()> {
    File::create(path)?;
    Ok(())
}

pub fn remove(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

pub fn mtime(path: &Path) -> io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

pub fn size(path: &Path) -> io::Result<u64> {
    Ok(fs::metadata(path)?.len())
}

pub fn read_all(path: &Path) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    File::open(path)?.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Write the whole buffer, driving through partial writes.
pub fn write_all(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    let mut written = 0;
    while written < data.len() {
        match file.write(&data[written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "file refused further bytes",
                ));
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    file.flush()
}

pub fn rename(from: &Path, to: &Path) -> io::Result<()> {
    fs::rename(from, to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_exists_remove_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marker");

        assert!(!exists(&path));
        create_empty(&path).unwrap();
        assert!(exists(&path));
        remove(&path).unwrap();
        assert!(!exists(&path));
    }

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");

        let data = vec![0xA5u8, 0x0F, 0xAA, 0x55, 0x00, 0xFF];
        write_all(&path, &data).unwrap();
        assert_eq!(read_all(&path).unwrap(), data);
        assert_eq!(size(&path).unwrap(), data.len() as u64);
    }

    #[test]
    fn write_truncates_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");

        write_all(&path, b"a longer first version").unwrap();
        write_all(&path, b"short").unwrap();
        assert_eq!(read_all(&path).unwrap(), b"short");
    }

    #[test]
    fn create_empty_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marker");

        write_all(&path, b"leftovers").unwrap();
        create_empty(&path).unwrap();
        assert_eq!(size(&path).unwrap(), 0);
    }

    #[test]
    fn remove_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(remove(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn rename_moves_content() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("wdt.log");
        let to = dir.path().join("wdt.old.log");

        write_all(&from, b"rotated").unwrap();
        rename(&from, &to).unwrap();
        assert!(!exists(&from));
        assert_eq!(read_all(&to).unwrap(), b"rotated");
    }

    #[test]
    fn mtime_is_recent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marker");
        create_empty(&path).unwrap();

        let age = SystemTime::now()
            .duration_since(mtime(&path).unwrap())
            .unwrap();
        assert!(age.as_secs() < 60);
    }
}
