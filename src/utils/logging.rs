use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const MAX_LOG_FILES: usize = 5;

/// Picks the next rotating log slot: the first of `log1.txt..log5.txt` that
/// does not exist yet, or else the least recently modified one.
pub fn select_log_file(folder: &Path) -> Result<PathBuf> {
    let mut oldest: Option<(SystemTime, PathBuf)> = None;

    for i in 1..=MAX_LOG_FILES {
        let path = folder.join(format!("log{}.txt", i));
        let modified = match fs::metadata(&path) {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(path),
            Err(e) => return Err(e.into()),
        };
        if oldest.as_ref().map_or(true, |(t, _)| modified < *t) {
            oldest = Some((modified, path));
        }
    }

    oldest
        .map(|(_, path)| path)
        .context("No log slots available")
}

struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Sets up env_logger writing to stderr and to a truncated rotating file in
/// `folder`. Returns the file chosen.
pub fn init(folder: &Path) -> Result<PathBuf> {
    fs::create_dir_all(folder)
        .with_context(|| format!("Failed to create log folder {}", folder.display()))?;
    let path = select_log_file(folder)?;
    let file = File::create(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(Tee { file })))
        .try_init()?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fills_empty_slots_first() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert_eq!(select_log_file(dir.path())?, dir.path().join("log1.txt"));

        fs::write(dir.path().join("log1.txt"), "a")?;
        fs::write(dir.path().join("log2.txt"), "b")?;
        assert_eq!(select_log_file(dir.path())?, dir.path().join("log3.txt"));
        Ok(())
    }

    #[test]
    fn test_reuses_oldest_slot() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let now = SystemTime::now();
        for i in 1..=MAX_LOG_FILES {
            let path = dir.path().join(format!("log{}.txt", i));
            let file = File::create(&path)?;
            // log3 is the stalest
            let age = if i == 3 { 3600 } else { 60 * i as u64 };
            file.set_modified(now - Duration::from_secs(age))?;
        }
        assert_eq!(select_log_file(dir.path())?, dir.path().join("log3.txt"));
        Ok(())
    }
}
