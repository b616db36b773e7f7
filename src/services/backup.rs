use anyhow::Result;
use chrono::{DateTime, Local};
use log::{error, info};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::core::project::{ArtifactKind, ProjectFiles};

pub type SharedBuffer = Arc<RwLock<String>>;

/// Reads the working buffer, tolerating a poisoned lock.
pub fn read_buffer(buffer: &SharedBuffer) -> String {
    match buffer.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

pub fn write_buffer(buffer: &SharedBuffer, text: &str) {
    match buffer.write() {
        Ok(mut guard) => *guard = text.to_string(),
        Err(poisoned) => *poisoned.into_inner() = text.to_string(),
    }
}

/// Writes `story_backup_<ts>.txt` and `log_backup_<ts>.txt` and refreshes
/// `buffer_backup.txt`. Primary files are only read.
pub async fn write_backup(files: &ProjectFiles, buffer: &SharedBuffer, now: DateTime<Local>) -> Result<()> {
    let stamp = now.format("%Y%m%d_%H%M%S");
    let storage = files.storage();

    let story = files.read(ArtifactKind::Story).await?;
    storage
        .write(&files.root().join(format!("story_backup_{}.txt", stamp)), story.as_bytes())
        .await?;

    let log = files.read(ArtifactKind::Log).await?;
    storage
        .write(&files.root().join(format!("log_backup_{}.txt", stamp)), log.as_bytes())
        .await?;

    let current = read_buffer(buffer);
    files.write(ArtifactKind::BufferBackup, &current).await?;

    info!("Backup written to {} ({})", files.root().display(), stamp);
    Ok(())
}

/// Periodic backup running beside the worker. Stops when dropped.
pub struct BackupTask {
    handle: JoinHandle<()>,
}

impl BackupTask {
    pub fn spawn(files: ProjectFiles, buffer: SharedBuffer, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = write_backup(&files, &buffer, Local::now()).await {
                    error!("Backup failed: {:#}", e);
                }
            }
        });
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for BackupTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::project::Project;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_backup_copies_story_log_and_buffer() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut project = Project::create(Arc::new(NativeStorage::new()), dir.path(), "p").await?;
        project.write(ArtifactKind::Story, "It was a dark night.").await?;
        project.append(ArtifactKind::Log, "[t] started\n").await?;
        let buffer: SharedBuffer = Arc::new(RwLock::new("draft in progress".to_string()));

        let now = Local
            .with_ymd_and_hms(2024, 5, 1, 9, 30, 0)
            .single()
            .expect("valid time");
        write_backup(project.files(), &buffer, now).await?;

        let root = dir.path().join("p");
        assert_eq!(
            std::fs::read_to_string(root.join("story_backup_20240501_093000.txt"))?,
            "It was a dark night."
        );
        assert_eq!(
            std::fs::read_to_string(root.join("log_backup_20240501_093000.txt"))?,
            "[t] started\n"
        );
        assert_eq!(std::fs::read_to_string(root.join("buffer_backup.txt"))?, "draft in progress");
        assert_eq!(std::fs::read_to_string(root.join("story.txt"))?, "It was a dark night.");
        Ok(())
    }

    #[tokio::test]
    async fn test_timer_fires_and_stops_on_drop() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let project = Project::create(Arc::new(NativeStorage::new()), dir.path(), "p").await?;
        let buffer: SharedBuffer = Arc::new(RwLock::new("tick".to_string()));

        let task = BackupTask::spawn(project.files().clone(), buffer, Duration::from_millis(20));
        assert!(task.is_running());
        tokio::time::sleep(Duration::from_millis(120)).await;
        drop(task);

        let backups = std::fs::read_dir(dir.path().join("p"))?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("story_backup_"))
            .count();
        assert!(backups >= 1);
        assert_eq!(std::fs::read_to_string(dir.path().join("p").join("buffer_backup.txt"))?, "tick");
        Ok(())
    }
}
