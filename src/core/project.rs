//! Durable project storage. Every read and write of a project's files goes
//! through [`Project`], which keeps the in-memory config and progress
//! records in step with disk.

use anyhow::{bail, Context, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::error::PipelineError;
use crate::core::io::Storage;
use crate::core::progress::{ProgressRecord, StageStatus};
use crate::core::record::ConfigRecord;
use crate::utils::text::strip_banners;

pub const DRAFTS_DIR: &str = "drafts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Config,
    Progress,
    Context,
    Synopsis,
    RefinedSynopsis,
    Outline,
    Characters,
    World,
    Timeline,
    Story,
    Summaries,
    ResearchNotes,
    BufferBackup,
    Log,
}

impl ArtifactKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            ArtifactKind::Config => "config.txt",
            ArtifactKind::Progress => "progress.json",
            ArtifactKind::Context => "context.txt",
            ArtifactKind::Synopsis => "synopsis.txt",
            ArtifactKind::RefinedSynopsis => "refined_synopsis.txt",
            ArtifactKind::Outline => "outline.txt",
            ArtifactKind::Characters => "characters.txt",
            ArtifactKind::World => "world.txt",
            ArtifactKind::Timeline => "timeline.txt",
            ArtifactKind::Story => "story.txt",
            ArtifactKind::Summaries => "summaries.txt",
            ArtifactKind::ResearchNotes => "research_notes.txt",
            ArtifactKind::BufferBackup => "buffer_backup.txt",
            ArtifactKind::Log => "log.txt",
        }
    }

    /// Files a project must have to be opened.
    pub const REQUIRED: [ArtifactKind; 8] = [
        ArtifactKind::Story,
        ArtifactKind::Config,
        ArtifactKind::Context,
        ArtifactKind::BufferBackup,
        ArtifactKind::Characters,
        ArtifactKind::World,
        ArtifactKind::Summaries,
        ArtifactKind::Progress,
    ];

    fn banner(&self) -> Option<(&'static str, Option<&'static str>)> {
        match self {
            ArtifactKind::Outline => Some(("NOVEL OUTLINE", Some("=== END OUTLINE ==="))),
            ArtifactKind::Characters => Some(("MAIN CHARACTERS (JSON)", None)),
            ArtifactKind::World => Some(("WORLD BUILDING (JSON)", None)),
            ArtifactKind::Timeline => Some(("NOVEL TIMELINE (WITH DATES, LOCATIONS, EVENTS)", None)),
            _ => None,
        }
    }

    /// Wraps generated text in the artifact's file banner, if it has one.
    pub fn frame(&self, body: &str, refined: bool) -> String {
        match self.banner() {
            Some((title, footer)) => {
                let suffix = if refined { " - REFINED" } else { "" };
                let mut framed = format!("=== {}{} ===\n\n{}\n", title, suffix, body.trim());
                if let Some(footer) = footer {
                    framed.push('\n');
                    framed.push_str(footer);
                    framed.push('\n');
                }
                framed
            }
            None => body.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftVersion {
    Draft = 1,
    Polished = 2,
    Enhanced = 3,
}

impl DraftVersion {
    fn label(&self) -> &'static str {
        match self {
            DraftVersion::Draft => "",
            DraftVersion::Polished => " (POLISHED)",
            DraftVersion::Enhanced => " (ENHANCED)",
        }
    }
}

/// Location of a project's files plus the storage they live on. Cheap to
/// clone; the backup timer holds one of these.
#[derive(Clone)]
pub struct ProjectFiles {
    storage: Arc<dyn Storage>,
    root: PathBuf,
}

impl ProjectFiles {
    pub fn new(storage: Arc<dyn Storage>, root: PathBuf) -> Self {
        Self { storage, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn path(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.file_name())
    }

    pub fn draft_path(&self, chapter: u32, section: u32, version: DraftVersion) -> PathBuf {
        self.root.join(DRAFTS_DIR).join(format!(
            "chapter{}_section{}_v{}.txt",
            chapter, section, version as u8
        ))
    }

    /// Missing files read as empty text.
    pub async fn read(&self, kind: ArtifactKind) -> Result<String> {
        let path = self.path(kind);
        if !self.storage.exists(&path).await? {
            return Ok(String::new());
        }
        self.storage.read_to_string(&path).await
    }

    pub async fn write(&self, kind: ArtifactKind, text: &str) -> Result<()> {
        self.storage.write(&self.path(kind), text.as_bytes()).await
    }

    pub async fn append(&self, kind: ArtifactKind, text: &str) -> Result<()> {
        self.storage.append(&self.path(kind), text.as_bytes()).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProjectSnapshot {
    pub config: ConfigRecord,
    pub progress: ProgressRecord,
}

pub struct Project {
    name: String,
    files: ProjectFiles,
    snapshot: ProjectSnapshot,
}

impl Project {
    pub async fn create(storage: Arc<dyn Storage>, projects_root: &Path, name: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            bail!("Project name must not be empty");
        }
        let root = projects_root.join(name);
        if storage.exists(&root).await? {
            bail!("Project '{}' already exists", name);
        }

        storage.create_dir(&root.join(DRAFTS_DIR)).await?;
        let files = ProjectFiles::new(storage, root);
        for kind in ArtifactKind::REQUIRED {
            let initial = if kind == ArtifactKind::Progress { "{}" } else { "" };
            files.write(kind, initial).await?;
        }
        info!("Created project '{}' at {}", name, files.root().display());

        Self::open_files(name, files).await
    }

    pub async fn open(storage: Arc<dyn Storage>, projects_root: &Path, name: &str) -> Result<Self> {
        let files = ProjectFiles::new(storage, projects_root.join(name));
        for kind in ArtifactKind::REQUIRED {
            let path = files.path(kind);
            if !files.storage.exists(&path).await? {
                bail!("Project '{}' is missing {}", name, kind.file_name());
            }
        }
        Self::open_files(name, files).await
    }

    async fn open_files(name: &str, files: ProjectFiles) -> Result<Self> {
        let mut project = Self {
            name: name.to_string(),
            files,
            snapshot: ProjectSnapshot::default(),
        };
        project.reload().await?;
        Ok(project)
    }

    pub async fn list(storage: &dyn Storage, projects_root: &Path) -> Result<Vec<String>> {
        let mut names = storage.list_dirs(projects_root).await?;
        names.sort();
        Ok(names)
    }

    /// Re-reads the config and progress records into the snapshot.
    pub async fn reload(&mut self) -> Result<()> {
        self.snapshot = ProjectSnapshot {
            config: ConfigRecord::parse(&self.files.read(ArtifactKind::Config).await?),
            progress: ProgressRecord::parse(&self.files.read(ArtifactKind::Progress).await?),
        };
        debug!("Loaded project '{}'", self.name);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn files(&self) -> &ProjectFiles {
        &self.files
    }

    pub fn snapshot(&self) -> &ProjectSnapshot {
        &self.snapshot
    }

    fn sync_snapshot(&mut self, kind: ArtifactKind, text: &str) {
        match kind {
            ArtifactKind::Config => self.snapshot.config = ConfigRecord::parse(text),
            ArtifactKind::Progress => self.snapshot.progress = ProgressRecord::parse(text),
            _ => {}
        }
    }

    pub async fn read(&mut self, kind: ArtifactKind) -> Result<String> {
        let text = self.files.read(kind).await?;
        self.sync_snapshot(kind, &text);
        Ok(text)
    }

    pub async fn write(&mut self, kind: ArtifactKind, text: &str) -> Result<()> {
        self.files.write(kind, text).await?;
        self.sync_snapshot(kind, text);
        Ok(())
    }

    pub async fn append(&mut self, kind: ArtifactKind, text: &str) -> Result<()> {
        self.files.append(kind, text).await?;
        if matches!(kind, ArtifactKind::Config | ArtifactKind::Progress) {
            let full = self.files.read(kind).await?;
            self.sync_snapshot(kind, &full);
        }
        Ok(())
    }

    /// Stores generated text in its banner framing.
    pub async fn write_artifact(&mut self, kind: ArtifactKind, body: &str, refined: bool) -> Result<()> {
        let framed = kind.frame(body, refined);
        self.write(kind, &framed).await
    }

    /// Reads an artifact from disk without its banner lines. Absent or empty
    /// files are a missing prerequisite.
    pub async fn require(&mut self, kind: ArtifactKind) -> Result<String> {
        let text = self.read(kind).await?;
        let body = strip_banners(&text);
        if body.trim().is_empty() {
            return Err(PipelineError::MissingPrerequisite {
                artifact: kind.file_name().to_string(),
            }
            .into());
        }
        Ok(body)
    }

    /// Like [`Project::require`], but an absent artifact reads as empty text.
    pub async fn optional(&mut self, kind: ArtifactKind) -> Result<String> {
        let text = self.read(kind).await?;
        Ok(strip_banners(&text))
    }

    /// The refined synopsis when there is one, the initial synopsis otherwise.
    pub async fn synopsis(&mut self) -> Result<String> {
        let refined = self.optional(ArtifactKind::RefinedSynopsis).await?;
        if !refined.trim().is_empty() {
            return Ok(refined);
        }
        self.require(ArtifactKind::Synopsis)
            .await
            .context("No synopsis available")
    }

    pub async fn config_record(&mut self) -> Result<ConfigRecord> {
        let record = ConfigRecord::parse(&self.files.read(ArtifactKind::Config).await?);
        self.snapshot.config = record.clone();
        Ok(record)
    }

    pub async fn write_config(&mut self, record: ConfigRecord) -> Result<()> {
        self.files.write(ArtifactKind::Config, &record.to_string()).await?;
        self.snapshot.config = record;
        Ok(())
    }

    /// Read-modify-write of the config record. Keys the closure does not
    /// touch come back exactly as they were on disk.
    pub async fn update_config<F>(&mut self, apply: F) -> Result<ConfigRecord>
    where
        F: FnOnce(&mut ConfigRecord),
    {
        let mut record = self.config_record().await?;
        apply(&mut record);
        self.write_config(record.clone()).await?;
        Ok(record)
    }

    pub async fn progress(&mut self) -> Result<ProgressRecord> {
        let record = ProgressRecord::parse(&self.files.read(ArtifactKind::Progress).await?);
        self.snapshot.progress = record.clone();
        Ok(record)
    }

    pub async fn mark_progress(&mut self, stage: &str, status: StageStatus) -> Result<()> {
        let mut record = self.progress().await?;
        record.mark(stage, status);
        self.files.write(ArtifactKind::Progress, &record.to_json()?).await?;
        self.snapshot.progress = record;
        Ok(())
    }

    pub async fn write_draft(
        &self,
        chapter: u32,
        section: u32,
        version: DraftVersion,
        text: &str,
    ) -> Result<PathBuf> {
        let path = self.files.draft_path(chapter, section, version);
        let content = format!(
            "=== CHAPTER {}, SECTION {}{} ===\n\n{}",
            chapter,
            section,
            version.label(),
            text
        );
        self.files.storage.write(&path, content.as_bytes()).await?;
        Ok(path)
    }

    pub async fn write_buffer_backup(&self, chapter: u32, section: u32, text: &str) -> Result<()> {
        let content = format!(
            "=== LATEST DRAFT: Chapter {}, Section {} ===\n\n{}",
            chapter, section, text
        );
        self.files.write(ArtifactKind::BufferBackup, &content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;

    fn storage() -> Arc<dyn Storage> {
        Arc::new(NativeStorage::new())
    }

    #[tokio::test]
    async fn test_create_lays_out_project() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let project = Project::create(storage(), dir.path(), "lighthouse").await?;

        let root = dir.path().join("lighthouse");
        assert!(root.join("drafts").is_dir());
        for kind in ArtifactKind::REQUIRED {
            assert!(root.join(kind.file_name()).exists(), "{} missing", kind.file_name());
        }
        assert_eq!(std::fs::read_to_string(root.join("progress.json"))?, "{}");
        assert!(project.snapshot().progress.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        Project::create(storage(), dir.path(), "dup").await?;
        assert!(Project::create(storage(), dir.path(), "dup").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_open_requires_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        Project::create(storage(), dir.path(), "p").await?;
        std::fs::remove_file(dir.path().join("p").join("summaries.txt"))?;

        let err = Project::open(storage(), dir.path(), "p").await.err().map(|e| e.to_string());
        assert!(err.unwrap_or_default().contains("summaries.txt"));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_is_sorted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = storage();
        for name in ["zeta", "alpha", "mid"] {
            Project::create(storage.clone(), dir.path(), name).await?;
        }
        let names = Project::list(storage.as_ref(), dir.path()).await?;
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_config_preserves_other_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut project = Project::create(storage(), dir.path(), "p").await?;
        project
            .write(ArtifactKind::Config, "Idea: X\nTone: Y\nExternalKey: keep me\n")
            .await?;

        project.update_config(|r| r.set("CurrentChapter", 3)).await?;

        let on_disk = std::fs::read_to_string(dir.path().join("p").join("config.txt"))?;
        assert_eq!(on_disk, "Idea: X\nTone: Y\nExternalKey: keep me\nCurrentChapter: 3\n");
        assert_eq!(project.snapshot().config.get("CurrentChapter"), Some("3"));
        Ok(())
    }

    #[tokio::test]
    async fn test_raw_record_writes_refresh_snapshot() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut project = Project::create(storage(), dir.path(), "p").await?;
        project.write(ArtifactKind::Config, "Idea: X\n").await?;
        project.append(ArtifactKind::Config, "Tone: Y\n").await?;
        project
            .write(ArtifactKind::Progress, r#"{"synopsis":{"status":"approved","timestamp":"2026-01-01 10:00:00"}}"#)
            .await?;

        assert_eq!(project.snapshot().config.get("Tone"), Some("Y"));
        assert!(project.snapshot().progress.is_approved("synopsis"));
        Ok(())
    }

    #[tokio::test]
    async fn test_require_rejects_empty_and_strips_banner() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut project = Project::create(storage(), dir.path(), "p").await?;

        let err = project.require(ArtifactKind::Outline).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingPrerequisite { .. })
        ));

        project
            .write_artifact(ArtifactKind::Outline, "Chapter 1: Arrival", false)
            .await?;
        let raw = project.read(ArtifactKind::Outline).await?;
        assert!(raw.starts_with("=== NOVEL OUTLINE ==="));
        assert!(raw.trim_end().ends_with("=== END OUTLINE ==="));
        assert_eq!(project.require(ArtifactKind::Outline).await?, "Chapter 1: Arrival");
        Ok(())
    }

    #[tokio::test]
    async fn test_synopsis_prefers_refined() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut project = Project::create(storage(), dir.path(), "p").await?;
        project.write(ArtifactKind::Synopsis, "initial").await?;
        assert_eq!(project.synopsis().await?, "initial");

        project.write(ArtifactKind::RefinedSynopsis, "refined").await?;
        assert_eq!(project.synopsis().await?, "refined");
        Ok(())
    }

    #[tokio::test]
    async fn test_drafts_and_progress() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut project = Project::create(storage(), dir.path(), "p").await?;

        let path = project.write_draft(2, 3, DraftVersion::Polished, "prose").await?;
        assert!(path.ends_with("drafts/chapter2_section3_v2.txt"));
        let content = std::fs::read_to_string(path)?;
        assert!(content.starts_with("=== CHAPTER 2, SECTION 3 (POLISHED) ==="));

        project.mark_progress("outline", StageStatus::Approved).await?;
        let reopened = Project::open(storage(), dir.path(), "p").await?;
        assert!(reopened.snapshot().progress.is_approved("outline"));
        Ok(())
    }
}
