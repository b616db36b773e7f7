use anyhow::{Context, Result};
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::sync::{Arc, RwLock};

use crate::core::config::Config;
use crate::core::error::PipelineError;
use crate::core::progress::{StageStatus, TIMESTAMP_FORMAT};
use crate::core::project::{ArtifactKind, DraftVersion, Project};
use crate::core::record::{
    KEY_CURRENT_CHAPTER, KEY_CURRENT_SECTION, KEY_IDEA, KEY_MILESTONE, KEY_MODEL, KEY_PROGRESS,
    KEY_SECTIONS_PER_CHAPTER, KEY_SECTION_WORDS, KEY_SOFT_TARGET, KEY_TONE, KEY_TOTAL_CHAPTERS,
};
use crate::core::state::{ContentType, Stage, NOVEL_PROGRESS_KEY};
use crate::services::backup::{read_buffer, write_buffer, BackupTask, SharedBuffer};
use crate::services::decision::{DecisionMaker, MilestoneChoice};
use crate::services::events::{EventSink, PipelineEvent};
use crate::services::llm::{GenerateRequest, TextBackend};
use crate::services::pause::PauseGate;
use crate::services::prompts::{self, DraftContext};
use crate::services::retry::RetryPolicy;
use crate::services::stream;
use crate::utils::text::{strip_banners, strip_code_blocks, tail, word_count};

/// What the user asked the pipeline to start from.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub idea: String,
    pub tone: String,
    pub soft_target: u64,
}

impl PipelineConfig {
    /// Parses `Idea: <idea>, Tone: <tone>, Soft Target: <n>`. The soft
    /// target may be left out.
    pub fn parse(input: &str, default_soft_target: u64) -> Result<Self, PipelineError> {
        let invalid = || {
            PipelineError::InvalidPipelineConfig(
                "expected 'Idea: <idea>, Tone: <tone>, Soft Target: <words>'".to_string(),
            )
        };

        let rest = input.trim().strip_prefix("Idea:").ok_or_else(invalid)?;
        let (idea, rest) = rest.split_once(", Tone:").ok_or_else(invalid)?;
        let (tone, target) = match rest.split_once(", Soft Target:") {
            Some((tone, target)) => (tone, Some(target)),
            None => (rest, None),
        };

        let soft_target = match target {
            Some(raw) => raw.trim().replace(',', "").parse::<u64>().map_err(|_| {
                PipelineError::InvalidPipelineConfig(format!("soft target '{}' is not a number", raw.trim()))
            })?,
            None => default_soft_target,
        };

        let (idea, tone) = (idea.trim(), tone.trim());
        if idea.is_empty() || tone.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            idea: idea.to_string(),
            tone: tone.to_string(),
            soft_target,
        })
    }
}

/// One unit of work for the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Start(PipelineConfig),
    Resume,
    Approve(ContentType),
    Adjust { content: ContentType, feedback: String },
}

impl Operation {
    pub fn label(&self) -> String {
        match self {
            Operation::Start(_) => "pipeline start".to_string(),
            Operation::Resume => "resume".to_string(),
            Operation::Approve(content) => format!("{} approval", content),
            Operation::Adjust { content, .. } => format!("{} adjustment", content),
        }
    }

    /// The approval a front end submits on its own when auto-approve is on.
    pub fn auto_approval(enabled: bool, awaiting: Option<ContentType>) -> Option<Self> {
        awaiting.filter(|_| enabled).map(Operation::Approve)
    }
}

/// Outcome of approving one section.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionApproval {
    pub chapter: u32,
    pub section: u32,
    pub next_chapter: u32,
    pub next_section: u32,
    pub progress: u32,
    pub story_words: u64,
    pub novel_complete: bool,
}

struct SectionInputs {
    timeline: String,
    research: String,
    tone: String,
    characters: String,
    world: String,
}

pub struct WorkflowManager {
    config: Config,
    backend: Arc<dyn TextBackend>,
    project: Project,
    retry: RetryPolicy,
    gate: PauseGate,
    events: EventSink,
    decisions: Box<dyn DecisionMaker>,
    buffer: SharedBuffer,
    stage: Stage,
    backup: Option<BackupTask>,
}

impl WorkflowManager {
    pub async fn new(
        config: Config,
        backend: Arc<dyn TextBackend>,
        mut project: Project,
        events: EventSink,
        decisions: Box<dyn DecisionMaker>,
    ) -> Result<Self> {
        let backup_text = project.read(ArtifactKind::BufferBackup).await?;
        let buffer = Arc::new(RwLock::new(strip_banners(&backup_text)));
        let snapshot = project.snapshot();
        let stage = Stage::resume_point(&snapshot.progress, &snapshot.config);
        let retry = RetryPolicy::new(config.llm.max_retries, config.llm.retry_base_delay());

        Ok(Self {
            config,
            backend,
            project,
            retry,
            gate: PauseGate::new(),
            events,
            decisions,
            buffer,
            stage,
            backup: None,
        })
    }

    pub fn gate(&self) -> PauseGate {
        self.gate.clone()
    }

    pub fn buffer(&self) -> SharedBuffer {
        self.buffer.clone()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Runs one operation to completion. Failures are reported through the
    /// event sink rather than returned; `OperationFinished` always follows.
    pub async fn execute(&mut self, op: Operation) {
        let label = op.label();
        info!("Running {}", label);

        let result = match op {
            Operation::Start(pipeline) => self.start_pipeline(pipeline).await,
            Operation::Resume => self.resume().await,
            Operation::Approve(content) => self.approve(content).await,
            Operation::Adjust { content, feedback } => self.refine(content, &feedback).await,
        };

        if let Err(e) = result {
            self.report_failure(&label, e).await;
        }
        self.events.emit(PipelineEvent::OperationFinished);
    }

    async fn report_failure(&self, label: &str, e: anyhow::Error) {
        match e.downcast_ref::<PipelineError>() {
            // Exhaustion has already raised its own error notification.
            Some(PipelineError::RetryExhausted { .. }) => {
                self.log_error(format!("{} stopped: {}", label, e)).await;
            }
            Some(PipelineError::MissingPrerequisite { .. }) => {
                self.log_error(format!("{} aborted: {}", label, e)).await;
            }
            _ => {
                self.log_error(format!("{} failed: {:#}", label, e)).await;
                self.events.error(format!("{} failed: {}", label, e));
            }
        }
    }

    // --- logging ---

    async fn record(&self, line: &str) {
        let stamped = format!("[{}] {}\n", Local::now().format(TIMESTAMP_FORMAT), line);
        if let Err(e) = self.project.files().append(ArtifactKind::Log, &stamped).await {
            warn!("Could not write project log: {:#}", e);
        }
    }

    async fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.record(&message).await;
        self.events.log(message);
    }

    async fn log_warning(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.record(&message).await;
        self.events.log(message);
    }

    async fn log_error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.record(&message).await;
        self.events.log(message);
    }

    // --- generation ---

    /// One streamed generation. `Ok(None)` means the backend produced nothing.
    async fn generate(&self, slot: &'static str, prompt: String) -> Result<Option<String>> {
        let request = GenerateRequest {
            model: self.config.llm.model.clone(),
            prompt,
            temperature: self.config.llm.temperature,
        };

        let tokens = self
            .retry
            .invoke(self.backend.as_ref(), &request, &self.events)
            .await?;

        let events = &self.events;
        let text = stream::drain(tokens, &self.gate, self.config.generation.log_every_tokens, |text| {
            events.emit(PipelineEvent::Increment {
                slot,
                text: text.to_string(),
            })
        })
        .await
        .with_context(|| format!("Streaming {} failed", slot))?;

        let text = text.trim();
        if text.is_empty() {
            self.log_warning(format!("Generation for {} returned no text", slot)).await;
            return Ok(None);
        }
        Ok(Some(text.to_string()))
    }

    fn stage_complete(&self, content: ContentType, text: &str) {
        self.events.emit(PipelineEvent::StageComplete {
            slot: content.as_str(),
            text: text.to_string(),
        });
    }

    fn ensure_backup(&mut self) {
        if self.backup.as_ref().is_some_and(|b| b.is_running()) {
            return;
        }
        self.backup = Some(BackupTask::spawn(
            self.project.files().clone(),
            self.buffer.clone(),
            self.config.generation.backup_interval(),
        ));
    }

    async fn set_buffer(&self, chapter: u32, section: u32, text: &str) -> Result<()> {
        write_buffer(&self.buffer, text);
        self.project.write_buffer_backup(chapter, section, text).await
    }

    async fn clear_buffer(&self) -> Result<()> {
        write_buffer(&self.buffer, "");
        self.project.files().write(ArtifactKind::BufferBackup, "").await
    }

    async fn tone(&mut self) -> Result<String> {
        let record = self.project.config_record().await?;
        Ok(record.get(KEY_TONE).unwrap_or_default().to_string())
    }

    // --- start / resume ---

    pub async fn start_pipeline(&mut self, pipeline: PipelineConfig) -> Result<()> {
        let model = self.config.llm.model.clone();
        self.project
            .update_config(|record| {
                record.set(KEY_IDEA, &pipeline.idea);
                record.set(KEY_TONE, &pipeline.tone);
                record.set(KEY_SOFT_TARGET, pipeline.soft_target);
                record.set(KEY_TOTAL_CHAPTERS, 0);
                record.set(KEY_CURRENT_CHAPTER, 0);
                record.set(KEY_CURRENT_SECTION, 0);
                record.set(KEY_PROGRESS, "0%");
                record.set(KEY_MODEL, &model);
            })
            .await?;
        self.project
            .append(
                ArtifactKind::Context,
                &format!("Novel started: {}. Initial tone: {}.\n", pipeline.idea, pipeline.tone),
            )
            .await?;

        self.ensure_backup();
        self.stage = Stage::SynopsisDraft;
        self.events.emit(PipelineEvent::InitComplete);
        self.log(format!("Pipeline started for project '{}'", self.project.name()))
            .await;

        self.generate_synopsis().await
    }

    pub async fn resume(&mut self) -> Result<()> {
        let progress = self.project.progress().await?;
        let record = self.project.config_record().await?;
        self.stage = Stage::resume_point(&progress, &record);
        self.ensure_backup();
        self.log(format!("Resuming project '{}' at {}", self.project.name(), self.stage))
            .await;

        match self.stage {
            Stage::SynopsisDraft if record.contains(KEY_IDEA) => self.generate_synopsis().await,
            Stage::SynopsisDraft => {
                self.log("No pipeline configuration yet, start the pipeline first")
                    .await;
                Ok(())
            }
            Stage::NovelComplete => {
                self.log("=== NOVEL COMPLETE ===").await;
                Ok(())
            }
            Stage::ChapterLoop => {
                let buffer = read_buffer(&self.buffer);
                if buffer.trim().is_empty() {
                    self.run_chapter_loop().await
                } else {
                    self.stage_complete(ContentType::Section, &buffer);
                    self.log("Latest section is waiting for approval").await;
                    Ok(())
                }
            }
            gated => match gated.awaiting() {
                Some(content) => match self.existing_artifact(content).await? {
                    Some(text) => {
                        self.stage_complete(content, &text);
                        self.log(format!("Awaiting approval of {}", content)).await;
                        Ok(())
                    }
                    None => self.generate_stage(content).await,
                },
                None => Ok(()),
            },
        }
    }

    async fn existing_artifact(&mut self, content: ContentType) -> Result<Option<String>> {
        let text = match content {
            ContentType::Synopsis => {
                let refined = self.project.optional(ArtifactKind::RefinedSynopsis).await?;
                if refined.trim().is_empty() {
                    self.project.optional(ArtifactKind::Synopsis).await?
                } else {
                    refined
                }
            }
            ContentType::Section => read_buffer(&self.buffer),
            other => self.project.optional(artifact_for(other)).await?,
        };
        Ok(Some(text).filter(|t| !t.trim().is_empty()))
    }

    async fn generate_stage(&mut self, content: ContentType) -> Result<()> {
        match content {
            ContentType::Synopsis => self.generate_synopsis().await,
            ContentType::Outline => self.generate_outline().await,
            ContentType::Characters => self.generate_characters().await,
            ContentType::World => self.generate_world().await,
            ContentType::Timeline => self.generate_timeline().await,
            ContentType::Section => self.run_chapter_loop().await,
        }
    }

    // --- approvals ---

    pub async fn approve(&mut self, content: ContentType) -> Result<()> {
        if content == ContentType::Section {
            self.approve_section().await?;
            return Ok(());
        }

        if self.stage.awaiting() != Some(content) {
            warn!("Approving {} while the pipeline is at {}", content, self.stage);
        }

        if let Some(required) = content.prerequisite() {
            let progress = self.project.progress().await?;
            if !progress.is_approved(required.as_str()) {
                return Err(PipelineError::MissingPrerequisite {
                    artifact: format!("approval of {}", required),
                }
                .into());
            }
        }

        // The approved artifact must exist before anything builds on it.
        match content {
            ContentType::Synopsis => {
                self.project.synopsis().await?;
            }
            other => {
                self.project.require(artifact_for(other)).await?;
            }
        }

        self.project
            .mark_progress(content.as_str(), StageStatus::Approved)
            .await?;
        self.stage = Stage::after_approval(content);
        self.log(format!("{} approved", capitalize(content.as_str()))).await;

        match content {
            ContentType::Synopsis => self.generate_outline().await,
            ContentType::Outline => self.generate_characters().await,
            ContentType::Characters => self.generate_world().await,
            ContentType::World => {
                self.initialize_chapter_tracking().await?;
                self.generate_timeline().await
            }
            ContentType::Timeline | ContentType::Section => self.run_chapter_loop().await,
        }
    }

    /// Derives the chapter count from the approved outline.
    pub async fn initialize_chapter_tracking(&mut self) -> Result<u32> {
        let outline = self.project.require(ArtifactKind::Outline).await?;
        let counted = outline
            .lines()
            .map(|line| line.trim().to_lowercase())
            .filter(|line| line.starts_with("chapter") || line.starts_with('#'))
            .count() as u32;
        let total = if counted == 0 {
            self.config.generation.default_total_chapters
        } else {
            counted
        };

        let sections = self.config.generation.sections_per_chapter;
        self.project
            .update_config(|record| {
                record.set(KEY_TOTAL_CHAPTERS, total);
                record.set(KEY_CURRENT_CHAPTER, 1);
                record.set(KEY_CURRENT_SECTION, 1);
                record.set(KEY_SECTIONS_PER_CHAPTER, sections);
            })
            .await?;
        self.log(format!(
            "Chapter tracking initialised: {} chapters, {} sections each",
            total, sections
        ))
        .await;
        Ok(total)
    }

    // --- stage generation ---

    pub async fn generate_synopsis(&mut self) -> Result<()> {
        let record = self.project.config_record().await?;
        let idea = record
            .get(KEY_IDEA)
            .filter(|i| !i.is_empty())
            .ok_or_else(|| PipelineError::MissingPrerequisite {
                artifact: format!("{} ({})", ArtifactKind::Config.file_name(), KEY_IDEA),
            })?
            .to_string();
        let tone = record.get(KEY_TONE).unwrap_or_default().to_string();
        let soft_target = record
            .get_u64(KEY_SOFT_TARGET)
            .unwrap_or(self.config.generation.default_soft_target);

        let Some(synopsis) = self
            .generate("synopsis", prompts::synopsis(&idea, &tone, soft_target))
            .await?
        else {
            return Ok(());
        };
        self.project.write(ArtifactKind::Synopsis, &synopsis).await?;
        self.log("Synopsis generated, refining").await;

        let refined = match self
            .generate("synopsis", prompts::refine_synopsis_auto(&synopsis))
            .await?
        {
            Some(refined) => refined,
            None => {
                self.log_warning("Refinement produced nothing, keeping the initial synopsis")
                    .await;
                synopsis
            }
        };
        self.project
            .write(ArtifactKind::RefinedSynopsis, &refined)
            .await?;
        self.project
            .mark_progress(ContentType::Synopsis.as_str(), StageStatus::ReadyForApproval)
            .await?;

        self.stage = Stage::SynopsisRefined;
        self.stage_complete(ContentType::Synopsis, &refined);
        self.log("Refined synopsis ready for approval").await;
        Ok(())
    }

    pub async fn generate_outline(&mut self) -> Result<()> {
        let synopsis = self.project.synopsis().await?;
        let record = self.project.config_record().await?;
        let tone = record.get(KEY_TONE).unwrap_or_default().to_string();
        let soft_target = record
            .get_u64(KEY_SOFT_TARGET)
            .unwrap_or(self.config.generation.default_soft_target);
        let chapters = self.config.generation.default_total_chapters;

        let prompt = prompts::outline(&synopsis, &tone, soft_target, chapters);
        self.finish_stage(ContentType::Outline, prompt).await
    }

    pub async fn generate_characters(&mut self) -> Result<()> {
        let outline = self.project.require(ArtifactKind::Outline).await?;
        let synopsis = self.project.synopsis().await?;
        self.finish_stage(ContentType::Characters, prompts::characters(&outline, &synopsis))
            .await
    }

    pub async fn generate_world(&mut self) -> Result<()> {
        let outline = self.project.require(ArtifactKind::Outline).await?;
        self.finish_stage(ContentType::World, prompts::world(&outline))
            .await
    }

    pub async fn generate_timeline(&mut self) -> Result<()> {
        let outline = self.project.require(ArtifactKind::Outline).await?;
        let tone = self.tone().await?;
        self.finish_stage(ContentType::Timeline, prompts::timeline(&outline, &tone))
            .await
    }

    /// Generates a gated artifact, stores it framed and parks for approval.
    async fn finish_stage(&mut self, content: ContentType, prompt: String) -> Result<()> {
        let Some(text) = self.generate(content.as_str(), prompt).await? else {
            return Ok(());
        };
        let text = match content {
            ContentType::Characters | ContentType::World => strip_code_blocks(&text),
            _ => text,
        };

        self.project
            .write_artifact(artifact_for(content), &text, false)
            .await?;
        self.project
            .mark_progress(content.as_str(), StageStatus::ReadyForApproval)
            .await?;
        self.stage_complete(content, &text);
        self.log(format!("{} ready for approval", capitalize(content.as_str())))
            .await;
        Ok(())
    }

    // --- adjustments ---

    /// Regenerates `content` in place using `feedback`. Never advances.
    pub async fn refine(&mut self, content: ContentType, feedback: &str) -> Result<()> {
        match content {
            ContentType::Synopsis => {
                let current = self.project.synopsis().await?;
                let record = self.project.config_record().await?;
                let prompt = prompts::refine_synopsis(
                    record.get(KEY_IDEA).unwrap_or_default(),
                    record.get(KEY_TONE).unwrap_or_default(),
                    &current,
                    feedback,
                );
                let Some(text) = self.generate(content.as_str(), prompt).await? else {
                    return Ok(());
                };
                self.project.write(ArtifactKind::RefinedSynopsis, &text).await?;
                self.stage_complete(content, &text);
            }
            ContentType::Outline => {
                let current = self.project.require(ArtifactKind::Outline).await?;
                let synopsis = self.project.synopsis().await?;
                let prompt = prompts::refine_outline(&synopsis, &current, feedback);
                self.replace_stage(content, prompt).await?;
            }
            ContentType::Characters => {
                let current = self.project.require(ArtifactKind::Characters).await?;
                let outline = self.project.optional(ArtifactKind::Outline).await?;
                let prompt = prompts::refine_characters(&outline, &current, feedback);
                self.replace_stage(content, prompt).await?;
            }
            ContentType::World => {
                let current = self.project.require(ArtifactKind::World).await?;
                let outline = self.project.optional(ArtifactKind::Outline).await?;
                let prompt = prompts::refine_world(&outline, &current, feedback);
                self.replace_stage(content, prompt).await?;
            }
            ContentType::Timeline => {
                let current = self.project.require(ArtifactKind::Timeline).await?;
                let outline = self.project.optional(ArtifactKind::Outline).await?;
                let prompt = prompts::refine_timeline(&outline, &current, feedback);
                self.replace_stage(content, prompt).await?;
            }
            ContentType::Section => self.refine_section(feedback).await?,
        }

        self.log(format!("{} refined with feedback", capitalize(content.as_str())))
            .await;
        Ok(())
    }

    async fn replace_stage(&mut self, content: ContentType, prompt: String) -> Result<()> {
        let Some(text) = self.generate(content.as_str(), prompt).await? else {
            return Ok(());
        };
        let text = match content {
            ContentType::Characters | ContentType::World => strip_code_blocks(&text),
            _ => text,
        };
        self.project
            .write_artifact(artifact_for(content), &text, true)
            .await?;
        self.stage_complete(content, &text);
        Ok(())
    }

    async fn refine_section(&mut self, feedback: &str) -> Result<()> {
        let current = read_buffer(&self.buffer);
        if current.trim().is_empty() {
            return Err(PipelineError::MissingPrerequisite {
                artifact: "section buffer".to_string(),
            }
            .into());
        }
        let record = self.project.config_record().await?;
        let chapter = record.get_u32(KEY_CURRENT_CHAPTER).unwrap_or(1).max(1);
        let section = record.get_u32(KEY_CURRENT_SECTION).unwrap_or(1).max(1);
        let tone = record.get(KEY_TONE).unwrap_or_default().to_string();

        let Some(mut text) = self
            .generate("section", prompts::refine_section(&current, feedback, &tone))
            .await?
        else {
            return Ok(());
        };
        self.set_buffer(chapter, section, &text).await?;

        for prompt in [prompts::polish_flow as fn(&str) -> String, prompts::polish_style] {
            if let Some(polished) = self.generate("section", prompt(&text)).await? {
                text = polished;
                self.set_buffer(chapter, section, &text).await?;
            }
        }

        self.stage_complete(ContentType::Section, &text);
        Ok(())
    }

    // --- chapter loop ---

    /// Drafts every remaining section of every remaining chapter. A failed
    /// section is skipped; failed research stops the loop.
    pub async fn run_chapter_loop(&mut self) -> Result<()> {
        let timeline = self.project.require(ArtifactKind::Timeline).await?;
        let record = self.project.config_record().await?;
        let total = record
            .get_u32(KEY_TOTAL_CHAPTERS)
            .filter(|t| *t > 0)
            .unwrap_or(self.config.generation.default_total_chapters);
        let sections = record
            .get_u32(KEY_SECTIONS_PER_CHAPTER)
            .filter(|s| *s > 0)
            .unwrap_or(self.config.generation.sections_per_chapter);
        let mut chapter = record.get_u32(KEY_CURRENT_CHAPTER).unwrap_or(1).max(1);
        let tone = record.get(KEY_TONE).unwrap_or_default().to_string();

        let outline = self.project.optional(ArtifactKind::Outline).await?;
        let characters = self.project.optional(ArtifactKind::Characters).await?;
        let world = self.project.optional(ArtifactKind::World).await?;

        self.stage = Stage::ChapterLoop;
        if chapter > total {
            self.log(format!("All {} chapters are already drafted", total)).await;
            return Ok(());
        }
        self.log(format!("Starting chapter loop at Chapter {} of {}", chapter, total))
            .await;

        let pb = ProgressBar::new(u64::from(total - chapter + 1) * u64::from(sections));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} sections")?
                .progress_chars("#>-"),
        );

        while chapter <= total {
            let research = match self
                .generate("research", prompts::research(chapter, &outline, &world, &characters))
                .await
            {
                Ok(Some(notes)) => notes,
                Ok(None) => {
                    self.log_error(format!(
                        "Research notes for Chapter {} came back empty, stopping the chapter loop",
                        chapter
                    ))
                    .await;
                    break;
                }
                Err(e) => {
                    self.log_error(format!(
                        "Research for Chapter {} failed, stopping the chapter loop: {:#}",
                        chapter, e
                    ))
                    .await;
                    break;
                }
            };
            self.append_research(chapter, &research).await?;

            let inputs = SectionInputs {
                timeline: timeline.clone(),
                research,
                tone: tone.clone(),
                characters: characters.clone(),
                world: world.clone(),
            };
            for section in 1..=sections {
                if let Err(e) = self.write_section(chapter, section, &inputs).await {
                    self.log_error(format!(
                        "Section {} of Chapter {} failed and was skipped: {:#}",
                        section, chapter, e
                    ))
                    .await;
                }
                pb.inc(1);
            }

            self.events
                .emit(PipelineEvent::NewDraft(read_buffer(&self.buffer)));
            // Drafting runs ahead of approvals: after the last chapter the
            // counter sits at total + 1, so the next section approval is
            // filed under that chapter and completes the novel.
            let next = chapter + 1;
            self.project
                .update_config(|record| record.set(KEY_CURRENT_CHAPTER, next))
                .await?;
            self.log(format!("Chapter {} drafted", chapter)).await;
            chapter = next;
        }

        pb.finish_with_message("Chapter loop finished");
        let buffer = read_buffer(&self.buffer);
        if !buffer.trim().is_empty() {
            self.stage_complete(ContentType::Section, &buffer);
        }
        Ok(())
    }

    async fn append_research(&mut self, chapter: u32, notes: &str) -> Result<()> {
        let existing = self.project.read(ArtifactKind::ResearchNotes).await?;
        if existing.is_empty() {
            self.project
                .append(
                    ArtifactKind::ResearchNotes,
                    "=== RESEARCH NOTES FOR NOVEL CHAPTERS ===\n\n",
                )
                .await?;
        }
        self.project
            .append(
                ArtifactKind::ResearchNotes,
                &format!("--- Chapter {} ---\n{}\n\n", chapter, notes),
            )
            .await
    }

    async fn write_section(&mut self, chapter: u32, section: u32, inputs: &SectionInputs) -> Result<()> {
        let context = self.project.optional(ArtifactKind::Context).await?;
        let prompt = prompts::draft(&DraftContext {
            chapter,
            section,
            timeline: &inputs.timeline,
            research: &inputs.research,
            tone: &inputs.tone,
            context: tail(&context, 1500),
            characters: &inputs.characters,
            world: &inputs.world,
        });
        let empty = |what: &str| PipelineError::EmptyGeneration {
            what: format!("{} of Chapter {}, Section {}", what, chapter, section),
        };

        let draft = self
            .generate("section", prompt)
            .await?
            .ok_or_else(|| empty("draft"))?;
        self.project
            .write_draft(chapter, section, DraftVersion::Draft, &draft)
            .await?;
        self.set_buffer(chapter, section, &draft).await?;

        let polished = self
            .generate("section", prompts::polish(&draft))
            .await?
            .ok_or_else(|| empty("polish"))?;
        self.project
            .write_draft(chapter, section, DraftVersion::Polished, &polished)
            .await?;
        self.set_buffer(chapter, section, &polished).await?;

        let flags = prompts::extract_flags(&polished);
        if prompts::needs_vocabulary_pass(&flags) {
            let enhanced = self
                .generate("section", prompts::enhance_vocabulary(&polished, &flags))
                .await?
                .ok_or_else(|| empty("vocabulary pass"))?;
            self.project
                .write_draft(chapter, section, DraftVersion::Enhanced, &enhanced)
                .await?;
            self.set_buffer(chapter, section, &enhanced).await?;
        }

        self.log(format!("Chapter {}, Section {} drafted", chapter, section))
            .await;
        Ok(())
    }

    // --- section approval ---

    pub async fn approve_section(&mut self) -> Result<SectionApproval> {
        let text = read_buffer(&self.buffer);
        if text.trim().is_empty() {
            return Err(PipelineError::NothingToApprove.into());
        }

        let record = self.project.config_record().await?;
        let chapter = record.get_u32(KEY_CURRENT_CHAPTER).unwrap_or(1).max(1);
        let section = record.get_u32(KEY_CURRENT_SECTION).unwrap_or(1).max(1);
        let per_chapter = record
            .get_u32(KEY_SECTIONS_PER_CHAPTER)
            .filter(|s| *s > 0)
            .unwrap_or(self.config.generation.sections_per_chapter);
        let soft_target = record
            .get_u64(KEY_SOFT_TARGET)
            .unwrap_or(self.config.generation.default_soft_target);
        let mut total = record
            .get_u32(KEY_TOTAL_CHAPTERS)
            .filter(|t| *t > 0)
            .unwrap_or(self.config.generation.default_total_chapters);

        if section == 1 {
            self.project
                .append(ArtifactKind::Story, &format!("\n\n=== CHAPTER {} ===\n\n", chapter))
                .await?;
        }
        self.project
            .append(ArtifactKind::Story, &format!("{}\n\n", text.trim()))
            .await?;
        // Approved text belongs to the story now and must not be offered again.
        self.clear_buffer().await?;

        match self.generate("summary", prompts::summary(&text)).await {
            Ok(Some(summary)) => {
                self.project
                    .append(
                        ArtifactKind::Summaries,
                        &format!("Chapter {}, Section {}:\n{}\n\n", chapter, section, summary),
                    )
                    .await?
            }
            Ok(None) => {}
            Err(e) => self.log_error(format!("Summary failed: {:#}", e)).await,
        }

        match self.generate("context", prompts::context_extraction(&text)).await {
            Ok(Some(context)) => {
                self.project
                    .append(
                        ArtifactKind::Context,
                        &format!("Chapter {}, Section {}: {}\n", chapter, section, context),
                    )
                    .await?
            }
            Ok(None) => {}
            Err(e) => self.log_error(format!("Context extraction failed: {:#}", e)).await,
        }

        let story = self.project.read(ArtifactKind::Story).await?;
        let story_words = word_count(&story);
        let progress = progress_percent(story_words, soft_target);
        let section_words = word_count(&text);

        let (next_chapter, next_section) = if section + 1 > per_chapter {
            (chapter + 1, 1)
        } else {
            (chapter, section + 1)
        };

        self.project
            .update_config(|record| {
                record.set(KEY_CURRENT_CHAPTER, next_chapter);
                record.set(KEY_CURRENT_SECTION, next_section);
                record.set(KEY_SECTION_WORDS, section_words);
                record.set(KEY_PROGRESS, format!("{}%", progress));
            })
            .await?;
        self.log(format!(
            "Section {} of Chapter {} approved and processed ({} words)",
            section, chapter, section_words
        ))
        .await;
        if next_chapter != chapter {
            self.log(format!(
                "Chapter {} complete! Moving to Chapter {}",
                chapter, next_chapter
            ))
            .await;
        }

        let milestone = self.config.generation.milestone_percent;
        if progress > milestone && progress < 100 {
            total = self.apply_milestone(progress, chapter, total).await?;
        }

        let novel_complete = next_chapter > total;
        if novel_complete {
            self.complete_novel().await?;
        } else {
            self.stage = Stage::ChapterLoop;
        }

        Ok(SectionApproval {
            chapter,
            section,
            next_chapter,
            next_section,
            progress,
            story_words,
            novel_complete,
        })
    }

    async fn apply_milestone(&mut self, progress: u32, chapter: u32, total: u32) -> Result<u32> {
        let generation = &self.config.generation;
        let (new_total, label) = match self.decisions.milestone(progress, total) {
            MilestoneChoice::Extend => (total + generation.extension_chapters, "extended"),
            MilestoneChoice::WrapUp => (total.min(chapter + generation.wrap_up_chapters), "wrap_up"),
        };

        self.project
            .update_config(|record| {
                record.set(KEY_TOTAL_CHAPTERS, new_total);
                record.set(KEY_MILESTONE, label);
            })
            .await?;
        self.log(format!(
            "Progress at {}%: total chapters {} -> {} ({})",
            progress, total, new_total, label
        ))
        .await;
        Ok(new_total)
    }

    async fn complete_novel(&mut self) -> Result<()> {
        self.stage = Stage::NovelComplete;
        self.project
            .mark_progress(NOVEL_PROGRESS_KEY, StageStatus::Complete)
            .await?;
        self.log("=== NOVEL COMPLETE ===").await;
        self.events.emit(PipelineEvent::NovelComplete);

        if let Err(e) = self.final_consistency_check().await {
            self.log_error(format!("Consistency check failed: {:#}", e)).await;
        }
        Ok(())
    }

    /// Compares story, characters, world and timeline excerpts. Returns the
    /// report, or `None` when nothing was generated.
    pub async fn final_consistency_check(&mut self) -> Result<Option<String>> {
        let story = self.project.optional(ArtifactKind::Story).await?;
        let characters = self.project.optional(ArtifactKind::Characters).await?;
        let world = self.project.optional(ArtifactKind::World).await?;
        let timeline = self.project.optional(ArtifactKind::Timeline).await?;

        let prompt = prompts::consistency_check(&story, &characters, &world, &timeline);
        let Some(report) = self.generate("consistency", prompt).await? else {
            return Ok(None);
        };

        if prompts::reports_no_issues(&report) {
            self.log("Consistency check: no issues found").await;
        } else {
            self.log(format!("Consistency check found issues:\n{}", report))
                .await;
            if self.decisions.auto_fix(&report) {
                self.log("Auto-fix requested for consistency issues").await;
            } else {
                self.log("Auto-fix declined, issues left for manual revision")
                    .await;
            }
        }
        Ok(Some(report))
    }
}

fn artifact_for(content: ContentType) -> ArtifactKind {
    match content {
        ContentType::Synopsis => ArtifactKind::RefinedSynopsis,
        ContentType::Outline => ArtifactKind::Outline,
        ContentType::Characters => ArtifactKind::Characters,
        ContentType::World => ArtifactKind::World,
        ContentType::Timeline => ArtifactKind::Timeline,
        ContentType::Section => ArtifactKind::BufferBackup,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Story length against the soft target, clamped to 100.
pub fn progress_percent(words: u64, soft_target: u64) -> u32 {
    if soft_target == 0 {
        return 100;
    }
    (words.saturating_mul(100) / soft_target).min(100) as u32
}
