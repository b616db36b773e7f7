use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::error::PipelineError;
use crate::core::progress::{ProgressRecord, StageStatus};
use crate::core::record::{ConfigRecord, KEY_CURRENT_CHAPTER, KEY_TOTAL_CHAPTERS};

pub const NOVEL_PROGRESS_KEY: &str = "novel";

/// Content the UI can approve or adjust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Synopsis,
    Outline,
    Characters,
    World,
    Timeline,
    Section,
}

impl ContentType {
    /// Gated stages in approval order.
    pub const GATED: [ContentType; 5] = [
        ContentType::Synopsis,
        ContentType::Outline,
        ContentType::Characters,
        ContentType::World,
        ContentType::Timeline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Synopsis => "synopsis",
            ContentType::Outline => "outline",
            ContentType::Characters => "characters",
            ContentType::World => "world",
            ContentType::Timeline => "timeline",
            ContentType::Section => "section",
        }
    }

    /// The gated stage whose approval must exist before this one is generated.
    pub fn prerequisite(&self) -> Option<ContentType> {
        match self {
            ContentType::Synopsis => None,
            ContentType::Outline => Some(ContentType::Synopsis),
            ContentType::Characters => Some(ContentType::Outline),
            ContentType::World => Some(ContentType::Characters),
            ContentType::Timeline => Some(ContentType::World),
            ContentType::Section => Some(ContentType::Timeline),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "synopsis" => Ok(ContentType::Synopsis),
            "outline" => Ok(ContentType::Outline),
            "characters" => Ok(ContentType::Characters),
            "world" => Ok(ContentType::World),
            "timeline" => Ok(ContentType::Timeline),
            "section" => Ok(ContentType::Section),
            other => Err(PipelineError::InvalidContentType(other.to_string())),
        }
    }
}

/// Pipeline position. Each gated variant is named after the approval it is
/// waiting for: `OutlineApproved` means the outline exists and the pipeline
/// is parked until it is approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    SynopsisDraft,
    SynopsisRefined,
    OutlineApproved,
    CharactersApproved,
    WorldApproved,
    TimelineApproved,
    ChapterLoop,
    NovelComplete,
}

impl Stage {
    pub fn awaiting(&self) -> Option<ContentType> {
        match self {
            Stage::SynopsisDraft | Stage::NovelComplete => None,
            Stage::SynopsisRefined => Some(ContentType::Synopsis),
            Stage::OutlineApproved => Some(ContentType::Outline),
            Stage::CharactersApproved => Some(ContentType::Characters),
            Stage::WorldApproved => Some(ContentType::World),
            Stage::TimelineApproved => Some(ContentType::Timeline),
            Stage::ChapterLoop => Some(ContentType::Section),
        }
    }

    /// Where an approval of `content` leads.
    pub fn after_approval(content: ContentType) -> Stage {
        match content {
            ContentType::Synopsis => Stage::OutlineApproved,
            ContentType::Outline => Stage::CharactersApproved,
            ContentType::Characters => Stage::WorldApproved,
            ContentType::World => Stage::TimelineApproved,
            ContentType::Timeline | ContentType::Section => Stage::ChapterLoop,
        }
    }

    fn awaiting_gate(content: ContentType) -> Stage {
        match content {
            ContentType::Synopsis => Stage::SynopsisRefined,
            ContentType::Outline => Stage::OutlineApproved,
            ContentType::Characters => Stage::CharactersApproved,
            ContentType::World => Stage::WorldApproved,
            ContentType::Timeline => Stage::TimelineApproved,
            ContentType::Section => Stage::ChapterLoop,
        }
    }

    /// The stage a reloaded project picks up from.
    pub fn resume_point(progress: &ProgressRecord, config: &ConfigRecord) -> Stage {
        if progress.status(NOVEL_PROGRESS_KEY) == Some(StageStatus::Complete) {
            return Stage::NovelComplete;
        }

        for content in ContentType::GATED {
            if progress.is_approved(content.as_str()) {
                continue;
            }
            if content == ContentType::Synopsis && progress.status(content.as_str()).is_none() {
                return Stage::SynopsisDraft;
            }
            return Stage::awaiting_gate(content);
        }

        let current = config.get_u32(KEY_CURRENT_CHAPTER).unwrap_or(0);
        let total = config.get_u32(KEY_TOTAL_CHAPTERS).unwrap_or(0);
        if total > 0 && current > total {
            Stage::NovelComplete
        } else {
            Stage::ChapterLoop
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
