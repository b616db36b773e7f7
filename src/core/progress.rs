use chrono::Local;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    ReadyForApproval,
    Approved,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageProgress {
    pub status: StageStatus,
    pub timestamp: String,
}

/// Per-stage status kept in `progress.json`, e.g.
/// `{"outline": {"status": "approved", "timestamp": "2024-05-01 10:00:00"}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressRecord {
    stages: BTreeMap<String, StageProgress>,
}

impl ProgressRecord {
    /// Unreadable content means "no prior progress".
    pub fn parse(text: &str) -> Self {
        if text.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str(text) {
            Ok(record) => record,
            Err(e) => {
                warn!("Progress record is malformed ({}), starting from an empty record", e);
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn mark(&mut self, stage: &str, status: StageStatus) {
        self.stages.insert(
            stage.to_string(),
            StageProgress {
                status,
                timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            },
        );
    }

    pub fn status(&self, stage: &str) -> Option<StageStatus> {
        self.stages.get(stage).map(|p| p.status)
    }

    pub fn get(&self, stage: &str) -> Option<&StageProgress> {
        self.stages.get(stage)
    }

    pub fn is_approved(&self, stage: &str) -> bool {
        self.status(stage) == Some(StageStatus::Approved)
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_json_defaults_to_empty() {
        assert!(ProgressRecord::parse("{not json").is_empty());
        assert!(ProgressRecord::parse("").is_empty());
        assert!(ProgressRecord::parse("[1, 2]").is_empty());
    }

    #[test]
    fn test_mark_and_reparse() -> serde_json::Result<()> {
        let mut record = ProgressRecord::default();
        record.mark("synopsis", StageStatus::ReadyForApproval);
        record.mark("synopsis", StageStatus::Approved);
        record.mark("outline", StageStatus::ReadyForApproval);

        let json = record.to_json()?;
        assert!(json.contains("\"ready_for_approval\""));

        let reparsed = ProgressRecord::parse(&json);
        assert!(reparsed.is_approved("synopsis"));
        assert_eq!(reparsed.status("outline"), Some(StageStatus::ReadyForApproval));
        assert_eq!(reparsed.status("world"), None);
        assert_eq!(reparsed.get("outline").map(|p| p.timestamp.len()), Some(19));
        Ok(())
    }

    #[test]
    fn test_reads_external_layout() {
        let json = r#"{"world": {"status": "approved", "timestamp": "2024-05-01 10:00:00"}}"#;
        let record = ProgressRecord::parse(json);
        assert!(record.is_approved("world"));
    }
}
