//! Line-oriented `Key: value` record kept in a project's `config.txt`.

use std::fmt;
use std::str::FromStr;

pub const KEY_IDEA: &str = "Idea";
pub const KEY_TONE: &str = "Tone";
pub const KEY_SOFT_TARGET: &str = "SoftTarget";
pub const KEY_TOTAL_CHAPTERS: &str = "TotalChapters";
pub const KEY_CURRENT_CHAPTER: &str = "CurrentChapter";
pub const KEY_CURRENT_SECTION: &str = "CurrentSection";
pub const KEY_SECTIONS_PER_CHAPTER: &str = "SectionsPerChapter";
pub const KEY_SECTION_WORDS: &str = "SectionWords";
pub const KEY_PROGRESS: &str = "Progress";
pub const KEY_MODEL: &str = "LLMModel";
pub const KEY_MILESTONE: &str = "Milestone";

/// Ordered key/value pairs. Keys keep their first-seen position so a
/// rewrite only touches the values a stage actually changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigRecord {
    entries: Vec<(String, String)>,
}

impl ConfigRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines without a `:` separator are dropped; everything else is kept,
    /// including keys nothing in this crate knows about.
    pub fn parse(text: &str) -> Self {
        let mut record = Self::new();
        for line in text.lines() {
            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim();
                if key.is_empty() {
                    continue;
                }
                record.set(key, value.trim());
            }
        }
        record
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Parses the leading integer of a value, so `Progress: 42%` reads as 42.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        let value = self.get(key)?;
        let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get_u64(key).and_then(|v| u32::try_from(v).ok())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ConfigRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entries {
            writeln!(f, "{}: {}", key, value)?;
        }
        Ok(())
    }
}

impl FromStr for ConfigRecord {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}
