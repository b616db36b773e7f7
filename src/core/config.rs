use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_projects")]
    pub projects_folder: String,

    #[serde(default = "default_log_folder")]
    pub log_folder: String,

    #[serde(default)]
    pub unattended: bool,

    /// Approve each artifact as soon as it is ready instead of asking.
    #[serde(default)]
    pub auto_approve: bool,

    pub llm: LlmConfig,

    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "ollama" or "openai"
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_sections_per_chapter")]
    pub sections_per_chapter: u32,
    #[serde(default = "default_total_chapters")]
    pub default_total_chapters: u32,
    #[serde(default = "default_soft_target")]
    pub default_soft_target: u64,
    #[serde(default = "default_log_every_tokens")]
    pub log_every_tokens: usize,
    #[serde(default = "default_backup_interval")]
    pub backup_interval_secs: u64,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
    #[serde(default = "default_extension_chapters")]
    pub extension_chapters: u32,
    #[serde(default = "default_wrap_up_chapters")]
    pub wrap_up_chapters: u32,
    #[serde(default = "default_milestone_percent")]
    pub milestone_percent: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            sections_per_chapter: default_sections_per_chapter(),
            default_total_chapters: default_total_chapters(),
            default_soft_target: default_soft_target(),
            log_every_tokens: default_log_every_tokens(),
            backup_interval_secs: default_backup_interval(),
            stop_timeout_secs: default_stop_timeout(),
            extension_chapters: default_extension_chapters(),
            wrap_up_chapters: default_wrap_up_chapters(),
            milestone_percent: default_milestone_percent(),
        }
    }
}

impl GenerationConfig {
    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backup_interval_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl LlmConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

fn default_projects() -> String {
    "projects".to_string()
}
fn default_log_folder() -> String {
    "Config".to_string()
}
fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "gemma3:12b".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    1000
}
fn default_sections_per_chapter() -> u32 {
    3
}
fn default_total_chapters() -> u32 {
    25
}
fn default_soft_target() -> u64 {
    250_000
}
fn default_log_every_tokens() -> usize {
    100
}
fn default_backup_interval() -> u64 {
    3600
}
fn default_stop_timeout() -> u64 {
    5
}
fn default_extension_chapters() -> u32 {
    5
}
fn default_wrap_up_chapters() -> u32 {
    2
}
fn default_milestone_percent() -> u32 {
    80
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Path::new("config.yml"))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.projects_folder)?;
        fs::create_dir_all(&self.log_folder)?;
        Ok(())
    }

    /// Programmatic defaults around an explicit backend choice.
    pub fn default_with_llm(provider: &str, base_url: &str) -> Self {
        Self {
            projects_folder: default_projects(),
            log_folder: default_log_folder(),
            unattended: false,
            auto_approve: false,
            llm: LlmConfig {
                provider: provider.to_string(),
                base_url: base_url.to_string(),
                model: default_model(),
                api_key: None,
                temperature: default_temperature(),
                max_retries: default_max_retries(),
                retry_base_delay_ms: default_retry_base_delay(),
            },
            generation: GenerationConfig::default(),
        }
    }
}
