use std::time::Duration;

use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub page: PageConfig,
    pub perspective: PerspectiveConfig,
    pub pipeline: PipelineConfig,
    pub directories: DirectoryConfig,
    pub logging: LoggingConfig,
    pub timezone: Tz,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    /// Timezone used to decide what "today" means for the daily counter.
    pub fn tz(&self) -> Tz {
        self.timezone
    }
}

#[derive(Debug, Clone)]
pub struct PageConfig {
    pub url: String,
    pub path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PerspectiveConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub languages: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub min_text_length: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_delay: Duration::from_millis(1_000),
            min_text_length: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub logs_dir: String,
    pub data_dir: String,
    pub db_filename: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub cron_specs: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}
