use std::{env, time::Duration};

use chrono_tz::Tz;
use url::Url;

use crate::ai::inference::PERSPECTIVE_API_URL;

use super::env::{
    AppConfig, ConfigError, DirectoryConfig, LoggingConfig, PageConfig, PerspectiveConfig,
    PipelineConfig, SchedulerConfig,
};

pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::from_env()
}

impl AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let url = var("PAGE_URL").ok_or(ConfigError::Missing("PAGE_URL"))?;
        if Url::parse(&url).is_err() {
            return Err(ConfigError::Invalid {
                key: "PAGE_URL",
                value: url,
            });
        }
        let page = PageConfig {
            url,
            path: var("PAGE_PATH"),
        };

        let perspective = PerspectiveConfig {
            api_key: var("PERSPECTIVE_API_KEY").map(|key| key.trim().to_string()),
            api_url: var("PERSPECTIVE_API_URL").unwrap_or_else(|| PERSPECTIVE_API_URL.to_string()),
            languages: var("PERSPECTIVE_LANGUAGES")
                .map(|value| {
                    value
                        .split(',')
                        .map(|part| part.trim().to_string())
                        .filter(|part| !part.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|languages| !languages.is_empty())
                .unwrap_or_else(|| vec!["en".to_string()]),
            timeout: Duration::from_millis(parse_or(&var, "PERSPECTIVE_TIMEOUT_MS", 10_000)),
        };

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            batch_size: match parse_or(&var, "BATCH_SIZE", defaults.batch_size) {
                0 => {
                    return Err(ConfigError::Invalid {
                        key: "BATCH_SIZE",
                        value: "0".to_string(),
                    })
                }
                size => size,
            },
            batch_delay: Duration::from_millis(parse_or(&var, "BATCH_DELAY_MS", 1_000)),
            min_text_length: parse_or(&var, "MIN_TEXT_LENGTH", defaults.min_text_length),
        };

        let directories = DirectoryConfig {
            logs_dir: var("LOGS_DIR").unwrap_or_else(|| "logs".to_string()),
            data_dir: var("DATA_DIR").unwrap_or_else(|| "data".to_string()),
            db_filename: var("DB_FILENAME").unwrap_or_else(|| "settings.db".to_string()),
        };

        let logging = LoggingConfig {
            level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        };

        let timezone = match var("APP_TIMEZONE") {
            Some(name) => name.trim().parse::<Tz>().map_err(|_| ConfigError::Invalid {
                key: "APP_TIMEZONE",
                value: name,
            })?,
            None => chrono_tz::UTC,
        };

        let scheduler = SchedulerConfig {
            cron_specs: var("STATS_ROLLOVER_CRONS")
                .map(|value| {
                    value
                        .split(';')
                        .map(|part| part.trim().to_string())
                        .filter(|part| !part.is_empty())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_else(|| vec!["0 0 * * * *".to_string()]),
        };

        Ok(Self {
            page,
            perspective,
            pipeline,
            directories,
            logging,
            timezone,
            scheduler,
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}
