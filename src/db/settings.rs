use anyhow::Result;
use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{query, query_as, sqlite::SqlitePool};
use tokio::sync::broadcast;

use crate::domain::{Mode, Stats};

pub const KEY_ENABLED: &str = "enabled";
pub const KEY_MODE: &str = "mode";
pub const KEY_API_KEY: &str = "apiKey";
pub const KEY_STATS: &str = "stats";

const SELECT_VALUE: &str = "SELECT value FROM settings WHERE key = ?1";
const UPSERT_VALUE: &str =
    "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)";

/// Changes other components follow from storage. The switches are applied to
/// the controller by whoever writes them, and stats go out through the
/// recorder, so only the API key is broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingChange {
    ApiKey(Option<String>),
}

/// Key-value settings persisted as JSON, with change notifications.
pub struct SettingsRepository {
    pool: SqlitePool,
    changes: broadcast::Sender<SettingChange>,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(32);
        Self { pool, changes }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingChange> {
        self.changes.subscribe()
    }

    fn notify(&self, change: SettingChange) {
        // Nobody listening is fine.
        let _ = self.changes.send(change);
    }

    /// Seeds first-run values without touching keys that already exist.
    pub async fn ensure_defaults(&self, today: NaiveDate) -> Result<()> {
        let defaults = [
            (KEY_ENABLED, serde_json::to_string(&true)?),
            (KEY_MODE, serde_json::to_string(&Mode::default())?),
            (KEY_STATS, serde_json::to_string(&Stats::new(today))?),
        ];
        for (key, value) in defaults {
            query("INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)")
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let row: Option<(String,)> = query_as(SELECT_VALUE)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|(raw,)| decode(key, &raw)))
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        query(UPSERT_VALUE)
            .bind(key)
            .bind(serde_json::to_string(value)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn enabled(&self) -> Result<bool> {
        Ok(self.read::<bool>(KEY_ENABLED).await? != Some(false))
    }

    pub async fn mode(&self) -> Result<Mode> {
        Ok(self.read(KEY_MODE).await?.unwrap_or_default())
    }

    pub async fn api_key(&self) -> Result<Option<String>> {
        Ok(self
            .read::<String>(KEY_API_KEY)
            .await?
            .filter(|key| !key.trim().is_empty()))
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.write(KEY_ENABLED, &enabled).await
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<()> {
        self.write(KEY_MODE, &mode).await
    }

    pub async fn set_api_key(&self, api_key: Option<String>) -> Result<()> {
        match &api_key {
            Some(key) => self.write(KEY_API_KEY, key).await?,
            None => {
                query("DELETE FROM settings WHERE key = ?1")
                    .bind(KEY_API_KEY)
                    .execute(&self.pool)
                    .await?;
            }
        }
        self.notify(SettingChange::ApiKey(api_key));
        Ok(())
    }

    pub async fn stats(&self, today: NaiveDate) -> Result<Stats> {
        Ok(self
            .read(KEY_STATS)
            .await?
            .unwrap_or_else(|| Stats::new(today)))
    }

    /// Counts one blocked fragment, rolling the daily counter first if the
    /// last reset happened on another day.
    pub async fn increment_stats(&self, today: NaiveDate) -> Result<Stats> {
        let stats = self
            .update_stats(today, |stats| {
                stats.record_block(today);
                true
            })
            .await?;
        Ok(stats.unwrap_or_else(|| Stats::new(today)))
    }

    /// Resets the daily counter if the day changed. Returns the new stats
    /// only when something changed.
    pub async fn rollover_stats(&self, today: NaiveDate) -> Result<Option<Stats>> {
        self.update_stats(today, |stats| stats.roll_over(today)).await
    }

    async fn update_stats<F>(&self, today: NaiveDate, update: F) -> Result<Option<Stats>>
    where
        F: FnOnce(&mut Stats) -> bool,
    {
        // Take the write lock up front so a concurrent read-then-write
        // waits on busy_timeout instead of failing the upgrade.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let row: Option<(String,)> = query_as(SELECT_VALUE)
            .bind(KEY_STATS)
            .fetch_optional(&mut *tx)
            .await?;
        let mut stats = row
            .and_then(|(raw,)| decode::<Stats>(KEY_STATS, &raw))
            .unwrap_or_else(|| Stats::new(today));

        if !update(&mut stats) {
            tx.rollback().await?;
            return Ok(None);
        }

        query(UPSERT_VALUE)
            .bind(KEY_STATS)
            .bind(serde_json::to_string(&stats)?)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(stats))
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(target: "db", key, error = %err, "ignoring malformed setting");
            None
        }
    }
}
