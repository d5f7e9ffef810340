use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

use crate::{
    db::settings::SettingsRepository,
    domain::{OutboundMessage, Stats},
    infrastructure::shutdown::ShutdownListener,
};

pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// Storage-side consumer of `INCREMENT_STATS`. Every persisted change is
/// re-broadcast as `STATS_UPDATED` to whoever is listening.
pub struct StatsRecorder {
    settings: Arc<SettingsRepository>,
    tz: Tz,
    updates: broadcast::Sender<OutboundMessage>,
}

impl StatsRecorder {
    pub fn new(
        settings: Arc<SettingsRepository>,
        tz: Tz,
        updates: broadcast::Sender<OutboundMessage>,
    ) -> Self {
        Self {
            settings,
            tz,
            updates,
        }
    }

    pub fn spawn(
        self: Arc<Self>,
        mut inbox: mpsc::UnboundedReceiver<OutboundMessage>,
        mut shutdown: ShutdownListener,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = inbox.recv() => match message {
                        Some(message) => self.handle(message).await,
                        None => break,
                    },
                    _ = shutdown.notified() => {
                        // Blocks already decided still get counted.
                        while let Ok(message) = inbox.try_recv() {
                            self.handle(message).await;
                        }
                        break;
                    }
                }
            }
            tracing::info!(target: "stats", "stats recorder stopped");
        })
    }

    async fn handle(&self, message: OutboundMessage) {
        match message {
            OutboundMessage::IncrementStats => {
                if let Err(err) = self.record_block().await {
                    tracing::error!(target: "stats", error = %err, "failed to record blocked fragment");
                }
            }
            OutboundMessage::StatsUpdated(_) => {
                tracing::debug!(target: "stats", "ignoring stats broadcast sent to the recorder");
            }
        }
    }

    pub async fn record_block(&self) -> Result<Stats> {
        let stats = self.settings.increment_stats(today_in(self.tz)).await?;
        tracing::info!(
            target: "stats",
            blocked_today = stats.blocked_today,
            total_blocked = stats.total_blocked,
            "blocked fragment recorded"
        );
        self.publish(&stats);
        Ok(stats)
    }

    pub async fn roll_over(&self) -> Result<Option<Stats>> {
        let rolled = self.settings.rollover_stats(today_in(self.tz)).await?;
        if let Some(stats) = &rolled {
            tracing::info!(target: "stats", last_reset = %stats.last_reset, "daily counter reset");
            self.publish(stats);
        }
        Ok(rolled)
    }

    fn publish(&self, stats: &Stats) {
        if self
            .updates
            .send(OutboundMessage::StatsUpdated(stats.clone()))
            .is_err()
        {
            tracing::trace!(target: "stats", "no stats listeners");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::init_pool, infrastructure::shutdown::Shutdown};

    async fn recorder() -> (tempfile::TempDir, Arc<SettingsRepository>, Arc<StatsRecorder>) {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_pool(&dir.path().join("settings.db")).await.unwrap();
        let settings = Arc::new(SettingsRepository::new(pool));
        let (updates, _) = broadcast::channel(8);
        let recorder = Arc::new(StatsRecorder::new(settings.clone(), chrono_tz::UTC, updates));
        (dir, settings, recorder)
    }

    #[tokio::test]
    async fn increments_are_persisted_and_broadcast() {
        let (_dir, settings, recorder) = recorder().await;
        let mut updates = recorder.updates.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = Shutdown::new();
        let handle = recorder.clone().spawn(rx, shutdown.subscribe());

        tx.send(OutboundMessage::IncrementStats).unwrap();
        tx.send(OutboundMessage::IncrementStats).unwrap();

        let mut last = None;
        for _ in 0..2 {
            if let OutboundMessage::StatsUpdated(stats) = updates.recv().await.unwrap() {
                last = Some(stats);
            }
        }
        let last = last.unwrap();
        assert_eq!(last.blocked_today, 2);
        assert_eq!(settings.stats(today_in(chrono_tz::UTC)).await.unwrap(), last);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn publishing_without_listeners_is_not_an_error() {
        let (_dir, _settings, recorder) = recorder().await;
        let stats = recorder.record_block().await.unwrap();
        assert_eq!(stats.total_blocked, 1);
        assert_eq!(recorder.roll_over().await.unwrap(), None);
    }

    #[tokio::test]
    async fn pending_increments_are_flushed_on_shutdown() {
        let (_dir, settings, recorder) = recorder().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = Shutdown::new();
        tx.send(OutboundMessage::IncrementStats).unwrap();
        shutdown.trigger();

        recorder.clone().spawn(rx, shutdown.subscribe()).await.unwrap();
        let stats = settings.stats(today_in(chrono_tz::UTC)).await.unwrap();
        assert_eq!(stats.total_blocked, 1);
    }
}
