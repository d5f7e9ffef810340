use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
    time::timeout,
};
use tokio_cron_scheduler::JobScheduler;

use crate::{
    ai::PerspectiveClient,
    config::AppConfig,
    db::{
        self,
        settings::{SettingChange, SettingsRepository},
    },
    dom::Document,
    host::{spawn_outbound_forwarder, HostService},
    infrastructure::{
        directories::ResolvedPaths,
        shutdown::{Shutdown, ShutdownListener},
    },
    pipeline::{profile, Controller, Pipeline},
    tasks::{
        scheduler::configure_rollover_jobs,
        stats::{today_in, StatsRecorder},
    },
};

pub struct PacifiersApp {
    _paths: ResolvedPaths,
    scheduler: JobScheduler,
    pipeline: Arc<Pipeline>,
    host: HostService,
    settings: Arc<SettingsRepository>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    shutdown: Shutdown,
}

impl PacifiersApp {
    pub async fn initialize(
        config: AppConfig,
        paths: ResolvedPaths,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let tz = config.tz();
        let pool = db::init_pool(&paths.db_path).await?;
        let settings = Arc::new(SettingsRepository::new(pool));
        settings.ensure_defaults(today_in(tz)).await?;

        if let Some(api_key) = &config.perspective.api_key {
            if settings.api_key().await?.is_none() {
                settings.set_api_key(Some(api_key.clone())).await?;
            }
        }

        let http_client = Client::builder()
            .user_agent(format!("pacifiers/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        let classifier = Arc::new(PerspectiveClient::new(
            http_client,
            config.perspective.clone(),
        ));
        classifier.set_api_key(settings.api_key().await?);
        if !classifier.has_api_key() {
            tracing::warn!(target: "classifier", "no perspective api key configured; every fragment scores 0");
        }

        let controller = Arc::new(Controller::new(
            settings.enabled().await?,
            settings.mode().await?,
        ));
        let document = load_document(config.page.path.as_deref()).await?;

        let (stats_tx, stats_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(64);

        let pipeline = Arc::new(Pipeline::assemble(
            document,
            profile::resolve(&config.page.url),
            controller,
            classifier.clone(),
            &config.pipeline,
            stats_tx,
            shutdown.subscribe(),
        ));

        let recorder = Arc::new(StatsRecorder::new(settings.clone(), tz, updates.clone()));
        let tasks = vec![
            ("watcher", pipeline.watch(shutdown.subscribe())),
            ("stats", recorder.clone().spawn(stats_rx, shutdown.subscribe())),
            (
                "outbound",
                spawn_outbound_forwarder(updates.subscribe(), shutdown.subscribe()),
            ),
            (
                "settings",
                spawn_api_key_listener(settings.subscribe(), classifier, shutdown.subscribe()),
            ),
        ];

        let scheduler = configure_rollover_jobs(&config.scheduler.cron_specs, recorder).await?;
        let host = HostService::new(pipeline.clone(), settings.clone());

        Ok(Self {
            _paths: paths,
            scheduler,
            pipeline,
            host,
            settings,
            tasks,
            shutdown,
        })
    }

    pub async fn run(self) -> Result<()> {
        let PacifiersApp {
            _paths: _,
            mut scheduler,
            pipeline,
            host,
            settings,
            tasks,
            shutdown,
        } = self;

        tracing::info!(
            profile = pipeline.profile.name,
            enabled = pipeline.controller.is_enabled(),
            mode = %pipeline.controller.mode(),
            "content filter started"
        );

        let mut shutdown_listener = shutdown.subscribe();
        let shutdown_timeout = Duration::from_secs(5);
        let mut host_future = Box::pin(host.run(shutdown.subscribe()));
        let mut host_completed = false;

        tokio::select! {
            _ = shutdown_listener.notified() => {
                tracing::info!("shutdown signal received (CTRL+C / SIGTERM)");
            }
            res = &mut host_future => {
                host_completed = true;
                if let Err(err) = res {
                    tracing::error!(?err, "control channel failed");
                }
            }
        }

        shutdown.trigger();

        if !host_completed {
            if timeout(shutdown_timeout, &mut host_future).await.is_err() {
                tracing::warn!(
                    target: "host",
                    "control channel did not stop within {:?}",
                    shutdown_timeout
                );
            }
        }

        match timeout(shutdown_timeout, scheduler.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(?err, "scheduler shutdown failed"),
            Err(_) => tracing::warn!(
                target: "scheduler",
                "scheduler did not stop within {:?}",
                shutdown_timeout
            ),
        }

        for (name, mut handle) in tasks {
            let wait = tokio::time::sleep(shutdown_timeout);
            tokio::pin!(wait);
            tokio::select! {
                res = &mut handle => {
                    if let Err(err) = res {
                        if err.is_panic() {
                            tracing::error!(task = name, "task panicked");
                        }
                    }
                }
                _ = &mut wait => {
                    tracing::warn!(task = name, "task did not stop within {:?}; aborting", shutdown_timeout);
                    handle.abort();
                }
            }
        }

        if timeout(shutdown_timeout, settings.close()).await.is_err() {
            tracing::warn!(
                target: "db",
                "settings store did not close within {:?}",
                shutdown_timeout
            );
        }

        let summary = pipeline.ledger.summary();
        tracing::info!(
            concealed = summary.concealed,
            revealed = summary.revealed,
            visible = summary.visible,
            "content filter stopped"
        );
        Ok(())
    }
}

async fn load_document(path: Option<&str>) -> Result<Document> {
    let Some(path) = path else {
        return Ok(Document::new());
    };
    let html = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read page {path}"))?;
    tracing::info!(target: "host", path, bytes = html.len(), "page loaded");
    Ok(Document::parse(&html))
}

/// Keeps the classifier's key in step with the stored `apiKey` setting.
fn spawn_api_key_listener(
    mut changes: broadcast::Receiver<SettingChange>,
    classifier: Arc<PerspectiveClient>,
    mut shutdown: ShutdownListener,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Ok(SettingChange::ApiKey(api_key)) => classifier.set_api_key(api_key),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(target: "classifier", skipped, "missed settings changes");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.notified() => break,
            }
        }
    })
}
