use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use serde::Serialize;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
    task::JoinHandle,
    time::{sleep, Instant},
};

use crate::{
    db::settings::SettingsRepository,
    dom::Selector,
    domain::{ConcealmentState, ControlMessage, OutboundMessage},
    infrastructure::shutdown::ShutdownListener,
    pipeline::Pipeline,
};

use super::commands::{ConcealedFragment, HostCommand, HostEvent, PipelineReport};

const SETTLE_POLL: Duration = Duration::from_millis(100);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives the page and the filter switches from JSON lines on stdin.
pub struct HostService {
    pipeline: Arc<Pipeline>,
    settings: Arc<SettingsRepository>,
}

impl HostService {
    pub fn new(pipeline: Arc<Pipeline>, settings: Arc<SettingsRepository>) -> Self {
        Self { pipeline, settings }
    }

    /// Reads commands until stdin closes or shutdown fires. On end of input
    /// the service waits for outstanding analysis before returning.
    pub async fn run(&self, mut shutdown: ShutdownListener) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        tracing::info!(target: "host", profile = self.pipeline.profile.name, "control channel open");

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line? {
                        Some(line) => self.handle_line(&line).await,
                        None => {
                            tracing::info!(target: "host", "control channel closed");
                            break;
                        }
                    }
                }
                _ = shutdown.notified() => return Ok(()),
            }
        }

        self.wait_until_settled(&mut shutdown).await;
        Ok(())
    }

    async fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let command = match serde_json::from_str::<HostCommand>(line) {
            Ok(command) => command,
            Err(err) => {
                tracing::warn!(target: "host", error = %err, "ignoring malformed command");
                return;
            }
        };
        match self.handle(command).await {
            Ok(Some(event)) => emit(&event),
            Ok(None) => {}
            Err(err) => tracing::warn!(target: "host", error = %err, "command failed"),
        }
    }

    pub async fn handle(&self, command: HostCommand) -> Result<Option<HostEvent>> {
        if let Some(control) = command.control() {
            self.persist(&control).await;
            self.pipeline.controller.apply(&control);
            return Ok(None);
        }

        match command {
            HostCommand::AppendHtml { selector, html } => {
                let mut document = self.pipeline.document.lock();
                let parent = match selector {
                    Some(selector) => document
                        .query_selector(&parse_selector(&selector)?)
                        .ok_or_else(|| anyhow!("no element matches {selector}"))?,
                    None => document.body(),
                };
                let added = document.append_html(parent, &html)?;
                document.flush();
                tracing::debug!(target: "host", ?parent, added = added.len(), "html appended");
            }
            HostCommand::Remove { selector } => {
                let selector = parse_selector(&selector)?;
                let mut document = self.pipeline.document.lock();
                let mut removed = 0;
                for element in document.select(&selector) {
                    // Descendants of an already removed match are gone with it.
                    if document.contains(element) {
                        document.remove(element)?;
                        removed += 1;
                    }
                }
                document.flush();
                tracing::debug!(target: "host", removed, "elements removed");
            }
            HostCommand::Click { selector } => {
                let selector = parse_selector(&selector)?;
                let mut document = self.pipeline.document.lock();
                for element in document.select(&selector) {
                    if let Some(handler) = document.click(element) {
                        tracing::debug!(target: "host", ?element, ?handler, "click handled");
                    }
                }
                document.flush();
            }
            HostCommand::SetApiKey(api_key) => self.settings.set_api_key(api_key).await?,
            HostCommand::Report => return Ok(Some(HostEvent::Report(self.report()))),
            HostCommand::ToggleExtension(_) | HostCommand::UpdateMode(_) => {}
        }
        Ok(None)
    }

    async fn persist(&self, control: &ControlMessage) {
        let result = match control {
            ControlMessage::ToggleExtension(enabled) => self.settings.set_enabled(*enabled).await,
            ControlMessage::UpdateMode(mode) => self.settings.set_mode(*mode).await,
        };
        if let Err(err) = result {
            tracing::error!(target: "control", error = %err, "failed to persist setting");
        }
    }

    pub fn report(&self) -> PipelineReport {
        let pipeline = &self.pipeline;
        let concealed = {
            let document = pipeline.document.lock();
            pipeline
                .ledger
                .elements_in(ConcealmentState::Concealed)
                .into_iter()
                .map(|element| ConcealedFragment {
                    element: format!("{element:?}"),
                    container: document
                        .closest(element, &pipeline.profile.container_selector)
                        .map(|container| format!("{container:?}")),
                    text: document.rendered_text(element),
                })
                .collect()
        };
        PipelineReport {
            profile: pipeline.profile.name,
            enabled: pipeline.controller.is_enabled(),
            mode: pipeline.controller.mode(),
            processed: pipeline.scanner.processed_count(),
            queue: pipeline.batcher.snapshot(),
            concealment: pipeline.ledger.summary(),
            concealed,
        }
    }

    async fn wait_until_settled(&self, shutdown: &mut ShutdownListener) {
        let deadline = Instant::now() + SETTLE_TIMEOUT;
        loop {
            // Let the watcher pick up the last mutations before checking.
            tokio::select! {
                _ = sleep(SETTLE_POLL) => {}
                _ = shutdown.notified() => return,
            }
            if self.pipeline.batcher.is_settled() {
                tracing::info!(target: "host", "analysis settled");
                return;
            }
            if Instant::now() >= deadline {
                let snapshot = self.pipeline.batcher.snapshot();
                tracing::warn!(
                    target: "host",
                    pending = snapshot.pending,
                    in_flight = snapshot.in_flight,
                    "gave up waiting for analysis"
                );
                return;
            }
        }
    }
}

fn parse_selector(source: &str) -> Result<Selector> {
    Selector::parse(source).map_err(|err| anyhow!("invalid selector {source:?}: {err}"))
}

/// Copies outbound messages (stats updates) to stdout as JSON lines.
pub fn spawn_outbound_forwarder(
    mut updates: broadcast::Receiver<OutboundMessage>,
    mut shutdown: ShutdownListener,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                message = updates.recv() => match message {
                    Ok(message) => emit(&message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(target: "host", skipped, "outbound messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.notified() => break,
            }
        }
    })
}

fn emit<T: Serialize>(message: &T) {
    match serde_json::to_string(message) {
        Ok(line) => println!("{line}"),
        Err(err) => tracing::error!(target: "host", error = %err, "failed to encode outbound message"),
    }
}
