use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::{
    dom::{MutationReceiver, MutationRecord, NodeId},
    infrastructure::shutdown::ShutdownListener,
};

use super::{controller::Controller, scanner::Scanner};

/// Rescans the page whenever a mutation batch reports added nodes, while
/// the filter is enabled. Enabling the filter triggers an immediate scan.
/// Removed subtrees are forgotten whether or not the filter is on.
pub struct MutationWatcher {
    scanner: Arc<Scanner>,
    controller: Arc<Controller>,
}

impl MutationWatcher {
    pub fn new(scanner: Arc<Scanner>, controller: Arc<Controller>) -> Self {
        Self {
            scanner,
            controller,
        }
    }

    /// Handles one notification cycle. Returns whether a rescan ran.
    pub fn handle_batch(&self, batch: &[MutationRecord]) -> bool {
        let removed: Vec<NodeId> = batch
            .iter()
            .flat_map(|record| record.removed_nodes().iter().copied())
            .collect();
        if !removed.is_empty() {
            self.scanner.forget(&removed);
        }

        if !self.controller.is_enabled() {
            return false;
        }
        if !batch.iter().any(MutationRecord::has_added_nodes) {
            return false;
        }
        self.scanner.scan();
        true
    }

    pub fn spawn(
        self,
        mut mutations: MutationReceiver,
        mut shutdown: ShutdownListener,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut enabled = self.controller.subscribe_enabled();
            if *enabled.borrow_and_update() {
                let outcome = self.scanner.scan();
                tracing::info!(target: "watcher", matched = outcome.matched, "initial scan complete");
            }

            loop {
                tokio::select! {
                    batch = mutations.recv() => {
                        let Some(batch) = batch else {
                            tracing::info!(target: "watcher", "mutation source closed");
                            break;
                        };
                        self.handle_batch(&batch);
                    }
                    changed = enabled.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if *enabled.borrow_and_update() {
                            let outcome = self.scanner.scan();
                            tracing::info!(target: "watcher", matched = outcome.matched, "filter enabled; page rescanned");
                        }
                    }
                    _ = shutdown.notified() => break,
                }
            }
            tracing::info!(target: "watcher", "mutation watcher stopped");
        })
    }
}
