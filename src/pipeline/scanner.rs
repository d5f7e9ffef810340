use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;

use crate::{
    dom::{NodeId, SharedDocument},
    domain::QueueItem,
    tasks::processor::AnalysisBatcher,
};

use super::{engine::ConcealmentLedger, profile::PlatformProfile};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub matched: usize,
    pub enqueued: usize,
    pub already_processed: usize,
    pub too_short: usize,
}

/// Finds content elements that have not been queued yet and hands them to
/// the batcher. Elements are tracked by identity, never by text.
pub struct Scanner {
    document: SharedDocument,
    profile: &'static PlatformProfile,
    processed: Mutex<HashSet<NodeId>>,
    ledger: Arc<ConcealmentLedger>,
    batcher: Arc<AnalysisBatcher>,
    min_text_length: usize,
}

impl Scanner {
    pub fn new(
        document: SharedDocument,
        profile: &'static PlatformProfile,
        ledger: Arc<ConcealmentLedger>,
        batcher: Arc<AnalysisBatcher>,
        min_text_length: usize,
    ) -> Self {
        Self {
            document,
            profile,
            processed: Mutex::new(HashSet::new()),
            ledger,
            batcher,
            min_text_length,
        }
    }

    pub fn profile(&self) -> &'static PlatformProfile {
        self.profile
    }

    pub fn processed_count(&self) -> usize {
        self.processed.lock().len()
    }

    pub fn scan(&self) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        let candidates: Vec<(NodeId, String)> = {
            let document = self.document.lock();
            let processed = self.processed.lock();
            let matched = document.select(&self.profile.content_selector);
            outcome.matched = matched.len();
            matched
                .into_iter()
                .filter(|element| !processed.contains(element))
                .map(|element| (element, document.rendered_text(element)))
                .collect()
        };
        outcome.already_processed = outcome.matched - candidates.len();

        let mut items = Vec::new();
        for (element, text) in candidates {
            // Short fragments stay unmarked so they are reconsidered if they grow.
            if text.chars().count() < self.min_text_length {
                outcome.too_short += 1;
                continue;
            }
            if !self.processed.lock().insert(element) {
                outcome.already_processed += 1;
                continue;
            }
            self.ledger.mark_visible(element);
            items.push(QueueItem { element, text });
        }
        outcome.enqueued = items.len();
        self.batcher.enqueue_all(items);

        if outcome.enqueued > 0 {
            tracing::debug!(
                target: "scan",
                matched = outcome.matched,
                enqueued = outcome.enqueued,
                skipped_short = outcome.too_short,
                "scan queued new fragments"
            );
        }
        outcome
    }

    /// Drops every element under the removed roots from the processed set and
    /// the ledger. Roots that are back in the document are left alone.
    pub fn forget(&self, removed: &[NodeId]) -> usize {
        let gone: HashSet<NodeId> = {
            let document = self.document.lock();
            removed
                .iter()
                .filter(|root| !document.contains(**root))
                .flat_map(|root| document.subtree(*root))
                .collect()
        };
        if gone.is_empty() {
            return 0;
        }
        self.ledger.forget(&gone);
        let mut processed = self.processed.lock();
        let before = processed.len();
        processed.retain(|element| !gone.contains(element));
        let forgotten = before - processed.len();
        if forgotten > 0 {
            tracing::debug!(target: "scan", forgotten, "removed fragments forgotten");
        }
        forgotten
    }
}
