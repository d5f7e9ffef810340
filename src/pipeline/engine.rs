use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{
    dom::{DomError, Document, NodeId, SharedDocument},
    domain::{ConcealmentState, OutboundMessage},
};

use super::controller::Controller;

pub const BLUR_CLASS: &str = "pacifiers-blur";
pub const REVEALED_CLASS: &str = "pacifiers-revealed";
pub const REVEAL_HINT: &str = "Click to reveal hidden content";

/// Concealment state of every element the pipeline has seen.
#[derive(Debug, Default)]
pub struct ConcealmentLedger {
    states: Mutex<HashMap<NodeId, ConcealmentState>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub visible: usize,
    pub concealed: usize,
    pub revealed: usize,
}

impl ConcealmentLedger {
    pub fn state(&self, element: NodeId) -> ConcealmentState {
        self.states
            .lock()
            .get(&element)
            .copied()
            .unwrap_or_default()
    }

    pub fn mark_visible(&self, element: NodeId) {
        self.states
            .lock()
            .entry(element)
            .or_insert(ConcealmentState::Visible);
    }

    fn transition(
        &self,
        element: NodeId,
        from: &[ConcealmentState],
        to: ConcealmentState,
    ) -> bool {
        let mut states = self.states.lock();
        let current = states.entry(element).or_default();
        if !from.contains(current) {
            return false;
        }
        *current = to;
        true
    }

    pub fn forget(&self, elements: &HashSet<NodeId>) {
        self.states
            .lock()
            .retain(|element, _| !elements.contains(element));
    }

    pub fn elements_in(&self, state: ConcealmentState) -> Vec<NodeId> {
        let mut elements: Vec<NodeId> = self
            .states
            .lock()
            .iter()
            .filter(|(_, current)| **current == state)
            .map(|(element, _)| *element)
            .collect();
        elements.sort();
        elements
    }

    pub fn summary(&self) -> LedgerSummary {
        let states = self.states.lock();
        let mut summary = LedgerSummary::default();
        for state in states.values() {
            match state {
                ConcealmentState::Visible => summary.visible += 1,
                ConcealmentState::Concealed => summary.concealed += 1,
                ConcealmentState::Revealed => summary.revealed += 1,
                ConcealmentState::Unseen => {}
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Score crossed the threshold and the element is now concealed.
    Concealed,
    /// Score stayed below the threshold.
    Kept,
    /// The element was already concealed or revealed, or has left the page.
    Skipped,
}

/// Turns scores into concealment decisions and applies them to the page.
pub struct ConcealmentEngine {
    document: SharedDocument,
    controller: Arc<Controller>,
    ledger: Arc<ConcealmentLedger>,
    stats: mpsc::UnboundedSender<OutboundMessage>,
}

impl ConcealmentEngine {
    pub fn new(
        document: SharedDocument,
        controller: Arc<Controller>,
        ledger: Arc<ConcealmentLedger>,
        stats: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        Self {
            document,
            controller,
            ledger,
            stats,
        }
    }

    pub fn apply(&self, element: NodeId, score: f64) -> Decision {
        let score = if score.is_finite() { score } else { 0.0 };
        let threshold = self.controller.mode().threshold();
        tracing::debug!(target: "engine", ?element, score, threshold, "fragment scored");

        if score < threshold {
            return Decision::Kept;
        }
        if !matches!(
            self.ledger.state(element),
            ConcealmentState::Unseen | ConcealmentState::Visible
        ) {
            return Decision::Skipped;
        }

        {
            let mut document = self.document.lock();
            if !document.contains(element) {
                tracing::debug!(target: "engine", ?element, "element left the page before its score arrived");
                return Decision::Skipped;
            }
            if let Err(err) = conceal(&mut document, element, self.ledger.clone()) {
                tracing::warn!(target: "engine", ?element, error = %err, "could not conceal element");
                return Decision::Skipped;
            }
            document.flush();
        }
        self.ledger.transition(
            element,
            &[ConcealmentState::Unseen, ConcealmentState::Visible],
            ConcealmentState::Concealed,
        );
        tracing::info!(target: "engine", ?element, score, threshold, "blocking content");

        if self.stats.send(OutboundMessage::IncrementStats).is_err() {
            tracing::debug!(target: "engine", "stats recorder is gone; block not counted");
        }
        Decision::Concealed
    }
}

fn conceal(
    document: &mut Document,
    element: NodeId,
    ledger: Arc<ConcealmentLedger>,
) -> Result<(), DomError> {
    document.add_class(element, BLUR_CLASS)?;
    document.set_attribute(element, "title", REVEAL_HINT)?;
    document.on_click_once(
        element,
        Box::new(move |document, element| {
            if let Err(err) = reveal(document, element) {
                tracing::warn!(target: "engine", ?element, error = %err, "reveal failed");
            }
            ledger.transition(
                element,
                &[ConcealmentState::Concealed],
                ConcealmentState::Revealed,
            );
            tracing::info!(target: "engine", ?element, "content revealed");
        }),
    )
}

fn reveal(document: &mut Document, element: NodeId) -> Result<(), DomError> {
    document.remove_class(element, BLUR_CLASS)?;
    document.add_class(element, REVEALED_CLASS)?;
    document.remove_attribute(element, "title")
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::{dom::Document, domain::Mode};

    struct Fixture {
        document: SharedDocument,
        controller: Arc<Controller>,
        ledger: Arc<ConcealmentLedger>,
        engine: ConcealmentEngine,
        stats: mpsc::UnboundedReceiver<OutboundMessage>,
        element: NodeId,
    }

    fn fixture(mode: Mode) -> Fixture {
        let mut document = Document::new();
        let body = document.body();
        let element = document
            .append_html(body, "<p data-testid=\"tweetText\">some text</p>")
            .unwrap()[0];
        let document = Arc::new(Mutex::new(document));
        let controller = Arc::new(Controller::new(true, mode));
        let ledger = Arc::new(ConcealmentLedger::default());
        let (tx, stats) = mpsc::unbounded_channel();
        let engine = ConcealmentEngine::new(document.clone(), controller.clone(), ledger.clone(), tx);
        ledger.mark_visible(element);
        Fixture {
            document,
            controller,
            ledger,
            engine,
            stats,
            element,
        }
    }

    #[test]
    fn conceals_at_or_above_threshold() {
        let cases = [
            (Mode::Medium, 0.75, true),
            (Mode::Strong, 0.55, true),
            (Mode::Light, 0.6, false),
            (Mode::Light, 0.9, true),
            (Mode::Medium, 0.69, false),
            (Mode::Strong, 0.5, true),
        ];
        for (mode, score, concealed) in cases {
            let mut fx = fixture(mode);
            let decision = fx.engine.apply(fx.element, score);
            assert_eq!(
                decision == Decision::Concealed,
                concealed,
                "mode {mode} score {score}"
            );
            assert_eq!(fx.document.lock().has_class(fx.element, BLUR_CLASS), concealed);
            assert_eq!(fx.stats.try_recv().is_ok(), concealed);
        }
    }

    #[test]
    fn medium_block_emits_single_increment() {
        let mut fx = fixture(Mode::Medium);
        assert_eq!(fx.engine.apply(fx.element, 0.75), Decision::Concealed);
        assert_eq!(fx.stats.try_recv().unwrap(), OutboundMessage::IncrementStats);
        assert!(fx.stats.try_recv().is_err());
        assert_eq!(fx.ledger.state(fx.element), ConcealmentState::Concealed);
        assert_eq!(
            fx.document.lock().element(fx.element).unwrap().attr("title"),
            Some(REVEAL_HINT)
        );
    }

    #[test]
    fn reveal_is_one_shot() {
        let fx = fixture(Mode::Strong);
        fx.engine.apply(fx.element, 0.95);

        let mut document = fx.document.lock();
        assert_eq!(document.click(fx.element), Some(fx.element));
        assert!(!document.has_class(fx.element, BLUR_CLASS));
        assert!(document.has_class(fx.element, REVEALED_CLASS));
        assert_eq!(fx.ledger.state(fx.element), ConcealmentState::Revealed);

        assert_eq!(document.click(fx.element), None);
        assert!(document.has_class(fx.element, REVEALED_CLASS));
        assert_eq!(fx.ledger.state(fx.element), ConcealmentState::Revealed);
    }

    #[test]
    fn revealed_elements_are_never_concealed_again() {
        let mut fx = fixture(Mode::Medium);
        fx.engine.apply(fx.element, 0.8);
        fx.document.lock().click(fx.element);
        fx.stats.try_recv().unwrap();

        fx.controller.set_mode(Mode::Strong);
        assert_eq!(fx.engine.apply(fx.element, 0.99), Decision::Skipped);
        assert!(!fx.document.lock().has_class(fx.element, BLUR_CLASS));
        assert!(fx.stats.try_recv().is_err());
    }

    #[test]
    fn non_finite_scores_count_as_zero() {
        let fx = fixture(Mode::Strong);
        assert_eq!(fx.engine.apply(fx.element, f64::NAN), Decision::Kept);
        assert_eq!(fx.ledger.state(fx.element), ConcealmentState::Visible);
        assert_eq!(fx.ledger.summary().visible, 1);
    }

    #[test]
    fn detached_elements_are_not_concealed() {
        let mut fx = fixture(Mode::Medium);
        fx.document.lock().remove(fx.element).unwrap();

        assert_eq!(fx.engine.apply(fx.element, 0.99), Decision::Skipped);
        assert!(!fx.document.lock().has_click_handler(fx.element));
        assert!(fx.stats.try_recv().is_err());
    }

    #[test]
    fn forgotten_elements_leave_the_ledger() {
        let fx = fixture(Mode::Medium);
        fx.engine.apply(fx.element, 0.9);
        assert_eq!(fx.ledger.summary().concealed, 1);

        fx.ledger.forget(&HashSet::from([fx.element]));
        assert_eq!(fx.ledger.state(fx.element), ConcealmentState::Unseen);
        assert_eq!(fx.ledger.summary(), LedgerSummary::default());
    }

    #[test]
    fn mode_changes_only_affect_later_decisions() {
        let fx = fixture(Mode::Light);
        assert_eq!(fx.engine.apply(fx.element, 0.6), Decision::Kept);
        fx.controller.set_mode(Mode::Strong);
        assert_eq!(fx.ledger.state(fx.element), ConcealmentState::Visible);
        assert!(!fx.document.lock().has_class(fx.element, BLUR_CLASS));
    }
}
