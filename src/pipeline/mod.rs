pub mod controller;
pub mod engine;
pub mod profile;
pub mod scanner;
pub mod watcher;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    ai::Classifier,
    config::PipelineConfig,
    dom::{Document, SharedDocument},
    domain::OutboundMessage,
    infrastructure::shutdown::ShutdownListener,
    tasks::{processor::AnalysisBatcher, queue::AnalysisQueue},
};

pub use controller::Controller;
pub use engine::{ConcealmentEngine, ConcealmentLedger};
pub use profile::PlatformProfile;
pub use scanner::Scanner;
pub use watcher::MutationWatcher;

/// One page's filter: discovery, batching and concealment wired together.
pub struct Pipeline {
    pub document: SharedDocument,
    pub profile: &'static PlatformProfile,
    pub controller: Arc<Controller>,
    pub ledger: Arc<ConcealmentLedger>,
    pub batcher: Arc<AnalysisBatcher>,
    pub scanner: Arc<Scanner>,
}

impl Pipeline {
    pub fn assemble(
        document: Document,
        profile: &'static PlatformProfile,
        controller: Arc<Controller>,
        classifier: Arc<dyn Classifier>,
        config: &PipelineConfig,
        stats: mpsc::UnboundedSender<OutboundMessage>,
        shutdown: ShutdownListener,
    ) -> Self {
        let document = Arc::new(Mutex::new(document));
        let ledger = Arc::new(ConcealmentLedger::default());
        let engine = Arc::new(ConcealmentEngine::new(
            document.clone(),
            controller.clone(),
            ledger.clone(),
            stats,
        ));
        let batcher = Arc::new(AnalysisBatcher::new(
            Arc::new(AnalysisQueue::new()),
            classifier,
            engine,
            config.clone(),
            shutdown,
        ));
        let scanner = Arc::new(Scanner::new(
            document.clone(),
            profile,
            ledger.clone(),
            batcher.clone(),
            config.min_text_length,
        ));
        Self {
            document,
            profile,
            controller,
            ledger,
            batcher,
            scanner,
        }
    }

    /// Subscribes to the page body and starts the mutation watcher.
    pub fn watch(&self, shutdown: ShutdownListener) -> JoinHandle<()> {
        let mutations = {
            let mut document = self.document.lock();
            let body = document.body();
            document.observe(body)
        };
        MutationWatcher::new(self.scanner.clone(), self.controller.clone()).spawn(mutations, shutdown)
    }
}
