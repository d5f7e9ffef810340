use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{stream::FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::time::sleep;

use crate::{
    ai::Classifier,
    config::PipelineConfig,
    domain::{QueueItem, QueueSnapshot},
    infrastructure::shutdown::ShutdownListener,
    pipeline::engine::ConcealmentEngine,
    tasks::queue::AnalysisQueue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatcherState {
    Idle,
    Draining,
}

/// Drains the analysis queue in fixed-size batches, at most one batch per
/// pacing interval. The interval runs from dispatch, so it bounds the
/// outbound request rate without waiting for slow calls to finish.
pub struct AnalysisBatcher {
    queue: Arc<AnalysisQueue<QueueItem>>,
    classifier: Arc<dyn Classifier>,
    engine: Arc<ConcealmentEngine>,
    batch_size: usize,
    batch_delay: Duration,
    state: Mutex<BatcherState>,
    in_flight: AtomicUsize,
    shutdown: ShutdownListener,
}

impl AnalysisBatcher {
    pub fn new(
        queue: Arc<AnalysisQueue<QueueItem>>,
        classifier: Arc<dyn Classifier>,
        engine: Arc<ConcealmentEngine>,
        config: PipelineConfig,
        shutdown: ShutdownListener,
    ) -> Self {
        Self {
            queue,
            classifier,
            engine,
            batch_size: config.batch_size,
            batch_delay: config.batch_delay,
            state: Mutex::new(BatcherState::Idle),
            in_flight: AtomicUsize::new(0),
            shutdown,
        }
    }

    /// Queues everything one scan found, then drains once, so a scan's first
    /// batch is filled before it leaves.
    pub fn enqueue_all(self: &Arc<Self>, items: impl IntoIterator<Item = QueueItem>) {
        let mut queued = 0;
        for item in items {
            self.queue.push(item);
            queued += 1;
        }
        if queued > 0 {
            self.try_drain();
        }
    }

    /// Dispatches the next batch if idle. Returns how many items went out.
    pub fn try_drain(self: &Arc<Self>) -> usize {
        if self.shutdown.is_triggered() {
            return 0;
        }

        let batch = {
            let mut state = self.state.lock();
            if *state == BatcherState::Draining {
                return 0;
            }
            let batch = self.queue.take_batch(self.batch_size);
            if batch.is_empty() {
                return 0;
            }
            *state = BatcherState::Draining;
            batch
        };

        let dispatched = batch.len();
        tracing::debug!(
            target: "queue",
            dispatched,
            remaining = self.queue.len(),
            "dispatching batch"
        );
        self.dispatch(batch);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            sleep(this.batch_delay).await;
            *this.state.lock() = BatcherState::Idle;
            this.try_drain();
        });
        dispatched
    }

    fn dispatch(self: &Arc<Self>, batch: Vec<QueueItem>) {
        self.in_flight.fetch_add(batch.len(), Ordering::SeqCst);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut pending: FuturesUnordered<_> = batch
                .into_iter()
                .map(|item| {
                    let classifier = this.classifier.clone();
                    async move {
                        let result = classifier.score(&item.text).await;
                        (item, result)
                    }
                })
                .collect();

            // Results are applied in completion order.
            while let Some((item, result)) = pending.next().await {
                match result {
                    Ok(score) => {
                        this.engine.apply(item.element, score);
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: "queue",
                            element = ?item.element,
                            error = %err,
                            "analysis failed; fragment left as is"
                        );
                    }
                }
                this.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        });
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            pending: self.queue.len(),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            draining: *self.state.lock() == BatcherState::Draining,
        }
    }

    /// No queued fragments and no outstanding classification calls.
    pub fn is_settled(&self) -> bool {
        self.queue.is_empty() && self.in_flight.load(Ordering::SeqCst) == 0
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        ai::ClassifierError,
        dom::{Document, NodeId, SharedDocument},
        domain::{ConcealmentState, Mode, OutboundMessage},
        infrastructure::shutdown::Shutdown,
        pipeline::{
            controller::Controller,
            engine::{ConcealmentLedger, BLUR_CLASS},
        },
    };

    /// Scores by prefix: `toxic` → 0.95, `fail` → error, anything else → 0.1.
    /// Texts starting with `slow` take five seconds.
    #[derive(Default)]
    struct ScriptedClassifier {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Classifier for ScriptedClassifier {
        async fn score(&self, text: &str) -> Result<f64, ClassifierError> {
            self.calls.lock().push(text.to_string());
            if text.starts_with("slow") {
                sleep(Duration::from_secs(5)).await;
            }
            if text.starts_with("fail") {
                return Err(ClassifierError::Remote("quota exceeded".to_string()));
            }
            Ok(if text.contains("toxic") { 0.95 } else { 0.1 })
        }
    }

    struct Fixture {
        document: SharedDocument,
        ledger: Arc<ConcealmentLedger>,
        classifier: Arc<ScriptedClassifier>,
        queue: Arc<AnalysisQueue<QueueItem>>,
        batcher: Arc<AnalysisBatcher>,
        stats: mpsc::UnboundedReceiver<OutboundMessage>,
        shutdown: Shutdown,
    }

    impl Fixture {
        fn new() -> Self {
            let document = Arc::new(Mutex::new(Document::new()));
            let ledger = Arc::new(ConcealmentLedger::default());
            let (tx, stats) = mpsc::unbounded_channel();
            let engine = Arc::new(ConcealmentEngine::new(
                document.clone(),
                Arc::new(Controller::new(true, Mode::Medium)),
                ledger.clone(),
                tx,
            ));
            let classifier = Arc::new(ScriptedClassifier::default());
            let queue = Arc::new(AnalysisQueue::new());
            let (shutdown, _) = Shutdown::new();
            let batcher = Arc::new(AnalysisBatcher::new(
                queue.clone(),
                classifier.clone(),
                engine,
                PipelineConfig::default(),
                shutdown.subscribe(),
            ));
            Self {
                document,
                ledger,
                classifier,
                queue,
                batcher,
                stats,
                shutdown,
            }
        }

        /// Appends one paragraph per text and queues them the way a scan does.
        fn enqueue_all(&self, texts: &[&str]) -> Vec<NodeId> {
            let items: Vec<QueueItem> = {
                let mut document = self.document.lock();
                let body = document.body();
                texts
                    .iter()
                    .map(|text| {
                        let element = document
                            .append_html(body, &format!("<p>{text}</p>"))
                            .unwrap()[0];
                        QueueItem {
                            element,
                            text: text.to_string(),
                        }
                    })
                    .collect()
            };
            for item in &items {
                self.ledger.mark_visible(item.element);
            }
            let elements = items.iter().map(|item| item.element).collect();
            self.batcher.enqueue_all(items);
            elements
        }

        fn calls(&self) -> Vec<String> {
            self.classifier.calls.lock().clone()
        }
    }

    async fn advance(millis: u64) {
        sleep(Duration::from_millis(millis)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn twelve_fragments_drain_in_paced_batches() {
        let fx = Fixture::new();
        let texts: Vec<String> = (0..12).map(|n| format!("fragment {n}")).collect();
        let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
        fx.enqueue_all(&texts);
        assert_eq!(fx.queue.len(), 7, "first five leave immediately");
        assert!(fx.batcher.snapshot().draining);

        advance(10).await;
        let expected: Vec<String> = (0..5).map(|n| format!("fragment {n}")).collect();
        let mut calls = fx.calls();
        calls.sort();
        assert_eq!(calls, expected);

        advance(980).await;
        assert_eq!(fx.calls().len(), 5, "held until the pacing delay elapses");
        assert_eq!(fx.queue.len(), 7);

        advance(20).await;
        assert_eq!(fx.calls().len(), 10);
        assert_eq!(fx.queue.len(), 2);

        advance(1_000).await;
        assert_eq!(fx.calls().len(), 12);
        assert!(fx.queue.is_empty());
        assert!(fx.batcher.is_settled());

        advance(1_000).await;
        assert!(!fx.batcher.snapshot().draining);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_items_do_not_stall_the_batcher() {
        let mut fx = Fixture::new();
        let elements = fx.enqueue_all(&[
            "fail 0",
            "fail 1",
            "fail 2",
            "fail 3",
            "fail 4",
            "toxic remark",
        ]);
        let toxic = elements[5];

        advance(10).await;
        assert_eq!(fx.calls().len(), 5);
        assert_eq!(fx.ledger.state(toxic), ConcealmentState::Visible);

        advance(1_000).await;
        assert_eq!(fx.ledger.state(toxic), ConcealmentState::Concealed);
        assert!(fx.document.lock().has_class(toxic, BLUR_CLASS));
        assert_eq!(fx.stats.try_recv().unwrap(), OutboundMessage::IncrementStats);
        assert!(fx.batcher.is_settled());
    }

    #[tokio::test(start_paused = true)]
    async fn results_apply_without_waiting_for_the_batch() {
        let fx = Fixture::new();
        let elements = fx.enqueue_all(&[
            "slow toxic",
            "toxic and quick",
            "filler 0",
            "filler 1",
            "filler 2",
            "filler 3",
        ]);
        let (slow, fast) = (elements[0], elements[1]);

        advance(10).await;
        assert_eq!(fx.ledger.state(fast), ConcealmentState::Concealed);
        assert_eq!(fx.ledger.state(slow), ConcealmentState::Visible);
        assert_eq!(fx.batcher.snapshot().in_flight, 1);

        // Pacing does not wait for the slow call: the next batch overlaps it.
        advance(1_000).await;
        assert!(fx.calls().contains(&"filler 3".to_string()));
        assert_eq!(fx.ledger.state(slow), ConcealmentState::Visible);

        advance(5_000).await;
        assert_eq!(fx.ledger.state(slow), ConcealmentState::Concealed);
        assert!(fx.batcher.is_settled());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_batcher_with_empty_queue_stays_idle() {
        let fx = Fixture::new();
        assert_eq!(fx.batcher.try_drain(), 0);
        assert_eq!(fx.batcher.snapshot(), QueueSnapshot::default());

        fx.enqueue_all(&["hello there"]);
        advance(10).await;
        assert_eq!(fx.calls(), vec!["hello there".to_string()]);

        // An empty scan does not start a pacing window.
        advance(2_000).await;
        fx.batcher.enqueue_all(Vec::<QueueItem>::new());
        assert!(!fx.batcher.snapshot().draining);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_scans_share_the_pacing_window() {
        let fx = Fixture::new();
        fx.enqueue_all(&["early one", "early two"]);
        fx.enqueue_all(&["late one", "late two", "late three"]);
        assert_eq!(fx.queue.len(), 3, "the second scan waits for the window");

        advance(10).await;
        assert_eq!(fx.calls().len(), 2);

        advance(1_000).await;
        assert_eq!(fx.calls().len(), 5);
        assert!(fx.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_new_dispatches() {
        let fx = Fixture::new();
        fx.shutdown.trigger();
        fx.enqueue_all(&["never sent"]);
        advance(10).await;
        assert!(fx.calls().is_empty());
        assert_eq!(fx.queue.len(), 1);
    }
}
