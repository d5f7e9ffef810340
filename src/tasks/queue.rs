use std::collections::VecDeque;

use parking_lot::Mutex;

/// Unbounded FIFO of fragments awaiting analysis.
#[derive(Debug)]
pub struct AnalysisQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> Default for AnalysisQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AnalysisQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, value: T) {
        self.items.lock().push_back(value);
    }

    /// Removes up to `max` items from the front.
    pub fn take_batch(&self, max: usize) -> Vec<T> {
        let mut items = self.items.lock();
        let count = max.min(items.len());
        items.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
