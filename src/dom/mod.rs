pub mod document;
pub mod mutation;

use std::sync::Arc;

use parking_lot::Mutex;

pub use document::{DomError, Document};
pub use ego_tree::NodeId;
pub use mutation::{MutationBatch, MutationReceiver, MutationRecord};
pub use scraper::Selector;

/// The page shared between the host and the filter pipeline.
pub type SharedDocument = Arc<Mutex<Document>>;
