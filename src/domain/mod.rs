pub mod messages;
pub mod mode;
pub mod stats;
pub mod types;

pub use messages::{ControlMessage, OutboundMessage};
pub use mode::Mode;
pub use stats::Stats;
pub use types::{ConcealmentState, QueueItem, QueueSnapshot};
