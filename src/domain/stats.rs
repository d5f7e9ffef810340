use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Blocked-content counters persisted in the settings store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub blocked_today: u64,
    pub total_blocked: u64,
    pub last_reset: NaiveDate,
}

impl Stats {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            blocked_today: 0,
            total_blocked: 0,
            last_reset: today,
        }
    }

    /// Resets the daily counter when `today` differs from the last reset date.
    /// Returns whether anything changed.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.last_reset == today {
            return false;
        }
        self.blocked_today = 0;
        self.last_reset = today;
        true
    }

    pub fn record_block(&mut self, today: NaiveDate) {
        self.roll_over(today);
        self.blocked_today += 1;
        self.total_blocked += 1;
    }
}
