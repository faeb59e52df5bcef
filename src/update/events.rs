//! Progress notifications emitted during an update cycle

use serde::Serialize;

/// Broadcast to every subscriber while a cycle runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateEvent {
    /// Item `current` of `total` is being fetched
    UpdateStatus { current: usize, total: usize },
    /// Seconds left before the next screenshot is taken
    Countdown { remaining: u64 },
    /// The persisted wallet list changed
    RefreshData,
    UpdateComplete,
}

/// Result of asking for a background cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    Busy,
}

/// Per-cycle tallies
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Exchange phase skipped because credentials were unreadable
    pub cex_skipped: bool,
    /// Portfolio total recorded in the history snapshot
    pub total_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_names() {
        let status = serde_json::to_value(UpdateEvent::UpdateStatus { current: 1, total: 3 }).unwrap();
        assert_eq!(status["type"], "UPDATE_STATUS");
        assert_eq!(status["total"], 3);

        let done = serde_json::to_value(UpdateEvent::UpdateComplete).unwrap();
        assert_eq!(done["type"], "UPDATE_COMPLETE");
    }
}
