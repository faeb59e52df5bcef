//! Balance refresh pipeline
//!
//! One cycle at a time walks every chain wallet, then every exchange account,
//! persisting each result as soon as it lands and broadcasting progress.

pub mod events;
pub mod orchestrator;
pub mod source;

pub use events::{CycleReport, StartOutcome, UpdateEvent};
pub use orchestrator::{check_required_settings, Orchestrator, Screenshots};
pub use source::{BalanceSource, LiveBalanceSource};
