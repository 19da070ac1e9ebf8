use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::models::RunSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Warn,
    Error,
}

/// Typed progress stream out of a run. The presentation layer owns the
/// receiving end of the channel and drains it on its own scheduling turn;
/// nothing here ever calls back into it directly.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Progress(String),
    Counts {
        succeeded: u32,
        failed: u32,
        skipped: u32,
        total: u32,
    },
    Notice {
        kind: NoticeKind,
        text: String,
    },
    Finished(RunSummary),
}

/// Cooperative cancellation shared between a run and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Blocking questions a run needs answered before it can continue. The run
/// suspends at the call site until the answer arrives.
pub trait DecisionPrompt {
    /// Item is already in the ledger: `true` re-downloads it, `false` skips.
    fn confirm_redownload(&self, title: &str) -> bool;

    /// Attempt budget exhausted: `true` grants another round of attempts.
    fn grant_more_attempts(&self, title: &str, attempts_made: u32) -> bool;
}

// A disconnected receiver means the caller stopped listening; the run still
// finishes and the log keeps the record.
pub(crate) fn emit(events: &Sender<RunEvent>, event: RunEvent) {
    let _ = events.send(event);
}
