use std::sync::mpsc::Sender;

use crate::events::{emit, CancelFlag, DecisionPrompt, RunEvent};
use crate::runlog::RunLog;
use crate::Result;

pub const ATTEMPTS_PER_ROUND: u32 = 5;

/// Bounded-attempt policy around one fallible operation.
///
/// Each round allows `attempts_per_round` immediate retries (no backoff;
/// the faults this absorbs are transient extractor/network hiccups, not rate
/// limits). Exhausting a round asks the decision prompt whether to grant
/// another one. `max_rounds` caps how many rounds may be granted in total;
/// `None` keeps asking for as long as the answer is yes, with every grant
/// logged so a retry storm stays visible.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts_per_round: u32,
    pub max_rounds: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts_per_round: ATTEMPTS_PER_ROUND,
            max_rounds: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Succeeded,
    FailedPermanently,
    Canceled,
}

impl RetryPolicy {
    pub fn run(
        &self,
        title: &str,
        cancel: &CancelFlag,
        events: &Sender<RunEvent>,
        decisions: &dyn DecisionPrompt,
        log: &RunLog,
        mut operation: impl FnMut() -> Result<()>,
    ) -> RetryOutcome {
        let attempts_per_round = self.attempts_per_round.max(1);
        let mut attempts = 0u32;
        let mut rounds_granted = 0u32;

        loop {
            if cancel.is_canceled() {
                log.append(
                    "info",
                    "attempt_canceled",
                    serde_json::json!({ "title": title }),
                );
                return RetryOutcome::Canceled;
            }

            match operation() {
                Ok(()) => return RetryOutcome::Succeeded,
                Err(err) => {
                    attempts += 1;
                    log.append(
                        "error",
                        "attempt_failed",
                        serde_json::json!({
                            "title": title,
                            "attempt": attempts,
                            "of": attempts_per_round,
                            "error": err.to_string(),
                        }),
                    );
                    emit(
                        events,
                        RunEvent::Progress(format!(
                            "Error (attempt {attempts}/{attempts_per_round})"
                        )),
                    );

                    if attempts < attempts_per_round {
                        continue;
                    }

                    if let Some(max_rounds) = self.max_rounds {
                        if rounds_granted >= max_rounds {
                            log.append(
                                "error",
                                "retry_budget_exhausted",
                                serde_json::json!({
                                    "title": title,
                                    "rounds_granted": rounds_granted,
                                }),
                            );
                            return RetryOutcome::FailedPermanently;
                        }
                    }

                    if decisions.grant_more_attempts(title, attempts) {
                        rounds_granted += 1;
                        attempts = 0;
                        log.append(
                            "info",
                            "retry_round_granted",
                            serde_json::json!({
                                "title": title,
                                "round": rounds_granted,
                            }),
                        );
                        continue;
                    }

                    return RetryOutcome::FailedPermanently;
                }
            }
        }
    }
}
