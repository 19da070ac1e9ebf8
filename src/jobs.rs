use std::sync::mpsc::Sender;

use crate::archive::ArchiveLedger;
use crate::config::OrchestratorConfig;
use crate::events::{emit, CancelFlag, DecisionPrompt, NoticeKind, RunEvent};
use crate::models::{
    DownloadMode, ExtractSpec, ItemDescriptor, JobOutcome, JobRequest, MediaExtractor,
    Postprocess, ProgressUpdate, RunSummary,
};
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::runlog::RunLog;
use crate::sanitize;
use crate::{EngineError, Result};

pub const ITEM_OUTPUT_TEMPLATE: &str = "%(playlist_index|NA)s - %(title)s.%(ext)s";
pub const CAPTIONS_OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";
pub const CAPTIONS_SUBDIR: &str = "captions";
const DEFAULT_FORMAT_SELECTOR: &str = "best";

/// Drives one submitted request to completion.
///
/// Sequential by design: one item in flight at a time, so ledger appends and
/// directory creation need no locking, and a blocking decision suspends the
/// whole run at that exact point. Long-running; callers keep it off the
/// presentation thread and talk to it only through the event channel, the
/// decision prompt, and the cancel flag.
pub struct Orchestrator<'a> {
    pub extractor: &'a dyn MediaExtractor,
    pub decisions: &'a dyn DecisionPrompt,
    pub events: Sender<RunEvent>,
    pub cancel: CancelFlag,
    pub config: OrchestratorConfig,
    pub log: RunLog,
}

enum ItemResult {
    Outcome(JobOutcome),
    Canceled,
}

impl Orchestrator<'_> {
    /// Runs the request against the previously fetched batch. Returns an
    /// error only for setup failures before any item is attempted; item
    /// failures are counted, never propagated.
    pub fn run(&self, request: &JobRequest, items: &[ItemDescriptor]) -> Result<RunSummary> {
        std::fs::create_dir_all(&request.destination_root).map_err(|e| {
            EngineError::Destination {
                path: request.destination_root.clone(),
                message: e.to_string(),
            }
        })?;

        self.log.append(
            "info",
            "run_started",
            serde_json::json!({
                "mode": request.mode.as_str(),
                "selected": request.selected,
                "destination": request.destination_root.to_string_lossy(),
                "use_archive": request.use_archive,
            }),
        );

        let summary = match request.mode {
            DownloadMode::Captions => self.run_captions(request),
            DownloadMode::Video | DownloadMode::Audio => self.run_items(request, items),
        };

        self.log.append("info", "run_finished", serde_json::json!(summary));
        emit(&self.events, RunEvent::Finished(summary));
        Ok(summary)
    }

    /// Captions are one call for the whole URL: no per-item loop, no
    /// archive, no escalation, one terminal notice.
    fn run_captions(&self, request: &JobRequest) -> RunSummary {
        let target_dir = request.destination_root.join(CAPTIONS_SUBDIR);
        if let Err(err) = std::fs::create_dir_all(&target_dir) {
            self.log.append(
                "error",
                "captions_dir_failed",
                serde_json::json!({
                    "dir": target_dir.to_string_lossy(),
                    "error": err.to_string(),
                }),
            );
            emit(
                &self.events,
                RunEvent::Notice {
                    kind: NoticeKind::Error,
                    text: format!("Cannot create {}: {err}", target_dir.display()),
                },
            );
            return RunSummary::default();
        }

        let spec = ExtractSpec {
            url: request.url.clone(),
            playlist_item: None,
            format_selector: None,
            output_dir: target_dir.clone(),
            output_template: CAPTIONS_OUTPUT_TEMPLATE.to_string(),
            archive_file: None,
            credential_path: request.credential_path.clone(),
            postprocess: Postprocess::CaptionsOnly {
                language: request.caption_language.clone(),
            },
        };

        let events = &self.events;
        let mut on_progress = |update: ProgressUpdate| forward_progress(events, update);
        match self.extractor.extract(&spec, &self.cancel, &mut on_progress) {
            Ok(()) => {
                self.log.append(
                    "info",
                    "captions_saved",
                    serde_json::json!({ "dir": target_dir.to_string_lossy() }),
                );
                emit(
                    events,
                    RunEvent::Notice {
                        kind: NoticeKind::Info,
                        text: format!("Captions saved to: {}", target_dir.display()),
                    },
                );
            }
            Err(err) => {
                self.log.append(
                    "error",
                    "captions_failed",
                    serde_json::json!({ "error": err.to_string() }),
                );
                emit(
                    events,
                    RunEvent::Notice {
                        kind: NoticeKind::Error,
                        text: format!("Caption fetch failed: {err}"),
                    },
                );
            }
        }
        RunSummary::default()
    }

    fn run_items(&self, request: &JobRequest, items: &[ItemDescriptor]) -> RunSummary {
        let ledger = ArchiveLedger::for_destination(&request.destination_root);
        let retry = RetryPolicy {
            attempts_per_round: self.config.attempts_per_round,
            max_rounds: self.config.max_escalation_rounds,
        };

        let total = request.selected.len() as u32;
        let mut summary = RunSummary {
            total,
            ..Default::default()
        };
        self.emit_counts(&summary);

        for (position, &index) in request.selected.iter().enumerate() {
            if self.cancel.is_canceled() {
                self.notice_canceled(index);
                return summary;
            }

            match self.run_one(request, items, &ledger, &retry, position + 1, index, total) {
                ItemResult::Outcome(JobOutcome::Succeeded) => summary.succeeded += 1,
                ItemResult::Outcome(JobOutcome::SkippedAlreadyArchived) => summary.skipped += 1,
                ItemResult::Outcome(JobOutcome::FailedPermanently) => summary.failed += 1,
                ItemResult::Canceled => {
                    self.notice_canceled(index);
                    return summary;
                }
            }
            self.emit_counts(&summary);
        }

        if summary.failed == 0 {
            emit(
                &self.events,
                RunEvent::Notice {
                    kind: NoticeKind::Info,
                    text: format!(
                        "All {} item(s) downloaded successfully.",
                        summary.succeeded
                    ),
                },
            );
        } else {
            emit(
                &self.events,
                RunEvent::Notice {
                    kind: NoticeKind::Warn,
                    text: format!(
                        "Downloaded {} with {} error(s). See the run log at {}.",
                        summary.succeeded,
                        summary.failed,
                        self.log.path().display()
                    ),
                },
            );
        }
        summary
    }

    fn run_one(
        &self,
        request: &JobRequest,
        items: &[ItemDescriptor],
        ledger: &ArchiveLedger,
        retry: &RetryPolicy,
        position: usize,
        index: u32,
        total: u32,
    ) -> ItemResult {
        let Some(item) = items.iter().find(|it| it.sequence_index == index) else {
            // A stale selection fails this item only; the batch moves on.
            let err = EngineError::StaleSelection {
                index,
                total: items.len(),
            };
            self.log.append(
                "error",
                "item_not_in_batch",
                serde_json::json!({ "index": index, "batch_len": items.len() }),
            );
            emit(&self.events, RunEvent::Progress(format!("{err}")));
            return ItemResult::Outcome(JobOutcome::FailedPermanently);
        };

        let dir_name = sanitize::collection_dir_name(item.collection_name.as_deref());
        let target_dir = request.destination_root.join(&dir_name);
        if let Err(err) = std::fs::create_dir_all(&target_dir) {
            self.log.append(
                "error",
                "target_dir_failed",
                serde_json::json!({
                    "dir": target_dir.to_string_lossy(),
                    "error": err.to_string(),
                }),
            );
            emit(
                &self.events,
                RunEvent::Progress(format!("Cannot create {}", target_dir.display())),
            );
            return ItemResult::Outcome(JobOutcome::FailedPermanently);
        }

        let mut archive_for_item = request.use_archive;
        if archive_for_item && !item.stable_id.is_empty() && ledger.contains(&item.stable_id) {
            if self.decisions.confirm_redownload(&item.title) {
                // One-shot override: the redundant success is not re-recorded.
                archive_for_item = false;
                self.log.append(
                    "info",
                    "redownload_confirmed",
                    serde_json::json!({ "id": item.stable_id, "title": item.title }),
                );
            } else {
                self.log.append(
                    "info",
                    "item_skipped_archived",
                    serde_json::json!({ "id": item.stable_id, "title": item.title }),
                );
                emit(
                    &self.events,
                    RunEvent::Progress(format!("Skipped (already downloaded): {}", item.title)),
                );
                return ItemResult::Outcome(JobOutcome::SkippedAlreadyArchived);
            }
        }

        let format_selector = match &request.format_selector {
            Some(f) if !f.trim().is_empty() => Some(f.clone()),
            _ => Some(DEFAULT_FORMAT_SELECTOR.to_string()),
        };

        let spec = ExtractSpec {
            url: request.url.clone(),
            playlist_item: Some(index),
            format_selector,
            output_dir: target_dir,
            output_template: ITEM_OUTPUT_TEMPLATE.to_string(),
            archive_file: archive_for_item.then(|| ledger.path().to_path_buf()),
            credential_path: request.credential_path.clone(),
            postprocess: match request.mode {
                DownloadMode::Audio => Postprocess::ExtractMp3,
                _ => Postprocess::RemuxMkv,
            },
        };

        emit(
            &self.events,
            RunEvent::Progress(format!("Starting item {position}/{total}")),
        );
        self.log.append(
            "info",
            "item_started",
            serde_json::json!({ "index": index, "title": item.title }),
        );

        let events = &self.events;
        let outcome = retry.run(
            &item.title,
            &self.cancel,
            events,
            self.decisions,
            &self.log,
            || {
                let mut on_progress = |update: ProgressUpdate| forward_progress(events, update);
                self.extractor.extract(&spec, &self.cancel, &mut on_progress)
            },
        );

        match outcome {
            RetryOutcome::Succeeded => {
                self.log.append(
                    "info",
                    "item_succeeded",
                    serde_json::json!({ "index": index, "title": item.title }),
                );
                ItemResult::Outcome(JobOutcome::Succeeded)
            }
            RetryOutcome::FailedPermanently => {
                self.log.append(
                    "error",
                    "item_failed",
                    serde_json::json!({ "index": index, "title": item.title }),
                );
                ItemResult::Outcome(JobOutcome::FailedPermanently)
            }
            RetryOutcome::Canceled => ItemResult::Canceled,
        }
    }

    fn emit_counts(&self, summary: &RunSummary) {
        emit(
            &self.events,
            RunEvent::Counts {
                succeeded: summary.succeeded,
                failed: summary.failed,
                skipped: summary.skipped,
                total: summary.total,
            },
        );
    }

    fn notice_canceled(&self, at_index: u32) {
        self.log.append(
            "info",
            "run_canceled",
            serde_json::json!({ "at_item": at_index }),
        );
        emit(
            &self.events,
            RunEvent::Notice {
                kind: NoticeKind::Warn,
                text: "Run canceled.".to_string(),
            },
        );
    }
}

fn forward_progress(events: &Sender<RunEvent>, update: ProgressUpdate) {
    match update {
        ProgressUpdate::Downloading { percent } => {
            emit(events, RunEvent::Progress(format!("Downloading: {percent}")));
        }
        ProgressUpdate::Finished { filename } => {
            let name = filename.unwrap_or_default();
            emit(events, RunEvent::Progress(format!("Finished: {name}")));
        }
    }
}
