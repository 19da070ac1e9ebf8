use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::mpsc::channel;

use praeda_engine::archive::ARCHIVE_FILE_NAME;
use praeda_engine::config::OrchestratorConfig;
use praeda_engine::events::{CancelFlag, DecisionPrompt, NoticeKind, RunEvent};
use praeda_engine::jobs::{Orchestrator, CAPTIONS_SUBDIR};
use praeda_engine::models::{
    DownloadMode, ExtractSpec, ItemDescriptor, JobRequest, MediaExtractor, Postprocess,
    ProgressUpdate, RunSummary,
};
use praeda_engine::paths::AppPaths;
use praeda_engine::runlog::RunLog;
use praeda_engine::{EngineError, Result};

#[derive(Default)]
struct ScriptedExtractor {
    // One entry per upcoming call: `true` fails it. Exhausted = succeed.
    failures: RefCell<VecDeque<bool>>,
    calls: RefCell<Vec<ExtractSpec>>,
}

impl ScriptedExtractor {
    fn failing_first(n: usize) -> Self {
        Self {
            failures: RefCell::new(std::iter::repeat(true).take(n).collect()),
            calls: RefCell::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl MediaExtractor for ScriptedExtractor {
    fn extract(
        &self,
        spec: &ExtractSpec,
        _cancel: &CancelFlag,
        progress: &mut dyn FnMut(ProgressUpdate),
    ) -> Result<()> {
        self.calls.borrow_mut().push(spec.clone());
        let fail = self.failures.borrow_mut().pop_front().unwrap_or(false);
        if fail {
            return Err(EngineError::ExternalToolFailed {
                tool: "yt-dlp".to_string(),
                code: Some(1),
                stderr: "network glitch".to_string(),
            });
        }
        progress(ProgressUpdate::Downloading {
            percent: "100.0%".to_string(),
        });
        progress(ProgressUpdate::Finished {
            filename: Some("01 - clip.mkv".to_string()),
        });
        Ok(())
    }
}

struct ScriptedPrompt {
    redownload: bool,
    grants: RefCell<VecDeque<bool>>,
    redownload_asked: Cell<u32>,
    escalations_asked: Cell<u32>,
}

impl ScriptedPrompt {
    fn new(redownload: bool, grants: &[bool]) -> Self {
        Self {
            redownload,
            grants: RefCell::new(grants.iter().copied().collect()),
            redownload_asked: Cell::new(0),
            escalations_asked: Cell::new(0),
        }
    }
}

impl DecisionPrompt for ScriptedPrompt {
    fn confirm_redownload(&self, _title: &str) -> bool {
        self.redownload_asked.set(self.redownload_asked.get() + 1);
        self.redownload
    }

    fn grant_more_attempts(&self, _title: &str, _attempts_made: u32) -> bool {
        self.escalations_asked
            .set(self.escalations_asked.get() + 1);
        self.grants.borrow_mut().pop_front().unwrap_or(false)
    }
}

fn batch(n: u32) -> Vec<ItemDescriptor> {
    (1..=n)
        .map(|i| ItemDescriptor {
            stable_id: format!("vid{i:03}"),
            title: format!("Clip {i}"),
            collection_name: Some("Road Mix: Vol 1".to_string()),
            sequence_index: i,
        })
        .collect()
}

fn request(destination: &Path, selected: Vec<u32>) -> JobRequest {
    JobRequest {
        url: "https://www.youtube.com/playlist?list=PLx".to_string(),
        mode: DownloadMode::Video,
        selected,
        format_selector: None,
        destination_root: destination.to_path_buf(),
        credential_path: None,
        use_archive: true,
        caption_language: "en".to_string(),
    }
}

fn run(
    extractor: &ScriptedExtractor,
    prompt: &ScriptedPrompt,
    req: &JobRequest,
    items: &[ItemDescriptor],
    cancel: CancelFlag,
) -> (RunSummary, Vec<RunEvent>) {
    let state_dir = tempfile::tempdir().expect("state dir");
    let paths = AppPaths::new(state_dir.path().to_path_buf());
    let (tx, rx) = channel();

    let orchestrator = Orchestrator {
        extractor,
        decisions: prompt,
        events: tx,
        cancel,
        config: OrchestratorConfig::default(),
        log: RunLog::create(&paths).expect("runlog"),
    };
    let summary = orchestrator.run(req, items).expect("run");
    drop(orchestrator);

    (summary, rx.try_iter().collect())
}

fn notices(events: &[RunEvent]) -> Vec<(NoticeKind, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            RunEvent::Notice { kind, text } => Some((*kind, text.clone())),
            _ => None,
        })
        .collect()
}

fn last_counts(events: &[RunEvent]) -> Option<(u32, u32, u32, u32)> {
    events
        .iter()
        .rev()
        .find_map(|event| match event {
            RunEvent::Counts {
                succeeded,
                failed,
                skipped,
                total,
            } => Some((*succeeded, *failed, *skipped, *total)),
            _ => None,
        })
}

#[test]
fn clean_batch_counts_every_item_as_succeeded() {
    let dest = tempfile::tempdir().expect("dest");
    let extractor = ScriptedExtractor::default();
    let prompt = ScriptedPrompt::new(false, &[]);

    let (summary, events) = run(
        &extractor,
        &prompt,
        &request(dest.path(), vec![1, 2, 3]),
        &batch(3),
        CancelFlag::new(),
    );

    assert_eq!(
        summary,
        RunSummary {
            succeeded: 3,
            failed: 0,
            skipped: 0,
            total: 3
        }
    );
    assert_eq!(extractor.call_count(), 3);
    assert_eq!(prompt.escalations_asked.get(), 0);
    assert_eq!(last_counts(&events), Some((3, 0, 0, 3)));
    assert!(events
        .iter()
        .any(|event| matches!(event, RunEvent::Finished(s) if *s == summary)));
    assert!(notices(&events)
        .iter()
        .any(|(kind, text)| *kind == NoticeKind::Info
            && text == "All 3 item(s) downloaded successfully."));
}

#[test]
fn collection_name_is_sanitized_into_the_output_dir() {
    let dest = tempfile::tempdir().expect("dest");
    let extractor = ScriptedExtractor::default();
    let prompt = ScriptedPrompt::new(false, &[]);

    run(
        &extractor,
        &prompt,
        &request(dest.path(), vec![1]),
        &batch(1),
        CancelFlag::new(),
    );

    let expected_dir = dest.path().join("Road Mix_ Vol 1");
    assert!(expected_dir.is_dir());

    let calls = extractor.calls.borrow();
    assert_eq!(calls[0].output_dir, expected_dir);
    assert_eq!(calls[0].playlist_item, Some(1));
    assert_eq!(
        calls[0].archive_file.as_deref(),
        Some(dest.path().join(ARCHIVE_FILE_NAME).as_path())
    );
    assert_eq!(calls[0].postprocess, Postprocess::RemuxMkv);
}

#[test]
fn audio_mode_requests_mp3_extraction() {
    let dest = tempfile::tempdir().expect("dest");
    let extractor = ScriptedExtractor::default();
    let prompt = ScriptedPrompt::new(false, &[]);

    let mut req = request(dest.path(), vec![1]);
    req.mode = DownloadMode::Audio;
    run(&extractor, &prompt, &req, &batch(1), CancelFlag::new());

    let calls = extractor.calls.borrow();
    assert_eq!(calls[0].postprocess, Postprocess::ExtractMp3);
}

#[test]
fn declined_escalation_fails_the_item_after_five_attempts() {
    let dest = tempfile::tempdir().expect("dest");
    let extractor = ScriptedExtractor::failing_first(5);
    let prompt = ScriptedPrompt::new(false, &[false]);

    let (summary, events) = run(
        &extractor,
        &prompt,
        &request(dest.path(), vec![1]),
        &batch(1),
        CancelFlag::new(),
    );

    assert_eq!(
        summary,
        RunSummary {
            succeeded: 0,
            failed: 1,
            skipped: 0,
            total: 1
        }
    );
    assert_eq!(extractor.call_count(), 5);
    assert_eq!(prompt.escalations_asked.get(), 1);
    assert!(notices(&events)
        .iter()
        .any(|(kind, text)| *kind == NoticeKind::Warn && text.contains("1 error(s)")));
}

#[test]
fn granted_escalation_runs_a_sixth_attempt() {
    let dest = tempfile::tempdir().expect("dest");
    let extractor = ScriptedExtractor::failing_first(5);
    let prompt = ScriptedPrompt::new(false, &[true]);

    let (summary, _events) = run(
        &extractor,
        &prompt,
        &request(dest.path(), vec![1]),
        &batch(1),
        CancelFlag::new(),
    );

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(extractor.call_count(), 6);
    assert_eq!(prompt.escalations_asked.get(), 1);
}

#[test]
fn stale_index_fails_that_item_and_the_batch_continues() {
    let dest = tempfile::tempdir().expect("dest");
    let extractor = ScriptedExtractor::default();
    let prompt = ScriptedPrompt::new(false, &[]);

    let (summary, _events) = run(
        &extractor,
        &prompt,
        &request(dest.path(), vec![1, 99, 3]),
        &batch(3),
        CancelFlag::new(),
    );

    assert_eq!(
        summary,
        RunSummary {
            succeeded: 2,
            failed: 1,
            skipped: 0,
            total: 3
        }
    );
    assert_eq!(extractor.call_count(), 2);
}

#[test]
fn archived_item_is_skipped_without_an_executor_call() {
    let dest = tempfile::tempdir().expect("dest");
    std::fs::write(dest.path().join(ARCHIVE_FILE_NAME), "youtube vid002\n").expect("seed ledger");
    let extractor = ScriptedExtractor::default();
    let prompt = ScriptedPrompt::new(false, &[]);

    let (summary, _events) = run(
        &extractor,
        &prompt,
        &request(dest.path(), vec![1, 2, 3]),
        &batch(3),
        CancelFlag::new(),
    );

    assert_eq!(
        summary,
        RunSummary {
            succeeded: 2,
            failed: 0,
            skipped: 1,
            total: 3
        }
    );
    assert_eq!(prompt.redownload_asked.get(), 1);
    assert_eq!(extractor.call_count(), 2);
    let calls = extractor.calls.borrow();
    assert!(calls.iter().all(|call| call.playlist_item != Some(2)));
}

#[test]
fn confirmed_redownload_disables_recording_for_that_call_only() {
    let dest = tempfile::tempdir().expect("dest");
    std::fs::write(dest.path().join(ARCHIVE_FILE_NAME), "youtube vid002\n").expect("seed ledger");
    let extractor = ScriptedExtractor::default();
    let prompt = ScriptedPrompt::new(true, &[]);

    let (summary, _events) = run(
        &extractor,
        &prompt,
        &request(dest.path(), vec![1, 2, 3]),
        &batch(3),
        CancelFlag::new(),
    );

    assert_eq!(summary.succeeded, 3);
    assert_eq!(prompt.redownload_asked.get(), 1);

    let calls = extractor.calls.borrow();
    let call_for = |index: u32| {
        calls
            .iter()
            .find(|call| call.playlist_item == Some(index))
            .expect("call")
    };
    assert!(call_for(1).archive_file.is_some());
    assert!(call_for(2).archive_file.is_none());
    assert!(call_for(3).archive_file.is_some());
}

#[test]
fn disabled_archive_skips_both_check_and_recording() {
    let dest = tempfile::tempdir().expect("dest");
    std::fs::write(dest.path().join(ARCHIVE_FILE_NAME), "youtube vid002\n").expect("seed ledger");
    let extractor = ScriptedExtractor::default();
    let prompt = ScriptedPrompt::new(false, &[]);

    let mut req = request(dest.path(), vec![1, 2, 3]);
    req.use_archive = false;
    let (summary, _events) = run(&extractor, &prompt, &req, &batch(3), CancelFlag::new());

    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.skipped, 0);
    assert_eq!(prompt.redownload_asked.get(), 0);
    let calls = extractor.calls.borrow();
    assert!(calls.iter().all(|call| call.archive_file.is_none()));
}

#[test]
fn captions_mode_is_a_single_whole_url_call() {
    let dest = tempfile::tempdir().expect("dest");
    let extractor = ScriptedExtractor::default();
    let prompt = ScriptedPrompt::new(false, &[]);

    let mut req = request(dest.path(), vec![1, 2]);
    req.mode = DownloadMode::Captions;
    req.caption_language = "ar".to_string();
    let (summary, events) = run(&extractor, &prompt, &req, &batch(2), CancelFlag::new());

    assert_eq!(summary, RunSummary::default());
    assert_eq!(extractor.call_count(), 1);

    let calls = extractor.calls.borrow();
    assert_eq!(calls[0].playlist_item, None);
    assert_eq!(calls[0].output_dir, dest.path().join(CAPTIONS_SUBDIR));
    assert_eq!(
        calls[0].postprocess,
        Postprocess::CaptionsOnly {
            language: "ar".to_string()
        }
    );
    assert!(calls[0].archive_file.is_none());

    assert!(!events
        .iter()
        .any(|event| matches!(event, RunEvent::Counts { .. })));
    assert!(notices(&events)
        .iter()
        .any(|(kind, text)| *kind == NoticeKind::Info && text.starts_with("Captions saved to:")));
}

#[test]
fn preset_cancel_stops_before_the_first_item() {
    let dest = tempfile::tempdir().expect("dest");
    let extractor = ScriptedExtractor::default();
    let prompt = ScriptedPrompt::new(false, &[]);
    let cancel = CancelFlag::new();
    cancel.cancel();

    let (summary, events) = run(
        &extractor,
        &prompt,
        &request(dest.path(), vec![1, 2]),
        &batch(2),
        cancel,
    );

    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.total, 2);
    assert_eq!(extractor.call_count(), 0);
    assert!(notices(&events)
        .iter()
        .any(|(kind, text)| *kind == NoticeKind::Warn && text == "Run canceled."));
}

#[test]
fn unwritable_destination_aborts_before_any_item() {
    let dest = tempfile::tempdir().expect("dest");
    let blocked = dest.path().join("blocked");
    std::fs::write(&blocked, b"file, not a directory").expect("write");

    let state_dir = tempfile::tempdir().expect("state dir");
    let paths = AppPaths::new(state_dir.path().to_path_buf());
    let (tx, _rx) = channel();
    let extractor = ScriptedExtractor::default();
    let prompt = ScriptedPrompt::new(false, &[]);

    let orchestrator = Orchestrator {
        extractor: &extractor,
        decisions: &prompt,
        events: tx,
        cancel: CancelFlag::new(),
        config: OrchestratorConfig::default(),
        log: RunLog::create(&paths).expect("runlog"),
    };

    let result = orchestrator.run(&request(&blocked, vec![1]), &batch(1));
    assert!(matches!(result, Err(EngineError::Destination { .. })));
    assert_eq!(extractor.call_count(), 0);
}
