use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::events::CancelFlag;
use crate::Result;

/// One downloadable unit within a fetched batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDescriptor {
    /// Extractor-assigned id; empty for sources that do not expose one.
    pub stable_id: String,
    pub title: String,
    /// Playlist/post title the item belongs to, when the source has one.
    pub collection_name: Option<String>,
    /// 1-based position used to re-select exactly this item later.
    pub sequence_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMode {
    Video,
    Audio,
    Captions,
}

impl DownloadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadMode::Video => "video",
            DownloadMode::Audio => "audio",
            DownloadMode::Captions => "captions",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "video" => Some(DownloadMode::Video),
            "audio" => Some(DownloadMode::Audio),
            "captions" => Some(DownloadMode::Captions),
            _ => None,
        }
    }
}

/// Everything one "Start" action carries. Immutable for the whole run.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub url: String,
    pub mode: DownloadMode,
    /// 1-based sequence indices, processed in the given order.
    pub selected: Vec<u32>,
    /// Opaque format/quality selector handed through to the extraction tool.
    pub format_selector: Option<String>,
    pub destination_root: PathBuf,
    /// Optional Netscape cookie jar handed through to the extraction tool.
    pub credential_path: Option<PathBuf>,
    pub use_archive: bool,
    /// Only consulted when `mode` is `Captions`.
    pub caption_language: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    SkippedAlreadyArchived,
    FailedPermanently,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
    pub total: u32,
}

/// Post-transfer instruction handed to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Postprocess {
    RemuxMkv,
    ExtractMp3,
    CaptionsOnly { language: String },
}

/// One executor invocation, fully specified by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractSpec {
    pub url: String,
    /// Single-item selector; `None` downloads whatever the URL denotes.
    pub playlist_item: Option<u32>,
    pub format_selector: Option<String>,
    pub output_dir: PathBuf,
    pub output_template: String,
    /// Ledger the tool appends to on success; `None` disables recording.
    pub archive_file: Option<PathBuf>,
    pub credential_path: Option<PathBuf>,
    pub postprocess: Postprocess,
}

#[derive(Debug, Clone)]
pub enum ProgressUpdate {
    Downloading { percent: String },
    Finished { filename: Option<String> },
}

/// Metadata collaborator: URL in, ordered item batch out.
pub trait MediaResolver {
    fn resolve(&self, url: &str, credential_path: Option<&Path>) -> Result<Vec<ItemDescriptor>>;
}

/// Extraction/transcode collaborator. A call either completes the transfer
/// (including post-processing) or returns a typed failure; progress arrives
/// at the tool's own cadence.
pub trait MediaExtractor {
    fn extract(
        &self,
        spec: &ExtractSpec,
        cancel: &CancelFlag,
        progress: &mut dyn FnMut(ProgressUpdate),
    ) -> Result<()>;
}
