use std::path::{Path, PathBuf};

pub const ARCHIVE_FILE_NAME: &str = "downloaded_videos.txt";

/// Ledger of completed item ids kept next to the downloads.
///
/// The file is written by the extraction tool (one `<extractor> <id>` line
/// per completed item when recording is enabled for the call); the engine
/// only reads it and decides per call whether the tool may append.
#[derive(Debug, Clone)]
pub struct ArchiveLedger {
    path: PathBuf,
}

impl ArchiveLedger {
    pub fn for_destination(destination_root: &Path) -> Self {
        Self {
            path: destination_root.join(ARCHIVE_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Membership is raw substring search over the ledger text, which keeps
    /// the check byte-compatible with every format the recording tool uses.
    /// An id embedded in a longer recorded id therefore also counts as done.
    /// A missing or unreadable ledger means no history, not an error.
    pub fn contains(&self, id: &str) -> bool {
        if id.is_empty() {
            return false;
        }
        match std::fs::read_to_string(&self.path) {
            Ok(text) => text.contains(id),
            Err(_) => false,
        }
    }
}
