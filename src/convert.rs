use std::path::{Path, PathBuf};

use crate::events::CancelFlag;
use crate::paths::AppPaths;
use crate::process::{self, CommandRunError};
use crate::{EngineError, Result};

pub const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "mov", "wmv", "flv", "webm"];

const REMUX_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, Default)]
pub struct ConvertSummary {
    pub converted: u32,
    pub failed: u32,
    pub failures: Vec<String>,
}

/// Recursively lists video files under `dir`, by extension.
pub fn scan_video_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    walk(dir, &mut found);
    found.sort();
    found
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, out);
        } else if has_video_extension(&path) {
            out.push(path);
        }
    }
}

fn has_video_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn is_already_mp4(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("mp4"))
        .unwrap_or(false)
}

/// Stream-copy remux into `.mp4` next to each input. Files already carrying
/// the target extension count as converted without touching ffmpeg.
pub fn remux_batch_to_mp4(
    paths: &AppPaths,
    files: &[PathBuf],
    cancel: &CancelFlag,
) -> ConvertSummary {
    let mut summary = ConvertSummary::default();
    for file in files {
        if cancel.is_canceled() {
            break;
        }
        if is_already_mp4(file) {
            summary.converted += 1;
            continue;
        }
        let target = file.with_extension("mp4");
        match remux_one(paths, file, &target, cancel) {
            Ok(()) => summary.converted += 1,
            Err(err) => {
                summary.failed += 1;
                summary
                    .failures
                    .push(format!("{}: {err}", file.display()));
            }
        }
    }
    summary
}

fn remux_one(paths: &AppPaths, input: &Path, output: &Path, cancel: &CancelFlag) -> Result<()> {
    let mut cmd = process::command(paths.ffmpeg_cmd());
    cmd.args(["-nostdin", "-y"])
        .arg("-i")
        .arg(input)
        .args(["-c:v", "copy", "-c:a", "copy"])
        .arg(output);

    match process::run_streaming(&mut cmd, cancel, REMUX_TIMEOUT_SECS, &mut |_| {}) {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => Err(EngineError::ExternalToolFailed {
            tool: "ffmpeg".to_string(),
            code: out.status.code(),
            stderr: out.stderr,
        }),
        Err(CommandRunError::Spawn(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(EngineError::ExternalToolMissing {
                tool: "ffmpeg".to_string(),
            })
        }
        Err(err) => Err(err.into_engine("ffmpeg")),
    }
}
