use serde::Serialize;

use crate::events::CancelFlag;
use crate::paths::AppPaths;
use crate::process;

const VERSION_PROBE_TIMEOUT_SECS: u64 = 30;

/// Launch candidates for the extraction tool, most specific first. A bundled
/// binary under the tools dir wins over whatever PATH resolves.
pub fn ytdlp_candidates(paths: &AppPaths) -> Vec<(String, Vec<String>)> {
    let mut candidates: Vec<(String, Vec<String>)> = Vec::new();
    let bundled = paths.ytdlp_bin_path();
    if bundled.exists() {
        candidates.push((bundled.to_string_lossy().to_string(), Vec::new()));
    }
    candidates.push(("yt-dlp".to_string(), Vec::new()));
    candidates.push((
        "python".to_string(),
        vec!["-m".to_string(), "yt_dlp".to_string()],
    ));
    candidates.push((
        "python3".to_string(),
        vec!["-m".to_string(), "yt_dlp".to_string()],
    ));
    candidates
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolsStatus {
    pub ytdlp_version: Option<String>,
    pub ffmpeg_version: Option<String>,
}

/// Probes which external tools are reachable. Detection only; installing
/// them is the operator's business.
pub fn tools_status(paths: &AppPaths) -> ToolsStatus {
    ToolsStatus {
        ytdlp_version: probe_ytdlp_version(paths),
        ffmpeg_version: probe_ffmpeg_version(paths),
    }
}

fn probe_ytdlp_version(paths: &AppPaths) -> Option<String> {
    for (program, prefix) in ytdlp_candidates(paths) {
        let mut cmd = process::command(&program);
        cmd.args(&prefix).arg("--version");
        if let Some(version) = first_output_line(&mut cmd) {
            return Some(version);
        }
    }
    None
}

fn probe_ffmpeg_version(paths: &AppPaths) -> Option<String> {
    let mut cmd = process::command(paths.ffmpeg_cmd());
    cmd.arg("-version");
    first_output_line(&mut cmd)
}

fn first_output_line(cmd: &mut std::process::Command) -> Option<String> {
    let cancel = CancelFlag::new();
    let mut first: Option<String> = None;
    let result = process::run_streaming(cmd, &cancel, VERSION_PROBE_TIMEOUT_SECS, &mut |line| {
        if first.is_none() && !line.trim().is_empty() {
            first = Some(line.trim().to_string());
        }
    });
    match result {
        Ok(output) if output.status.success() => first,
        _ => None,
    }
}
