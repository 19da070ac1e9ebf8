use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::events::CancelFlag;
use crate::models::{
    ExtractSpec, ItemDescriptor, MediaExtractor, MediaResolver, Postprocess, ProgressUpdate,
};
use crate::paths::AppPaths;
use crate::process::{self, CommandRunError};
use crate::tools;
use crate::{EngineError, Result};

const SOCKET_TIMEOUT_SECS: u32 = 60;
const EXTRACTOR_RETRIES: u32 = 3;
const TRANSPORT_RETRIES: u32 = 10;
const FRAGMENT_RETRIES: u32 = 10;
const CONCURRENT_FRAGMENTS: u32 = 3;
pub const RESOLVE_TIMEOUT_SECS: u64 = 900;
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 7200;
const REDIRECT_PROBE_TIMEOUT_SECS: u64 = 15;
const HTTP_USER_AGENT: &str = "Mozilla/5.0";

/// Follows redirects so share links reach the extraction tool as their
/// canonical page. Any failure falls back to the input URL.
pub fn resolve_final_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let agent = build_http_agent(REDIRECT_PROBE_TIMEOUT_SECS);
    match agent.get(trimmed).call() {
        Ok(response) => {
            use ureq::ResponseExt;
            let resolved = response.get_uri().to_string();
            if resolved.is_empty() {
                trimmed.to_string()
            } else {
                resolved
            }
        }
        Err(_) => trimmed.to_string(),
    }
}

fn build_http_agent(timeout_secs: u64) -> ureq::Agent {
    let mut config = ureq::Agent::config_builder();
    config = config
        .http_status_as_error(false)
        .timeout_global(Some(Duration::from_secs(timeout_secs.max(1))))
        .user_agent(HTTP_USER_AGENT);
    config.build().into()
}

/// Metadata resolver backed by a flat-playlist probe of the extraction tool.
pub struct YtDlpResolver {
    paths: AppPaths,
    timeout_secs: u64,
}

impl YtDlpResolver {
    pub fn new(paths: AppPaths) -> Self {
        Self {
            paths,
            timeout_secs: RESOLVE_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(paths: AppPaths, timeout_secs: u64) -> Self {
        Self {
            paths,
            timeout_secs,
        }
    }
}

impl MediaResolver for YtDlpResolver {
    fn resolve(&self, url: &str, credential_path: Option<&Path>) -> Result<Vec<ItemDescriptor>> {
        let parsed = url::Url::parse(url.trim())
            .map_err(|e| EngineError::Resolve(format!("invalid URL: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(EngineError::Resolve(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let url = resolve_final_url(url);
        let mut args: Vec<String> = vec![
            "--socket-timeout".to_string(),
            SOCKET_TIMEOUT_SECS.to_string(),
            "--extractor-retries".to_string(),
            EXTRACTOR_RETRIES.to_string(),
            "--flat-playlist".to_string(),
            "--skip-download".to_string(),
            "--ignore-errors".to_string(),
            "--no-warnings".to_string(),
            "-J".to_string(),
        ];
        if let Some(cookies) = credential_path {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().to_string());
        }
        args.push(url.clone());

        let cancel = CancelFlag::new();
        let output = run_ytdlp(&self.paths, &args, &cancel, self.timeout_secs)?;
        let info: serde_json::Value = serde_json::from_str(output.stdout.trim())
            .map_err(|e| EngineError::Resolve(format!("unparseable media info for {url}: {e}")))?;
        Ok(items_from_info(&info))
    }
}

fn items_from_info(info: &serde_json::Value) -> Vec<ItemDescriptor> {
    let mut items = Vec::new();
    let Some(obj) = info.as_object() else {
        return items;
    };

    if let Some(entries) = obj.get("entries").and_then(|v| v.as_array()) {
        let collection = obj
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        for (i, entry) in entries.iter().enumerate() {
            // Extractors occasionally emit null or otherwise irregular
            // entries; those keep their playlist position but are dropped.
            let Some(entry) = entry.as_object() else {
                continue;
            };
            items.push(ItemDescriptor {
                stable_id: entry
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                title: entry_title(entry),
                collection_name: collection.clone(),
                sequence_index: (i + 1) as u32,
            });
        }
    } else {
        items.push(ItemDescriptor {
            stable_id: obj
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            title: entry_title(obj),
            collection_name: None,
            sequence_index: 1,
        });
    }
    items
}

fn entry_title(entry: &serde_json::Map<String, serde_json::Value>) -> String {
    entry
        .get("title")
        .and_then(|v| v.as_str())
        .or_else(|| entry.get("id").and_then(|v| v.as_str()))
        .unwrap_or("Unknown")
        .to_string()
}

/// Extraction executor shelling out to yt-dlp with progress streaming.
pub struct YtDlpExtractor {
    paths: AppPaths,
    timeout_secs: u64,
}

impl YtDlpExtractor {
    pub fn new(paths: AppPaths) -> Self {
        Self {
            paths,
            timeout_secs: DOWNLOAD_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(paths: AppPaths, timeout_secs: u64) -> Self {
        Self {
            paths,
            timeout_secs,
        }
    }
}

impl MediaExtractor for YtDlpExtractor {
    fn extract(
        &self,
        spec: &ExtractSpec,
        cancel: &CancelFlag,
        progress: &mut dyn FnMut(ProgressUpdate),
    ) -> Result<()> {
        let mut args = build_extract_args(spec);
        let ffmpeg = self.paths.ffmpeg_bin_path();
        if ffmpeg.exists() {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().to_string());
        }

        let mut failures: Vec<String> = Vec::new();
        let mut last_filename: Option<String> = None;
        for (program, prefix) in tools::ytdlp_candidates(&self.paths) {
            let mut cmd = process::command(&program);
            cmd.args(&prefix);
            cmd.args(&args);

            let result = {
                let mut on_line = |line: &str| match parse_progress_line(line) {
                    Some(ParsedLine::Percent(percent)) => {
                        progress(ProgressUpdate::Downloading { percent });
                    }
                    Some(ParsedLine::Destination(filename)) => {
                        last_filename = Some(filename);
                    }
                    None => {}
                };
                process::run_streaming(&mut cmd, cancel, self.timeout_secs, &mut on_line)
            };

            match result {
                Ok(output) => {
                    if output.status.success() {
                        progress(ProgressUpdate::Finished {
                            filename: last_filename.clone(),
                        });
                        return Ok(());
                    }
                    failures.push(format!(
                        "{program} failed (code={:?}): {}",
                        output.status.code(),
                        if output.stderr.is_empty() {
                            "unknown error"
                        } else {
                            output.stderr.as_str()
                        }
                    ));
                }
                Err(CommandRunError::Spawn(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    continue;
                }
                Err(CommandRunError::Spawn(e)) => {
                    failures.push(format!("{program} could not start: {e}"));
                }
                Err(CommandRunError::Wait(e)) => {
                    failures.push(format!("{program} failed while running: {e}"));
                }
                Err(err @ (CommandRunError::Canceled | CommandRunError::TimedOut(_))) => {
                    return Err(err.into_engine("yt-dlp"));
                }
            }
        }

        if failures.is_empty() {
            return Err(EngineError::ExternalToolMissing {
                tool: "yt-dlp".to_string(),
            });
        }
        Err(EngineError::ExternalToolFailed {
            tool: "yt-dlp".to_string(),
            code: None,
            stderr: failures.join(" | "),
        })
    }
}

fn run_ytdlp(
    paths: &AppPaths,
    args: &[String],
    cancel: &CancelFlag,
    timeout_secs: u64,
) -> Result<process::CapturedOutput> {
    let mut failures: Vec<String> = Vec::new();
    for (program, prefix) in tools::ytdlp_candidates(paths) {
        let mut cmd = process::command(&program);
        cmd.args(&prefix);
        cmd.args(args);
        match process::run_capture(&mut cmd, cancel, timeout_secs) {
            Ok(output) => {
                if output.status.success() {
                    return Ok(output);
                }
                failures.push(format!(
                    "{program} failed (code={:?}): {}",
                    output.status.code(),
                    if output.stderr.is_empty() {
                        "unknown error"
                    } else {
                        output.stderr.as_str()
                    }
                ));
            }
            Err(CommandRunError::Spawn(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                continue;
            }
            Err(CommandRunError::Spawn(e)) => {
                failures.push(format!("{program} could not start: {e}"));
            }
            Err(CommandRunError::Wait(e)) => {
                failures.push(format!("{program} failed while running: {e}"));
            }
            Err(err @ (CommandRunError::Canceled | CommandRunError::TimedOut(_))) => {
                return Err(err.into_engine("yt-dlp"));
            }
        }
    }

    if failures.is_empty() {
        return Err(EngineError::ExternalToolMissing {
            tool: "yt-dlp".to_string(),
        });
    }
    Err(EngineError::ExternalToolFailed {
        tool: "yt-dlp".to_string(),
        code: None,
        stderr: failures.join(" | "),
    })
}

/// Argument list for one extraction call. Shared transport tuning plus the
/// mode-specific post-processing tail.
pub fn build_extract_args(spec: &ExtractSpec) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--newline".to_string(),
        "--socket-timeout".to_string(),
        SOCKET_TIMEOUT_SECS.to_string(),
        "--retries".to_string(),
        TRANSPORT_RETRIES.to_string(),
        "--fragment-retries".to_string(),
        FRAGMENT_RETRIES.to_string(),
        "--concurrent-fragments".to_string(),
        CONCURRENT_FRAGMENTS.to_string(),
        "--restrict-filenames".to_string(),
        "--windows-filenames".to_string(),
        "--no-warnings".to_string(),
    ];

    if let Some(index) = spec.playlist_item {
        args.push("--playlist-items".to_string());
        args.push(index.to_string());
    }

    match &spec.postprocess {
        Postprocess::RemuxMkv => {
            args.push("--remux-video".to_string());
            args.push("mkv".to_string());
        }
        Postprocess::ExtractMp3 => {
            args.push("-x".to_string());
            args.push("--audio-format".to_string());
            args.push("mp3".to_string());
            args.push("--audio-quality".to_string());
            args.push("192K".to_string());
        }
        Postprocess::CaptionsOnly { language } => {
            args.push("--skip-download".to_string());
            args.push("--write-subs".to_string());
            args.push("--write-auto-subs".to_string());
            args.push("--sub-langs".to_string());
            args.push(if language.is_empty() {
                "en".to_string()
            } else {
                language.clone()
            });
            args.push("--sub-format".to_string());
            args.push("vtt".to_string());
            args.push("--ignore-errors".to_string());
        }
    }

    if !matches!(spec.postprocess, Postprocess::CaptionsOnly { .. }) {
        if let Some(format) = &spec.format_selector {
            if !format.trim().is_empty() {
                args.push("-f".to_string());
                args.push(format.clone());
            }
        }
    }

    if let Some(archive) = &spec.archive_file {
        args.push("--download-archive".to_string());
        args.push(archive.to_string_lossy().to_string());
    }

    if let Some(cookies) = &spec.credential_path {
        args.push("--cookies".to_string());
        args.push(cookies.to_string_lossy().to_string());
    }

    args.push("-P".to_string());
    args.push(spec.output_dir.to_string_lossy().to_string());
    args.push("-o".to_string());
    args.push(spec.output_template.clone());
    args.push(spec.url.clone());
    args
}

enum ParsedLine {
    Percent(String),
    Destination(String),
}

fn percent_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[download\]\s+(\d{1,3}(?:\.\d+)?%)").expect("valid percent regex")
    })
}

fn parse_progress_line(line: &str) -> Option<ParsedLine> {
    if let Some(captures) = percent_regex().captures(line) {
        return Some(ParsedLine::Percent(captures[1].to_string()));
    }
    let rest = line.strip_prefix("[download] Destination:")?;
    let rest = rest.trim();
    if rest.is_empty() {
        None
    } else {
        Some(ParsedLine::Destination(rest.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn base_spec() -> ExtractSpec {
        ExtractSpec {
            url: "https://www.youtube.com/playlist?list=PL123".to_string(),
            playlist_item: Some(4),
            format_selector: Some("best".to_string()),
            output_dir: PathBuf::from("/dl/My Mix"),
            output_template: "%(playlist_index|NA)s - %(title)s.%(ext)s".to_string(),
            archive_file: Some(PathBuf::from("/dl/downloaded_videos.txt")),
            credential_path: None,
            postprocess: Postprocess::RemuxMkv,
        }
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2)
            .any(|pair| pair[0] == flag && pair[1] == value)
    }

    #[test]
    fn video_call_remuxes_and_selects_one_item() {
        let args = build_extract_args(&base_spec());

        assert!(has_pair(&args, "--playlist-items", "4"));
        assert!(has_pair(&args, "--remux-video", "mkv"));
        assert!(has_pair(&args, "-f", "best"));
        assert!(has_pair(&args, "--download-archive", "/dl/downloaded_videos.txt"));
        assert!(has_pair(&args, "-P", "/dl/My Mix"));
        assert!(args.contains(&"--restrict-filenames".to_string()));
        assert!(args.contains(&"--windows-filenames".to_string()));
        assert!(has_pair(&args, "--concurrent-fragments", "3"));
        assert_eq!(args.last().map(String::as_str), Some(base_spec().url.as_str()));
    }

    #[test]
    fn audio_call_extracts_mp3_at_192k() {
        let mut spec = base_spec();
        spec.postprocess = Postprocess::ExtractMp3;
        let args = build_extract_args(&spec);

        assert!(args.contains(&"-x".to_string()));
        assert!(has_pair(&args, "--audio-format", "mp3"));
        assert!(has_pair(&args, "--audio-quality", "192K"));
        assert!(!args.contains(&"--remux-video".to_string()));
    }

    #[test]
    fn captions_call_skips_the_download_and_the_format_selector() {
        let mut spec = base_spec();
        spec.playlist_item = None;
        spec.archive_file = None;
        spec.postprocess = Postprocess::CaptionsOnly {
            language: "ar".to_string(),
        };
        let args = build_extract_args(&spec);

        assert!(args.contains(&"--skip-download".to_string()));
        assert!(args.contains(&"--write-subs".to_string()));
        assert!(args.contains(&"--write-auto-subs".to_string()));
        assert!(has_pair(&args, "--sub-langs", "ar"));
        assert!(has_pair(&args, "--sub-format", "vtt"));
        assert!(!args.contains(&"-f".to_string()));
        assert!(!args.contains(&"--playlist-items".to_string()));
        assert!(!args.contains(&"--download-archive".to_string()));
    }

    #[test]
    fn disabled_archive_omits_the_flag() {
        let mut spec = base_spec();
        spec.archive_file = None;
        let args = build_extract_args(&spec);
        assert!(!args.contains(&"--download-archive".to_string()));
    }

    #[test]
    fn cookie_jar_is_passed_through() {
        let mut spec = base_spec();
        spec.credential_path = Some(PathBuf::from("/tmp/cookies.txt"));
        let args = build_extract_args(&spec);
        assert!(has_pair(&args, "--cookies", "/tmp/cookies.txt"));
    }

    #[test]
    fn progress_lines_parse_percent_and_destination() {
        match parse_progress_line("[download]  42.7% of 10.00MiB at 1.00MiB/s ETA 00:06") {
            Some(ParsedLine::Percent(p)) => assert_eq!(p, "42.7%"),
            _ => panic!("expected percent"),
        }
        match parse_progress_line("[download] Destination: /dl/My Mix/01 - Intro.mkv") {
            Some(ParsedLine::Destination(f)) => assert_eq!(f, "/dl/My Mix/01 - Intro.mkv"),
            _ => panic!("expected destination"),
        }
        assert!(parse_progress_line("[info] Downloading playlist").is_none());
        assert!(parse_progress_line("random noise").is_none());
    }

    #[test]
    fn playlist_info_becomes_an_ordered_batch() {
        let info = serde_json::json!({
            "title": "My Mix",
            "entries": [
                { "id": "aaa", "title": "First" },
                null,
                { "id": "ccc" },
            ]
        });
        let items = items_from_info(&info);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].stable_id, "aaa");
        assert_eq!(items[0].title, "First");
        assert_eq!(items[0].collection_name.as_deref(), Some("My Mix"));
        assert_eq!(items[0].sequence_index, 1);
        // The null entry keeps its playlist slot: the next item is #3.
        assert_eq!(items[1].sequence_index, 3);
        assert_eq!(items[1].title, "ccc");
    }

    #[test]
    fn single_video_info_becomes_a_one_item_batch() {
        let info = serde_json::json!({ "id": "solo1", "title": "Lone clip" });
        let items = items_from_info(&info);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].sequence_index, 1);
        assert_eq!(items[0].collection_name, None);
        assert_eq!(items[0].stable_id, "solo1");
    }

    #[test]
    fn resolver_rejects_non_http_schemes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = YtDlpResolver::new(AppPaths::new(dir.path().to_path_buf()));

        assert!(matches!(
            resolver.resolve("ftp://example.com/clip.mp4", None),
            Err(EngineError::Resolve(_))
        ));
        assert!(matches!(
            resolver.resolve("not a url at all", None),
            Err(EngineError::Resolve(_))
        ));
    }

    #[test]
    fn missing_ids_resolve_to_empty_stable_ids() {
        let info = serde_json::json!({
            "title": "Mix",
            "entries": [ { "title": "No id here" } ]
        });
        let items = items_from_info(&info);
        assert_eq!(items[0].stable_id, "");
        assert_eq!(items[0].title, "No id here");
    }
}
