use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::paths::AppPaths;
use crate::Result;

const RUN_LOG_ROTATE_BYTES: u64 = 50 * 1024 * 1024;
const RUN_LOG_MAX_BACKUPS: usize = 3;
const RUN_LOG_MAX_AGE_DAYS: u64 = 30;
const RUN_LOG_TOTAL_CAP_BYTES: u64 = 1024 * 1024 * 1024;

/// Append-only JSONL record of one orchestrated run.
#[derive(Debug, Clone)]
pub struct RunLog {
    run_id: String,
    path: PathBuf,
}

impl RunLog {
    pub fn create(paths: &AppPaths) -> Result<Self> {
        let run_id = Uuid::new_v4().to_string();
        std::fs::create_dir_all(paths.run_logs_dir())?;
        let path = paths.run_logs_dir().join(format!("{run_id}.jsonl"));
        Ok(Self { run_id, path })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort append; a failing log line never fails the run.
    pub fn append(&self, level: &str, event: &str, data: serde_json::Value) {
        let line = serde_json::json!({
            "ts_ms": now_ms(),
            "run_id": self.run_id,
            "level": level,
            "event": event,
            "data": data,
        })
        .to_string();
        let _ = self.append_line(&line);
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        rotate_if_needed(&self.path)?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(format!("{line}\n").as_bytes())
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn rotate_if_needed(path: &Path) -> std::io::Result<()> {
    let len = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return Ok(()),
    };

    if len < RUN_LOG_ROTATE_BYTES {
        return Ok(());
    }

    rotate_file_backups(path, RUN_LOG_MAX_BACKUPS)
}

fn rotate_file_backups(path: &Path, max_backups: usize) -> std::io::Result<()> {
    if max_backups == 0 {
        let _ = std::fs::remove_file(path);
        return Ok(());
    }

    for i in (1..=max_backups).rev() {
        let dst = path_with_suffix(path, &format!(".{i}"));
        let src = if i == 1 {
            path.to_path_buf()
        } else {
            path_with_suffix(path, &format!(".{}", i - 1))
        };

        if !src.exists() {
            continue;
        }

        if dst.exists() {
            let _ = std::fs::remove_file(&dst);
        }
        std::fs::rename(src, dst)?;
    }
    Ok(())
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let file_name = match path.file_name() {
        Some(n) => n.to_string_lossy().to_string(),
        None => suffix.to_string(),
    };
    path.with_file_name(format!("{file_name}{suffix}"))
}

/// Drops run logs older than the retention window, then oldest-first until
/// the directory fits under the total size cap.
pub fn prune_run_logs(paths: &AppPaths) -> Result<()> {
    let dir = paths.run_logs_dir();
    if !dir.exists() {
        return Ok(());
    }

    let now = SystemTime::now();
    let cutoff = now
        .checked_sub(Duration::from_secs(RUN_LOG_MAX_AGE_DAYS * 24 * 60 * 60))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut candidates: Vec<(PathBuf, SystemTime, u64)> = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = match entry {
            Ok(v) => v,
            Err(_) => continue,
        };
        let meta = match entry.metadata() {
            Ok(v) => v,
            Err(_) => continue,
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let path = entry.path();
        let size = meta.len();

        if modified < cutoff {
            let _ = std::fs::remove_file(&path);
            continue;
        }

        candidates.push((path, modified, size));
    }

    candidates.sort_by_key(|(_, modified, _)| *modified);
    let mut total: u64 = candidates.iter().map(|(_, _, size)| *size).sum();
    for (path, _modified, size) in candidates {
        if total <= RUN_LOG_TOTAL_CAP_BYTES {
            break;
        }
        let _ = std::fs::remove_file(&path);
        total = total.saturating_sub(size);
    }

    Ok(())
}
