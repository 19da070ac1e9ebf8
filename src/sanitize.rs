const FORBIDDEN: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

pub const FALLBACK_DIR_NAME: &str = "NA";

/// Turns a collection label into a single path component that is safe on
/// every supported filesystem. Forbidden characters become `_`; names that
/// carry nothing else (or are absent) map to `"NA"`.
pub fn collection_dir_name(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return FALLBACK_DIR_NAME.to_string();
    };

    let mut replaced = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if FORBIDDEN.contains(&ch) {
            replaced.push('_');
        } else {
            replaced.push(ch);
        }
    }

    let trimmed = replaced.trim();
    if trimmed.is_empty() || trimmed.chars().all(|ch| ch == '_') {
        return FALLBACK_DIR_NAME.to_string();
    }
    trimmed.to_string()
}
