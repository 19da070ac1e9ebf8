use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::paths::AppPaths;
use crate::Result;

// Chrome stores expiry as microseconds since 1601-01-01.
const CHROME_EPOCH_OFFSET_MICROS: i64 = 11_644_473_600_000_000;

/// Domains worth carrying into the extraction tool's cookie jar.
pub const COOKIE_DOMAINS: &[&str] = &[
    "youtube.com",
    "twitter.com",
    "x.com",
    "facebook.com",
    "instagram.com",
    "tiktok.com",
    "linkedin.com",
];

#[derive(Debug, Clone, Serialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: i64,
    pub secure: bool,
    pub http_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub collected: usize,
    pub jar_path: Option<PathBuf>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreKind {
    ChromeFamily,
    Firefox,
}

/// Harvests session cookies for the known media domains from every installed
/// browser and writes them as a Netscape jar under the cache dir. Browsers
/// that cannot be read are reported as warnings, never as a failure.
pub fn collect_browser_cookies(paths: &AppPaths) -> Result<HarvestReport> {
    paths.ensure_dirs()?;

    let mut cookies: Vec<CookieRecord> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    for (browser, kind, store) in browser_stores() {
        let harvested = match kind {
            StoreKind::ChromeFamily => collect_chrome_family(paths, &store),
            StoreKind::Firefox => collect_firefox(paths, &store),
        };
        match harvested {
            Ok(mut found) => cookies.append(&mut found),
            Err(err) => warnings.push(format!("{browser}: {err}")),
        }
    }

    if cookies.is_empty() {
        return Ok(HarvestReport {
            collected: 0,
            jar_path: None,
            warnings,
        });
    }

    let jar_path = paths.cookie_jar_path();
    write_netscape_jar(&jar_path, &cookies)?;
    let json = serde_json::to_string_pretty(&cookies)?;
    std::fs::write(paths.cookie_debug_json_path(), format!("{json}\n"))?;

    Ok(HarvestReport {
        collected: cookies.len(),
        jar_path: Some(jar_path),
        warnings,
    })
}

fn browser_stores() -> Vec<(String, StoreKind, PathBuf)> {
    let mut stores: Vec<(String, StoreKind, PathBuf)> = Vec::new();

    if cfg!(windows) {
        let local = std::env::var_os("LOCALAPPDATA").map(PathBuf::from);
        let roaming = std::env::var_os("APPDATA").map(PathBuf::from);
        if let Some(local) = &local {
            stores.push((
                "chrome".to_string(),
                StoreKind::ChromeFamily,
                local.join("Google").join("Chrome").join("User Data"),
            ));
            stores.push((
                "edge".to_string(),
                StoreKind::ChromeFamily,
                local.join("Microsoft").join("Edge").join("User Data"),
            ));
            stores.push((
                "brave".to_string(),
                StoreKind::ChromeFamily,
                local
                    .join("BraveSoftware")
                    .join("Brave-Browser")
                    .join("User Data"),
            ));
        }
        if let Some(roaming) = &roaming {
            stores.push((
                "firefox".to_string(),
                StoreKind::Firefox,
                roaming.join("Mozilla").join("Firefox").join("Profiles"),
            ));
        }
    } else if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            let support = home.join("Library").join("Application Support");
            stores.push((
                "chrome".to_string(),
                StoreKind::ChromeFamily,
                support.join("Google").join("Chrome"),
            ));
            stores.push((
                "edge".to_string(),
                StoreKind::ChromeFamily,
                support.join("Microsoft Edge"),
            ));
            stores.push((
                "firefox".to_string(),
                StoreKind::Firefox,
                support.join("Firefox").join("Profiles"),
            ));
        }
    } else if let Some(home) = home_dir() {
        stores.push((
            "chrome".to_string(),
            StoreKind::ChromeFamily,
            home.join(".config").join("google-chrome"),
        ));
        stores.push((
            "chromium".to_string(),
            StoreKind::ChromeFamily,
            home.join(".config").join("chromium"),
        ));
        stores.push((
            "firefox".to_string(),
            StoreKind::Firefox,
            home.join(".mozilla").join("firefox"),
        ));
    }

    stores.retain(|(_, _, path)| path.exists());
    stores
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

fn collect_chrome_family(paths: &AppPaths, user_data: &Path) -> Result<Vec<CookieRecord>> {
    let candidates = [
        user_data.join("Default").join("Network").join("Cookies"),
        user_data.join("Default").join("Cookies"),
    ];
    let Some(cookie_db) = candidates.iter().find(|p| p.is_file()) else {
        return Ok(Vec::new());
    };

    // The browser keeps the store locked; read from a copy.
    let scratch = scratch_copy(paths, cookie_db)?;
    let result = read_chrome_store(&scratch);
    let _ = std::fs::remove_file(&scratch);
    result
}

fn collect_firefox(paths: &AppPaths, profiles_dir: &Path) -> Result<Vec<CookieRecord>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(profiles_dir)? {
        let Ok(entry) = entry else { continue };
        let db = entry.path().join("cookies.sqlite");
        if !db.is_file() {
            continue;
        }
        let Ok(scratch) = scratch_copy(paths, &db) else {
            continue;
        };
        if let Ok(mut found) = read_firefox_store(&scratch) {
            out.append(&mut found);
        }
        let _ = std::fs::remove_file(&scratch);
    }
    Ok(out)
}

fn scratch_copy(paths: &AppPaths, db: &Path) -> Result<PathBuf> {
    let dir = paths.cookie_scratch_dir();
    std::fs::create_dir_all(&dir)?;
    let scratch = dir.join(format!("store_{}.sqlite", Uuid::new_v4()));
    std::fs::copy(db, &scratch)?;
    Ok(scratch)
}

fn read_chrome_store(db_path: &Path) -> Result<Vec<CookieRecord>> {
    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut stmt = conn.prepare(
        "SELECT name, value, host_key, path, expires_utc, is_secure, is_httponly FROM cookies",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(CookieRecord {
            name: row.get(0)?,
            value: row.get(1)?,
            domain: row.get(2)?,
            path: non_empty_path(row.get(3)?),
            expires: chrome_expiry_to_unix(row.get(4)?),
            secure: row.get::<_, i64>(5)? != 0,
            http_only: row.get::<_, i64>(6)? != 0,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        let cookie = row?;
        if is_wanted_host(&cookie.domain) {
            out.push(cookie);
        }
    }
    Ok(out)
}

fn read_firefox_store(db_path: &Path) -> Result<Vec<CookieRecord>> {
    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut stmt = conn
        .prepare("SELECT name, value, host, path, expiry, isSecure, isHttpOnly FROM moz_cookies")?;
    let rows = stmt.query_map([], |row| {
        Ok(CookieRecord {
            name: row.get(0)?,
            value: row.get(1)?,
            domain: row.get(2)?,
            path: non_empty_path(row.get(3)?),
            expires: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
            secure: row.get::<_, i64>(5)? != 0,
            http_only: row.get::<_, i64>(6)? != 0,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        let cookie = row?;
        if is_wanted_host(&cookie.domain) {
            out.push(cookie);
        }
    }
    Ok(out)
}

fn non_empty_path(path: String) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path
    }
}

fn chrome_expiry_to_unix(expires_utc: i64) -> i64 {
    if expires_utc > 0 {
        (expires_utc - CHROME_EPOCH_OFFSET_MICROS) / 1_000_000
    } else {
        0
    }
}

fn is_wanted_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    COOKIE_DOMAINS.iter().any(|domain| host.contains(domain))
}

/// Netscape cookie file format, the one cookie jar dialect the extraction
/// tool accepts: one tab-separated line per cookie after the magic header.
pub fn write_netscape_jar(path: &Path, cookies: &[CookieRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut contents = String::from("# Netscape HTTP Cookie File\n");
    for cookie in cookies {
        let include_subdomains = if cookie.domain.starts_with('.') {
            "TRUE"
        } else {
            "FALSE"
        };
        let secure = if cookie.secure { "TRUE" } else { "FALSE" };
        let expires = cookie.expires.max(0);
        contents.push_str(&format!(
            "{}\t{include_subdomains}\t{}\t{secure}\t{expires}\t{}\t{}\n",
            cookie.domain, cookie.path, cookie.name, cookie.value
        ));
    }
    std::fs::write(path, contents)?;
    Ok(())
}
