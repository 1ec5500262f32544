//! Once-a-day lookup for a newer tutr release on crates.io.
//!
//! The lookup runs on a background thread while the one-shot query talks to
//! the model; the notice (if any) is printed to stderr afterwards. A small
//! JSON cache under the config directory throttles lookups to one per day.

use crate::config::{config_dir, TutrConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

pub const UPDATE_CHECK_INTERVAL: Duration = Duration::from_secs(86_400);
pub const CRATES_IO_URL: &str = "https://crates.io/api/v1/crates/tutr";
const CACHE_FILE: &str = "update-check.json";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);
const RELEASES_PAGE: &str = "https://crates.io/crates/tutr";

/// Source of the newest published version.
pub trait ReleaseLookup: Send {
    fn latest_version(&self) -> Option<String>;
}

/// Live lookup against the crates.io API.
#[derive(Debug, Clone)]
pub struct CratesIo {
    url: String,
}

impl Default for CratesIo {
    fn default() -> Self {
        Self {
            url: CRATES_IO_URL.to_string(),
        }
    }
}

impl CratesIo {
    fn fetch(&self) -> std::result::Result<Value, reqwest::Error> {
        let http = reqwest::blocking::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .user_agent(concat!("tutr/", env!("CARGO_PKG_VERSION")))
            .build()?;
        http.get(&self.url).send()?.error_for_status()?.json()
    }
}

impl ReleaseLookup for CratesIo {
    fn latest_version(&self) -> Option<String> {
        match self.fetch() {
            Ok(body) => parse_latest_version(&body),
            Err(err) => {
                debug!(%err, "update lookup failed");
                None
            }
        }
    }
}

/// `crate.max_stable_version`, falling back to `crate.newest_version`.
#[must_use]
pub fn parse_latest_version(body: &Value) -> Option<String> {
    let krate = body.get("crate")?;
    ["max_stable_version", "newest_version"]
        .iter()
        .find_map(|key| krate.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .map(str::to_string)
}

/// Strict semver comparison; anything unparsable is never "newer".
#[must_use]
pub fn is_newer(latest: &str, current: &str) -> bool {
    match (
        semver::Version::parse(latest.trim()),
        semver::Version::parse(current.trim()),
    ) {
        (Ok(latest), Ok(current)) => latest > current,
        _ => false,
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckCache {
    last_checked_epoch: f64,
}

#[must_use]
pub fn cache_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CACHE_FILE))
}

fn read_last_checked(path: &Path) -> Option<f64> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str::<CheckCache>(&raw)
        .ok()
        .map(|cache| cache.last_checked_epoch)
}

/// Due when nothing (or nothing readable) was recorded, or the interval passed.
#[must_use]
pub fn is_check_due(path: &Path, now_epoch: f64) -> bool {
    read_last_checked(path)
        .is_none_or(|last| now_epoch - last >= UPDATE_CHECK_INTERVAL.as_secs_f64())
}

/// # Errors
///
/// Returns an error if the cache directory or file cannot be written.
pub fn record_check(path: &Path, now_epoch: f64) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_string(&CheckCache {
        last_checked_epoch: now_epoch,
    })?;
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}

/// How the running binary was installed, guessed from its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Installer {
    Cargo,
    Homebrew,
    Unknown,
}

#[must_use]
pub fn infer_installer(executable: &Path) -> Installer {
    let path = executable.to_string_lossy();
    if path.contains("/Cellar/") || path.contains("/homebrew/") || path.contains("/linuxbrew/") {
        Installer::Homebrew
    } else if path.contains("/.cargo/bin/")
        || std::env::var_os("CARGO_HOME")
            .is_some_and(|home| executable.starts_with(Path::new(&home).join("bin")))
    {
        Installer::Cargo
    } else {
        Installer::Unknown
    }
}

#[must_use]
pub fn upgrade_hint(installer: Installer) -> String {
    match installer {
        Installer::Cargo => "Upgrade with: cargo install --locked tutr".to_string(),
        Installer::Homebrew => "Upgrade with: brew upgrade tutr".to_string(),
        Installer::Unknown => format!("Download it from {RELEASES_PAGE}"),
    }
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |elapsed| elapsed.as_secs_f64())
}

/// Everything one check needs, so tests can pin the clock and the cache.
pub struct UpdateCheck {
    pub current: String,
    pub lookup: Box<dyn ReleaseLookup>,
    pub cache: PathBuf,
    pub installer: Installer,
    pub now_epoch: f64,
}

impl UpdateCheck {
    /// Runs at most one lookup per interval and returns the notice to print.
    #[must_use]
    pub fn run(&self) -> Option<String> {
        if !is_check_due(&self.cache, self.now_epoch) {
            debug!("update check not due");
            return None;
        }
        if let Err(err) = record_check(&self.cache, self.now_epoch) {
            debug!(error = %format!("{err:#}"), "could not record update check");
        }
        let latest = self.lookup.latest_version()?;
        if !is_newer(&latest, &self.current) {
            return None;
        }
        Some(format!(
            "tutr update available: {} -> {latest}\n{}",
            self.current,
            upgrade_hint(self.installer)
        ))
    }
}

/// Background check started before a query and collected after it.
#[derive(Debug, Default)]
pub struct PendingUpdateCheck {
    handle: Option<JoinHandle<Option<String>>>,
}

impl PendingUpdateCheck {
    /// Start a check for `config`; disabled or unthrottleable checks spawn nothing.
    #[must_use]
    pub fn spawn(config: &TutrConfig) -> Self {
        if !config.update_check_enabled {
            debug!("update check disabled");
            return Self::default();
        }
        let Some(cache) = cache_path() else {
            return Self::default();
        };
        let installer = std::env::current_exe()
            .map_or(Installer::Unknown, |exe| infer_installer(&exe));
        let check = UpdateCheck {
            current: env!("CARGO_PKG_VERSION").to_string(),
            lookup: Box::new(CratesIo::default()),
            cache,
            installer,
            now_epoch: now_epoch(),
        };
        Self::start(check)
    }

    #[must_use]
    pub fn start(check: UpdateCheck) -> Self {
        match thread::Builder::new()
            .name("tutr-update-check".to_string())
            .spawn(move || check.run())
        {
            Ok(handle) => Self {
                handle: Some(handle),
            },
            Err(err) => {
                debug!(%err, "could not start update check");
                Self::default()
            }
        }
    }

    /// Wait for the lookup (bounded by its HTTP timeout) and print any notice.
    pub fn finish(self, stream: &mut dyn Write) {
        let notice = self.handle.and_then(|handle| handle.join().ok().flatten());
        if let Some(notice) = notice {
            let _ = writeln!(stream, "{notice}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedRelease {
        version: Option<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    impl ReleaseLookup for FixedRelease {
        fn latest_version(&self) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.version.map(str::to_string)
        }
    }

    fn check(
        dir: &Path,
        current: &str,
        latest: Option<&'static str>,
        now: f64,
    ) -> (UpdateCheck, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let check = UpdateCheck {
            current: current.to_string(),
            lookup: Box::new(FixedRelease {
                version: latest,
                calls: Arc::clone(&calls),
            }),
            cache: dir.join(CACHE_FILE),
            installer: Installer::Cargo,
            now_epoch: now,
        };
        (check, calls)
    }

    #[test]
    fn version_comparison_is_semver() {
        assert!(is_newer("0.5.0", "0.4.0"));
        assert!(is_newer("0.10.0", "0.9.3"));
        assert!(is_newer("1.0.0", "1.0.0-rc.1"));
        assert!(!is_newer("0.4.0", "0.4.0"));
        assert!(!is_newer("0.3.9", "0.4.0"));
        assert!(!is_newer("latest", "0.4.0"));
        assert!(!is_newer("0.5", "0.4.0"));
    }

    #[test]
    fn crates_io_payload_prefers_stable_version() {
        let body = serde_json::json!({
            "crate": {"max_stable_version": "0.5.0", "newest_version": "0.6.0-beta.1"}
        });
        assert_eq!(parse_latest_version(&body).as_deref(), Some("0.5.0"));
        let prerelease_only = serde_json::json!({"crate": {"newest_version": "0.6.0-beta.1"}});
        assert_eq!(
            parse_latest_version(&prerelease_only).as_deref(),
            Some("0.6.0-beta.1")
        );
        assert_eq!(parse_latest_version(&serde_json::json!({"errors": []})), None);
        assert_eq!(
            parse_latest_version(&serde_json::json!({"crate": {"max_stable_version": null}})),
            None
        );
    }

    #[test]
    fn throttle_honors_the_daily_interval() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CACHE_FILE);
        assert!(is_check_due(&path, 1_000.0));

        record_check(&path, 1_000.0).expect("record");
        let saved = fs::read_to_string(&path).expect("cache");
        assert!(saved.contains("\"last_checked_epoch\":1000.0"), "{saved}");
        assert!(!is_check_due(&path, 1_060.0));
        assert!(is_check_due(&path, 1_000.0 + 86_400.0));

        fs::write(&path, "{broken").expect("write");
        assert!(is_check_due(&path, 1_060.0));
    }

    #[test]
    fn outdated_version_produces_notice_and_records_check() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (check, calls) = check(dir.path(), "0.1.2", Some("0.2.0"), 5_000.0);
        let notice = check.run().expect("notice");
        assert!(notice.contains("0.1.2 -> 0.2.0"));
        assert!(notice.contains("cargo install --locked tutr"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!is_check_due(&dir.path().join(CACHE_FILE), 5_001.0));
    }

    #[test]
    fn current_or_unknown_latest_is_silent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (same, _) = check(dir.path(), "0.2.0", Some("0.2.0"), 1.0);
        assert_eq!(same.run(), None);

        let other = tempfile::tempdir().expect("tempdir");
        let (offline, calls) = check(other.path(), "0.2.0", None, 1.0);
        assert_eq!(offline.run(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recent_check_skips_the_lookup() {
        let dir = tempfile::tempdir().expect("tempdir");
        record_check(&dir.path().join(CACHE_FILE), 10_000.0).expect("record");
        let (check, calls) = check(dir.path(), "0.1.0", Some("9.9.9"), 10_100.0);
        assert_eq!(check.run(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disabled_config_spawns_nothing() {
        let config = TutrConfig {
            update_check_enabled: false,
            ..TutrConfig::default()
        };
        let pending = PendingUpdateCheck::spawn(&config);
        assert!(pending.handle.is_none());
        let mut out = Vec::new();
        pending.finish(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn background_check_prints_notice_on_finish() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (check, _) = check(dir.path(), "0.1.2", Some("0.3.0"), 1.0);
        let mut out = Vec::new();
        PendingUpdateCheck::start(check).finish(&mut out);
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("tutr update available: 0.1.2 -> 0.3.0\n"), "{text}");
    }

    #[test]
    fn installer_is_guessed_from_binary_path() {
        assert_eq!(
            infer_installer(Path::new("/home/u/.cargo/bin/tutr")),
            Installer::Cargo
        );
        assert_eq!(
            infer_installer(Path::new("/opt/homebrew/Cellar/tutr/0.4.0/bin/tutr")),
            Installer::Homebrew
        );
        assert_eq!(
            infer_installer(Path::new("/usr/local/bin/tutr")),
            Installer::Unknown
        );
        assert!(upgrade_hint(Installer::Homebrew).contains("brew upgrade tutr"));
        assert!(upgrade_hint(Installer::Unknown).contains(RELEASES_PAGE));
    }
}
