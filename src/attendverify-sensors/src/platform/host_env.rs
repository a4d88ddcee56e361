//! Environment probe for the host process.
//!
//! Detects:
//! - Locale, timezone and display session
//! - Automation harnesses (CI runners, WebDriver/Selenium/Puppeteer/Playwright)
//! - An attached tracer (Linux `TracerPid`)
//! - Whether the OS RNG and local storage are usable

use rand::RngCore;

use crate::provider::EnvironmentProbe;
use crate::types::EnvironmentSnapshot;

/// Environment variables whose presence marks an automated session.
const AUTOMATION_VARS: &[&str] = &["CI", "WEBDRIVER", "BUILD_ID", "JENKINS_URL", "GITHUB_ACTIONS"];

/// Environment variable prefixes set by browser automation tools.
const AUTOMATION_PREFIXES: &[&str] = &["SELENIUM", "PUPPETEER", "PLAYWRIGHT", "CYPRESS"];

/// Probe reading the real process environment.
#[derive(Debug, Clone)]
pub struct HostEnvironment {
    secure_transport: bool,
}

impl HostEnvironment {
    /// Create a probe. `secure_transport` states whether the configured
    /// back-end endpoints use TLS; the host cannot observe that itself.
    #[must_use]
    pub fn new(secure_transport: bool) -> Self {
        Self { secure_transport }
    }
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EnvironmentProbe for HostEnvironment {
    fn snapshot(&self) -> EnvironmentSnapshot {
        let storage_available = std::env::temp_dir().is_dir();
        EnvironmentSnapshot {
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            locale: detect_locale(),
            timezone: detect_timezone(),
            display: detect_display(),
            hardware_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            cookies_enabled: storage_available,
            do_not_track: env_flag("DO_NOT_TRACK"),
            secure_transport: self.secure_transport,
            secure_context: !running_as_root(),
            automation_detected: automation_markers_present() || tracer_attached(),
            crypto_available: os_rng_usable(),
            storage_available,
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn detect_locale() -> String {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "C".to_string())
}

fn detect_timezone() -> String {
    std::env::var("TZ")
        .ok()
        .filter(|tz| !tz.is_empty())
        .unwrap_or_else(|| chrono::Local::now().offset().to_string())
}

fn detect_display() -> String {
    if std::env::var_os("WAYLAND_DISPLAY").is_some() {
        "wayland".into()
    } else if std::env::var_os("DISPLAY").is_some() {
        "x11".into()
    } else if cfg!(any(target_os = "macos", target_os = "windows")) {
        "native".into()
    } else {
        "headless".into()
    }
}

fn automation_markers_present() -> bool {
    if AUTOMATION_VARS.iter().any(|var| std::env::var_os(var).is_some()) {
        return true;
    }
    std::env::vars_os().any(|(name, _)| {
        let name = name.to_string_lossy().to_ascii_uppercase();
        AUTOMATION_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
    })
}

fn os_rng_usable() -> bool {
    let mut buf = [0u8; 16];
    rand::rngs::OsRng.try_fill_bytes(&mut buf).is_ok()
}

/// Read a numeric field from `/proc/self/status`.
#[cfg(target_os = "linux")]
fn proc_status_field(field: &str) -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find(|line| line.starts_with(field))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
}

#[cfg(target_os = "linux")]
fn tracer_attached() -> bool {
    proc_status_field("TracerPid:").is_some_and(|pid| pid != 0)
}

#[cfg(not(target_os = "linux"))]
fn tracer_attached() -> bool {
    false
}

#[cfg(target_os = "linux")]
fn running_as_root() -> bool {
    // "Uid:" lists real, effective, saved and fs uids; the first is enough.
    proc_status_field("Uid:") == Some(0)
}

#[cfg(not(target_os = "linux"))]
fn running_as_root() -> bool {
    false
}
