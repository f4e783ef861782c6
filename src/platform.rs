//! OS-specific, process-wide data: the ordered list of well-known browser
//! binary names/paths and the default CDP flag set.
//!
//! This is the only "global state" the core touches, and it is all
//! immutable tables - no cells, no statics with interior mutability.

use std::path::PathBuf;

/// Names searched for on `PATH`, in order, before falling back to
/// platform-specific absolute paths.
const PATH_CANDIDATES: &[&str] = &[
    "google-chrome-stable",
    "google-chrome",
    "chromium",
    "chromium-browser",
    "chrome",
    "chrome-browser",
];

#[cfg(target_os = "macos")]
const ABSOLUTE_CANDIDATES: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

#[cfg(target_os = "linux")]
const ABSOLUTE_CANDIDATES: &[&str] = &[
    "/usr/bin/google-chrome-stable",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
];

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
const ABSOLUTE_CANDIDATES: &[&str] = &[];

/// Locates a Chromium-family executable.
///
/// Order: the `CHROME` environment variable, then `PATH_CANDIDATES` via
/// `which`, then platform-specific well-known absolute paths, then (Windows
/// only) the registry.
pub fn locate_browser() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROME") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    for name in PATH_CANDIDATES {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    for path in ABSOLUTE_CANDIDATES {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    #[cfg(windows)]
    {
        if let Some(path) = windows_registry_path() {
            if path.exists() {
                return Some(path);
            }
        }
    }

    None
}

#[cfg(windows)]
fn windows_registry_path() -> Option<PathBuf> {
    use winreg::enums::HKEY_LOCAL_MACHINE;
    use winreg::RegKey;

    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
    let key = hklm
        .open_subkey(r"SOFTWARE\Microsoft\Windows\CurrentVersion\App Paths\chrome.exe")
        .ok()?;
    let path: String = key.get_value("").ok()?;
    Some(PathBuf::from(path))
}

/// The default browser flags, merged with caller overrides by the
/// supervisor before spawn. A key mapped to `Flag::Absent` (i.e. the caller
/// passed boolean `false`) suppresses a default entry of the same key.
pub fn default_flags() -> Vec<(&'static str, &'static str)> {
    vec![
        ("--enable-automation", ""),
        ("--no-first-run", ""),
        ("--disable-default-apps", ""),
        ("--disable-background-timer-throttling", ""),
        ("--disable-backgrounding-occluded-windows", ""),
        ("--disable-renderer-backgrounding", ""),
        ("--disable-popup-blocking", ""),
        ("--disable-prompt-on-repost", ""),
        ("--disable-hang-monitor", ""),
        ("--disable-sync", ""),
        ("--remote-debugging-pipe", ""),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flags_include_pipe_mode() {
        let flags = default_flags();
        assert!(flags.iter().any(|(k, _)| *k == "--remote-debugging-pipe"));
        assert!(flags.iter().any(|(k, _)| *k == "--no-first-run"));
    }
}
