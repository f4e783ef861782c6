//! The configuration surface for launching a browser, expressed as a
//! `SessionConfig`/`SessionConfigBuilder` pair.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Where the user-data directory comes from.
#[derive(Debug, Clone)]
pub enum UserDataDir {
    /// Create a fresh temp dir and delete it when the root session closes.
    Auto,
    /// Use this path; the supervisor never deletes it.
    Path(PathBuf),
}

/// Where captured stderr/ancillary files go.
#[derive(Debug, Clone)]
pub enum OutputDir {
    /// Create a fresh temp dir for this launch.
    Auto,
    /// Use this path, creating it if absent. Never deleted by the supervisor.
    Path(PathBuf),
}

/// Which transport to establish once the browser is spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// OS pipes on the child's fd 3 (write) / fd 4 (read), NUL-framed.
    Pipe,
    /// WebSocket to the debugger endpoint discovered from stderr.
    WebSocket,
}

/// One entry of the `browser_flags` override map. `Unset` corresponds to the
/// caller passing boolean `false`: it suppresses a default flag of the same
/// key rather than setting an empty one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    Set(String),
    Unset,
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::Set(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::Set(value)
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        if value {
            FlagValue::Set(String::new())
        } else {
            FlagValue::Unset
        }
    }
}

/// Every knob the supervisor and dispatcher read at launch time.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub user_data_dir: UserDataDir,
    pub output_dir: OutputDir,
    pub browser_flags: HashMap<String, FlagValue>,
    pub executable: Option<PathBuf>,
    pub transport: TransportKind,
    pub close_grace: Duration,
    pub subscription_queue_cap: usize,
    pub process_envs: HashMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_data_dir: UserDataDir::Auto,
            output_dir: OutputDir::Auto,
            browser_flags: HashMap::new(),
            executable: None,
            transport: TransportKind::Pipe,
            close_grace: Duration::from_secs(2),
            subscription_queue_cap: 64,
            process_envs: HashMap::new(),
        }
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Merges `default_flags()` with `self.browser_flags`: override wins,
    /// and a key mapped to `FlagValue::Unset` drops the default entry.
    pub(crate) fn resolve_flags(&self) -> Vec<String> {
        let mut merged: HashMap<String, FlagValue> = crate::platform::default_flags()
            .into_iter()
            .map(|(k, v)| (k.to_string(), FlagValue::Set(v.to_string())))
            .collect();

        for (k, v) in &self.browser_flags {
            merged.insert(k.clone(), v.clone());
        }

        let mut flags: Vec<String> = merged
            .into_iter()
            .filter_map(|(k, v)| match v {
                FlagValue::Unset => None,
                FlagValue::Set(val) if val.is_empty() => Some(k),
                FlagValue::Set(val) => Some(format!("{k}={val}")),
            })
            .collect();
        flags.sort();
        flags
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    user_data_dir: Option<UserDataDir>,
    output_dir: Option<OutputDir>,
    browser_flags: HashMap<String, FlagValue>,
    executable: Option<PathBuf>,
    transport: Option<TransportKind>,
    close_grace: Option<Duration>,
    subscription_queue_cap: Option<usize>,
    process_envs: HashMap<String, String>,
}

impl SessionConfigBuilder {
    pub fn user_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_data_dir = Some(UserDataDir::Path(path.into()));
        self
    }

    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(OutputDir::Path(path.into()));
        self
    }

    pub fn flag(mut self, key: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        self.browser_flags.insert(key.into(), value.into());
        self
    }

    pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.transport = Some(kind);
        self
    }

    pub fn close_grace(mut self, dur: Duration) -> Self {
        self.close_grace = Some(dur);
        self
    }

    pub fn subscription_queue_cap(mut self, cap: usize) -> Self {
        self.subscription_queue_cap = Some(cap);
        self
    }

    pub fn env(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.process_envs.insert(key.into(), val.into());
        self
    }

    pub fn build(self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            user_data_dir: self.user_data_dir.unwrap_or(defaults.user_data_dir),
            output_dir: self.output_dir.unwrap_or(defaults.output_dir),
            browser_flags: self.browser_flags,
            executable: self.executable,
            transport: self.transport.unwrap_or(defaults.transport),
            close_grace: self.close_grace.unwrap_or(defaults.close_grace),
            subscription_queue_cap: self
                .subscription_queue_cap
                .unwrap_or(defaults.subscription_queue_cap),
            process_envs: self.process_envs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_over_default() {
        let cfg = SessionConfig::builder()
            .flag("--remote-debugging-pipe", false)
            .flag("--window-size", "800,600")
            .build();
        let flags = cfg.resolve_flags();
        assert!(!flags.iter().any(|f| f == "--remote-debugging-pipe"));
        assert!(flags.iter().any(|f| f == "--window-size=800,600"));
        // untouched default survives
        assert!(flags.iter().any(|f| f == "--no-first-run"));
    }

    #[test]
    fn default_config_keeps_pipe_transport() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.transport, TransportKind::Pipe);
        assert_eq!(cfg.subscription_queue_cap, 64);
    }
}
