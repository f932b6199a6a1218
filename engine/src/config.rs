//! Engine configuration.
//!
//! Defines the YAML-serializable settings that control which tool binaries
//! are used, per-invocation timeouts, storage locations, concurrency
//! ceilings and the plugin lists. Every section is optional in the file and
//! falls back to its defaults.
//!
//! # Example YAML
//!
//! ```yaml
//! tools:
//!   volatility:
//!     path: /opt/volatility3/vol
//!   binwalk:
//!     enabled: false
//! timeouts:
//!   plugin_seconds: 1800
//! storage:
//!   root: /srv/forensics
//! concurrency:
//!   memory_analysis: 2
//! plugins:
//!   critical: [pslist, netscan]
//! ```

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Location and switch for one external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSettings {
    pub path: PathBuf,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl ToolSettings {
    fn at(path: &str) -> Self {
        Self {
            path: PathBuf::from(path),
            enabled: true,
        }
    }
}

/// Paths of the three external tools.
///
/// The memory-analysis framework is always enabled; its `enabled` flag is
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub volatility: ToolSettings,
    pub binwalk: ToolSettings,
    pub exiftool: ToolSettings,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            volatility: ToolSettings::at("/usr/local/bin/vol"),
            binwalk: ToolSettings::at("/usr/bin/binwalk"),
            exiftool: ToolSettings::at("/usr/bin/exiftool"),
        }
    }
}

/// Per-invocation wall-clock limits, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub plugin_seconds: u64,
    pub signature_scan_seconds: u64,
    pub metadata_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            plugin_seconds: 3600,
            signature_scan_seconds: 300,
            metadata_seconds: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn plugin(&self) -> Duration {
        Duration::from_secs(self.plugin_seconds)
    }

    pub fn signature_scan(&self) -> Duration {
        Duration::from_secs(self.signature_scan_seconds)
    }

    pub fn metadata(&self) -> Duration {
        Duration::from_secs(self.metadata_seconds)
    }
}

/// Storage root and its derived working directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/forensics"),
        }
    }
}

impl StorageConfig {
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    /// Where the signature scanner carves embedded files.
    pub fn extraction_dir(&self) -> PathBuf {
        self.artifacts_dir().join("binwalk")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Creates every storage directory that does not exist yet.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.uploads_dir(),
            self.artifacts_dir(),
            self.results_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
            restrict_permissions(&dir)?;
        }
        Ok(())
    }

    /// Creates only the extraction directory, leaving the rest of the
    /// layout alone.
    pub fn ensure_extraction_dir(&self) -> Result<PathBuf> {
        let dir = self.extraction_dir();
        std::fs::create_dir_all(&dir)?;
        restrict_permissions(&dir)?;
        Ok(dir)
    }
}

#[cfg(unix)]
fn restrict_permissions(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o750))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Concurrency ceilings per tool class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub memory_analysis: usize,
    pub signature_scan: usize,
    pub metadata: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            memory_analysis: 3,
            signature_scan: 2,
            metadata: 4,
        }
    }
}

/// Plugin lists used when the caller does not name plugins explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub default: Vec<String>,
    pub critical: Vec<String>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        let names = |list: &[&str]| list.iter().map(|s| (*s).to_string()).collect();
        Self {
            default: names(&[
                "pslist", "pstree", "netscan", "cmdline", "malfind", "filescan", "dumpfiles",
                "handles", "vadinfo", "dlllist", "modscan",
            ]),
            critical: names(&["pslist", "pstree", "netscan", "cmdline", "malfind"]),
        }
    }
}

/// Top-level engine configuration.
///
/// # Examples
///
/// ```
/// use memtriage_engine::EngineConfig;
///
/// let config: EngineConfig = serde_yaml::from_str("timeouts: { plugin_seconds: 90 }").unwrap();
/// assert_eq!(config.timeouts.plugin_seconds, 90);
/// assert_eq!(config.timeouts.metadata_seconds, 60);
/// assert_eq!(config.plugins.critical.len(), 5);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tools: ToolsConfig,
    pub timeouts: TimeoutConfig,
    pub storage: StorageConfig,
    pub concurrency: ConcurrencyConfig,
    pub plugins: PluginConfig,
}

impl EngineConfig {
    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`Io`](EngineError::Io) if the file cannot be read, or
    /// [`Yaml`](EngineError::Yaml) if parsing fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config = serde_yaml::from_reader(reader)?;
        Ok(config)
    }

    /// Saves the configuration as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    /// Applies the process environment on top of this configuration.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Applies overrides from `lookup`, keyed by environment variable name.
    ///
    /// Recognised keys: `VOL3_PATH`, `BINWALK_PATH`, `EXIFTOOL_PATH`,
    /// `STORAGE_ROOT`, `VOL3_TIMEOUT_SECONDS`, `BINWALK_ENABLED` and
    /// `EXIFTOOL_ENABLED`.
    ///
    /// # Errors
    ///
    /// Returns [`Config`](EngineError::Config) when a numeric or boolean
    /// value does not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("VOL3_PATH") {
            self.tools.volatility.path = PathBuf::from(path);
        }
        if let Some(path) = lookup("BINWALK_PATH") {
            self.tools.binwalk.path = PathBuf::from(path);
        }
        if let Some(path) = lookup("EXIFTOOL_PATH") {
            self.tools.exiftool.path = PathBuf::from(path);
        }
        if let Some(root) = lookup("STORAGE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(raw) = lookup("VOL3_TIMEOUT_SECONDS") {
            self.timeouts.plugin_seconds = raw.trim().parse().map_err(|_| {
                EngineError::Config(format!("VOL3_TIMEOUT_SECONDS is not a number: {raw}"))
            })?;
        }
        if let Some(raw) = lookup("BINWALK_ENABLED") {
            self.tools.binwalk.enabled = parse_flag("BINWALK_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("EXIFTOOL_ENABLED") {
            self.tools.exiftool.enabled = parse_flag("EXIFTOOL_ENABLED", &raw)?;
        }
        Ok(())
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (name, settings) in [
            ("volatility", &self.tools.volatility),
            ("binwalk", &self.tools.binwalk),
            ("exiftool", &self.tools.exiftool),
        ] {
            if settings.path.as_os_str().is_empty() {
                return Err(EngineError::Config(format!("{name} path cannot be empty")));
            }
        }

        for (name, seconds) in [
            ("plugin_seconds", self.timeouts.plugin_seconds),
            ("signature_scan_seconds", self.timeouts.signature_scan_seconds),
            ("metadata_seconds", self.timeouts.metadata_seconds),
        ] {
            if seconds == 0 {
                return Err(EngineError::Config(format!("{name} must be positive")));
            }
        }

        for (name, ceiling) in [
            ("memory_analysis", self.concurrency.memory_analysis),
            ("signature_scan", self.concurrency.signature_scan),
            ("metadata", self.concurrency.metadata),
        ] {
            if ceiling == 0 {
                return Err(EngineError::Config(format!(
                    "concurrency.{name} must be at least 1"
                )));
            }
        }

        Ok(())
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(EngineError::Config(format!(
            "{key} is not a boolean: {raw}"
        ))),
    }
}
