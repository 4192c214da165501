//! Daemon configuration: TOML file + CLI overrides.

use opsh_core::{OpshResult, DEFAULT_INTERACTIVE_KEYWORDS};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub classify: ClassifySection,
}

/// `[session]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// Directory for per-launch output files. Defaults to `<tmp>/opsh`.
    #[serde(default)]
    pub output_dir: Option<String>,
    /// How long the interactive drain waits for data before probing for
    /// child exit. Policy constant, not a correctness requirement.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Grace period between SIGTERM and SIGKILL on `stop`.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default = "default_pty_rows")]
    pub pty_rows: u16,
    #[serde(default = "default_pty_cols")]
    pub pty_cols: u16,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            output_dir: None,
            poll_interval_ms: default_poll_interval_ms(),
            grace_period_ms: default_grace_period_ms(),
            pty_rows: default_pty_rows(),
            pty_cols: default_pty_cols(),
        }
    }
}

/// `[classify]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifySection {
    #[serde(default = "default_keywords")]
    pub interactive_keywords: Vec<String>,
}

impl Default for ClassifySection {
    fn default() -> Self {
        Self {
            interactive_keywords: default_keywords(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}
fn default_grace_period_ms() -> u64 {
    500
}
fn default_pty_rows() -> u16 {
    24
}
fn default_pty_cols() -> u16 {
    80
}
fn default_keywords() -> Vec<String> {
    DEFAULT_INTERACTIVE_KEYWORDS
        .iter()
        .map(|k| k.to_string())
        .collect()
}

/// Resolved daemon configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub output_dir: PathBuf,
    pub poll_interval: Duration,
    pub grace_period: Duration,
    pub pty_rows: u16,
    pub pty_cols: u16,
    pub interactive_keywords: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::from_file(ConfigFile::default(), None)
    }
}

impl DaemonConfig {
    /// Load config from a TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli_output_dir: Option<&str>) -> OpshResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content).map_err(|e| {
                    opsh_core::OpshError::Other(format!("config parse error: {e}"))
                })?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        Ok(Self::from_file(file_config, cli_output_dir))
    }

    fn from_file(file: ConfigFile, cli_output_dir: Option<&str>) -> Self {
        let output_dir = cli_output_dir
            .map(expand_tilde_str)
            .or_else(|| file.session.output_dir.as_deref().map(expand_tilde_str))
            .unwrap_or_else(|| std::env::temp_dir().join("opsh"));

        Self {
            output_dir,
            poll_interval: Duration::from_millis(file.session.poll_interval_ms),
            grace_period: Duration::from_millis(file.session.grace_period_ms),
            pty_rows: file.session.pty_rows,
            pty_cols: file.session.pty_cols,
            interactive_keywords: file.classify.interactive_keywords,
        }
    }

    /// Path for a fresh launch's output sink: `<output_dir>/cmd_<millis>_<seq>.txt`.
    ///
    /// Creates the output directory (mode 0700) on first use. The sequence
    /// number keeps paths unique when launches land in the same millisecond.
    pub fn next_output_path(&self) -> std::io::Result<PathBuf> {
        static SEQ: AtomicU64 = AtomicU64::new(0);

        ensure_output_dir(&self.output_dir)?;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        Ok(self.output_dir.join(format!("cmd_{millis}_{seq}.txt")))
    }
}

/// Create the output directory with permissions restricted to this user.
fn ensure_output_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
