//! Append-only output log backing a session.
//!
//! One file per launch. The header truncates; every later write reopens the
//! file in append mode so each chunk is durable on its own. Only the
//! session's drain routine writes. Reads can happen at any time, including
//! after the session entry is gone.

use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::error;

const RULE: &str = "========================================";

#[derive(Debug, Clone)]
pub struct OutputSink {
    path: PathBuf,
}

impl OutputSink {
    /// Create the sink, truncating any previous file at `path`, and write
    /// the banner for a session in the given mode with the given pid.
    pub async fn create(path: PathBuf, label: &str, pid: u32) -> std::io::Result<Self> {
        let header = format!(
            "=== {label} ===\nTime: {}\nPid: {pid}\n{RULE}\n\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        );
        tokio::fs::write(&path, header).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a chunk. Errors are logged and swallowed: a failed write must
    /// not take down the drain routine.
    pub async fn append(&self, data: &[u8]) {
        if let Err(e) = self.append_raw(data).await {
            error!(path = %self.path.display(), error = %e, "output sink write failed");
        }
    }

    /// Append one line of captured output.
    pub async fn append_line(&self, line: &str) {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.append(&buf).await;
    }

    /// Append the batch-mode footer carrying the exit code.
    pub async fn append_footer(&self, exit_code: i32) {
        self.append(format!("\n{RULE}\nExit Code: {exit_code}\n").as_bytes())
            .await;
    }

    async fn append_raw(&self, data: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Read the full current contents of a sink file.
pub async fn read_output(path: &Path) -> std::io::Result<Vec<u8>> {
    tokio::fs::read(path).await
}
