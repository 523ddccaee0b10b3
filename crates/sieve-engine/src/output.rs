//! Per-status result files.
//!
//! Lines go to `{root}/{script}/{status}.txt`. Appends to the same file are
//! serialized by a per-file async lock so concurrent workers never interleave.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sieve_types::{BotStatus, Result};
use tokio::io::AsyncWriteExt;

/// Render the raw record followed by its captures.
pub fn format_line(raw: &str, captures: &[(String, String)], separator: &str) -> String {
    if captures.is_empty() {
        return raw.to_string();
    }
    let rendered: Vec<String> = captures
        .iter()
        .map(|(name, value)| format!("{} = {}", name, value))
        .collect();
    format!("{}{}{}", raw, separator, rendered.join(separator))
}

pub struct OutputSink {
    root: PathBuf,
    separator: String,
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl OutputSink {
    pub fn new(root: impl Into<PathBuf>, separator: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            separator: separator.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// File a record with `status` is appended to.
    pub fn path_for(&self, script_name: &str, status: &BotStatus) -> PathBuf {
        self.root
            .join(sanitize(script_name))
            .join(format!("{}.txt", sanitize(&status.bucket())))
    }

    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    /// Append `line` to the file for `status`. Failures are never written.
    pub async fn write(&self, script_name: &str, status: &BotStatus, line: &str) -> Result<()> {
        if *status == BotStatus::Failure {
            return Ok(());
        }
        let path = self.path_for(script_name, status);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await?;
        tracing::trace!(path = %path.display(), "Result appended");
        Ok(())
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "unnamed".to_string()
    } else {
        cleaned.to_string()
    }
}
