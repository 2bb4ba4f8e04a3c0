//! Durable record of per-video stage completion, used to make reruns
//! idempotent.
//!
//! The ledger is append-only. On startup the done-state is the union of
//! every `(video_id, stage)` pair ever appended; while running, a stage is
//! marked only after its output lines are durably written, so a crash can
//! never leave a stage marked but unwritten.

use anyhow::Context;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::records::{LedgerEntry, Stage};

pub struct Ledger {
    path: PathBuf,
    inner: Mutex<LedgerInner>,
}

struct LedgerInner {
    file: tokio::fs::File,
    completed: HashMap<String, HashSet<Stage>>,
}

impl Ledger {
    /// Load the union of all prior entries and open the file for appending.
    /// Malformed lines (e.g. from a mid-write crash) are skipped, not fatal.
    pub async fn open(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("cannot create ledger directory {}", parent.display()))?;
        }

        let mut completed: HashMap<String, HashSet<Stage>> = HashMap::new();
        if path.exists() {
            let content = fs_err::read_to_string(&path)?;
            for line in content.lines() {
                match serde_json::from_str::<LedgerEntry>(line) {
                    Ok(entry) => {
                        completed.entry(entry.video_id).or_default().insert(entry.stage);
                    }
                    Err(err) => {
                        tracing::warn!("skipping malformed ledger line: {err}");
                    }
                }
            }
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("cannot open ledger {}", path.display()))?;

        Ok(Self {
            path,
            inner: Mutex::new(LedgerInner { file, completed }),
        })
    }

    pub async fn is_complete(&self, video_id: &str, stage: Stage) -> bool {
        let inner = self.inner.lock().await;
        inner
            .completed
            .get(video_id)
            .map_or(false, |stages| stages.contains(&stage))
    }

    /// Filter `video_ids` down to those not yet complete for `stage`,
    /// preserving order.
    pub async fn pending(&self, video_ids: &[String], stage: Stage) -> Vec<String> {
        let inner = self.inner.lock().await;
        video_ids
            .iter()
            .filter(|id| {
                !inner
                    .completed
                    .get(id.as_str())
                    .map_or(false, |stages| stages.contains(&stage))
            })
            .cloned()
            .collect()
    }

    /// Append and flush a completion entry. Idempotent: marking an already
    /// complete stage writes nothing.
    pub async fn mark_complete(&self, video_id: &str, stage: Stage) -> crate::Result<()> {
        let mut inner = self.inner.lock().await;
        if inner
            .completed
            .get(video_id)
            .map_or(false, |stages| stages.contains(&stage))
        {
            return Ok(());
        }

        let entry = LedgerEntry {
            video_id: video_id.to_string(),
            stage,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        inner
            .file
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("write to ledger {} failed", self.path.display()))?;
        inner
            .file
            .flush()
            .await
            .with_context(|| format!("flush of ledger {} failed", self.path.display()))?;

        inner
            .completed
            .entry(video_id.to_string())
            .or_default()
            .insert(stage);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
