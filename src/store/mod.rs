//! Append-only line-delimited output stores.
//!
//! Each store is single-writer: the file handle lives behind an async mutex
//! and a record's line is assembled before the lock is taken, so concurrent
//! workers never interleave partial lines.

use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub mod ledger;

pub use ledger::Ledger;

const VIDEOS_FILE: &str = "videos.jsonl";
const TRANSCRIPTS_FILE: &str = "transcripts.jsonl";
const COMMENTS_FILE: &str = "comments.jsonl";
const LEDGER_FILE: &str = "ledger.jsonl";

/// One append-only JSONL file: one JSON object per line, UTF-8.
pub struct JsonlStore {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonlStore {
    pub async fn open(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("cannot create output directory {}", parent.display()))?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("cannot open output file {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Append one record as a single line and flush it before returning.
    pub async fn append<T: Serialize>(&self, record: &T) -> crate::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("write to {} failed", self.path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flush of {} failed", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The three output stores of a harvest run.
pub struct OutputStores {
    pub videos: JsonlStore,
    pub transcripts: JsonlStore,
    pub comments: JsonlStore,
}

impl OutputStores {
    pub async fn open(output_dir: &Path) -> crate::Result<Self> {
        Ok(Self {
            videos: JsonlStore::open(output_dir.join(VIDEOS_FILE)).await?,
            transcripts: JsonlStore::open(output_dir.join(TRANSCRIPTS_FILE)).await?,
            comments: JsonlStore::open(output_dir.join(COMMENTS_FILE)).await?,
        })
    }
}

/// Ledger path inside an output directory.
pub fn ledger_path(output_dir: &Path) -> PathBuf {
    output_dir.join(LEDGER_FILE)
}
