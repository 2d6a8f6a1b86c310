//! Write-temp-then-rename persistence.
//!
//! A reader of `path` sees either the previous contents or the new contents,
//! never a partial file. A crash between [`stage`] and [`StagedWrite::commit`]
//! leaves only a stray `*.tmp` sibling behind.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

/// A fully written and synced temp file waiting to replace its target.
#[derive(Debug)]
#[must_use = "a staged write does nothing until committed"]
pub struct StagedWrite {
    tmp_path: PathBuf,
    path: PathBuf,
}

impl StagedWrite {
    pub fn commit(self) -> Result<()> {
        fs::rename(&self.tmp_path, &self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        if let Some(parent) = self.path.parent()
            && let Ok(dir) = File::open(parent)
        {
            let _ = dir.sync_all();
        }
        debug!(path = %self.path.display(), "committed write");
        Ok(())
    }
}

/// Write `contents` next to `path` and fsync it, without touching `path`.
pub fn stage(path: &Path, contents: &[u8]) -> Result<StagedWrite> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;

    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);

    let mut file = File::create(&tmp_path)
        .with_context(|| format!("create temp file {}", tmp_path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("sync temp file {}", tmp_path.display()))?;

    Ok(StagedWrite {
        tmp_path,
        path: path.to_path_buf(),
    })
}

pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    stage(path, contents.as_bytes())?.commit()
}

/// Pretty JSON with a trailing newline, written atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, &to_pretty_json(value)?)
}

pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<String> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    Ok(buf)
}
