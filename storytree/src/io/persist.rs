//! Persistence adapter boundary: opaque per-context blobs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

/// Load/save one opaque blob per context key.
///
/// The engine calls `save` after every mutation; coalescing rapid saves
/// (debouncing) is the adapter's concern, not the engine's.
pub trait PersistenceAdapter {
    fn load(&self, key: &str) -> Result<Option<Value>>;
    fn save(&mut self, key: &str, blob: &Value) -> Result<()>;
}

/// File-backed adapter: one pretty-printed JSON file per context key,
/// written atomically (temp file + rename).
#[derive(Debug, Clone)]
pub struct DirAdapter {
    dir: PathBuf,
}

impl DirAdapter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }
}

impl PersistenceAdapter for DirAdapter {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.blob_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read blob {}", path.display()))?;
        let blob: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parse blob {}", path.display()))?;
        Ok(Some(blob))
    }

    fn save(&mut self, key: &str, blob: &Value) -> Result<()> {
        let path = self.blob_path(key);
        debug!(key, path = %path.display(), "saving story blob");
        let mut buf = serde_json::to_string_pretty(blob).context("serialize blob")?;
        buf.push('\n');
        write_atomic(&path, &buf)
    }
}

/// Keys come from the host's context identity (conversation + character)
/// and may contain arbitrary characters; map them to safe file names.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("blob path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp blob {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace blob {}", path.display()))?;
    Ok(())
}
