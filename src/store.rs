use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use tracing::debug;

/// Whole-value key/value persistence. Values are replaced, never merged.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<Value>>;
  async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Process-local store, used by tests and as a scratch backend.
#[derive(Default)]
pub struct MemoryStore {
  values: StdMutex<HashMap<String, Value>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_value(key: &str, value: Value) -> Self {
    let store = Self::new();
    store.lock().insert(key.to_string(), value);
    store
  }

  /// Synchronous peek, for inspection outside the async API.
  pub fn snapshot(&self, key: &str) -> Option<Value> {
    self.lock().get(key).cloned()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
    self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
  async fn get(&self, key: &str) -> Result<Option<Value>> {
    Ok(self.lock().get(key).cloned())
  }

  async fn set(&self, key: &str, value: Value) -> Result<()> {
    self.lock().insert(key.to_string(), value);
    Ok(())
  }
}

/// One pretty-printed JSON file per key inside a directory.
pub struct JsonFileStore {
  dir: PathBuf,
}

impl JsonFileStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn path_for(&self, key: &str) -> PathBuf {
    let file: String =
      key.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect();
    self.dir.join(format!("{}.json", file))
  }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
  async fn get(&self, key: &str) -> Result<Option<Value>> {
    let path = self.path_for(key);
    let content = match tokio::fs::read_to_string(&path).await {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    let value = serde_json::from_str(&content).with_context(|| format!("Malformed JSON in {}", path.display()))?;
    Ok(Some(value))
  }

  async fn set(&self, key: &str, value: Value) -> Result<()> {
    tokio::fs::create_dir_all(&self.dir)
      .await
      .with_context(|| format!("Failed to create store directory {}", self.dir.display()))?;

    let path = self.path_for(key);
    let content = serde_json::to_string_pretty(&value).context("Failed to serialize store value")?;

    // Write to a temp file, then rename (atomic)
    let tmp_path = path.with_extension("json.part");
    tokio::fs::write(&tmp_path, content).await.with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, &path).await.with_context(|| format!("Failed to finalize {}", path.display()))?;

    debug!(key, path = %path.display(), "store: value written");
    Ok(())
  }
}
