use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
}

#[derive(Debug, Clone)]
pub struct ChunkCache {
    dir: PathBuf,
}

impl ChunkCache {
    pub fn open_default() -> Result<Self> {
        let base = dirs::data_dir().ok_or_else(|| anyhow!("cannot resolve data dir"))?;
        Ok(Self::at(base.join("rusty-narrative").join("chunks")))
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stable key over every input that affects the generated text.
    pub fn key(parts: &[&str]) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// A missing or unreadable entry is a miss.
    pub fn get(&self, key: &str) -> Option<String> {
        let path = self.path_for_key(key);
        let text = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CacheEntry<String>>(&text) {
            Ok(entry) => Some(entry.value),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "ignoring corrupt cache entry");
                None
            }
        }
    }

    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let entry = CacheEntry { value };
        let text = serde_json::to_string_pretty(&entry)?;
        fs::write(self.path_for_key(key), text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ChunkCache::at(dir.path().join("chunks"));
        let key = ChunkCache::key(&["openai", "gpt-4o", "0.7", "prompt"]);
        assert_eq!(cache.get(&key), None);
        cache.put(&key, "narrated").unwrap();
        assert_eq!(cache.get(&key).as_deref(), Some("narrated"));
    }

    #[test]
    fn key_separates_parts() {
        assert_ne!(ChunkCache::key(&["ab", "c"]), ChunkCache::key(&["a", "bc"]));
        assert_eq!(ChunkCache::key(&["a", "b"]), ChunkCache::key(&["a", "b"]));
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ChunkCache::at(dir.path());
        fs::write(dir.path().join("bad.json"), "not json").unwrap();
        assert_eq!(cache.get("bad"), None);
    }
}
