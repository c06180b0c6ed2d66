//! The plain filesystem cache store: one `<fnv1a64>.json` file per key,
//! written atomically via `tmp -> rename` (§4.C).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use pq_errors::PqResult;

use crate::entry::CacheEntry;
use crate::store::{CacheStore, PruneOptions};

pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    pub fn new(dir: impl Into<PathBuf>) -> PqResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Atomic write: write to a sibling temp file, then rename over the
    /// target. On Windows, a rename that lands on an existing file can
    /// fail with `EEXIST`/`EPERM`; the fallback removes the target first.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> PqResult<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, path) {
            if matches!(
                e.kind(),
                std::io::ErrorKind::AlreadyExists | std::io::ErrorKind::PermissionDenied
            ) {
                let _ = fs::remove_file(path);
                fs::rename(&tmp, path)?;
            } else {
                let _ = fs::remove_file(&tmp);
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn mtime_ms(path: &Path) -> Option<i64> {
        let meta = fs::metadata(path).ok()?;
        let modified = meta.modified().ok()?;
        modified.duration_since(UNIX_EPOCH).ok().map(|d| d.as_millis() as i64)
    }

    /// Touch a file's mtime to the current time, approximating
    /// last-access tracking for LRU pruning.
    fn touch(path: &Path) {
        let now = filetime_now();
        let _ = filetime_set(path, now);
    }
}

/// Best-effort "now" for `touch`; falls back to leaving mtime untouched on
/// any platform error, since this is an approximation to begin with.
fn filetime_now() -> SystemTime {
    SystemTime::now()
}

fn filetime_set(path: &Path, when: SystemTime) -> std::io::Result<()> {
    let f = fs::OpenOptions::new().write(true).open(path)?;
    f.set_modified(when)
}

impl CacheStore for FsStore {
    fn get(&self, key: &str) -> PqResult<Option<CacheEntry>> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        // A parse failure here is cache corruption, not a propagated
        // error: §7 requires it be treated as a miss and the file
        // best-effort removed.
        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(e) => e,
            Err(_) => {
                let _ = fs::remove_file(&path);
                return Ok(None);
            }
        };
        let now = now_ms();
        if !entry.is_fresh(now) {
            let _ = fs::remove_file(&path);
            return Ok(None);
        }
        Self::touch(&path);
        Ok(Some(entry))
    }

    fn set(&self, key: &str, entry: &CacheEntry) -> PqResult<()> {
        let bytes = serde_json::to_vec(entry)?;
        self.write_atomic(&self.path_for(key), &bytes)
    }

    fn delete(&self, key: &str) -> PqResult<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> PqResult<()> {
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().extension().is_some_and(|e| e == "json") {
                let _ = fs::remove_file(entry.path());
            }
        }
        Ok(())
    }

    fn prune(&self, opts: PruneOptions) -> PqResult<()> {
        let mut files: Vec<(PathBuf, i64, u64)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            if let Ok(bytes) = fs::read(&path) {
                match serde_json::from_slice::<CacheEntry>(&bytes) {
                    Ok(cached) if !cached.is_fresh(opts.now_ms) => {
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    Ok(_) => {}
                    Err(_) => {
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                }
                let mtime = Self::mtime_ms(&path).unwrap_or(0);
                files.push((path, mtime, bytes.len() as u64));
            }
        }
        // LRU pruning: oldest mtime first.
        files.sort_by_key(|(_, mtime, _)| *mtime);

        if let Some(max_entries) = opts.max_entries {
            while files.len() > max_entries {
                let (path, _, _) = files.remove(0);
                let _ = fs::remove_file(path);
            }
        }
        if let Some(max_bytes) = opts.max_bytes {
            let mut total: u64 = files.iter().map(|(_, _, b)| *b).sum();
            let mut i = 0;
            while total > max_bytes && i < files.len() {
                total = total.saturating_sub(files[i].2);
                let _ = fs::remove_file(&files[i].0);
                i += 1;
            }
        }
        Ok(())
    }
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CachedTable;

    fn entry(expires_at_ms: Option<i64>) -> CacheEntry {
        CacheEntry { value: CachedTable::inline(vec!["a".into()], vec![]), created_at_ms: 0, expires_at_ms }
    }

    #[test]
    fn round_trips_through_the_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        store.set("k", &entry(None)).unwrap();
        assert!(store.get("k").unwrap().is_some());
        assert!(dir.path().join("k.json").exists());
        assert!(!dir.path().join("k.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_a_miss_and_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        fs::write(dir.path().join("k.json"), b"not json").unwrap();
        assert!(store.get("k").unwrap().is_none());
        assert!(!dir.path().join("k.json").exists());
    }

    #[test]
    fn expired_entry_is_removed_on_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        store.set("k", &entry(Some(1))).unwrap();
        assert!(store.get("k").unwrap().is_none());
        assert!(!dir.path().join("k.json").exists());
    }

    #[test]
    fn lru_prune_keeps_most_recently_touched() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        store.set("a", &entry(None)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        store.set("b", &entry(None)).unwrap();
        store.prune(PruneOptions { now_ms: i64::MAX, max_entries: Some(1), max_bytes: None }).unwrap();
        assert!(store.get("a").unwrap().is_none());
        assert!(store.get("b").unwrap().is_some());
    }
}
