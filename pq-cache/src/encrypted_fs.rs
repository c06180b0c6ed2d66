//! Encrypted filesystem cache store: the plain [`crate::fs::FsStore`] disk
//! layout, wrapped with AES-256-GCM, with large Arrow-IPC table payloads
//! split out into a companion `<hash>.bin` artifact (§4.C).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pq_cache_key::canonical::{stable_stringify, Canonical, Canonicalize};
use pq_errors::{PqError, PqResult};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::entry::{CacheEntry, CachedTable, TablePayload};
use crate::key_ring::KeyRing;
use crate::store::{CacheStore, PruneOptions};

const MAGIC: &[u8; 8] = b"FMLENC01";
const SCOPE: &str = "formula.power-query.cache.fs";
const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct BinaryRef {
    #[serde(rename = "__pq_cache_binary")]
    bin_name: String,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum DiskTable {
    BinaryRef(BinaryRef),
    Grid { columns: Vec<String>, rows: Vec<Vec<pq_value::Value>> },
}

#[derive(Serialize, Deserialize)]
struct DiskEntry {
    version: u32,
    table: DiskTable,
    meta: serde_json::Value,
    created_at_ms: i64,
    expires_at_ms: Option<i64>,
}

pub struct EncryptedFsStore {
    dir: PathBuf,
    key_ring: Arc<KeyRing>,
    encryption_enabled: AtomicBool,
}

fn aad_bytes() -> Vec<u8> {
    let c = Canonical::object(vec![
        ("scope".into(), Canonical::Str(SCOPE.to_string())),
        ("schemaVersion".into(), Canonical::Number(SCHEMA_VERSION.to_string())),
    ]);
    stable_stringify(&c).into_bytes()
}

fn encrypt(key_ring: &KeyRing, plaintext: &[u8]) -> PqResult<Vec<u8>> {
    let version = key_ring.current_version();
    let key_bytes = key_ring.current_key();
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let mut iv = [0u8; 12];
    rand::rng().fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);
    let aad = aad_bytes();
    let sealed = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: &aad })
        .map_err(|e| PqError::Internal(format!("encryption failed: {e}")))?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - 16);

    let mut out = Vec::with_capacity(8 + 4 + 12 + 16 + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&version.to_be_bytes());
    out.extend_from_slice(&iv);
    out.extend_from_slice(tag);
    out.extend_from_slice(ciphertext);
    Ok(out)
}

fn decrypt(key_ring: &KeyRing, bytes: &[u8]) -> PqResult<Vec<u8>> {
    if bytes.len() < 8 + 4 + 12 + 16 || &bytes[..8] != MAGIC {
        return Err(PqError::Internal("not a FMLENC01 ciphertext".into()));
    }
    let version = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
    let iv = &bytes[12..24];
    let tag = &bytes[24..40];
    let ciphertext = &bytes[40..];
    let key_bytes = key_ring
        .key_for_version(version)
        .ok_or_else(|| PqError::Internal(format!("no key for version {version}")))?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let nonce = Nonce::from_slice(iv);
    let aad = aad_bytes();
    let mut sealed = Vec::with_capacity(ciphertext.len() + tag.len());
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);
    cipher
        .decrypt(nonce, Payload { msg: &sealed, aad: &aad })
        .map_err(|e| PqError::Internal(format!("decryption failed: {e}")))
}

fn is_ciphertext(bytes: &[u8]) -> bool {
    bytes.len() >= 8 && &bytes[..8] == MAGIC
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

impl EncryptedFsStore {
    pub fn new(dir: impl Into<PathBuf>, key_ring: Arc<KeyRing>) -> PqResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, key_ring, encryption_enabled: AtomicBool::new(true) })
    }

    fn json_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn bin_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.bin"))
    }

    pub fn is_encryption_enabled(&self) -> bool {
        self.encryption_enabled.load(Ordering::SeqCst)
    }

    fn write_plain_bytes(&self, path: &Path, bytes: &[u8]) -> PqResult<()> {
        let payload = if self.is_encryption_enabled() { encrypt(&self.key_ring, bytes)? } else { bytes.to_vec() };
        let tmp = path.with_extension(format!("{}.tmp", path.extension().and_then(|e| e.to_str()).unwrap_or("dat")));
        fs::write(&tmp, &payload)?;
        if let Err(e) = fs::rename(&tmp, path) {
            if matches!(e.kind(), std::io::ErrorKind::AlreadyExists | std::io::ErrorKind::PermissionDenied) {
                let _ = fs::remove_file(path);
                fs::rename(&tmp, path)?;
            } else {
                let _ = fs::remove_file(&tmp);
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Reads a file, transparently decrypting it if it looks like a
    /// `FMLENC01` blob, tolerating plaintext for migration.
    fn read_plain_bytes(&self, path: &Path) -> PqResult<Option<Vec<u8>>> {
        let raw = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if is_ciphertext(&raw) {
            match decrypt(&self.key_ring, &raw) {
                Ok(plain) => Ok(Some(plain)),
                Err(_) => {
                    let _ = fs::remove_file(path);
                    Ok(None)
                }
            }
        } else {
            Ok(Some(raw))
        }
    }

    /// Rewrites every entry on disk under the new encryption mode,
    /// preserving readability. Leaves the companion `.bin` untouched if it
    /// already has matching mode coverage handled in the same pass.
    fn rewrite_all(&self, enable: bool) -> PqResult<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else { continue };
            if ext != "json" && ext != "bin" {
                continue;
            }
            let Some(plain) = self.read_plain_bytes(&path)? else { continue };
            let payload = if enable { encrypt(&self.key_ring, &plain)? } else { plain };
            let tmp = path.with_extension(format!("{ext}.tmp"));
            fs::write(&tmp, &payload)?;
            fs::rename(&tmp, &path)?;
        }
        Ok(())
    }

    pub fn enable_encryption(&self) -> PqResult<()> {
        self.rewrite_all(true)?;
        self.encryption_enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn disable_encryption(&self) -> PqResult<()> {
        self.rewrite_all(false)?;
        self.encryption_enabled.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl CacheStore for EncryptedFsStore {
    fn get(&self, key: &str) -> PqResult<Option<CacheEntry>> {
        let Some(plain) = self.read_plain_bytes(&self.json_path(key))? else { return Ok(None) };
        let disk: DiskEntry = match serde_json::from_slice(&plain) {
            Ok(d) => d,
            Err(_) => {
                let _ = fs::remove_file(self.json_path(key));
                return Ok(None);
            }
        };
        if disk.expires_at_ms.is_some_and(|exp| now_ms() >= exp) {
            let _ = fs::remove_file(self.json_path(key));
            let _ = fs::remove_file(self.bin_path(key));
            return Ok(None);
        }

        let table = match disk.table {
            DiskTable::Grid { columns, rows } => TablePayload::Grid { columns, rows },
            DiskTable::BinaryRef(bin_ref) => {
                // The companion file name is validated to equal the
                // expected one for this key, preventing cross-entry
                // tampering by an attacker who could otherwise point one
                // entry's JSON at another entry's ciphertext.
                let expected = format!("{key}.bin");
                if bin_ref.bin_name != expected {
                    let _ = fs::remove_file(self.json_path(key));
                    return Ok(None);
                }
                let Some(bytes) = self.read_plain_bytes(&self.bin_path(key))? else {
                    return Ok(None);
                };
                TablePayload::Arrow { bytes }
            }
        };

        Ok(Some(CacheEntry {
            value: CachedTable { version: disk.version, table, meta: disk.meta },
            created_at_ms: disk.created_at_ms,
            expires_at_ms: disk.expires_at_ms,
        }))
    }

    fn set(&self, key: &str, entry: &CacheEntry) -> PqResult<()> {
        let (table, bin_bytes) = match &entry.value.table {
            TablePayload::Grid { columns, rows } => {
                (DiskTable::Grid { columns: columns.clone(), rows: rows.clone() }, None)
            }
            TablePayload::Arrow { bytes } => {
                (DiskTable::BinaryRef(BinaryRef { bin_name: format!("{key}.bin") }), Some(bytes.clone()))
            }
        };
        let disk = DiskEntry {
            version: entry.value.version,
            table,
            meta: entry.value.meta.clone(),
            created_at_ms: entry.created_at_ms,
            expires_at_ms: entry.expires_at_ms,
        };
        let json_bytes = serde_json::to_vec(&disk)?;
        self.write_plain_bytes(&self.json_path(key), &json_bytes)?;
        if let Some(bytes) = bin_bytes {
            self.write_plain_bytes(&self.bin_path(key), &bytes)?;
        } else {
            let _ = fs::remove_file(self.bin_path(key));
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> PqResult<()> {
        let _ = fs::remove_file(self.json_path(key));
        let _ = fs::remove_file(self.bin_path(key));
        Ok(())
    }

    fn clear(&self) -> PqResult<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if matches!(path.extension().and_then(|e| e.to_str()), Some("json") | Some("bin")) {
                let _ = fs::remove_file(path);
            }
        }
        Ok(())
    }

    fn prune(&self, opts: PruneOptions) -> PqResult<()> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        for key in &keys {
            if self.get(key)?.is_none() {
                // already evicted as expired/corrupt by `get`'s side effects
            }
        }
        if opts.max_entries.is_none() && opts.max_bytes.is_none() {
            return Ok(());
        }
        // LRU over remaining entries, keyed by json mtime.
        let mut remaining: Vec<(String, i64, u64)> = Vec::new();
        for key in keys {
            let path = self.json_path(&key);
            let Ok(meta) = fs::metadata(&path) else { continue };
            let mtime = meta
                .modified()
                .ok()
                .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            let bin_len = fs::metadata(self.bin_path(&key)).map(|m| m.len()).unwrap_or(0);
            remaining.push((key, mtime, meta.len() + bin_len));
        }
        remaining.sort_by_key(|(_, mtime, _)| *mtime);
        if let Some(max_entries) = opts.max_entries {
            while remaining.len() > max_entries {
                let (key, _, _) = remaining.remove(0);
                self.delete(&key)?;
            }
        }
        if let Some(max_bytes) = opts.max_bytes {
            let mut total: u64 = remaining.iter().map(|(_, _, b)| *b).sum();
            let mut i = 0;
            while total > max_bytes && i < remaining.len() {
                total = total.saturating_sub(remaining[i].2);
                self.delete(&remaining[i].0)?;
                i += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_arrow(bytes: Vec<u8>) -> CacheEntry {
        CacheEntry { value: CachedTable::arrow(bytes), created_at_ms: 0, expires_at_ms: None }
    }

    #[test]
    fn arrow_payload_splits_into_companion_bin() {
        let dir = tempfile::tempdir().unwrap();
        let ring = Arc::new(KeyRing::new());
        let store = EncryptedFsStore::new(dir.path(), ring).unwrap();
        let bytes = vec![1, 2, 3, 4, 5];
        store.set("k", &entry_with_arrow(bytes.clone())).unwrap();
        assert!(dir.path().join("k.bin").exists());

        let raw_json = fs::read(dir.path().join("k.json")).unwrap();
        assert!(is_ciphertext(&raw_json));
        let raw_bin = fs::read(dir.path().join("k.bin")).unwrap();
        assert!(is_ciphertext(&raw_bin));

        let round_tripped = store.get("k").unwrap().unwrap();
        match round_tripped.value.table {
            TablePayload::Arrow { bytes: got } => assert_eq!(got, bytes),
            _ => panic!("expected arrow payload"),
        }
    }

    #[test]
    fn disable_encryption_leaves_plaintext_marker_files() {
        let dir = tempfile::tempdir().unwrap();
        let ring = Arc::new(KeyRing::new());
        let store = EncryptedFsStore::new(dir.path(), ring).unwrap();
        store.set("k", &entry_with_arrow(vec![9, 9])).unwrap();
        store.disable_encryption().unwrap();

        let raw_json = fs::read(dir.path().join("k.json")).unwrap();
        assert!(!is_ciphertext(&raw_json));
        let text = String::from_utf8(raw_json).unwrap();
        assert!(text.contains("__pq_cache_binary"));
        assert!(text.contains("k.bin"));

        let raw_bin = fs::read(dir.path().join("k.bin")).unwrap();
        assert!(!is_ciphertext(&raw_bin));
        assert_eq!(raw_bin, vec![9, 9]);
    }

    #[test]
    fn rotate_key_preserves_prior_entries() {
        let dir = tempfile::tempdir().unwrap();
        let ring = Arc::new(KeyRing::new());
        let store = EncryptedFsStore::new(dir.path(), ring.clone()).unwrap();
        store.set("k", &entry_with_arrow(vec![7])).unwrap();
        ring.rotate();
        assert!(store.get("k").unwrap().is_some());
    }

    #[test]
    fn mismatched_bin_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ring = Arc::new(KeyRing::new());
        let store = EncryptedFsStore::new(dir.path(), ring).unwrap();
        store.set("a", &entry_with_arrow(vec![1])).unwrap();
        store.set("b", &entry_with_arrow(vec![2])).unwrap();

        // Tamper: point "a"'s json at "b"'s bin by rewriting the disk entry.
        let plain = store.read_plain_bytes(&store.json_path("a")).unwrap().unwrap();
        let mut disk: DiskEntry = serde_json::from_slice(&plain).unwrap();
        disk.table = DiskTable::BinaryRef(BinaryRef { bin_name: "b.bin".to_string() });
        let tampered = serde_json::to_vec(&disk).unwrap();
        store.write_plain_bytes(&store.json_path("a"), &tampered).unwrap();

        assert!(store.get("a").unwrap().is_none());
    }
}
