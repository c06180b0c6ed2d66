//! Symmetric key lifecycle for the encrypted filesystem store (§4.C,
//! GLOSSARY "Key ring"). Encryption always uses the current version;
//! decryption selects the key by the version embedded in the ciphertext
//! header, so rotating never breaks previously written entries.

use std::collections::BTreeMap;

use base64::Engine;
use parking_lot::Mutex;
use pq_errors::{PqError, PqResult};
use rand::RngCore;
use serde::{Deserialize, Serialize};

pub const KEY_LEN: usize = 32;

#[derive(Clone, Serialize, Deserialize)]
struct PersistedKeyRing {
    current_version: u32,
    keys: BTreeMap<u32, String>,
}

/// An ordered set of AES-256 keys versioned by a monotone counter, with
/// exactly one "current" key used for new writes. Rotation is
/// single-writer: the internal mutex makes concurrent `rotate()` calls
/// serialize rather than race on the next version number.
pub struct KeyRing {
    inner: Mutex<Inner>,
}

struct Inner {
    current_version: u32,
    keys_by_version: BTreeMap<u32, [u8; KEY_LEN]>,
}

impl KeyRing {
    /// A fresh ring with a single randomly generated version-1 key.
    pub fn new() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        let mut keys_by_version = BTreeMap::new();
        keys_by_version.insert(1, key);
        Self { inner: Mutex::new(Inner { current_version: 1, keys_by_version }) }
    }

    pub fn current_version(&self) -> u32 {
        self.inner.lock().current_version
    }

    pub fn current_key(&self) -> [u8; KEY_LEN] {
        let inner = self.inner.lock();
        inner.keys_by_version[&inner.current_version]
    }

    pub fn key_for_version(&self, version: u32) -> Option<[u8; KEY_LEN]> {
        self.inner.lock().keys_by_version.get(&version).copied()
    }

    /// Appends a new key and makes it current. Old versions remain so that
    /// entries encrypted under them still decrypt.
    pub fn rotate(&self) -> u32 {
        let mut key = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        let mut inner = self.inner.lock();
        let next = inner.current_version + 1;
        inner.keys_by_version.insert(next, key);
        inner.current_version = next;
        next
    }

    /// Serializes to the host-keychain JSON shape:
    /// `{currentVersion, keys:{<version>:<base64>}}`.
    pub fn to_json(&self) -> PqResult<serde_json::Value> {
        let inner = self.inner.lock();
        let keys = inner
            .keys_by_version
            .iter()
            .map(|(v, k)| (v.to_string(), base64::engine::general_purpose::STANDARD.encode(k)))
            .collect();
        Ok(serde_json::to_value(PersistedKeyRing { current_version: inner.current_version, keys })?)
    }

    pub fn from_json(value: &serde_json::Value) -> PqResult<Self> {
        let persisted: PersistedKeyRing = serde_json::from_value(value.clone())?;
        let mut keys_by_version = BTreeMap::new();
        for (version, encoded) in persisted.keys {
            let version: u32 = version
                .parse()
                .map_err(|_| PqError::contract(format!("key ring: invalid version {version}")))?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| PqError::contract(format!("key ring: invalid base64 key: {e}")))?;
            let key: [u8; KEY_LEN] = bytes
                .try_into()
                .map_err(|_| PqError::contract("key ring: key is not 32 bytes"))?;
            keys_by_version.insert(version, key);
        }
        if !keys_by_version.contains_key(&persisted.current_version) {
            return Err(PqError::contract("key ring: current version has no matching key"));
        }
        Ok(Self { inner: Mutex::new(Inner { current_version: persisted.current_version, keys_by_version }) })
    }
}

impl Default for KeyRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_keeps_old_keys_readable() {
        let ring = KeyRing::new();
        let v1 = ring.current_version();
        let k1 = ring.current_key();
        let v2 = ring.rotate();
        assert_ne!(v1, v2);
        assert_eq!(ring.key_for_version(v1), Some(k1));
        assert_eq!(ring.current_key(), ring.key_for_version(v2).unwrap());
    }

    #[test]
    fn round_trips_through_json() {
        let ring = KeyRing::new();
        ring.rotate();
        let json = ring.to_json().unwrap();
        let restored = KeyRing::from_json(&json).unwrap();
        assert_eq!(restored.current_version(), ring.current_version());
        assert_eq!(restored.current_key(), ring.current_key());
    }
}
