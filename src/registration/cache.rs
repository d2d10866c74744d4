//! Persistent registration cache
//!
//! A JSON manifest under the cache directory stores one entry per app key,
//! bound to the installation fingerprint it was verified with. Each entry
//! carries a SHA-256
//! checksum over its fields, so a hand-edited or truncated entry reads as
//! invalid instead of granting registration.

use super::RegisteredInfo;
use aerolink_shared::now_ms;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

const MANIFEST_FILE: &str = "registration.json";
const INSTALLATION_FILE: &str = "installation-id";
const CHECKSUM_DOMAIN: &str = "aerolink-registration-v1";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedRegistration {
    app_key: String,
    fingerprint: String,
    verified_at_ms: u64,
    expires_at_ms: u64,
    checksum: String,
}

impl CachedRegistration {
    fn seal(info: &RegisteredInfo) -> Self {
        Self {
            app_key: info.app_key.clone(),
            fingerprint: info.fingerprint.clone(),
            verified_at_ms: info.verified_at_ms,
            expires_at_ms: info.expires_at_ms,
            checksum: checksum(info),
        }
    }

    fn info(&self) -> RegisteredInfo {
        RegisteredInfo {
            app_key: self.app_key.clone(),
            fingerprint: self.fingerprint.clone(),
            verified_at_ms: self.verified_at_ms,
            expires_at_ms: self.expires_at_ms,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    #[serde(default = "default_version")]
    version: String,
    entries: HashMap<String, CachedRegistration>,
}

fn default_version() -> String {
    "2".to_string()
}

/// Why a cache entry could not be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    Expired,
    ChecksumMismatch,
    FingerprintMismatch,
    Corrupt(String),
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::Expired => write!(f, "expired"),
            InvalidReason::ChecksumMismatch => write!(f, "checksum mismatch"),
            InvalidReason::FingerprintMismatch => write!(f, "fingerprint mismatch"),
            InvalidReason::Corrupt(e) => write!(f, "corrupt cache file: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Valid(RegisteredInfo),
    Invalid(InvalidReason),
    Absent,
}

pub struct RegistrationCache {
    dir: PathBuf,
}

impl RegistrationCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Stable per-installation identifier, created on first use
    pub fn fingerprint(&self) -> Result<String, CacheError> {
        let path = self.dir.join(INSTALLATION_FILE);
        if let Ok(existing) = std::fs::read_to_string(&path) {
            let existing = existing.trim();
            if uuid::Uuid::parse_str(existing).is_ok() {
                return Ok(existing.to_string());
            }
            warn!("[REG] Installation id unreadable, generating a new one");
        }

        let id = uuid::Uuid::new_v4().to_string();
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&path, &id)?;
        debug!("[REG] New installation id {}", id);
        Ok(id)
    }

    pub fn lookup(&self, app_key: &str, fingerprint: &str) -> CacheLookup {
        self.lookup_at(app_key, fingerprint, now_ms())
    }

    pub fn lookup_at(&self, app_key: &str, fingerprint: &str, now_ms: u64) -> CacheLookup {
        let manifest = match self.read_manifest() {
            Ok(Some(manifest)) => manifest,
            Ok(None) => return CacheLookup::Absent,
            Err(e) => return CacheLookup::Invalid(InvalidReason::Corrupt(e.to_string())),
        };

        let Some(entry) = manifest.entries.get(app_key) else {
            return CacheLookup::Absent;
        };

        let info = entry.info();
        if checksum(&info) != entry.checksum || info.app_key != app_key {
            return CacheLookup::Invalid(InvalidReason::ChecksumMismatch);
        }
        // Copied from another installation
        if info.fingerprint != fingerprint {
            return CacheLookup::Invalid(InvalidReason::FingerprintMismatch);
        }
        if info.expires_at_ms <= now_ms {
            return CacheLookup::Invalid(InvalidReason::Expired);
        }
        CacheLookup::Valid(info)
    }

    pub fn store(&self, info: &RegisteredInfo) -> Result<(), CacheError> {
        // A corrupt manifest is replaced rather than blocking new entries
        let mut manifest = match self.read_manifest() {
            Ok(Some(manifest)) => manifest,
            Ok(None) => Manifest::default(),
            Err(e) => {
                warn!("[REG] Replacing unreadable registration cache: {}", e);
                Manifest::default()
            }
        };
        manifest.version = default_version();
        manifest
            .entries
            .insert(info.app_key.clone(), CachedRegistration::seal(info));
        self.write_manifest(&manifest)
    }

    fn read_manifest(&self) -> Result<Option<Manifest>, CacheError> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write_manifest(&self, manifest: &Manifest) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(manifest)?;
        // Write-then-rename so a crash never leaves a half-written manifest
        let staging = self.dir.join(format!("{}.tmp", MANIFEST_FILE));
        std::fs::write(&staging, content)?;
        std::fs::rename(&staging, self.manifest_path())?;
        Ok(())
    }
}

fn checksum(info: &RegisteredInfo) -> String {
    let mut hasher = Sha256::new();
    hasher.update(CHECKSUM_DOMAIN.as_bytes());
    hasher.update(info.app_key.as_bytes());
    hasher.update([0]);
    hasher.update(info.fingerprint.as_bytes());
    hasher.update([0]);
    hasher.update(info.verified_at_ms.to_be_bytes());
    hasher.update(info.expires_at_ms.to_be_bytes());
    hex::encode(hasher.finalize())
}
