use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ComplianceError, ComplianceResult};
use crate::models::AuditLogEntry;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm used to compute `entryHash`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgorithm {
    /// 32-bit rolling checksum rendered in base 36. Detects accidental edits only.
    Rolling,
    #[default]
    Sha256,
    /// Keyed SHA-256; forging an entry requires the key
    HmacSha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Rolling => "rolling",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::HmacSha256 => "hmac-sha256",
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rolling" => Ok(HashAlgorithm::Rolling),
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "hmac-sha256" | "hmac" => Ok(HashAlgorithm::HmacSha256),
            other => Err(format!("Unknown hash algorithm: {}", other)),
        }
    }
}

/// Computes and checks entry hashes
#[derive(Clone)]
pub struct EntryHasher {
    algorithm: HashAlgorithm,
    key: Option<Vec<u8>>,
}

impl EntryHasher {
    /// `key` is only consulted by [`HashAlgorithm::HmacSha256`], which requires it
    pub fn new(algorithm: HashAlgorithm, key: Option<&str>) -> ComplianceResult<Self> {
        let key = key.filter(|k| !k.is_empty()).map(|k| k.as_bytes().to_vec());
        if algorithm == HashAlgorithm::HmacSha256 && key.is_none() {
            return Err(ComplianceError::Config(
                "hmac-sha256 hashing requires a non-empty key".to_string(),
            ));
        }
        Ok(Self { algorithm, key })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hash every field of `entry` except `entryHash`
    pub fn hash_entry(&self, entry: &AuditLogEntry) -> ComplianceResult<String> {
        let preimage = preimage(entry)?;
        match self.algorithm {
            HashAlgorithm::Rolling => Ok(rolling_hash(&preimage)),
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(preimage.as_bytes());
                Ok(format!("{:x}", hasher.finalize()))
            }
            HashAlgorithm::HmacSha256 => {
                let key = self
                    .key
                    .as_deref()
                    .ok_or_else(|| ComplianceError::Hash("missing HMAC key".to_string()))?;
                let mut mac = HmacSha256::new_from_slice(key).map_err(|e| ComplianceError::Hash(e.to_string()))?;
                mac.update(preimage.as_bytes());
                Ok(format!("{:x}", mac.finalize().into_bytes()))
            }
        }
    }

    /// Whether the stored `entryHash` matches a fresh computation
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        match self.hash_entry(entry) {
            Ok(hash) => hash == entry.entry_hash,
            Err(_) => false,
        }
    }
}

impl Default for EntryHasher {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::Sha256,
            key: None,
        }
    }
}

impl std::fmt::Debug for EntryHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryHasher")
            .field("algorithm", &self.algorithm)
            .field("keyed", &self.key.is_some())
            .finish()
    }
}

/// Canonical JSON of the hashed fields. Object keys come out sorted.
fn preimage(entry: &AuditLogEntry) -> ComplianceResult<String> {
    let material = serde_json::json!({
        "id": entry.id,
        "timestamp": entry.timestamp,
        "subjectId": entry.subject_id,
        "groupId": entry.group_id,
        "module": entry.module,
        "action": entry.action,
        "actor": entry.actor,
        "details": entry.details,
        "previousEntryHash": entry.previous_entry_hash,
    });
    Ok(serde_json::to_string(&material)?)
}

/// `hash = hash * 31 + unit` over UTF-16 code units in wrapping 32-bit
/// arithmetic, then the magnitude in base 36, left-padded to 8 characters
pub fn rolling_hash(input: &str) -> String {
    let hash = input
        .encode_utf16()
        .fold(0i32, |hash, unit| (hash << 5).wrapping_sub(hash).wrapping_add(unit as i32));

    let mut value = hash.unsigned_abs();
    let mut digits = Vec::new();
    loop {
        digits.push(char::from_digit(value % 36, 36).unwrap_or('0'));
        value /= 36;
        if value == 0 {
            break;
        }
    }
    let encoded: String = digits.into_iter().rev().collect();
    format!("{:0>8}", encoded)
}
