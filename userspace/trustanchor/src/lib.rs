// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Trust anchor store for agent authentication and boot policy
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 7 unit tests
//!
//! PUBLIC API:
//!   - TrustAnchor: Ed25519 public key + BootPolicy flags
//!   - AnchorStore: read-only source of the anchor (no write path exists)
//!   - StaticAnchorStore: ROM/OTP-resident anchor
//!   - FileAnchorStore: anchor directory (`anchor.pub` + optional `policy.toml`)
//!
//! DEPENDENCIES:
//!   - ed25519-dalek: key validation and SPKI decoding
//!   - bitflags: boot policy word
//!   - toml/serde: policy file
//!   - thiserror: Error types

#![forbid(unsafe_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bitflags::bitflags;
use ed25519_dalek::{pkcs8::DecodePublicKey, VerifyingKey};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// File name of the anchor public key inside an anchor directory.
pub const ANCHOR_KEY_FILE: &str = "anchor.pub";
/// File name of the boot policy inside an anchor directory.
pub const POLICY_FILE: &str = "policy.toml";

bitflags! {
    /// Boot policy word, laid out like the controller's OTP boot configuration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BootPolicy: u32 {
        /// Secure boot gate is armed. Clearing it is the development opt-out.
        const SECURE_BOOT = 0x01;
        /// Re-run manifest verification on the active bank.
        const VERIFY_MANIFEST = 0x02;
        /// Re-check on-media integrity of the active bank.
        const VERIFY_AGENT = 0x04;
        /// Enforce memory/safety budgets and image structure.
        const VERIFY_SAFETY = 0x08;
    }
}

impl BootPolicy {
    /// Every verification step enabled.
    pub const ENFORCED: Self = Self::all();

    /// Verification steps that must accompany `SECURE_BOOT`.
    pub const STEPS: Self = Self::VERIFY_MANIFEST.union(Self::VERIFY_AGENT).union(Self::VERIFY_SAFETY);

    /// Decodes a raw OTP word; unknown bits are ignored.
    pub fn from_word(word: u32) -> Self {
        Self::from_bits_truncate(word)
    }
}

impl Default for BootPolicy {
    fn default() -> Self {
        Self::ENFORCED
    }
}

/// Errors produced while loading trust anchors.
#[derive(Debug, Error)]
pub enum AnchorError {
    /// I/O failure while reading anchor files.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Provided key material was malformed.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// Policy file could not be parsed.
    #[error("invalid policy {path}: {source}")]
    Policy {
        /// Policy file path.
        path: PathBuf,
        /// Parse failure.
        #[source]
        source: toml::de::Error,
    },
}

/// The key used to judge agents, plus the policy governing the boot gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    public_key: [u8; 32],
    policy: BootPolicy,
}

impl TrustAnchor {
    /// Builds an anchor after checking the key decodes to a curve point.
    pub fn new(public_key: [u8; 32], policy: BootPolicy) -> Result<Self, AnchorError> {
        VerifyingKey::from_bytes(&public_key)
            .map_err(|err| AnchorError::InvalidKey(err.to_string()))?;
        Ok(Self { public_key, policy })
    }

    /// Raw Ed25519 public key.
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    /// Boot policy flags.
    pub fn policy(&self) -> BootPolicy {
        self.policy
    }

    /// Short stable identifier of the anchor key, for logs.
    pub fn key_id(&self) -> String {
        let digest = Sha256::digest(self.public_key);
        hex::encode(&digest[..8])
    }
}

/// Read-only source of the trust anchor.
///
/// No store/update method exists: the anchor lives in storage
/// the hot-swap path cannot write.
pub trait AnchorStore {
    /// Loads the anchor.
    fn load(&self) -> Result<TrustAnchor, AnchorError>;
}

/// Anchor compiled into ROM or read once from OTP.
#[derive(Debug, Clone)]
pub struct StaticAnchorStore {
    anchor: TrustAnchor,
}

impl StaticAnchorStore {
    /// Wraps an already validated anchor.
    pub fn new(anchor: TrustAnchor) -> Self {
        Self { anchor }
    }

    /// Builds the store from the raw OTP key bytes and boot word.
    pub fn from_otp(public_key: [u8; 32], boot_word: u32) -> Result<Self, AnchorError> {
        Ok(Self { anchor: TrustAnchor::new(public_key, BootPolicy::from_word(boot_word))? })
    }
}

impl AnchorStore for StaticAnchorStore {
    fn load(&self) -> Result<TrustAnchor, AnchorError> {
        Ok(self.anchor.clone())
    }
}

/// Anchor directory provisioned on a read-only partition.
///
/// `anchor.pub` holds the key as hex or as an SPKI PEM block. `policy.toml` is
/// optional; when absent every verification step is enforced.
#[derive(Debug, Clone)]
pub struct FileAnchorStore {
    dir: PathBuf,
}

impl FileAnchorStore {
    /// Creates a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl AnchorStore for FileAnchorStore {
    fn load(&self) -> Result<TrustAnchor, AnchorError> {
        let key_path = self.dir.join(ANCHOR_KEY_FILE);
        let key = load_key_file(&key_path)?;
        let policy = load_policy(&self.dir.join(POLICY_FILE))?;
        TrustAnchor::new(key, policy)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPolicy {
    #[serde(default = "enabled")]
    secure_boot: bool,
    #[serde(default = "enabled")]
    verify_manifest: bool,
    #[serde(default = "enabled")]
    verify_agent: bool,
    #[serde(default = "enabled")]
    verify_safety: bool,
}

fn enabled() -> bool {
    true
}

impl From<RawPolicy> for BootPolicy {
    fn from(raw: RawPolicy) -> Self {
        let mut policy = BootPolicy::empty();
        policy.set(BootPolicy::SECURE_BOOT, raw.secure_boot);
        policy.set(BootPolicy::VERIFY_MANIFEST, raw.verify_manifest);
        policy.set(BootPolicy::VERIFY_AGENT, raw.verify_agent);
        policy.set(BootPolicy::VERIFY_SAFETY, raw.verify_safety);
        policy
    }
}

fn load_policy(path: &Path) -> Result<BootPolicy, AnchorError> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BootPolicy::ENFORCED),
        Err(source) => return Err(AnchorError::Io { path: path.to_path_buf(), source }),
    };
    let raw: RawPolicy = toml::from_str(&data)
        .map_err(|source| AnchorError::Policy { path: path.to_path_buf(), source })?;
    Ok(raw.into())
}

/// Reads a 32-byte Ed25519 public key stored as hex or SPKI PEM.
pub fn load_key_file(path: &Path) -> Result<[u8; 32], AnchorError> {
    let contents = fs::read_to_string(path)
        .map_err(|source| AnchorError::Io { path: path.to_path_buf(), source })?;
    parse_key(contents.trim())
}

/// Parses key material in hex or SPKI PEM form.
pub fn parse_key(input: &str) -> Result<[u8; 32], AnchorError> {
    if input.contains("-----BEGIN PUBLIC KEY-----") {
        let der = parse_pem_spki(input)?;
        let key = VerifyingKey::from_public_key_der(&der)
            .map_err(|err| AnchorError::InvalidKey(err.to_string()))?;
        Ok(key.to_bytes())
    } else {
        parse_hex_key(input)
    }
}

fn parse_hex_key(input: &str) -> Result<[u8; 32], AnchorError> {
    let filtered: String = input.chars().filter(|ch| !ch.is_ascii_whitespace()).collect();
    if filtered.is_empty() {
        return Err(AnchorError::InvalidKey("empty key material".into()));
    }
    let bytes = hex::decode(&filtered)
        .map_err(|err| AnchorError::InvalidKey(format!("failed to decode hex: {err}")))?;
    bytes
        .try_into()
        .map_err(|_| AnchorError::InvalidKey("expected 32-byte Ed25519 public key".into()))
}

fn parse_pem_spki(input: &str) -> Result<Vec<u8>, AnchorError> {
    let begin = "-----BEGIN PUBLIC KEY-----";
    let end = "-----END PUBLIC KEY-----";
    let start = input
        .find(begin)
        .ok_or_else(|| AnchorError::InvalidKey("missing PEM header".into()))?
        + begin.len();
    let stop =
        input.find(end).ok_or_else(|| AnchorError::InvalidKey("missing PEM footer".into()))?;
    if stop <= start {
        return Err(AnchorError::InvalidKey("invalid PEM framing".into()));
    }
    let cleaned: String = input[start..stop].chars().filter(|ch| !ch.is_whitespace()).collect();
    BASE64
        .decode(cleaned.as_bytes())
        .map_err(|err| AnchorError::InvalidKey(format!("invalid PEM base64: {err}")))
}
