// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Agent manifest and the shared verification path
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: 7 unit tests
//!
//! `verify` is the only authenticity check in the crate. The hot-swap
//! orchestrator calls it on a staged candidate and the boot gate calls it on
//! the active bank.

use serde::Deserialize;
use thiserror::Error;

use crate::crypto::{self, SignatureVerifier, HASH_LEN, PUBLIC_KEY_LEN, SIGNATURE_LEN};

/// Encoded manifest size: four u32 fields, signature, hash.
pub const MANIFEST_LEN: usize = 16 + SIGNATURE_LEN + HASH_LEN;

/// Metadata accompanying a bundle. Produced off device, immutable on device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Agent version.
    pub version: u32,
    /// Agent identifier.
    pub agent_id: u32,
    /// Declared flash footprint in bytes.
    pub flash_size: u32,
    /// Declared RAM footprint in bytes.
    pub sram_size: u32,
    /// Ed25519 signature over `hash`.
    pub signature: [u8; SIGNATURE_LEN],
    /// SHA-512 of the bundle.
    pub hash: [u8; HASH_LEN],
}

/// Manifest wire decoding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("manifest must be 144 bytes, got {0}")]
pub struct ManifestLenError(pub usize);

impl Manifest {
    /// Fixed little-endian encoding.
    pub fn to_bytes(&self) -> [u8; MANIFEST_LEN] {
        let mut out = [0u8; MANIFEST_LEN];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..8].copy_from_slice(&self.agent_id.to_le_bytes());
        out[8..12].copy_from_slice(&self.flash_size.to_le_bytes());
        out[12..16].copy_from_slice(&self.sram_size.to_le_bytes());
        out[16..16 + SIGNATURE_LEN].copy_from_slice(&self.signature);
        out[16 + SIGNATURE_LEN..].copy_from_slice(&self.hash);
        out
    }

    /// Decodes the encoding produced by [`Manifest::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ManifestLenError> {
        if bytes.len() != MANIFEST_LEN {
            return Err(ManifestLenError(bytes.len()));
        }
        let word = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(&bytes[16..16 + SIGNATURE_LEN]);
        let mut hash = [0u8; HASH_LEN];
        hash.copy_from_slice(&bytes[16 + SIGNATURE_LEN..]);
        Ok(Self {
            version: word(0),
            agent_id: word(4),
            flash_size: word(8),
            sram_size: word(12),
            signature,
            hash,
        })
    }
}

/// Device memory budget the declared footprint must fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FootprintBudget {
    /// Maximum declared flash footprint.
    #[serde(default = "default_max_flash")]
    pub max_flash_bytes: u32,
    /// Maximum declared RAM footprint.
    #[serde(default = "default_max_sram")]
    pub max_sram_bytes: u32,
}

fn default_max_flash() -> u32 {
    32 * 1024
}

fn default_max_sram() -> u32 {
    4 * 1024
}

impl Default for FootprintBudget {
    fn default() -> Self {
        Self { max_flash_bytes: default_max_flash(), max_sram_bytes: default_max_sram() }
    }
}

/// Resource named in an over-budget rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Flash footprint.
    Flash,
    /// RAM footprint.
    Sram,
}

/// Reason a bundle/manifest pair was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Bundle hash differs from `manifest.hash`.
    #[error("bundle hash does not match manifest")]
    HashMismatch,
    /// Signature over the hash did not verify with the trusted key.
    #[error("manifest signature rejected")]
    BadSignature,
    /// Declared footprint exceeds the device budget.
    #[error("{resource:?} footprint {declared} exceeds budget {limit}")]
    OverBudget {
        /// Offending resource.
        resource: Resource,
        /// Declared size.
        declared: u32,
        /// Configured limit.
        limit: u32,
    },
}

/// Checks hash, then signature, then footprint; stops at the first failure.
pub fn verify(
    bundle: &[u8],
    manifest: &Manifest,
    trusted_key: &[u8; PUBLIC_KEY_LEN],
    budget: &FootprintBudget,
    verifier: &dyn SignatureVerifier,
) -> Result<(), Rejection> {
    let digest = crypto::hash(bundle);
    if !crypto::ct_eq(&digest, &manifest.hash) {
        return Err(Rejection::HashMismatch);
    }
    verifier
        .verify_ed25519(trusted_key, &digest, &manifest.signature)
        .map_err(|_| Rejection::BadSignature)?;
    check_footprint(manifest, budget)
}

/// Footprint step of [`verify`], also used by the boot gate's budget check.
pub fn check_footprint(manifest: &Manifest, budget: &FootprintBudget) -> Result<(), Rejection> {
    if manifest.flash_size > budget.max_flash_bytes {
        return Err(Rejection::OverBudget {
            resource: Resource::Flash,
            declared: manifest.flash_size,
            limit: budget.max_flash_bytes,
        });
    }
    if manifest.sram_size > budget.max_sram_bytes {
        return Err(Rejection::OverBudget {
            resource: Resource::Sram,
            declared: manifest.sram_size,
            limit: budget.max_sram_bytes,
        });
    }
    Ok(())
}
