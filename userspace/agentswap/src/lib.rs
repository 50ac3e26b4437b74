// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Secure agent lifecycle (image parsing, manifest verification, dual-bank hot-swap, boot gate)
//! OWNERS: @runtime
//! STATUS: Functional (host-first)
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests per module + integration tests (via tests/agentswap_host)
//!   - known-answer vectors for SHA-512, HMAC-SHA-512, CRC-32
//!   - image structure and truncation handling
//!   - slot round-trip and single-byte corruption (proptest)
//!   - update, rollback, watchdog and boot gate flows
//!
//! PUBLIC API:
//!   - HotSwap: update/rollback/watchdog context owning both banks
//!   - SecureBootGate: boot-time verification of the active bank
//!   - SlotManager: dual-bank storage with integrity trailer
//!   - AgentImage / ImageBuilder: agent image decoding and encoding
//!   - Manifest / verify: bundle authenticity and footprint checks
//!   - SwapConfig: TOML configuration
//!
//! DEPENDENCIES:
//!   - sha2, ed25519-dalek, subtle: hashing, signatures, constant-time compare
//!   - crc32fast: bank integrity checksum
//!   - flashbank: storage interface
//!   - trustanchor: read-only trust anchor and boot policy
//!   - serde + toml: configuration
//!   - log: diagnostics

#![forbid(unsafe_code)]

pub mod boot;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod hotswap;
pub mod image;
pub mod manifest;
pub mod slot;

#[cfg(test)]
mod fixtures;

pub use boot::{BootError, BootOutcome, SecureBootGate};
pub use clock::{ManualClock, MonotonicClock, SystemClock};
pub use config::{ConfigError, SwapConfig};
pub use crypto::{Ed25519Verifier, SignatureVerifier, VerifyError};
pub use error::{RollbackCause, SwapError};
pub use hotswap::{HotSwap, SwapPhase, SwapStats};
pub use image::{AgentImage, Attribute, ImageBuilder, ImageError, SectionView};
pub use manifest::{FootprintBudget, Manifest, Rejection, Resource, MANIFEST_LEN};
pub use slot::{Bank, SlotError, SlotManager, SlotMetadata, SlotReport, SLOT_MAGIC, TRAILER_LEN};
