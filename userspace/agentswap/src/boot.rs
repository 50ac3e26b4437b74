// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Secure boot gate for the active agent bank
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: 9 unit tests + tests/agentswap_host
//!
//! Runs once before the control loop starts. Sequence:
//!   1. load the trust anchor and boot policy
//!   2. `SECURE_BOOT` clear: skip verification, report `Unchecked`
//!   3. `SECURE_BOOT` set with a step bit clear: refuse to boot
//!   4. manifest verification of the active bank
//!   5. bank integrity (CRC)
//!   6. declared flash footprint covers the payload; image structure
//!
//! Budget limits are applied in step 4 by the shared verifier.
//!
//! Any error is fatal: the caller must not start the agent.

use flashbank::FlashRegion;
use log::{info, warn};
use thiserror::Error;

use trustanchor::{AnchorError, AnchorStore, BootPolicy};

use crate::clock::MonotonicClock;
use crate::crypto::{self, Ed25519Verifier};
use crate::hotswap::HotSwap;
use crate::image::{AgentImage, ImageError};
use crate::manifest::{self, FootprintBudget, Rejection};
use crate::slot::{Bank, SlotError, SlotManager};

/// Boot gate failure. Always fatal.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("trust anchor unavailable: {0}")]
    Anchor(#[from] AnchorError),
    #[error("secure boot armed without verification steps {missing:?}")]
    PolicyIncomplete { missing: BootPolicy },
    #[error("active bank {bank} unreadable: {source}")]
    NoAgent {
        bank: Bank,
        #[source]
        source: SlotError,
    },
    #[error("active bank {bank} manifest rejected: {reason}")]
    Manifest { bank: Bank, reason: Rejection },
    #[error("active bank {0} failed integrity validation")]
    Integrity(Bank),
    #[error("payload of {size} bytes exceeds declared flash footprint {declared}")]
    FootprintMismatch { size: usize, declared: u32 },
    #[error("active bank {bank} image invalid: {source}")]
    Image {
        bank: Bank,
        #[source]
        source: ImageError,
    },
}

/// Result of a passing boot check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOutcome {
    /// Every step ran and passed.
    Verified { bank: Bank, version: u32, agent_id: u32 },
    /// Secure boot is disabled by policy; nothing was checked.
    Unchecked { bank: Bank },
}

/// Boot-time verifier of the active bank.
pub struct SecureBootGate<S: AnchorStore> {
    store: S,
    budget: FootprintBudget,
}

impl<S: AnchorStore> SecureBootGate<S> {
    pub fn new(store: S, budget: FootprintBudget) -> Self {
        Self { store, budget }
    }

    /// Checks the active bank of `swap`.
    pub fn check<F: FlashRegion, C: MonotonicClock>(
        &self,
        swap: &HotSwap<F, C>,
    ) -> Result<BootOutcome, BootError> {
        self.check_slots(swap.slots())
    }

    /// Checks the active bank of `slots`.
    pub fn check_slots<F: FlashRegion>(
        &self,
        slots: &SlotManager<F>,
    ) -> Result<BootOutcome, BootError> {
        let anchor = self.store.load()?;
        let policy = anchor.policy();
        let bank = slots.active();

        if !policy.contains(BootPolicy::SECURE_BOOT) {
            warn!("boot: secure boot disabled by policy, bank {bank} runs unchecked");
            return Ok(BootOutcome::Unchecked { bank });
        }
        let missing = BootPolicy::STEPS.difference(policy);
        if !missing.is_empty() {
            return Err(BootError::PolicyIncomplete { missing });
        }

        let metadata = slots.slot_info(bank).map_err(|source| BootError::NoAgent { bank, source })?;
        let payload =
            slots.read_payload(bank).map_err(|source| BootError::NoAgent { bank, source })?;
        let manifest = metadata.manifest(crypto::hash(&payload));

        manifest::verify(&payload, &manifest, anchor.public_key(), &self.budget, &Ed25519Verifier)
            .map_err(|reason| BootError::Manifest { bank, reason })?;

        if !slots.validate_slot(bank) {
            return Err(BootError::Integrity(bank));
        }

        if payload.len() > manifest.flash_size as usize {
            return Err(BootError::FootprintMismatch {
                size: payload.len(),
                declared: manifest.flash_size,
            });
        }
        AgentImage::parse(&payload).map_err(|source| BootError::Image { bank, source })?;

        info!(
            "boot: bank {bank} verified, agent {:#x} v{} (anchor {})",
            manifest.agent_id,
            manifest.version,
            anchor.key_id()
        );
        Ok(BootOutcome::Verified { bank, version: manifest.version, agent_id: manifest.agent_id })
    }
}
