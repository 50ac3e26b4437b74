// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Hot-swap orchestrator (stage, verify, write, commit, rollback)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: 14 unit tests + tests/agentswap_host
//!
//! State machine:
//!
//! ```text
//! Idle -> Staging -> Validating -> Committed
//!            |            |
//!            +------------+-----> RolledBack
//! ```
//!
//! The selector flips only after the inactive bank has been written and
//! re-validated. Every failure after the in-flight flag is raised counts once
//! in `failed_updates` and leaves the previously active bank selected.

use flashbank::FlashRegion;
use log::{debug, info, warn};

use crate::clock::MonotonicClock;
use crate::config::SwapConfig;
use crate::crypto::{Ed25519Verifier, SignatureVerifier, PUBLIC_KEY_LEN};
use crate::error::{RollbackCause, SwapError};
use crate::image::AgentImage;
use crate::manifest::{self, Manifest};
use crate::slot::{Bank, SlotError, SlotManager, SlotMetadata, SlotReport};
use trustanchor::TrustAnchor;

/// Orchestrator phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwapPhase {
    #[default]
    Idle,
    /// Candidate received; capacity, structure and manifest are being checked.
    Staging,
    /// Candidate accepted; bank write and re-validation pending.
    Validating,
    Committed,
    RolledBack,
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwapStats {
    pub successful_updates: u32,
    pub failed_updates: u32,
    pub attempts: u32,
    /// Clock time of the last commit, 0 if none.
    pub last_update_ms: u64,
}

struct Pending {
    bundle: Vec<u8>,
    manifest: Manifest,
}

/// Hot-swap context. One per controller; owns both banks.
pub struct HotSwap<F: FlashRegion, C: MonotonicClock> {
    slots: SlotManager<F>,
    clock: C,
    config: SwapConfig,
    trusted_key: [u8; PUBLIC_KEY_LEN],
    verifier: Box<dyn SignatureVerifier>,
    phase: SwapPhase,
    in_flight: bool,
    started_ms: u64,
    stats: SwapStats,
    pending: Option<Pending>,
}

impl<F: FlashRegion, C: MonotonicClock> HotSwap<F, C> {
    /// Builds a context over `slots`, trusting the anchor's key.
    pub fn new(
        slots: SlotManager<F>,
        clock: C,
        config: SwapConfig,
        anchor: &TrustAnchor,
    ) -> Result<Self, SwapError> {
        config.validate().map_err(|_| SwapError::InvalidParameter("invalid swap configuration"))?;
        for bank in Bank::ALL {
            if slots.capacity(bank) != config.bank_capacity {
                return Err(SwapError::InvalidParameter("bank capacity does not match configuration"));
            }
        }
        Ok(Self {
            slots,
            clock,
            config,
            trusted_key: *anchor.public_key(),
            verifier: Box::new(Ed25519Verifier),
            phase: SwapPhase::Idle,
            in_flight: false,
            started_ms: 0,
            stats: SwapStats::default(),
            pending: None,
        })
    }

    /// Builds a context whose active bank is recovered from media.
    pub fn open(
        bank_a: F,
        bank_b: F,
        clock: C,
        config: SwapConfig,
        anchor: &TrustAnchor,
    ) -> Result<Self, SwapError> {
        let slots = SlotManager::recover(bank_a, bank_b)?;
        Self::new(slots, clock, config, anchor)
    }

    /// Replaces the signature backend.
    pub fn with_verifier(mut self, verifier: Box<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Stages, verifies, writes and commits `bundle` in one call.
    pub fn update_agent(&mut self, bundle: &[u8], manifest: &Manifest) -> Result<Bank, SwapError> {
        self.begin_update(bundle, manifest)?;
        self.complete_update()
    }

    /// First half of an update: capacity, structure and manifest checks.
    ///
    /// On success the candidate is held until [`Self::complete_update`] or the
    /// watchdog drops it.
    pub fn begin_update(&mut self, bundle: &[u8], manifest: &Manifest) -> Result<(), SwapError> {
        if bundle.is_empty() {
            return Err(SwapError::InvalidParameter("empty bundle"));
        }
        if self.in_flight {
            return Err(SwapError::UpdateInProgress);
        }

        self.in_flight = true;
        self.started_ms = self.clock.now_ms();
        self.stats.attempts = self.stats.attempts.saturating_add(1);
        self.enter(SwapPhase::Staging);

        let max = self.slots.payload_capacity(self.slots.inactive());
        if bundle.len() > max {
            return Err(self.abort(SwapError::InsufficientMemory { size: bundle.len(), max }));
        }
        if let Err(err) = AgentImage::parse(bundle) {
            return Err(self.abort(err.into()));
        }
        if let Err(rejection) = manifest::verify(
            bundle,
            manifest,
            &self.trusted_key,
            &self.config.budget,
            self.verifier.as_ref(),
        ) {
            return Err(self.abort(rejection.into()));
        }

        self.pending = Some(Pending { bundle: bundle.to_vec(), manifest: manifest.clone() });
        debug!("hotswap: staged agent {:#x} v{}", manifest.agent_id, manifest.version);
        Ok(())
    }

    /// Second half of an update: write the inactive bank, re-validate, flip.
    pub fn complete_update(&mut self) -> Result<Bank, SwapError> {
        let pending = self.pending.take().ok_or(SwapError::NothingStaged)?;
        self.enter(SwapPhase::Validating);

        let target = self.slots.inactive();
        let write_started = self.clock.now_ms();
        let metadata =
            SlotMetadata::for_payload(&pending.bundle, &pending.manifest, write_started as u32);
        if let Err(err) = self.slots.write_slot(target, &pending.bundle, &metadata) {
            warn!("hotswap: bank {target} write failed: {err}");
            return Err(self.abort(SwapError::RolledBack(RollbackCause::WriteFailed)));
        }
        let elapsed = self.clock.now_ms().saturating_sub(write_started);
        if elapsed > self.config.write_budget_ms {
            warn!(
                "hotswap: bank {target} write took {elapsed} ms, budget {} ms",
                self.config.write_budget_ms
            );
            return Err(self.abort(SwapError::RolledBack(RollbackCause::WriteBudgetExceeded)));
        }
        if !self.slots.validate_slot(target) {
            return Err(self.abort(SwapError::RolledBack(RollbackCause::IntegrityCheckFailed)));
        }

        self.slots.set_active(target);
        self.in_flight = false;
        self.stats.successful_updates = self.stats.successful_updates.saturating_add(1);
        self.stats.last_update_ms = self.clock.now_ms();
        self.enter(SwapPhase::Committed);
        info!(
            "hotswap: committed agent {:#x} v{} to bank {target}",
            pending.manifest.agent_id, pending.manifest.version
        );
        Ok(target)
    }

    /// Selects the other bank if it holds a valid agent.
    pub fn rollback(&mut self) -> Result<Bank, SwapError> {
        if self.in_flight {
            return Err(SwapError::UpdateInProgress);
        }
        let target = self.slots.inactive();
        if !self.slots.validate_slot(target) {
            warn!("hotswap: rollback refused, bank {target} is not valid");
            return Err(SwapError::NoRollbackTarget(target));
        }
        self.slots.set_active(target);
        self.enter(SwapPhase::RolledBack);
        info!("hotswap: rolled back to bank {target}");
        Ok(target)
    }

    /// Polls the in-flight timer. Returns `true` if it forced a rollback.
    pub fn watchdog_check(&mut self) -> bool {
        if !self.in_flight {
            return false;
        }
        let elapsed = self.clock.now_ms().saturating_sub(self.started_ms);
        if elapsed <= self.config.watchdog_timeout_ms {
            return false;
        }
        warn!(
            "hotswap: watchdog expired after {elapsed} ms (timeout {} ms)",
            self.config.watchdog_timeout_ms
        );
        self.pending = None;
        self.in_flight = false;
        self.stats.failed_updates = self.stats.failed_updates.saturating_add(1);
        self.enter(SwapPhase::RolledBack);
        true
    }

    /// Payload of the active bank, integrity-checked.
    pub fn active_agent(&self) -> Result<Vec<u8>, SwapError> {
        let bank = self.slots.active();
        if !self.slots.validate_slot(bank) {
            return Err(SwapError::Slot(SlotError::InvalidSlot(bank)));
        }
        Ok(self.slots.read_payload(bank)?)
    }

    /// Validation state of both banks; fails if neither is valid.
    pub fn validate_slots(&self) -> Result<SlotReport, SwapError> {
        let report = self.slots.validate_slots();
        if !report.a && !report.b {
            return Err(SwapError::Slot(SlotError::NoValidBank));
        }
        Ok(report)
    }

    /// Erases the inactive `bank`. Refused while an update is in flight.
    pub fn clear_slot(&mut self, bank: Bank) -> Result<(), SwapError> {
        if self.in_flight {
            return Err(SwapError::UpdateInProgress);
        }
        self.slots.clear_slot(bank)?;
        info!("hotswap: bank {bank} cleared");
        Ok(())
    }

    pub fn slot_info(&self, bank: Bank) -> Result<SlotMetadata, SwapError> {
        Ok(self.slots.slot_info(bank)?)
    }

    pub fn stats(&self) -> SwapStats {
        self.stats
    }

    pub fn phase(&self) -> SwapPhase {
        self.phase
    }

    pub fn active_bank(&self) -> Bank {
        self.slots.active()
    }

    pub fn is_update_in_progress(&self) -> bool {
        self.in_flight
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    /// Read-only view of the banks, used by the boot gate.
    pub fn slots(&self) -> &SlotManager<F> {
        &self.slots
    }

    fn enter(&mut self, phase: SwapPhase) {
        debug!("hotswap: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn abort(&mut self, err: SwapError) -> SwapError {
        warn!("hotswap: update rejected: {err}");
        self.pending = None;
        self.in_flight = false;
        self.stats.failed_updates = self.stats.failed_updates.saturating_add(1);
        self.enter(SwapPhase::RolledBack);
        err
    }
}
