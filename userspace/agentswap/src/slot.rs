// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Dual-bank agent storage with per-bank integrity trailer
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: 16 unit tests + 2 property tests
//!
//! Bank layout: payload at offset 0, a 116-byte little-endian trailer in the
//! last bytes of the region. Trailer fields:
//!
//! ```text
//! magic u32 | version u32 | size u32 | crc32 u32 | timestamp u32
//! signature [64] | reserved [32]
//! ```
//!
//! `reserved[0..12]` carries agent id, declared flash and declared RAM
//! footprint (u32 each) so the boot gate can rebuild the manifest.
//! `reserved[12..16]` holds the commit generation. The rest is zero.
//!
//! A bank is valid when the magic matches, `1 <= size <= capacity - trailer`
//! and the payload CRC matches. Zero-length payloads are never written, so a
//! zero size marks a trailer that was not produced by a commit.
//!
//! Start-up recovery orders banks by generation, never by `timestamp`: the
//! timestamp is uptime of the committing boot and restarts at zero.
//!
//! Writes go trailer-invalidate, payload, trailer, sync. Any interruption
//! leaves a bank whose trailer is erased or whose CRC mismatches, and such a
//! bank never validates.

use std::fmt;

use flashbank::{FlashError, FlashRegion, ERASED_BYTE};
use log::debug;
use thiserror::Error;

use crate::crypto::{self, Checksum, HASH_LEN, SIGNATURE_LEN};
use crate::manifest::Manifest;

/// Trailer magic.
pub const SLOT_MAGIC: u32 = 0xED6E_A6E5;
/// Encoded trailer size.
pub const TRAILER_LEN: usize = 20 + SIGNATURE_LEN + RESERVED_LEN;

const RESERVED_LEN: usize = 32;
const VERIFY_CHUNK: usize = 256;

/// One of the two storage banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bank {
    A,
    B,
}

impl Bank {
    /// Both banks, in index order.
    pub const ALL: [Bank; 2] = [Bank::A, Bank::B];

    pub fn other(self) -> Self {
        match self {
            Bank::A => Bank::B,
            Bank::B => Bank::A,
        }
    }

    /// 0 for A, 1 for B.
    pub fn index(self) -> usize {
        match self {
            Bank::A => 0,
            Bank::B => 1,
        }
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bank::A => f.write_str("A"),
            Bank::B => f.write_str("B"),
        }
    }
}

/// Per-bank integrity trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMetadata {
    pub magic: u32,
    pub version: u32,
    /// Payload length in bytes.
    pub size: u32,
    /// CRC-32 of the payload.
    pub checksum: u32,
    /// Uptime of the commit in milliseconds, truncated to 32 bits. Informational.
    pub timestamp: u32,
    /// Manifest signature carried for the boot gate.
    pub signature: [u8; SIGNATURE_LEN],
    pub reserved: [u8; RESERVED_LEN],
}

impl SlotMetadata {
    /// Builds the trailer for `payload` accepted under `manifest`.
    pub fn for_payload(payload: &[u8], manifest: &Manifest, timestamp: u32) -> Self {
        let mut reserved = [0u8; RESERVED_LEN];
        reserved[0..4].copy_from_slice(&manifest.agent_id.to_le_bytes());
        reserved[4..8].copy_from_slice(&manifest.flash_size.to_le_bytes());
        reserved[8..12].copy_from_slice(&manifest.sram_size.to_le_bytes());
        Self {
            magic: SLOT_MAGIC,
            version: manifest.version,
            size: u32::try_from(payload.len()).unwrap_or(u32::MAX),
            checksum: crypto::checksum(payload),
            timestamp,
            signature: manifest.signature,
            reserved,
        }
    }

    pub fn to_bytes(&self) -> [u8; TRAILER_LEN] {
        let mut out = [0u8; TRAILER_LEN];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..12].copy_from_slice(&self.size.to_le_bytes());
        out[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        out[16..20].copy_from_slice(&self.timestamp.to_le_bytes());
        out[20..20 + SIGNATURE_LEN].copy_from_slice(&self.signature);
        out[20 + SIGNATURE_LEN..].copy_from_slice(&self.reserved);
        out
    }

    pub fn from_bytes(bytes: &[u8; TRAILER_LEN]) -> Self {
        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(&bytes[20..20 + SIGNATURE_LEN]);
        let mut reserved = [0u8; RESERVED_LEN];
        reserved.copy_from_slice(&bytes[20 + SIGNATURE_LEN..]);
        Self {
            magic: le_u32(bytes, 0),
            version: le_u32(bytes, 4),
            size: le_u32(bytes, 8),
            checksum: le_u32(bytes, 12),
            timestamp: le_u32(bytes, 16),
            signature,
            reserved,
        }
    }

    pub fn agent_id(&self) -> u32 {
        le_u32(&self.reserved, 0)
    }

    /// Declared flash footprint recorded at commit.
    pub fn flash_size(&self) -> u32 {
        le_u32(&self.reserved, 4)
    }

    /// Declared RAM footprint recorded at commit.
    pub fn sram_size(&self) -> u32 {
        le_u32(&self.reserved, 8)
    }

    /// Commit generation, one above the newest valid bank at write time.
    pub fn generation(&self) -> u32 {
        le_u32(&self.reserved, 12)
    }

    pub fn with_generation(mut self, generation: u32) -> Self {
        self.reserved[12..16].copy_from_slice(&generation.to_le_bytes());
        self
    }

    /// Manifest as it was accepted, with `hash` supplied by the caller.
    pub fn manifest(&self, hash: [u8; HASH_LEN]) -> Manifest {
        Manifest {
            version: self.version,
            agent_id: self.agent_id(),
            flash_size: self.flash_size(),
            sram_size: self.sram_size(),
            signature: self.signature,
            hash,
        }
    }
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Slot manager errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("bank {0} is active and cannot be modified")]
    ActiveBank(Bank),
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("payload of {size} bytes exceeds bank capacity {max}")]
    InsufficientMemory { size: usize, max: usize },
    #[error("bank {0} holds no valid payload")]
    InvalidSlot(Bank),
    #[error("neither bank holds a valid payload")]
    NoValidBank,
    #[error("bank {bank}: {source}")]
    Flash {
        bank: Bank,
        #[source]
        source: FlashError,
    },
}

/// Validation result for both banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotReport {
    pub a: bool,
    pub b: bool,
}

impl SlotReport {
    pub fn get(&self, bank: Bank) -> bool {
        match bank {
            Bank::A => self.a,
            Bank::B => self.b,
        }
    }
}

/// Owns both bank regions and the active-bank marker.
pub struct SlotManager<F: FlashRegion> {
    banks: [F; 2],
    active: Bank,
}

impl<F: FlashRegion> SlotManager<F> {
    /// Wraps two regions with `active` as the running bank.
    pub fn new(bank_a: F, bank_b: F, active: Bank) -> Result<Self, SlotError> {
        for region in [&bank_a, &bank_b] {
            if region.capacity() <= TRAILER_LEN {
                return Err(SlotError::InvalidParameter("bank smaller than metadata trailer"));
            }
            if u32::try_from(region.capacity()).is_err() {
                return Err(SlotError::InvalidParameter("bank larger than 4 GiB"));
            }
        }
        Ok(Self { banks: [bank_a, bank_b], active })
    }

    /// Wraps two regions and selects the active bank with [`Self::recover_active`].
    pub fn recover(bank_a: F, bank_b: F) -> Result<Self, SlotError> {
        let mut slots = Self::new(bank_a, bank_b, Bank::A)?;
        slots.recover_active()?;
        Ok(slots)
    }

    /// Selects the valid bank with the higher generation; on a tie bank B wins.
    ///
    /// Fails with [`SlotError::NoValidBank`] if neither bank validates, leaving
    /// the selection unchanged.
    pub fn recover_active(&mut self) -> Result<Bank, SlotError> {
        let active = match (self.valid_generation(Bank::A), self.valid_generation(Bank::B)) {
            (Some(a), Some(b)) if a > b => Bank::A,
            (Some(_), Some(_)) => Bank::B,
            (Some(_), None) => Bank::A,
            (None, Some(_)) => Bank::B,
            (None, None) => return Err(SlotError::NoValidBank),
        };
        debug!("slot recovery selected bank {active}");
        self.active = active;
        Ok(active)
    }

    fn valid_generation(&self, bank: Bank) -> Option<u32> {
        if self.validate_slot(bank) {
            self.slot_info(bank).ok().map(|meta| meta.generation())
        } else {
            None
        }
    }

    /// Generation the next commit receives.
    pub fn next_generation(&self) -> u32 {
        Bank::ALL
            .iter()
            .filter_map(|&bank| self.valid_generation(bank))
            .max()
            .map_or(1, |newest| newest.saturating_add(1))
    }

    pub fn active(&self) -> Bank {
        self.active
    }

    /// The bank updates are staged into.
    pub fn inactive(&self) -> Bank {
        self.active.other()
    }

    pub(crate) fn set_active(&mut self, bank: Bank) {
        self.active = bank;
    }

    fn region(&self, bank: Bank) -> &F {
        &self.banks[bank.index()]
    }

    fn region_mut(&mut self, bank: Bank) -> &mut F {
        &mut self.banks[bank.index()]
    }

    fn trailer_offset(&self, bank: Bank) -> usize {
        self.region(bank).capacity() - TRAILER_LEN
    }

    /// Region size of `bank` including the trailer.
    pub fn capacity(&self, bank: Bank) -> usize {
        self.region(bank).capacity()
    }

    /// Largest payload `bank` can hold.
    pub fn payload_capacity(&self, bank: Bank) -> usize {
        self.trailer_offset(bank)
    }

    /// Writes `payload` and `metadata` to the inactive `bank`.
    ///
    /// The stored trailer carries [`Self::next_generation`] in place of the
    /// caller's generation field. Returns the generation written.
    pub fn write_slot(
        &mut self,
        bank: Bank,
        payload: &[u8],
        metadata: &SlotMetadata,
    ) -> Result<u32, SlotError> {
        if bank == self.active {
            return Err(SlotError::ActiveBank(bank));
        }
        if payload.is_empty() {
            return Err(SlotError::InvalidParameter("empty payload"));
        }
        if metadata.size as usize != payload.len() {
            return Err(SlotError::InvalidParameter("metadata size does not match payload"));
        }
        let max = self.payload_capacity(bank);
        if payload.len() > max {
            return Err(SlotError::InsufficientMemory { size: payload.len(), max });
        }

        let generation = self.next_generation();
        let trailer_at = self.trailer_offset(bank);
        let trailer = metadata.clone().with_generation(generation).to_bytes();
        let flash = |source| SlotError::Flash { bank, source };
        let region = self.region_mut(bank);
        region.write_region(trailer_at, &[ERASED_BYTE; TRAILER_LEN]).map_err(flash)?;
        region.write_region(0, payload).map_err(flash)?;
        region.write_region(trailer_at, &trailer).map_err(flash)?;
        region.sync().map_err(flash)?;
        debug!("bank {bank}: wrote {} byte payload, generation {generation}", payload.len());
        Ok(generation)
    }

    /// Raw trailer of `bank`, valid or not.
    pub fn slot_info(&self, bank: Bank) -> Result<SlotMetadata, SlotError> {
        let mut raw = [0u8; TRAILER_LEN];
        self.region(bank)
            .read_region(self.trailer_offset(bank), &mut raw)
            .map_err(|source| SlotError::Flash { bank, source })?;
        Ok(SlotMetadata::from_bytes(&raw))
    }

    /// Magic, size bound and payload CRC all check out.
    pub fn validate_slot(&self, bank: Bank) -> bool {
        match self.check_slot(bank) {
            Ok(valid) => valid,
            Err(err) => {
                debug!("bank {bank}: validation read failed: {err}");
                false
            }
        }
    }

    fn check_slot(&self, bank: Bank) -> Result<bool, SlotError> {
        let meta = self.slot_info(bank)?;
        let size = meta.size as usize;
        if meta.magic != SLOT_MAGIC || size == 0 || size > self.payload_capacity(bank) {
            return Ok(false);
        }
        let region = self.region(bank);
        let mut crc = Checksum::new();
        let mut chunk = [0u8; VERIFY_CHUNK];
        let mut offset = 0;
        while offset < size {
            let len = (size - offset).min(VERIFY_CHUNK);
            region
                .read_region(offset, &mut chunk[..len])
                .map_err(|source| SlotError::Flash { bank, source })?;
            crc.update(&chunk[..len]);
            offset += len;
        }
        Ok(crc.finalize() == meta.checksum)
    }

    /// Validation state of both banks.
    pub fn validate_slots(&self) -> SlotReport {
        SlotReport { a: self.validate_slot(Bank::A), b: self.validate_slot(Bank::B) }
    }

    /// Reads the payload described by the trailer. Does not check the CRC.
    pub fn read_payload(&self, bank: Bank) -> Result<Vec<u8>, SlotError> {
        let meta = self.slot_info(bank)?;
        let size = meta.size as usize;
        if meta.magic != SLOT_MAGIC || size == 0 || size > self.payload_capacity(bank) {
            return Err(SlotError::InvalidSlot(bank));
        }
        let mut payload = vec![0u8; size];
        self.region(bank)
            .read_region(0, &mut payload)
            .map_err(|source| SlotError::Flash { bank, source })?;
        Ok(payload)
    }

    /// Erases the inactive `bank`.
    pub fn clear_slot(&mut self, bank: Bank) -> Result<(), SlotError> {
        if bank == self.active {
            return Err(SlotError::ActiveBank(bank));
        }
        let region = self.region_mut(bank);
        region.erase().map_err(|source| SlotError::Flash { bank, source })?;
        region.sync().map_err(|source| SlotError::Flash { bank, source })?;
        debug!("bank {bank}: cleared");
        Ok(())
    }
}
