// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Integration tests for agent update, rollback, watchdog and boot gate flows
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 15 tests
//!
//! TEST_SCOPE:
//!   - Signed update commit and bank flip
//!   - Signature, hash, capacity and footprint rejection
//!   - Single in-flight update
//!   - Watchdog expiry, torn writes, write-budget overrun
//!   - Secure boot gate policies (static and file-backed anchors)
//!   - Active bank recovery after restart
//!
//! TEST_SCENARIOS:
//!   - test_update_sequence_v1_v2_v3(): commit, zero signature, tampered bundle
//!   - test_exact_capacity_boundary(): capacity - trailer accepted, +1 rejected
//!   - test_concurrent_update_rejected(): second update while one is pending
//!   - test_rejected_updates_keep_active_agent(): no downtime on failure
//!   - test_watchdog_forces_single_rollback(): timeout handling
//!   - test_torn_write_rolls_back(): power loss mid-write
//!   - test_write_budget_overrun_rolls_back(): slow flash
//!   - test_over_budget_manifest_rejected(): declared RAM above budget
//!   - test_manual_rollback_restores_previous(): operator rollback
//!   - test_boot_gate_verifies_active_bank(): enforced policy
//!   - test_boot_gate_policies(): unchecked and incomplete policies
//!   - test_boot_gate_file_anchor(): anchor directory on disk
//!   - test_restart_recovers_newest_bank(): reopen from media
//!   - test_reboot_keeps_latest_commit(): commit order survives clock restarts
//!   - prop_any_payload_byte_flip_fails_boot(): corruption detection

use agentswap::image::{ImageBuilder, KEY_ACTUATION, KEY_MODEL, KEY_PREPROCESS};
use agentswap::{
    crypto, Bank, BootError, BootOutcome, FootprintBudget, HotSwap, ManualClock, Manifest,
    Rejection, RollbackCause, SecureBootGate, SlotManager, SwapConfig, SwapError, SwapPhase,
    TRAILER_LEN,
};
use ed25519_dalek::{Signer, SigningKey};
use flashbank::{FlashError, FlashRegion, MemFlash, WriteFault};
use proptest::prelude::*;
use trustanchor::{BootPolicy, FileAnchorStore, StaticAnchorStore, TrustAnchor};

const AGENT_ID: u32 = 0x0A6E_7001;

struct Device {
    swap: HotSwap<MemFlash, ManualClock>,
    clock: ManualClock,
    bank_a: MemFlash,
    bank_b: MemFlash,
}

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

fn anchor() -> TrustAnchor {
    TrustAnchor::new(signing_key().verifying_key().to_bytes(), BootPolicy::ENFORCED)
        .expect("valid anchor")
}

fn device() -> Device {
    let config = SwapConfig::default();
    let bank_a = MemFlash::new(config.bank_capacity);
    let bank_b = MemFlash::new(config.bank_capacity);
    let clock = ManualClock::new(10_000);
    let slots = SlotManager::new(bank_a.clone(), bank_b.clone(), Bank::A).expect("slots");
    let swap = HotSwap::new(slots, clock.clone(), config, &anchor()).expect("hotswap");
    Device { swap, clock, bank_a, bank_b }
}

fn image_with_model(model: &[u8]) -> Vec<u8> {
    ImageBuilder::new()
        .attribute("name", "conveyor-anomaly")
        .section(KEY_MODEL, model)
        .section(KEY_PREPROCESS, b"window=128;stride=16")
        .section(KEY_ACTUATION, b"relay=3;threshold=0.82")
        .build()
        .expect("image")
}

fn agent(version: u8) -> Vec<u8> {
    image_with_model(&[version; 256])
}

/// Image padded so its encoded length is exactly `len`.
fn agent_of_len(len: usize) -> Vec<u8> {
    let overhead = image_with_model(&[]).len();
    let image = image_with_model(&vec![0x3C; len - overhead]);
    assert_eq!(image.len(), len);
    image
}

fn sign(bundle: &[u8], version: u32) -> Manifest {
    let hash = crypto::hash(bundle);
    Manifest {
        version,
        agent_id: AGENT_ID,
        flash_size: bundle.len() as u32,
        sram_size: 2048,
        signature: signing_key().sign(&hash).to_bytes(),
        hash,
    }
}

fn enforced_gate() -> SecureBootGate<StaticAnchorStore> {
    SecureBootGate::new(StaticAnchorStore::new(anchor()), FootprintBudget::default())
}

#[test]
fn test_update_sequence_v1_v2_v3() {
    let mut dev = device();

    let v1 = agent(1);
    let bank = dev.swap.update_agent(&v1, &sign(&v1, 1)).expect("v1 commits");
    assert_eq!(bank, Bank::B);
    assert_eq!(dev.swap.active_bank(), Bank::B);
    assert_eq!(dev.swap.stats().successful_updates, 1);

    let v2 = agent(2);
    let mut unsigned = sign(&v2, 2);
    unsigned.signature = [0u8; 64];
    let err = dev.swap.update_agent(&v2, &unsigned).unwrap_err();
    assert!(matches!(err, SwapError::BadSignature), "got {err:?}");
    assert_eq!(dev.swap.active_agent().expect("active"), v1);
    assert_eq!(dev.swap.stats().failed_updates, 1);

    let v3 = agent(3);
    let manifest = sign(&v3, 3);
    let mut tampered = v3.clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;
    let writes_before = dev.bank_a.write_count();
    let err = dev.swap.update_agent(&tampered, &manifest).unwrap_err();
    assert!(matches!(err, SwapError::HashMismatch), "got {err:?}");
    assert_eq!(dev.bank_a.write_count(), writes_before, "no bank write before rejection");
    assert_eq!(dev.swap.active_agent().expect("active"), v1);

    let stats = dev.swap.stats();
    assert_eq!((stats.successful_updates, stats.failed_updates, stats.attempts), (1, 2, 3));
}

#[test]
fn test_exact_capacity_boundary() {
    let mut dev = device();
    let max = SwapConfig::default().bank_capacity - TRAILER_LEN;

    let exact = agent_of_len(max);
    dev.swap.update_agent(&exact, &sign(&exact, 1)).expect("exact capacity accepted");
    assert_eq!(dev.swap.active_agent().expect("active"), exact);

    let over = agent_of_len(max + 1);
    let err = dev.swap.update_agent(&over, &sign(&over, 2)).unwrap_err();
    assert!(
        matches!(err, SwapError::InsufficientMemory { size, max: limit } if size == max + 1 && limit == max),
        "got {err:?}"
    );
    assert_eq!(dev.swap.active_agent().expect("active"), exact);
}

#[test]
fn test_concurrent_update_rejected() {
    let mut dev = device();
    let first = agent(1);
    let second = agent(2);
    dev.swap.begin_update(&first, &sign(&first, 1)).expect("first staged");

    let err = dev.swap.update_agent(&second, &sign(&second, 2)).unwrap_err();
    assert!(matches!(err, SwapError::UpdateInProgress));
    assert_eq!(dev.swap.stats().attempts, 1);

    dev.swap.complete_update().expect("first commits");
    dev.swap.update_agent(&second, &sign(&second, 2)).expect("second commits afterwards");
    assert_eq!(dev.swap.active_agent().expect("active"), second);
}

#[test]
fn test_rejected_updates_keep_active_agent() {
    let mut dev = device();
    let v1 = agent(1);
    dev.swap.update_agent(&v1, &sign(&v1, 1)).expect("v1");
    let before = dev.swap.active_agent().expect("active");

    let bad = agent(2);
    let mut bad_manifest = sign(&bad, 2);
    bad_manifest.signature[5] ^= 0x80;
    assert!(dev.swap.update_agent(&bad, &bad_manifest).is_err());

    let corrupt = agent(3);
    let corrupt_manifest = sign(&corrupt, 3);
    let mut corrupted = corrupt.clone();
    corrupted[40] ^= 0xFF;
    assert!(dev.swap.update_agent(&corrupted, &corrupt_manifest).is_err());

    let huge = agent_of_len(SwapConfig::default().bank_capacity);
    assert!(dev.swap.update_agent(&huge, &sign(&huge, 4)).is_err());

    let truncated = agent(5);
    let truncated = &truncated[..truncated.len() - 10];
    let err = dev.swap.update_agent(truncated, &sign(truncated, 5)).unwrap_err();
    assert!(matches!(err, SwapError::IncompleteImage { .. }), "got {err:?}");

    assert_eq!(dev.swap.active_agent().expect("active"), before);
    assert_eq!(dev.swap.active_bank(), Bank::B);
    assert_eq!(dev.swap.stats().failed_updates, 4);
}

#[test]
fn test_watchdog_forces_single_rollback() {
    let mut dev = device();
    let v1 = agent(1);
    dev.swap.update_agent(&v1, &sign(&v1, 1)).expect("v1");

    let v2 = agent(2);
    dev.swap.begin_update(&v2, &sign(&v2, 2)).expect("v2 staged");
    dev.clock.advance(29_999);
    assert!(!dev.swap.watchdog_check());
    dev.clock.advance(2);
    assert!(dev.swap.watchdog_check());
    dev.clock.advance(60_000);
    assert!(!dev.swap.watchdog_check());

    assert_eq!(dev.swap.stats().failed_updates, 1);
    assert_eq!(dev.swap.phase(), SwapPhase::RolledBack);
    assert!(!dev.swap.is_update_in_progress());
    assert_eq!(dev.swap.active_agent().expect("active"), v1);
    assert!(matches!(dev.swap.complete_update(), Err(SwapError::NothingStaged)));
}

#[test]
fn test_torn_write_rolls_back() {
    let mut dev = device();
    dev.bank_b.set_fault(WriteFault::Torn { budget: TRAILER_LEN + 64 });
    let v1 = agent(1);
    let err = dev.swap.update_agent(&v1, &sign(&v1, 1)).unwrap_err();
    assert!(matches!(err, SwapError::RolledBack(RollbackCause::IntegrityCheckFailed)));
    assert_eq!(dev.swap.active_bank(), Bank::A);
    assert!(!dev.swap.slots().validate_slot(Bank::B));

    dev.bank_b.set_fault(WriteFault::None);
    dev.swap.update_agent(&v1, &sign(&v1, 1)).expect("retry commits");
    assert_eq!(dev.swap.active_bank(), Bank::B);
}

/// Flash that takes `per_write_ms` of clock time per programming call.
struct SlowFlash {
    inner: MemFlash,
    clock: ManualClock,
    per_write_ms: u64,
}

impl FlashRegion for SlowFlash {
    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn read_region(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        self.inner.read_region(offset, buf)
    }

    fn write_region(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        self.clock.advance(self.per_write_ms);
        self.inner.write_region(offset, data)
    }
}

fn slow_device(per_write_ms: u64) -> HotSwap<SlowFlash, ManualClock> {
    let config = SwapConfig::default();
    let clock = ManualClock::new(0);
    let bank = |clock: &ManualClock| SlowFlash {
        inner: MemFlash::new(config.bank_capacity),
        clock: clock.clone(),
        per_write_ms,
    };
    let slots = SlotManager::new(bank(&clock), bank(&clock), Bank::A).expect("slots");
    HotSwap::new(slots, clock, config, &anchor()).expect("hotswap")
}

#[test]
fn test_write_budget_overrun_rolls_back() {
    let v1 = agent(1);

    let mut fast_enough = slow_device(300);
    fast_enough.update_agent(&v1, &sign(&v1, 1)).expect("900 ms write fits the budget");

    let mut too_slow = slow_device(400);
    let err = too_slow.update_agent(&v1, &sign(&v1, 1)).unwrap_err();
    assert!(matches!(err, SwapError::RolledBack(RollbackCause::WriteBudgetExceeded)));
    assert_eq!(too_slow.active_bank(), Bank::A);
    assert_eq!(too_slow.stats().failed_updates, 1);
}

#[test]
fn test_over_budget_manifest_rejected() {
    let mut dev = device();
    let v1 = agent(1);
    let mut manifest = sign(&v1, 1);
    manifest.sram_size = 4097;
    let err = dev.swap.update_agent(&v1, &manifest).unwrap_err();
    assert!(matches!(err, SwapError::OverBudget { declared: 4097, limit: 4096, .. }));
    assert_eq!(dev.bank_b.write_count(), 0);
}

#[test]
fn test_manual_rollback_restores_previous() {
    let mut dev = device();
    assert!(matches!(dev.swap.rollback(), Err(SwapError::NoRollbackTarget(Bank::B))));

    let v1 = agent(1);
    let v2 = agent(2);
    dev.swap.update_agent(&v1, &sign(&v1, 1)).expect("v1");
    dev.swap.update_agent(&v2, &sign(&v2, 2)).expect("v2");
    assert_eq!(dev.swap.active_bank(), Bank::A);

    assert_eq!(dev.swap.rollback().expect("rollback"), Bank::B);
    assert_eq!(dev.swap.active_agent().expect("active"), v1);

    dev.swap.clear_slot(Bank::A).expect("decommission v2");
    assert!(matches!(dev.swap.rollback(), Err(SwapError::NoRollbackTarget(Bank::A))));
    assert!(dev.bank_a.snapshot().iter().all(|&b| b == 0xFF));
}

#[test]
fn test_boot_gate_verifies_active_bank() {
    let mut dev = device();
    let v1 = agent(1);
    dev.swap.update_agent(&v1, &sign(&v1, 1)).expect("v1");

    let outcome = enforced_gate().check(&dev.swap).expect("boot ok");
    assert_eq!(outcome, BootOutcome::Verified { bank: Bank::B, version: 1, agent_id: AGENT_ID });

    let empty = device();
    assert!(matches!(enforced_gate().check(&empty.swap), Err(BootError::NoAgent { .. })));
}

#[test]
fn test_boot_gate_policies() {
    let mut dev = device();
    let v1 = agent(1);
    dev.swap.update_agent(&v1, &sign(&v1, 1)).expect("v1");
    let key = signing_key().verifying_key().to_bytes();

    let dev_mode = SecureBootGate::new(
        StaticAnchorStore::from_otp(key, 0x00).expect("store"),
        FootprintBudget::default(),
    );
    assert_eq!(dev_mode.check(&dev.swap).expect("unchecked"), BootOutcome::Unchecked { bank: Bank::B });

    let incomplete = SecureBootGate::new(
        StaticAnchorStore::from_otp(key, 0x01 | 0x04).expect("store"),
        FootprintBudget::default(),
    );
    let err = incomplete.check(&dev.swap).unwrap_err();
    assert!(matches!(err, BootError::PolicyIncomplete { .. }));
    let swap_err: SwapError = err.into();
    assert!(matches!(swap_err, SwapError::BootVerificationFailed(_)));
}

#[test]
fn test_boot_gate_file_anchor() {
    let mut dev = device();
    let v1 = agent(1);
    dev.swap.update_agent(&v1, &sign(&v1, 1)).expect("v1");

    let dir = tempfile::tempdir().expect("tempdir");
    let key_hex: String =
        signing_key().verifying_key().to_bytes().iter().map(|b| format!("{b:02x}")).collect();
    std::fs::write(dir.path().join("anchor.pub"), format!("{key_hex}\n")).expect("write key");

    let gate = SecureBootGate::new(FileAnchorStore::new(dir.path()), FootprintBudget::default());
    assert!(matches!(gate.check(&dev.swap), Ok(BootOutcome::Verified { .. })));

    std::fs::write(dir.path().join("policy.toml"), "secure_boot = false\n").expect("write policy");
    assert!(matches!(gate.check(&dev.swap), Ok(BootOutcome::Unchecked { .. })));

    let missing = SecureBootGate::new(
        FileAnchorStore::new(dir.path().join("absent")),
        FootprintBudget::default(),
    );
    assert!(matches!(missing.check(&dev.swap), Err(BootError::Anchor(_))));
}

#[test]
fn test_restart_recovers_newest_bank() {
    let mut dev = device();
    let v1 = agent(1);
    let v2 = agent(2);
    dev.swap.update_agent(&v1, &sign(&v1, 1)).expect("v1");
    dev.clock.advance(5_000);
    dev.swap.update_agent(&v2, &sign(&v2, 2)).expect("v2");
    let config = *dev.swap.config();

    let reopened = HotSwap::open(
        dev.bank_a.clone(),
        dev.bank_b.clone(),
        ManualClock::new(0),
        config,
        &anchor(),
    )
    .expect("reopen");
    assert_eq!(reopened.active_bank(), Bank::A);
    assert_eq!(reopened.active_agent().expect("active"), v2);
    assert!(matches!(enforced_gate().check(&reopened), Ok(BootOutcome::Verified { version: 2, .. })));

    dev.bank_a.corrupt(100, 0x04);
    let fallback =
        HotSwap::open(dev.bank_a.clone(), dev.bank_b.clone(), ManualClock::new(0), config, &anchor())
            .expect("reopen with fallback");
    assert_eq!(fallback.active_bank(), Bank::B);
    assert_eq!(fallback.active_agent().expect("active"), v1);
}

#[test]
fn test_reboot_keeps_latest_commit() {
    let config = SwapConfig::default();
    let bank_a = MemFlash::new(config.bank_capacity);
    let bank_b = MemFlash::new(config.bank_capacity);
    let v1 = agent(1);
    let v2 = agent(2);

    let first_clock = ManualClock::new(100_000);
    let slots = SlotManager::new(bank_a.clone(), bank_b.clone(), Bank::A).expect("slots");
    let mut first = HotSwap::new(slots, first_clock, config, &anchor()).expect("first boot");
    assert_eq!(first.update_agent(&v1, &sign(&v1, 1)).expect("v1"), Bank::B);
    drop(first);

    let mut second =
        HotSwap::open(bank_a.clone(), bank_b.clone(), ManualClock::new(5_000), config, &anchor())
            .expect("second boot");
    assert_eq!(second.active_bank(), Bank::B);
    assert_eq!(second.update_agent(&v2, &sign(&v2, 2)).expect("v2"), Bank::A);
    assert_eq!(second.active_agent().expect("active"), v2);
    drop(second);

    let third =
        HotSwap::open(bank_a.clone(), bank_b.clone(), ManualClock::new(0), config, &anchor())
            .expect("third boot");
    assert_eq!(third.active_bank(), Bank::A);
    assert_eq!(third.active_agent().expect("active"), v2);
    assert!(matches!(enforced_gate().check(&third), Ok(BootOutcome::Verified { version: 2, .. })));
    let newest = third.slot_info(Bank::A).expect("bank A trailer");
    let older = third.slot_info(Bank::B).expect("bank B trailer");
    assert!(newest.generation() > older.generation());
    assert!(newest.timestamp < older.timestamp);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_any_payload_byte_flip_fails_boot(pick in any::<prop::sample::Index>(), mask in 1u8..=255) {
        let mut dev = device();
        let v1 = agent(1);
        dev.swap.update_agent(&v1, &sign(&v1, 1)).expect("v1");
        let offset = pick.index(v1.len());
        dev.bank_b.corrupt(offset, mask);

        prop_assert!(!dev.swap.slots().validate_slot(Bank::B));
        let verdict = enforced_gate().check(&dev.swap);
        prop_assert!(
            matches!(verdict, Err(BootError::Manifest { reason: Rejection::BadSignature, .. })),
            "unexpected verdict {:?}",
            verdict
        );
    }
}
