// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Signed bundle fixtures shared by unit tests.

use ed25519_dalek::{Signer, SigningKey};
use trustanchor::{BootPolicy, TrustAnchor};

use crate::crypto;
use crate::image::{ImageBuilder, KEY_ACTUATION, KEY_MODEL, KEY_PREPROCESS};
use crate::manifest::Manifest;

pub(crate) const BANK_CAPACITY: usize = 2048;
pub(crate) const AGENT_ID: u32 = 0x0A6E_0001;
pub(crate) const SRAM_SIZE: u32 = 1024;

pub(crate) fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[0x42; 32])
}

pub(crate) fn anchor() -> TrustAnchor {
    TrustAnchor::new(signing_key().verifying_key().to_bytes(), BootPolicy::ENFORCED).unwrap()
}

/// Well-formed image whose model section starts with `tag`.
pub(crate) fn bundle(tag: &[u8]) -> Vec<u8> {
    let mut model = tag.to_vec();
    model.extend(std::iter::repeat(0x5A).take(96));
    ImageBuilder::new()
        .attribute("name", "fixture")
        .section(KEY_MODEL, &model)
        .section(KEY_PREPROCESS, &[0x01; 32])
        .section(KEY_ACTUATION, &[0x02; 32])
        .build()
        .unwrap()
}

pub(crate) fn signed_manifest(bundle: &[u8], version: u32) -> Manifest {
    let hash = crypto::hash(bundle);
    Manifest {
        version,
        agent_id: AGENT_ID,
        flash_size: bundle.len() as u32,
        sram_size: SRAM_SIZE,
        signature: signing_key().sign(&hash).to_bytes(),
        hash,
    }
}
