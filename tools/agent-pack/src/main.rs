// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Agent bundle packer, signer and offline verifier
//! OWNERS: @tools-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 4 unit tests
//!
//! PUBLIC API:
//!   - CLI: agent-pack pack --model <f> --preprocess <f> --actuation <f> --key <hex>
//!          --agent-version <n> --agent-id <n> --sram-size <n> --output <bundle> --manifest <file>
//!   - CLI: agent-pack inspect <bundle> [--manifest <file>]
//!   - CLI: agent-pack verify --bundle <f> --manifest <f> --anchor <anchor.pub> [--config <toml>]
//!   - CLI: agent-pack pubkey --key <hex>
//!
//! DEPENDENCIES:
//!   - agentswap: image encoding, manifest encoding, shared verifier
//!   - ed25519-dalek: manifest signing
//!   - trustanchor: anchor key file parsing

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use agentswap::crypto::{self, Ed25519Verifier};
use agentswap::image::{KEY_ACTUATION, KEY_MODEL, KEY_PREPROCESS};
use agentswap::{manifest, AgentImage, FootprintBudget, ImageBuilder, Manifest, SwapConfig};
use clap::{Parser, Subcommand};
use ed25519_dalek::{Signer, SigningKey};
use log::{debug, info};

const MAX_SECTION_BYTES: u64 = 1024 * 1024;

#[derive(Parser)]
#[command(name = "agent-pack", about = "Agent bundle packer and verifier", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build an image from sections and sign its manifest.
    Pack {
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        preprocess: PathBuf,
        #[arg(long)]
        actuation: PathBuf,
        /// Informational attribute, `key=value`. Repeatable.
        #[arg(long = "attr")]
        attrs: Vec<String>,
        /// File holding the 32-byte Ed25519 seed as hex.
        #[arg(long)]
        key: PathBuf,
        #[arg(long)]
        agent_version: u32,
        #[arg(long)]
        agent_id: u32,
        #[arg(long)]
        sram_size: u32,
        /// Declared flash footprint; defaults to the bundle length.
        #[arg(long)]
        flash_size: Option<u32>,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        manifest: PathBuf,
    },
    /// Print the structure of a bundle and optionally its manifest.
    Inspect {
        bundle: PathBuf,
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Run the device-side verifier against a bundle and manifest.
    Verify {
        #[arg(long)]
        bundle: PathBuf,
        #[arg(long)]
        manifest: PathBuf,
        /// Anchor public key, hex or SPKI PEM.
        #[arg(long)]
        anchor: PathBuf,
        /// Engine configuration supplying the footprint budget.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the public key for a signing seed, hex encoded.
    Pubkey {
        #[arg(long)]
        key: PathBuf,
    },
}

struct Sections {
    model: Vec<u8>,
    preprocess: Vec<u8>,
    actuation: Vec<u8>,
    attrs: Vec<(String, String)>,
}

struct Identity {
    version: u32,
    agent_id: u32,
    sram_size: u32,
    flash_size: Option<u32>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Pack {
            model,
            preprocess,
            actuation,
            attrs,
            key,
            agent_version,
            agent_id,
            sram_size,
            flash_size,
            output,
            manifest,
        } => {
            let sections = Sections {
                model: read_section(&model)?,
                preprocess: read_section(&preprocess)?,
                actuation: read_section(&actuation)?,
                attrs: attrs.iter().map(|a| parse_attr(a)).collect::<Result<_, _>>()?,
            };
            let signing_key = load_signing_key(&key)?;
            let identity = Identity { version: agent_version, agent_id, sram_size, flash_size };
            let (bundle, signed) = pack(&sections, &identity, &signing_key)?;
            fs::write(&output, &bundle)?;
            fs::write(&manifest, signed.to_bytes())?;
            info!(
                "packed agent {:#x} v{}: {} bytes -> {}",
                agent_id,
                agent_version,
                bundle.len(),
                output.display()
            );
        }
        Command::Inspect { bundle, manifest } => {
            let bytes = fs::read(&bundle)?;
            print!("{}", describe_bundle(&bytes)?);
            if let Some(path) = manifest {
                print!("{}", describe_manifest(&read_manifest(&path)?));
            }
        }
        Command::Verify { bundle, manifest, anchor, config } => {
            let bytes = fs::read(&bundle)?;
            let decoded = read_manifest(&manifest)?;
            let trusted = trustanchor::load_key_file(&anchor)?;
            let budget = match config {
                Some(path) => SwapConfig::load(&path)?.budget,
                None => FootprintBudget::default(),
            };
            verify(&bytes, &decoded, &trusted, &budget)?;
            println!("OK: agent {:#x} v{} verified", decoded.agent_id, decoded.version);
        }
        Command::Pubkey { key } => {
            let signing_key = load_signing_key(&key)?;
            println!("{}", hex::encode(signing_key.verifying_key().to_bytes()));
        }
    }
    Ok(())
}

fn pack(
    sections: &Sections,
    identity: &Identity,
    signing_key: &SigningKey,
) -> Result<(Vec<u8>, Manifest), Box<dyn Error>> {
    let mut builder = ImageBuilder::new();
    for (key, value) in &sections.attrs {
        builder = builder.attribute(key, value);
    }
    let bundle = builder
        .section(KEY_MODEL, &sections.model)
        .section(KEY_PREPROCESS, &sections.preprocess)
        .section(KEY_ACTUATION, &sections.actuation)
        .build()?;
    let bundle_len = u32::try_from(bundle.len()).map_err(|_| "bundle exceeds 4 GiB")?;
    let flash_size = identity.flash_size.unwrap_or(bundle_len);
    if flash_size < bundle_len {
        return Err(format!("flash size {flash_size} is smaller than bundle ({bundle_len})").into());
    }

    let hash = crypto::hash(&bundle);
    let signature = signing_key.sign(&hash).to_bytes();
    debug!("bundle hash {}", hex::encode(hash));
    let manifest = Manifest {
        version: identity.version,
        agent_id: identity.agent_id,
        flash_size,
        sram_size: identity.sram_size,
        signature,
        hash,
    };
    Ok((bundle, manifest))
}

fn verify(
    bundle: &[u8],
    decoded: &Manifest,
    trusted: &[u8; 32],
    budget: &FootprintBudget,
) -> Result<(), Box<dyn Error>> {
    AgentImage::parse(bundle)?;
    manifest::verify(bundle, decoded, trusted, budget, &Ed25519Verifier)?;
    if bundle.len() > decoded.flash_size as usize {
        return Err(format!(
            "bundle of {} bytes exceeds declared flash size {}",
            bundle.len(),
            decoded.flash_size
        )
        .into());
    }
    Ok(())
}

fn describe_bundle(bytes: &[u8]) -> Result<String, Box<dyn Error>> {
    let image = AgentImage::parse(bytes)?;
    let mut out = format!("bundle: {} bytes\n", bytes.len());
    for (name, view) in [
        (KEY_MODEL, image.model()),
        (KEY_PREPROCESS, image.preprocess()),
        (KEY_ACTUATION, image.actuation()),
    ] {
        out.push_str(&format!("  section {name:<10} offset {:>6} len {:>6}\n", view.offset, view.len));
    }
    for attr in image.attributes() {
        out.push_str(&format!("  attr    {} = {}\n", attr.key, attr.value));
    }
    Ok(out)
}

fn describe_manifest(manifest: &Manifest) -> String {
    format!(
        "manifest:\n  version    {}\n  agent_id   {:#x}\n  flash_size {}\n  sram_size  {}\n  hash       {}\n",
        manifest.version,
        manifest.agent_id,
        manifest.flash_size,
        manifest.sram_size,
        hex::encode(manifest.hash)
    )
}

fn read_section(path: &Path) -> Result<Vec<u8>, Box<dyn Error>> {
    let len = fs::metadata(path)?.len();
    if len > MAX_SECTION_BYTES {
        return Err(format!(
            "{} too large: {len} bytes (max {MAX_SECTION_BYTES})",
            path.display()
        )
        .into());
    }
    Ok(fs::read(path)?)
}

fn read_manifest(path: &Path) -> Result<Manifest, Box<dyn Error>> {
    Ok(Manifest::from_bytes(&fs::read(path)?)?)
}

fn parse_attr(raw: &str) -> Result<(String, String), Box<dyn Error>> {
    let (key, value) = raw.split_once('=').ok_or_else(|| format!("attribute `{raw}` must be key=value"))?;
    if key.is_empty() {
        return Err(format!("attribute `{raw}` has an empty key").into());
    }
    Ok((key.to_string(), value.to_string()))
}

fn load_signing_key(path: &Path) -> Result<SigningKey, Box<dyn Error>> {
    let key_hex = fs::read_to_string(path)?;
    let key_bytes = hex::decode(key_hex.trim())?;
    let seed: [u8; 32] = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| format!("ed25519 seed must be 32 bytes (hex), got {}", key_bytes.len()))?;
    Ok(SigningKey::from_bytes(&seed))
}
