//! CMP Party CLI
//!
//! Runs threshold ECDSA sessions for a set of local parties. Every party runs
//! on its own tokio task and all of them talk through one in-memory relay;
//! key material is kept as `config.<id>.json` files under `--dest`:
//! - Distributed key generation and key refresh
//! - Presigning and signing
//! - Resharing to a new committee
//! - Non-hardened BIP32 derivation

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use cmp_core::backend::transparent::Transparent;
use cmp_core::curve::Curve;
use cmp_core::keygen::{run_keygen, run_refresh};
use cmp_core::mpc::MemoryRelay;
use cmp_core::presign::run_presign;
use cmp_core::reshare::run_reshare;
use cmp_core::sign::run_sign;
use cmp_core::{
    Config, PartyId, Pool, PreSignature, ReshareParams, SessionId, SessionParams, Signature,
};
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::VerifyingKey;
use k256::Secp256k1;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

type PartyConfig = Config<Secp256k1, Transparent>;

/// CMP Party - local threshold ECDSA sessions
#[derive(Parser)]
#[command(name = "cmp-party")]
#[command(about = "Threshold ECDSA sessions with identifiable abort")]
#[command(version)]
struct Cli {
    /// Data directory for party configs and presignatures
    #[arg(short, long, env = "CMP_DEST", default_value = "./data")]
    dest: PathBuf,

    /// Worker threads shared by all parties
    #[arg(short, long, env = "CMP_WORKERS", default_value_t = 4)]
    workers: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run distributed key generation
    Keygen {
        /// Number of parties; IDs are 1..=N
        #[arg(short = 'n', long)]
        parties: u32,

        /// Threshold: any T + 1 parties can sign
        #[arg(short, long)]
        threshold: usize,
    },

    /// Refresh every party's share and auxiliary keys
    Refresh,

    /// Produce a presignature for each signer
    Presign {
        /// Participating party IDs (comma-separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        signers: Vec<u32>,
    },

    /// Sign a message
    Sign {
        /// Participating party IDs (comma-separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        signers: Vec<u32>,

        /// Message to sign; its SHA-256 digest is signed
        #[arg(short, long)]
        message: String,

        /// Consume presignatures from an earlier `presign`
        #[arg(long)]
        presigned: bool,
    },

    /// Move the key to a new committee
    Reshare {
        /// Members of the new committee (comma-separated)
        #[arg(long, value_delimiter = ',', required = true)]
        new_parties: Vec<u32>,

        /// Threshold of the new committee
        #[arg(long)]
        new_threshold: usize,

        /// Members of the old committee taking part; defaults to all
        #[arg(long, value_delimiter = ',')]
        old_parties: Option<Vec<u32>>,
    },

    /// Derive a child key for every party
    Derive {
        /// BIP32 derivation path (e.g., m/0/1/42)
        #[arg(short, long)]
        path: String,
    },

    /// Show the shared key info
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.dest)?;
    let pool = Pool::new(cli.workers)?;

    match cli.command {
        Commands::Keygen { parties, threshold } => {
            keygen(&cli.dest, pool, parties, threshold).await?;
        }
        Commands::Refresh => {
            refresh(&cli.dest, pool).await?;
        }
        Commands::Presign { ref signers } => {
            presign(&cli.dest, pool, &party_ids(signers)).await?;
        }
        Commands::Sign {
            ref signers,
            ref message,
            presigned,
        } => {
            sign(&cli.dest, pool, &party_ids(signers), message, presigned).await?;
        }
        Commands::Reshare {
            ref new_parties,
            new_threshold,
            ref old_parties,
        } => {
            let old = old_parties.as_deref().map(party_ids);
            reshare(&cli.dest, pool, old, &party_ids(new_parties), new_threshold).await?;
        }
        Commands::Derive { ref path } => {
            derive(&cli.dest, path)?;
        }
        Commands::Info => {
            show_info(&cli.dest)?;
        }
    }

    Ok(())
}

async fn keygen(dest: &Path, pool: Pool, parties: u32, threshold: usize) -> Result<()> {
    let ids: Vec<PartyId> = (1..=parties).map(PartyId::new).collect();
    let session_id = new_session_id();
    info!(parties, threshold, session = %hex::encode(session_id), "Starting DKG");

    let relay = Arc::new(MemoryRelay::new());
    let configs = join(ids.iter().map(|&self_id| {
        let params = SessionParams {
            session_id,
            self_id,
            party_ids: ids.clone(),
            threshold,
        };
        let relay = relay.clone();
        let pool = pool.clone();
        async move { run_keygen(Transparent, &params, relay, pool).await }
    }))
    .await?;

    for config in &configs {
        save(dest, &config_file(config.id), config)?;
    }
    clear_presignatures(dest)?;

    let public_key = public_key_hex(&configs[0]);
    info!(public_key = %public_key, "DKG completed, configs saved");
    println!("Public Key: {public_key}");

    Ok(())
}

async fn refresh(dest: &Path, pool: Pool) -> Result<()> {
    let configs = load_configs(dest)?;
    let session_id = new_session_id();
    info!(parties = configs.len(), "Starting key refresh");

    let relay = Arc::new(MemoryRelay::new());
    let refreshed = join(configs.into_iter().map(|config| {
        let relay = relay.clone();
        let pool = pool.clone();
        async move { run_refresh(Transparent, &config, session_id, relay, pool).await }
    }))
    .await?;

    for config in &refreshed {
        save(dest, &config_file(config.id), config)?;
    }
    // Presignatures are bound to the old shares
    clear_presignatures(dest)?;

    info!("Key refresh completed");
    Ok(())
}

async fn presign(dest: &Path, pool: Pool, signers: &[PartyId]) -> Result<()> {
    let configs = signer_configs(dest, signers)?;
    let session_id = new_session_id();
    info!(signers = ?signers, "Starting presigning");

    let relay = Arc::new(MemoryRelay::new());
    let outputs = join(configs.into_iter().map(|config| {
        let relay = relay.clone();
        let pool = pool.clone();
        let signers = signers.to_vec();
        async move {
            run_presign(Transparent, &config, &signers, None, session_id, relay, pool)
                .await?
                .into_presignature()
        }
    }))
    .await?;

    for presignature in &outputs {
        save(dest, &presignature_file(presignature.owner()), presignature)?;
    }

    let id = hex::encode(outputs[0].id());
    info!(presignature = %id, "Presignatures saved");
    println!("Presignature: {id}");

    Ok(())
}

async fn sign(
    dest: &Path,
    pool: Pool,
    signers: &[PartyId],
    message: &str,
    presigned: bool,
) -> Result<()> {
    let configs = signer_configs(dest, signers)?;
    let prehash = Sha256::digest(message.as_bytes());
    let session_id = new_session_id();
    info!(
        signers = ?signers,
        digest = %hex::encode(prehash),
        presigned,
        "Starting signing"
    );

    let relay = Arc::new(MemoryRelay::new());
    let signatures = if presigned {
        let mut sessions = Vec::with_capacity(configs.len());
        for config in configs {
            let presignature: PreSignature<Secp256k1> =
                load(&dest.join(presignature_file(config.id)))?;
            sessions.push((config, presignature));
        }
        // A presignature must never sign twice
        for id in signers {
            std::fs::remove_file(dest.join(presignature_file(*id)))?;
        }

        join(sessions.into_iter().map(|(config, presignature)| {
            let relay = relay.clone();
            let pool = pool.clone();
            async move { run_sign(&config, presignature, &prehash, session_id, relay, pool).await }
        }))
        .await?
    } else {
        join(configs.into_iter().map(|config| {
            let relay = relay.clone();
            let pool = pool.clone();
            let signers = signers.to_vec();
            async move {
                run_presign(
                    Transparent,
                    &config,
                    &signers,
                    Some(prehash.as_slice()),
                    session_id,
                    relay,
                    pool,
                )
                .await?
                .into_signature()
            }
        }))
        .await?
    };

    let signature = signatures[0];
    if signatures.iter().any(|s| *s != signature) {
        bail!("Parties produced different signatures");
    }

    let config: PartyConfig = load(&dest.join(config_file(signers[0])))?;
    let der = verify(&config, &signature, &prehash)?;

    info!(
        r = %hex::encode(signature.r.to_bytes()),
        s = %hex::encode(signature.s.to_bytes()),
        "Signature generated"
    );

    println!("Signature:");
    println!("  r: {}", hex::encode(signature.r.to_bytes()));
    println!("  s: {}", hex::encode(signature.s.to_bytes()));
    println!("  DER: {}", hex::encode(der));

    Ok(())
}

async fn reshare(
    dest: &Path,
    pool: Pool,
    old: Option<Vec<PartyId>>,
    new: &[PartyId],
    new_threshold: usize,
) -> Result<()> {
    let configs = load_configs(dest)?;
    let old = old.unwrap_or_else(|| configs.iter().map(|c| c.id).collect());
    let mut everyone: Vec<PartyId> = old.iter().chain(new).copied().collect();
    everyone.sort();
    everyone.dedup();

    let session_id = new_session_id();
    info!(old = ?old, new = ?new, new_threshold, "Starting resharing");

    let relay = Arc::new(MemoryRelay::new());
    let outputs = join(everyone.iter().map(|&self_id| {
        let config = old
            .contains(&self_id)
            .then(|| configs.iter().find(|c| c.id == self_id).cloned())
            .flatten();
        let params = ReshareParams {
            session_id,
            self_id,
            old_party_ids: old.clone(),
            new_party_ids: new.to_vec(),
            new_threshold,
        };
        let relay = relay.clone();
        let pool = pool.clone();
        async move {
            let config = run_reshare(Transparent, config.as_ref(), &params, relay, pool).await?;
            Ok::<_, cmp_core::Error>((self_id, config))
        }
    }))
    .await?;

    for (id, config) in &outputs {
        match config {
            Some(config) => save(dest, &config_file(*id), config)?,
            None => {
                let path = dest.join(config_file(*id));
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                info!(party = %id, "Party left the committee");
            }
        }
    }
    // Leavers outside the session keep shares of the old polynomial
    for config in configs.iter().filter(|c| !everyone.contains(&c.id)) {
        std::fs::remove_file(dest.join(config_file(config.id)))?;
        warn!(party = %config.id, "Removed config of party that was not resharing");
    }
    clear_presignatures(dest)?;

    info!("Resharing completed");
    Ok(())
}

fn derive(dest: &Path, path: &str) -> Result<()> {
    let configs = load_configs(dest)?;
    info!(path, "Deriving child keys");

    let mut derived_key = None;
    for config in &configs {
        let derived = config.derive_path(path)?;
        save(dest, &format!("config.{}.derived.json", config.id), &derived)?;
        derived_key = Some(public_key_hex(&derived));
    }

    let public_key = derived_key.ok_or_else(|| anyhow!("No configs found"))?;
    info!(public_key = %public_key, "Child keys derived and saved");
    println!("Derived Public Key: {public_key}");

    Ok(())
}

fn show_info(dest: &Path) -> Result<()> {
    let configs = load_configs(dest)?;
    let config = configs.first().ok_or_else(|| anyhow!("No configs found"))?;

    println!("Key Info:");
    println!("  Parties: {:?}", config.party_ids());
    println!("  Threshold: {}", config.threshold);
    println!("  Public Key: {}", public_key_hex(config));
    println!("  RID: {}", hex::encode(config.rid));
    println!("  Chain Key: {}", hex::encode(config.chain_key));
    println!("  Local configs: {}", configs.len());

    Ok(())
}

/// Await one task per party, reporting the parties an abort blamed.
async fn join<T, F>(sessions: impl IntoIterator<Item = F>) -> Result<Vec<T>>
where
    T: Send + 'static,
    F: Future<Output = cmp_core::Result<T>> + Send + 'static,
{
    let tasks: Vec<_> = sessions.into_iter().map(tokio::spawn).collect();

    let mut outputs = Vec::with_capacity(tasks.len());
    let mut failure = None;
    for task in tasks {
        match task.await? {
            Ok(output) => outputs.push(output),
            Err(err) => {
                let culprits = err.culprits();
                if !culprits.is_empty() {
                    warn!(culprits = ?culprits, "Session aborted");
                }
                failure.get_or_insert(err);
            }
        }
    }

    match failure {
        Some(err) => Err(err.into()),
        None => Ok(outputs),
    }
}

fn verify(
    config: &PartyConfig,
    signature: &Signature<Secp256k1>,
    prehash: &[u8],
) -> Result<Vec<u8>> {
    let key = VerifyingKey::from_sec1_bytes(&Secp256k1::point_to_bytes(&config.public_key()))?;
    let signature = signature.to_ecdsa()?;
    key.verify_prehash(prehash, &signature)
        .context("Signature does not verify")?;
    Ok(signature.to_der().as_bytes().to_vec())
}

fn signer_configs(dest: &Path, signers: &[PartyId]) -> Result<Vec<PartyConfig>> {
    signers
        .iter()
        .map(|id| load(&dest.join(config_file(*id))))
        .collect()
}

fn load_configs(dest: &Path) -> Result<Vec<PartyConfig>> {
    let mut configs = Vec::new();
    for entry in std::fs::read_dir(dest)? {
        let name = entry?.file_name();
        let Some(id) = name
            .to_str()
            .and_then(|name| name.strip_prefix("config."))
            .and_then(|name| name.strip_suffix(".json"))
            .and_then(|id| id.parse::<u32>().ok())
        else {
            continue;
        };
        let config: PartyConfig = load(&dest.join(config_file(PartyId::new(id))))?;
        configs.push(config);
    }

    if configs.is_empty() {
        bail!("No configs found in {}", dest.display());
    }
    configs.sort_by_key(|c| c.id);
    Ok(configs)
}

fn clear_presignatures(dest: &Path) -> Result<()> {
    for entry in std::fs::read_dir(dest)? {
        let entry = entry?;
        if entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with("presignature."))
        {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read {}", path.display()))?;
    Ok(serde_json::from_str(&json)?)
}

fn save<T: Serialize>(dest: &Path, name: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(dest.join(name), json)?;
    Ok(())
}

fn config_file(id: PartyId) -> String {
    format!("config.{id}.json")
}

fn presignature_file(id: PartyId) -> String {
    format!("presignature.{id}.json")
}

fn party_ids(ids: &[u32]) -> Vec<PartyId> {
    ids.iter().copied().map(PartyId::new).collect()
}

fn public_key_hex(config: &PartyConfig) -> String {
    hex::encode(Secp256k1::point_to_bytes(&config.public_key()))
}

fn new_session_id() -> SessionId {
    rand::random()
}
