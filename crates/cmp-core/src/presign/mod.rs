//! Presigning
//!
//! Signers jointly sample the nonce `k = Σkᵢ` and the mask `γ = Σγᵢ`, run
//! multiplicative-to-additive conversions for `δ = k·γ` and `χ = k·x`, and
//! end up with `R = δ⁻¹·Γ` and per-party shares that make signing a single
//! broadcast. Failed consistency checks trigger a reveal phase that names the
//! parties whose contributions were wrong.

mod messages;
mod presignature;
mod round;

pub use messages::{MtaCiphertexts, Opened, PresignContent, Reveal};
pub use presignature::{PreSignature, PresignOutput};
pub use round::Presign;

use crate::backend::Backend;
use crate::config::Config;
use crate::curve::Curve;
use crate::mpc::{execute, Relay};
use crate::pool::Pool;
use crate::types::PartyId;
use crate::{Result, SessionId};
use std::sync::Arc;
use tracing::{info, instrument};

/// Protocol name of presigning
pub const PRESIGN: &str = "cmp/presign";

/// Run presigning among `signers` over `relay`.
///
/// With a `prehash` the session continues straight into signing and outputs
/// [`PresignOutput::Signature`].
#[instrument(skip_all, fields(party = %config.id))]
pub async fn run_presign<C, B, T>(
    backend: B,
    config: &Config<C, B>,
    signers: &[PartyId],
    prehash: Option<&[u8]>,
    session_id: SessionId,
    relay: Arc<T>,
    pool: Pool,
) -> Result<PresignOutput<C>>
where
    C: Curve,
    B: Backend<C>,
    T: Relay + ?Sized + 'static,
{
    info!(signers = ?signers, with_message = prehash.is_some(), "Starting presigning");
    let round = Presign::new(backend, config, signers, prehash, session_id, pool)?;
    let output = execute(round, relay).await?;
    info!("Presigning complete");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::transparent::Transparent;
    use crate::mpc::MemoryRelay;
    use crate::sign::run_sign;
    use crate::testing;
    use k256::Secp256k1;
    use sha2::{Digest, Sha256};

    #[tokio::test]
    async fn test_presign_and_sign_over_relay() {
        let relay = Arc::new(MemoryRelay::new());
        let configs = testing::keygen(&[1, 2, 3], 1);
        let signers = vec![PartyId::new(1), PartyId::new(3)];
        let prehash: [u8; 32] = Sha256::digest(b"over the relay").into();

        let tasks: Vec<_> = configs
            .into_iter()
            .filter(|config| signers.contains(&config.id))
            .map(|config| {
                let relay = relay.clone();
                let signers = signers.clone();
                tokio::spawn(async move {
                    let output = run_presign(
                        Transparent,
                        &config,
                        &signers,
                        None,
                        [3u8; 32],
                        relay.clone(),
                        Pool::inline(),
                    )
                    .await?;
                    let presignature = output.into_presignature()?;
                    let signature =
                        run_sign(&config, presignature, &prehash, [4u8; 32], relay, Pool::inline())
                            .await?;
                    Ok::<_, crate::Error>((config.public_key(), signature))
                })
            })
            .collect();

        let message = Secp256k1::prehash_to_scalar(&prehash).unwrap();
        for task in tasks {
            let (public_key, signature) = task.await.unwrap().unwrap();
            assert!(signature.verify(&public_key, &message));
        }
    }
}
