//! Resharing
//!
//! Moves a key from one committee to another, possibly overlapping, with a
//! new threshold. The group key and chain key survive; old-only members end
//! without key material and new members get fresh auxiliary keys.

mod messages;
mod round;

pub use messages::{Auxiliary, Dealing, Handover, ReshareContent};
pub use round::{Reshare, ReshareParams};

use crate::backend::Backend;
use crate::config::Config;
use crate::curve::Curve;
use crate::mpc::{execute, Relay};
use crate::pool::Pool;
use crate::Result;
use std::sync::Arc;
use tracing::{info, instrument};

/// Protocol name of resharing
pub const RESHARE: &str = "cmp/reshare";

/// Run resharing over `relay`. Returns `None` for parties leaving the
/// committee.
#[instrument(skip_all, fields(party = %params.self_id))]
pub async fn run_reshare<C, B, T>(
    backend: B,
    config: Option<&Config<C, B>>,
    params: &ReshareParams,
    relay: Arc<T>,
    pool: Pool,
) -> Result<Option<Config<C, B>>>
where
    C: Curve,
    B: Backend<C>,
    T: Relay + ?Sized + 'static,
{
    info!(
        old = ?params.old_party_ids,
        new = ?params.new_party_ids,
        threshold = params.new_threshold,
        "Starting resharing"
    );
    let round = Reshare::new(backend, config, params, pool)?;
    let config = execute(round, relay).await?;
    info!(member = config.is_some(), "Resharing complete");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::transparent::Transparent;
    use crate::curve;
    use crate::math::lagrange;
    use crate::mpc::MemoryRelay;
    use crate::presign::Presign;
    use crate::testing::{self, rewrite, Network, TestConfig};
    use crate::types::PartyId;
    use crate::Error;
    use elliptic_curve::ff::Field;
    use k256::Secp256k1;
    use sha2::{Digest, Sha256};

    fn ids(ids: &[u32]) -> Vec<PartyId> {
        ids.iter().copied().map(PartyId::new).collect()
    }

    fn params(id: u32, old: &[u32], new: &[u32], threshold: usize) -> ReshareParams {
        ReshareParams {
            session_id: [11u8; 32],
            self_id: PartyId::new(id),
            old_party_ids: ids(old),
            new_party_ids: ids(new),
            new_threshold: threshold,
        }
    }

    fn rounds(
        configs: &[TestConfig],
        old: &[u32],
        new: &[u32],
        threshold: usize,
    ) -> Vec<Reshare<Secp256k1, Transparent>> {
        let mut everyone: Vec<u32> = old.iter().chain(new).copied().collect();
        everyone.sort();
        everyone.dedup();
        everyone
            .into_iter()
            .map(|id| {
                let config = old
                    .contains(&id)
                    .then(|| configs.iter().find(|c| c.id == PartyId::new(id)))
                    .flatten();
                Reshare::new(Transparent, config, &params(id, old, new, threshold), Pool::inline())
                    .unwrap()
            })
            .collect()
    }

    fn secret(configs: &[&TestConfig]) -> k256::Scalar {
        let signers: Vec<PartyId> = configs.iter().map(|c| c.id).collect();
        let coefficients = lagrange::<Secp256k1>(&signers).unwrap();
        configs
            .iter()
            .map(|c| coefficients[&c.id] * c.ecdsa())
            .sum()
    }

    #[test]
    fn test_reshare_to_overlapping_committee() {
        let configs = testing::keygen(&[1, 2, 3], 1);
        let outputs = testing::run(rounds(&configs, &[1, 3], &[3, 4, 5, 6], 2));

        assert!(outputs[&PartyId::new(1)].is_none());
        let reshared: Vec<TestConfig> = outputs.into_values().flatten().collect();
        assert_eq!(reshared.len(), 4);
        for config in &reshared {
            assert_eq!(config.public_key(), configs[0].public_key());
            assert_eq!(config.chain_key, configs[0].chain_key);
            assert_eq!(config.rid, reshared[0].rid);
            assert_eq!(config.threshold, 2);
            assert_eq!(config.party_ids(), ids(&[3, 4, 5, 6]));
            config.validate().unwrap();
        }

        let original = secret(&[&configs[0], &configs[1]]);
        assert_eq!(secret(&[&reshared[0], &reshared[1], &reshared[3]]), original);
        assert_eq!(secret(&[&reshared[1], &reshared[2], &reshared[3]]), original);
        assert_ne!(secret(&[&reshared[0], &reshared[1]]), original);
    }

    #[test]
    fn test_reshared_key_signs() {
        let configs = testing::keygen(&[1, 2], 1);
        let outputs = testing::run(rounds(&configs, &[1, 2], &[2, 3, 4], 1));
        let reshared: Vec<TestConfig> = outputs.into_values().flatten().collect();

        let prehash = Sha256::digest(b"after resharing");
        let signers = ids(&[3, 4]);
        let presign = reshared
            .iter()
            .filter(|c| signers.contains(&c.id))
            .map(|config| {
                Presign::new(
                    Transparent,
                    config,
                    &signers,
                    Some(prehash.as_slice()),
                    [12u8; 32],
                    Pool::inline(),
                )
                .unwrap()
            })
            .collect();

        let message = Secp256k1::prehash_to_scalar(&prehash).unwrap();
        for output in testing::run(presign).into_values() {
            let signature = output.into_signature().unwrap();
            assert!(signature.verify(&configs[0].public_key(), &message));
        }
    }

    #[test]
    fn test_wrong_dealing_blames_dealer() {
        let configs = testing::keygen(&[1, 2, 3], 1);
        let results = Network::new(rounds(&configs, &[1, 2, 3], &[1, 4, 5], 1))
            .mutate(3, 3, |reshare| reshare.contribution += k256::Scalar::ONE)
            .run();

        for id in [1, 2, 4, 5] {
            let err = results[&PartyId::new(id)].as_ref().unwrap_err();
            assert_eq!(err.culprits(), vec![PartyId::new(3)], "party {id}");
        }
    }

    #[test]
    fn test_forged_handover_from_first_dealer_is_blamed() {
        let configs = testing::keygen(&[1, 2, 3], 1);
        let results = Network::new(rounds(&configs, &[1, 2, 3], &[4, 5], 1))
            .tamper(|msg, _| {
                if msg.from != PartyId::new(1) || !msg.broadcast {
                    return msg.clone();
                }
                rewrite(msg, |content: &mut ReshareContent<Secp256k1, Transparent>| {
                    if let ReshareContent::Dealing { dealing } = content {
                        dealing.handover.chain_key[0] ^= 1;
                    }
                })
            })
            .run();

        for id in [2, 3, 4, 5] {
            let err = results[&PartyId::new(id)].as_ref().unwrap_err();
            assert_eq!(err.culprits(), vec![PartyId::new(1)], "party {id}");
        }
    }

    #[test]
    fn test_tampered_share_blames_dealer() {
        let configs = testing::keygen(&[1, 2], 1);
        let results = Network::new(rounds(&configs, &[1, 2], &[3, 4], 1))
            .tamper(|msg, to| {
                if msg.from != PartyId::new(2) || to != PartyId::new(4) || msg.broadcast {
                    return msg.clone();
                }
                rewrite(msg, |content: &mut ReshareContent<Secp256k1, Transparent>| {
                    if let ReshareContent::Share { share } = content {
                        share.plaintext = curve::Scalar(share.plaintext.0 + k256::Scalar::ONE);
                    }
                })
            })
            .run();

        let err = results[&PartyId::new(4)].as_ref().unwrap_err();
        assert_eq!(err.culprits(), vec![PartyId::new(2)]);
    }

    #[test]
    fn test_invalid_parameters() {
        let configs = testing::keygen(&[1, 2], 1);
        let new_threshold_too_high = params(3, &[1, 2], &[3, 4], 2);
        assert!(Reshare::<Secp256k1, Transparent>::new(
            Transparent,
            None,
            &new_threshold_too_high,
            Pool::inline()
        )
        .is_err());

        let missing_config = params(1, &[1, 2], &[3, 4], 1);
        let err = Reshare::<Secp256k1, Transparent>::new(
            Transparent,
            None,
            &missing_config,
            Pool::inline(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let outsider = params(3, &[1, 2], &[3, 4], 1);
        assert!(Reshare::new(Transparent, Some(&configs[0]), &outsider, Pool::inline()).is_err());

        let too_few_old = params(1, &[1], &[3, 4], 1);
        assert!(Reshare::new(Transparent, Some(&configs[0]), &too_few_old, Pool::inline()).is_err());
    }

    #[tokio::test]
    async fn test_reshare_over_relay() {
        let relay = Arc::new(MemoryRelay::new());
        let configs = testing::keygen(&[1, 2], 1);
        let public_key = configs[0].public_key();

        let mut tasks = Vec::new();
        for id in [1u32, 2, 3] {
            let relay = relay.clone();
            let config = configs.iter().find(|c| c.id == PartyId::new(id)).cloned();
            let params = params(id, &[1, 2], &[2, 3], 1);
            tasks.push(tokio::spawn(async move {
                run_reshare(Transparent, config.as_ref(), &params, relay, Pool::inline()).await
            }));
        }

        let mut members = 0;
        for task in tasks {
            if let Some(config) = task.await.unwrap().unwrap() {
                assert_eq!(config.public_key(), public_key);
                members += 1;
            }
        }
        assert_eq!(members, 2);
    }
}
