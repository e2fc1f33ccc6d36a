//! Key material produced by key generation, refresh and resharing

use crate::backend::Backend;
use crate::curve::{Curve, Point, Scalar};
use crate::math::lagrange;
use crate::types::PartyId;
use crate::{Error, Result};
use derivation_path::{ChildIndex, DerivationPath};
use elliptic_curve::group::Group;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::collections::{BTreeMap, BTreeSet};
use zeroize::Zeroize;

/// Public values every party holds about one party
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Public<C: Curve, B: Backend<C>> {
    /// Shamir share of the ECDSA key in the exponent, `x_j·G`
    pub ecdsa: Point<C>,
    /// ElGamal public key `y_j·G`
    pub elgamal: Point<C>,
    pub paillier: B::EncryptionKey,
    pub pedersen: B::PedersenParams,
}

/// One party's key material.
///
/// Every party's `Config` agrees on the group public key, the RID and the
/// chain key; the secret fields differ per party.
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Config<C: Curve, B: Backend<C>> {
    pub id: PartyId,
    pub threshold: usize,
    public_key: Point<C>,
    ecdsa: Scalar<C>,
    elgamal: Scalar<C>,
    paillier: B::DecryptionKey,
    /// Random ID agreed during key generation, mixed into later sessions
    pub rid: [u8; 32],
    /// BIP32 chain key
    pub chain_key: [u8; 32],
    pub public: BTreeMap<PartyId, Public<C, B>>,
}

/// The secret-free part of a [`Config`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct PublicConfig<C: Curve, B: Backend<C>> {
    pub threshold: usize,
    pub public_key: Point<C>,
    pub rid: [u8; 32],
    pub chain_key: [u8; 32],
    pub public: BTreeMap<PartyId, Public<C, B>>,
}

impl<C: Curve, B: Backend<C>> Config<C, B> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: PartyId,
        threshold: usize,
        public_key: C::Point,
        ecdsa: C::Scalar,
        elgamal: C::Scalar,
        paillier: B::DecryptionKey,
        rid: [u8; 32],
        chain_key: [u8; 32],
        public: BTreeMap<PartyId, Public<C, B>>,
    ) -> Self {
        Self {
            id,
            threshold,
            public_key: Point(public_key),
            ecdsa: Scalar(ecdsa),
            elgamal: Scalar(elgamal),
            paillier,
            rid,
            chain_key,
            public,
        }
    }

    /// Group ECDSA public key
    pub fn public_key(&self) -> C::Point {
        self.public_key.0
    }

    pub fn public_share(&self, id: &PartyId) -> Option<&Public<C, B>> {
        self.public.get(id)
    }

    /// All parties holding a share, sorted
    pub fn party_ids(&self) -> Vec<PartyId> {
        self.public.keys().copied().collect()
    }

    /// Whether `signers` is a valid signing set for this key
    pub fn can_sign(&self, signers: &[PartyId]) -> bool {
        let unique: BTreeSet<_> = signers.iter().collect();
        unique.len() == signers.len()
            && signers.len() > self.threshold
            && signers.iter().all(|id| self.public.contains_key(id))
    }

    pub fn public_config(&self) -> PublicConfig<C, B> {
        PublicConfig {
            threshold: self.threshold,
            public_key: self.public_key,
            rid: self.rid,
            chain_key: self.chain_key,
            public: self.public.clone(),
        }
    }

    pub(crate) fn ecdsa(&self) -> &C::Scalar {
        &self.ecdsa.0
    }

    pub(crate) fn elgamal(&self) -> &C::Scalar {
        &self.elgamal.0
    }

    pub(crate) fn paillier(&self) -> &B::DecryptionKey {
        &self.paillier
    }

    /// Own additive share and every signer's public additive share, scaled
    /// by Lagrange coefficients over `signers`.
    pub(crate) fn signing_shares(
        &self,
        signers: &[PartyId],
    ) -> Result<(C::Scalar, BTreeMap<PartyId, C::Point>)> {
        if !self.can_sign(signers) {
            return Err(Error::ThresholdNotMet {
                required: self.threshold + 1,
                actual: signers.len(),
            });
        }
        let coefficients = lagrange::<C>(signers)?;
        let own = coefficients
            .get(&self.id)
            .ok_or(Error::InvalidPartyId(self.id))?;

        let mut shares = BTreeMap::new();
        for (id, lambda) in &coefficients {
            let public = self.public.get(id).ok_or(Error::InvalidPartyId(*id))?;
            shares.insert(*id, public.ecdsa.0 * lambda);
        }
        Ok((*own * self.ecdsa.0, shares))
    }

    /// Check internal consistency, e.g. after loading from disk.
    pub fn validate(&self) -> Result<()> {
        let own = self
            .public
            .get(&self.id)
            .ok_or(Error::InvalidPartyId(self.id))?;
        if self.threshold >= self.public.len() {
            return Err(Error::InvalidConfig(format!(
                "Threshold {} with {} parties",
                self.threshold,
                self.public.len()
            )));
        }
        let g = C::Point::generator();
        if g * self.ecdsa.0 != own.ecdsa.0 || g * self.elgamal.0 != own.elgamal.0 {
            return Err(Error::InvalidConfig(
                "Secret shares do not match public shares".into(),
            ));
        }

        let ids = self.party_ids();
        let interpolated = lagrange::<C>(&ids)?
            .iter()
            .fold(C::Point::identity(), |acc, (id, lambda)| {
                acc + self.public[id].ecdsa.0 * lambda
            });
        if interpolated != self.public_key.0 {
            return Err(Error::InvalidConfig(
                "Public shares do not interpolate to the public key".into(),
            ));
        }
        Ok(())
    }

    /// Non-hardened BIP32 child key.
    ///
    /// Every party shifts its share by the same public tweak, so the derived
    /// configs still form a valid sharing of the derived key.
    pub fn derive_bip32(&self, index: u32) -> Result<Self> {
        if index >= 0x8000_0000 {
            return Err(Error::Derivation(
                "Hardened derivation is not possible on a shared key".into(),
            ));
        }

        let mut mac = Hmac::<Sha512>::new_from_slice(&self.chain_key)
            .map_err(|e| Error::Derivation(e.to_string()))?;
        mac.update(&C::point_to_bytes(&self.public_key.0));
        mac.update(&index.to_be_bytes());
        let output = mac.finalize().into_bytes();
        let (tweak_bytes, chain_bytes) = output.split_at(32);

        let tweak = C::prehash_to_scalar(tweak_bytes)
            .ok_or_else(|| Error::Derivation("Unexpected HMAC output length".into()))?;
        let shift = C::Point::generator() * tweak;
        let mut chain_key = [0u8; 32];
        chain_key.copy_from_slice(chain_bytes);

        let mut derived = self.clone();
        derived.ecdsa = Scalar(self.ecdsa.0 + tweak);
        derived.public_key = Point(self.public_key.0 + shift);
        derived.chain_key = chain_key;
        for public in derived.public.values_mut() {
            public.ecdsa = Point(public.ecdsa.0 + shift);
        }
        Ok(derived)
    }

    /// Derive along a path such as `m/0/1`.
    pub fn derive_path(&self, path: &str) -> Result<Self> {
        let path: DerivationPath = path
            .parse()
            .map_err(|e| Error::Derivation(format!("Invalid path: {e:?}")))?;

        let mut derived = self.clone();
        for child in path.into_iter() {
            match child {
                ChildIndex::Normal(index) => derived = derived.derive_bip32(*index)?,
                ChildIndex::Hardened(_) => {
                    return Err(Error::Derivation(
                        "Hardened derivation is not possible on a shared key".into(),
                    ))
                }
            }
        }
        Ok(derived)
    }
}

impl<C: Curve, B: Backend<C>> Drop for Config<C, B> {
    fn drop(&mut self) {
        self.ecdsa.zeroize();
        self.elgamal.zeroize();
    }
}

impl<C: Curve, B: Backend<C>> std::fmt::Debug for Config<C, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("id", &self.id)
            .field("threshold", &self.threshold)
            .field("public_key", &self.public_key)
            .field("rid", &hex::encode(self.rid))
            .field("parties", &self.party_ids())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::transparent::Transparent;
    use crate::math::Polynomial;
    use elliptic_curve::Field;
    use k256::Secp256k1;
    use rand::rngs::OsRng;

    type TestConfig = Config<Secp256k1, Transparent>;

    /// Trusted-dealer configs, enough to test the local operations
    pub(crate) fn dealt(n: u32, threshold: usize) -> Vec<TestConfig> {
        let secret = k256::Scalar::random(&mut OsRng);
        let poly = Polynomial::<Secp256k1>::random(&mut OsRng, threshold, secret);
        let ids: Vec<PartyId> = (1..=n).map(PartyId::new).collect();
        let g = k256::ProjectivePoint::GENERATOR;

        let mut secrets = BTreeMap::new();
        let mut public = BTreeMap::new();
        for id in &ids {
            let elgamal = k256::Scalar::random(&mut OsRng);
            let paillier =
                <Transparent as Backend<Secp256k1>>::generate_key(&Transparent, &mut OsRng)
                    .unwrap();
            public.insert(
                *id,
                Public {
                    ecdsa: Point(g * poly.share(id)),
                    elgamal: Point(g * elgamal),
                    paillier: <Transparent as Backend<Secp256k1>>::encryption_key(
                        &Transparent,
                        &paillier,
                    ),
                    pedersen: <Transparent as Backend<Secp256k1>>::pedersen(
                        &Transparent,
                        &paillier,
                    ),
                },
            );
            secrets.insert(*id, (poly.share(id), elgamal, paillier));
        }

        secrets
            .into_iter()
            .map(|(id, (ecdsa, elgamal, paillier))| {
                Config::new(
                    id,
                    threshold,
                    g * secret,
                    ecdsa,
                    elgamal,
                    paillier,
                    [3u8; 32],
                    [4u8; 32],
                    public.clone(),
                )
            })
            .collect()
    }

    #[test]
    fn test_validate_and_can_sign() {
        let configs = dealt(4, 2);
        for config in &configs {
            config.validate().unwrap();
        }
        let ids = configs[0].party_ids();
        assert!(configs[0].can_sign(&ids[..3]));
        assert!(!configs[0].can_sign(&ids[..2]));
        assert!(!configs[0].can_sign(&[ids[0], ids[0], ids[1]]));
        assert!(!configs[0].can_sign(&[ids[0], ids[1], PartyId::new(9)]));
    }

    #[test]
    fn test_signing_shares_sum_to_key() {
        let configs = dealt(4, 2);
        let signers = vec![PartyId::new(1), PartyId::new(3), PartyId::new(4)];

        let mut total = k256::Scalar::ZERO;
        for config in configs.iter().filter(|c| signers.contains(&c.id)) {
            let (share, publics) = config.signing_shares(&signers).unwrap();
            assert_eq!(k256::ProjectivePoint::GENERATOR * share, publics[&config.id]);
            total += share;
        }
        assert_eq!(
            k256::ProjectivePoint::GENERATOR * total,
            configs[0].public_key()
        );
    }

    #[test]
    fn test_derivation_keeps_sharing_consistent() {
        let configs = dealt(3, 1);
        let derived: Vec<_> = configs
            .iter()
            .map(|c| c.derive_path("m/0/7").unwrap())
            .collect();

        for config in &derived {
            config.validate().unwrap();
            assert_eq!(config.public_key(), derived[0].public_key());
            assert_eq!(config.chain_key, derived[0].chain_key);
        }
        assert_ne!(derived[0].public_key(), configs[0].public_key());
        assert_eq!(
            configs[0].derive_bip32(0).unwrap().derive_bip32(7).unwrap().public_key(),
            derived[0].public_key()
        );

        assert!(configs[0].derive_path("m/0'").is_err());
        assert!(configs[0].derive_bip32(0x8000_0000).is_err());
        assert!(configs[0].derive_path("not a path").is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = dealt(3, 1).remove(0);
        let json = serde_json::to_string(&config).unwrap();
        let back: TestConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.public_config(), config.public_config());
        assert_eq!(back.ecdsa(), config.ecdsa());
        back.validate().unwrap();
    }
}
