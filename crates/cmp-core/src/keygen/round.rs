//! Key generation and refresh round chain

use super::messages::{Committed, KeygenContent};
use super::{KEYGEN, REFRESH};
use crate::backend::Backend;
use crate::config::{Config, Public};
use crate::curve::{Curve, Point};
use crate::helper::{Decommitment, Helper, SessionParams};
use crate::math::{Exponent, Polynomial};
use crate::pool::Pool;
use crate::round::{Outbox, Round, Transition};
use crate::types::{self, BroadcastKind, Hash, PartyId, RoundNumber, SessionId};
use crate::zk::schnorr;
use crate::{Error, Result};
use elliptic_curve::{ff::Field, group::Group};
use rand::rngs::OsRng;
use rand_core::RngCore;
use std::collections::BTreeMap;
use tracing::debug;

const FINAL_ROUND: RoundNumber = 5;

/// State accumulated by one party over the five key generation rounds.
pub struct Keygen<C: Curve, B: Backend<C>> {
    helper: Helper,
    backend: B,
    round: RoundNumber,
    /// Config being refreshed, `None` for a fresh key
    previous: Option<Config<C, B>>,

    poly: Option<Polynomial<C>>,
    elgamal: C::Scalar,
    paillier: Option<B::DecryptionKey>,
    schnorr: Option<schnorr::Randomness<C>>,
    decommitment: Decommitment,

    commitments: BTreeMap<PartyId, Hash>,
    committed: BTreeMap<PartyId, Committed<C, B>>,
    rid: [u8; 32],
    chain_key: [u8; 32],
    shares: BTreeMap<PartyId, C::Scalar>,

    secret: C::Scalar,
    public_key: C::Point,
    public_shares: BTreeMap<PartyId, C::Point>,
}

impl<C: Curve, B: Backend<C>> Keygen<C, B> {
    /// First round of a fresh distributed key generation.
    pub fn new(backend: B, params: &SessionParams, pool: Pool) -> Result<Self> {
        let helper = Helper::new(KEYGEN, C::NAME, FINAL_ROUND, params, pool)?;
        Ok(Self::with_helper(helper, backend, None))
    }

    /// First round of a refresh of `config`: same party set, same public key,
    /// fresh shares and auxiliary parameters.
    pub fn refresh(
        backend: B,
        config: &Config<C, B>,
        session_id: SessionId,
        pool: Pool,
    ) -> Result<Self> {
        config.validate()?;
        let params = SessionParams {
            session_id,
            self_id: config.id,
            party_ids: config.party_ids(),
            threshold: config.threshold,
        };
        let mut helper = Helper::new(REFRESH, C::NAME, FINAL_ROUND, &params, pool)?;
        helper.update_hash("rid", &config.rid);
        helper.update_hash("public key", &C::point_to_bytes(&config.public_key()));
        Ok(Self::with_helper(helper, backend, Some(config.clone())))
    }

    fn with_helper(helper: Helper, backend: B, previous: Option<Config<C, B>>) -> Self {
        Self {
            helper,
            backend,
            round: 1,
            previous,
            poly: None,
            elgamal: C::Scalar::ZERO,
            paillier: None,
            schnorr: None,
            decommitment: [0u8; 32],
            commitments: BTreeMap::new(),
            committed: BTreeMap::new(),
            rid: [0u8; 32],
            chain_key: [0u8; 32],
            shares: BTreeMap::new(),
            secret: C::Scalar::ZERO,
            public_key: C::Point::identity(),
            public_shares: BTreeMap::new(),
        }
    }

    fn is_refresh(&self) -> bool {
        self.previous.is_some()
    }

    fn committed(&self, id: &PartyId) -> Result<&Committed<C, B>> {
        self.committed
            .get(id)
            .ok_or_else(|| Error::missing("committed values"))
    }

    fn own_committed(&self) -> Result<&Committed<C, B>> {
        self.committed(&self.helper.self_id())
    }

    /// Sample the polynomial and auxiliary keys, commit to all public parts.
    fn finalize_round1(&mut self, outbox: &mut Outbox<KeygenContent<C, B>>) -> Result<()> {
        let threshold = self.helper.threshold();
        let constant = if self.is_refresh() {
            C::Scalar::ZERO
        } else {
            C::Scalar::random(&mut OsRng)
        };
        let poly = Polynomial::<C>::random(&mut OsRng, threshold, constant);

        let mut rid = [0u8; 32];
        OsRng.fill_bytes(&mut rid);
        let mut chain_key = [0u8; 32];
        if !self.is_refresh() {
            OsRng.fill_bytes(&mut chain_key);
        }

        self.elgamal = C::Scalar::random(&mut OsRng);
        let paillier = self.backend.generate_key(&mut OsRng)?;
        let randomness = schnorr::Randomness::<C>::new(&mut OsRng);

        let committed = Committed {
            rid,
            chain_key,
            vss: poly.commit(),
            schnorr: *randomness.commitment(),
            elgamal: Point(C::Point::generator() * self.elgamal),
            paillier: self.backend.encryption_key(&paillier),
            pedersen: self.backend.pedersen(&paillier),
        };
        let (hash, decommitment) = self.helper.commit(&mut OsRng, &types::encode(&committed)?);

        self.poly = Some(poly);
        self.paillier = Some(paillier);
        self.schnorr = Some(randomness);
        self.decommitment = decommitment;
        self.commitments.insert(self.helper.self_id(), hash);
        self.committed.insert(self.helper.self_id(), committed);

        outbox.broadcast(KeygenContent::Commitment { hash });
        Ok(())
    }

    fn finalize_round2(&mut self, outbox: &mut Outbox<KeygenContent<C, B>>) -> Result<()> {
        outbox.broadcast(KeygenContent::Opening {
            committed: Box::new(self.own_committed()?.clone()),
            decommitment: self.decommitment,
        });
        Ok(())
    }

    /// Agree on the RID, then hand every peer its share under its own key.
    fn finalize_round3(&mut self, outbox: &mut Outbox<KeygenContent<C, B>>) -> Result<()> {
        let mut rid = [0u8; 32];
        let mut chain_key = [0u8; 32];
        for committed in self.committed.values() {
            for (acc, byte) in rid.iter_mut().zip(committed.rid) {
                *acc ^= byte;
            }
            for (acc, byte) in chain_key.iter_mut().zip(committed.chain_key) {
                *acc ^= byte;
            }
        }
        self.rid = rid;
        self.chain_key = match &self.previous {
            Some(previous) => previous.chain_key,
            None => chain_key,
        };
        self.helper.update_hash("rid", &rid);

        let self_id = self.helper.self_id();
        let poly = self.poly.as_ref().ok_or_else(|| Error::missing("polynomial"))?;
        let paillier = self
            .paillier
            .as_ref()
            .ok_or_else(|| Error::missing("paillier key"))?;

        let mod_proof = self.backend.prove_mod(
            paillier,
            &mut self.helper.transcript(b"mod", &self_id),
            &mut OsRng,
        );
        let prm_proof = self.backend.prove_prm(
            paillier,
            &mut self.helper.transcript(b"prm", &self_id),
            &mut OsRng,
        );

        let backend = &self.backend;
        let committed = &self.committed;
        let encrypted = self.helper.pool().map(self.helper.other_party_ids(), |id| {
            let key = &committed
                .get(&id)
                .ok_or_else(|| Error::missing("peer encryption key"))?
                .paillier;
            let (share, _) = backend.encrypt(key, &poly.share(&id), &mut OsRng);
            Ok((id, share))
        })?;

        for (id, share) in encrypted {
            outbox.send(
                id,
                KeygenContent::Share {
                    mod_proof: mod_proof.clone(),
                    prm_proof: prm_proof.clone(),
                    share,
                },
            );
        }

        self.shares.insert(self_id, poly.share(&self_id));
        Ok(())
    }

    /// Sum the shares and prove knowledge of the result.
    fn finalize_round4(&mut self, outbox: &mut Outbox<KeygenContent<C, B>>) -> Result<()> {
        let self_id = self.helper.self_id();

        let vss = Exponent::sum(self.committed.values().map(|c| &c.vss))?;
        let mut secret = self
            .shares
            .values()
            .fold(C::Scalar::ZERO, |acc, share| acc + share);
        let mut public_shares: BTreeMap<PartyId, C::Point> = self
            .helper
            .party_ids()
            .iter()
            .map(|id| (*id, vss.share(id)))
            .collect();
        let mut public_key = vss.constant();

        if let Some(previous) = &self.previous {
            secret += previous.ecdsa();
            for (id, share) in public_shares.iter_mut() {
                let old = previous
                    .public_share(id)
                    .ok_or(Error::InvalidPartyId(*id))?;
                *share += old.ecdsa.0;
            }
            public_key = previous.public_key();
        }

        let own_public = *public_shares
            .get(&self_id)
            .ok_or(Error::InvalidPartyId(self_id))?;
        if C::Point::generator() * secret != own_public {
            return Err(Error::Internal(
                "Summed share does not match the public share".into(),
            ));
        }

        let randomness = self
            .schnorr
            .take()
            .ok_or_else(|| Error::missing("schnorr randomness"))?;
        let proof = schnorr::prove(
            randomness,
            &mut self.helper.transcript(b"sch", &self_id),
            schnorr::Statement { public: &own_public },
            schnorr::Witness { x: &secret },
        );

        self.secret = secret;
        self.public_key = public_key;
        self.public_shares = public_shares;
        outbox.broadcast(KeygenContent::Proof { proof });
        Ok(())
    }

    fn output(mut self) -> Result<Config<C, B>> {
        let paillier = self
            .paillier
            .take()
            .ok_or_else(|| Error::missing("paillier key"))?;

        let mut public = BTreeMap::new();
        for (id, committed) in &self.committed {
            let ecdsa = self
                .public_shares
                .get(id)
                .ok_or(Error::InvalidPartyId(*id))?;
            public.insert(
                *id,
                Public {
                    ecdsa: Point(*ecdsa),
                    elgamal: committed.elgamal,
                    paillier: committed.paillier.clone(),
                    pedersen: committed.pedersen.clone(),
                },
            );
        }

        let config = Config::new(
            self.helper.self_id(),
            self.helper.threshold(),
            self.public_key,
            self.secret,
            self.elgamal,
            paillier,
            self.rid,
            self.chain_key,
            public,
        );
        debug!(party = %config.id, "Key material ready");
        Ok(config)
    }

    fn store_opening(
        &mut self,
        from: PartyId,
        committed: Committed<C, B>,
        decommitment: Decommitment,
    ) -> Result<()> {
        let hash = self
            .commitments
            .get(&from)
            .ok_or_else(|| Error::missing("commitment"))?;
        if !self
            .helper
            .verify_commitment(&from, &types::encode(&committed)?, hash, &decommitment)
        {
            return Err(Error::VerificationFailed("Opening does not match commitment".into()));
        }

        committed
            .vss
            .validate(self.helper.threshold(), self.is_refresh())?;
        if committed.elgamal.is_identity() || committed.schnorr.a.is_identity() {
            return Err(Error::VerificationFailed("Identity point in opening".into()));
        }
        if self.is_refresh() && committed.chain_key != [0u8; 32] {
            return Err(Error::VerificationFailed(
                "Chain key contribution during refresh".into(),
            ));
        }
        self.backend.validate_encryption_key(&committed.paillier)?;
        self.backend.validate_pedersen(&committed.pedersen)?;

        self.committed.insert(from, committed);
        Ok(())
    }
}

impl<C: Curve, B: Backend<C>> Round for Keygen<C, B> {
    type Content = KeygenContent<C, B>;
    type Output = Config<C, B>;

    fn number(&self) -> RoundNumber {
        self.round
    }

    fn helper(&self) -> &Helper {
        &self.helper
    }

    fn broadcast_kind(&self) -> Option<BroadcastKind> {
        match self.round {
            2 => Some(BroadcastKind::Reliable),
            3 | 5 => Some(BroadcastKind::Normal),
            _ => None,
        }
    }

    fn expects_p2p(&self) -> bool {
        self.round == 4
    }

    fn verify_message(&self, from: &PartyId, content: &Self::Content) -> Result<()> {
        let KeygenContent::Share {
            mod_proof,
            prm_proof,
            share,
        } = content
        else {
            return Err(Error::UnexpectedContent { round: self.round });
        };

        let own = self.own_committed()?;
        self.backend.validate_ciphertext(&own.paillier, share)?;

        let peer = self.committed(from)?;
        if !self.backend.verify_mod(
            &peer.paillier,
            mod_proof,
            &mut self.helper.transcript(b"mod", from),
        ) {
            return Err(Error::VerificationFailed("Invalid mod proof".into()));
        }
        if !self.backend.verify_prm(
            &peer.pedersen,
            prm_proof,
            &mut self.helper.transcript(b"prm", from),
        ) {
            return Err(Error::VerificationFailed("Invalid prm proof".into()));
        }
        Ok(())
    }

    fn store_message(&mut self, from: PartyId, content: Self::Content) -> Result<()> {
        let KeygenContent::Share { share, .. } = content else {
            return Err(Error::UnexpectedContent { round: self.round });
        };

        let paillier = self
            .paillier
            .as_ref()
            .ok_or_else(|| Error::missing("paillier key"))?;
        let value = self.backend.decrypt(paillier, &share)?;

        let expected = self.committed(&from)?.vss.share(&self.helper.self_id());
        if C::Point::generator() * value != expected {
            return Err(Error::VerificationFailed(
                "Share does not match the committed polynomial".into(),
            ));
        }
        self.shares.insert(from, value);
        Ok(())
    }

    fn store_broadcast_message(&mut self, from: PartyId, content: Self::Content) -> Result<()> {
        match (self.round, content) {
            (2, KeygenContent::Commitment { hash }) => {
                self.commitments.insert(from, hash);
                Ok(())
            }
            (
                3,
                KeygenContent::Opening {
                    committed,
                    decommitment,
                },
            ) => self.store_opening(from, *committed, decommitment),
            (5, KeygenContent::Proof { proof }) => {
                let public = self
                    .public_shares
                    .get(&from)
                    .ok_or(Error::InvalidPartyId(from))?;
                let commitment = self.committed(&from)?.schnorr;
                if !schnorr::verify(
                    &mut self.helper.transcript(b"sch", &from),
                    schnorr::Statement { public },
                    &commitment,
                    &proof,
                ) {
                    return Err(Error::VerificationFailed("Invalid Schnorr proof".into()));
                }
                Ok(())
            }
            _ => Err(Error::UnexpectedContent { round: self.round }),
        }
    }

    fn finalize(mut self, outbox: &mut Outbox<Self::Content>) -> Result<Transition<Self>> {
        match self.round {
            1 => self.finalize_round1(outbox)?,
            2 => self.finalize_round2(outbox)?,
            3 => self.finalize_round3(outbox)?,
            4 => self.finalize_round4(outbox)?,
            FINAL_ROUND => return Ok(Transition::Output(self.output()?)),
            round => return Err(Error::Internal(format!("No key generation round {round}"))),
        }
        self.round += 1;
        Ok(Transition::Next(self))
    }
}

impl<C: Curve, B: Backend<C>> Drop for Keygen<C, B> {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.elgamal.zeroize();
        self.secret.zeroize();
        for share in self.shares.values_mut() {
            share.zeroize();
        }
    }
}
