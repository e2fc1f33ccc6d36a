//! Resharing round chain
//!
//! The old and the new committee take turns; parties in both do both jobs.
//!
//! | round | sent by | content                                          |
//! |-------|---------|--------------------------------------------------|
//! | 2     | new     | commitment to auxiliary keys                     |
//! | 3     | new     | opening                                          |
//! | 4     | old     | dealing (broadcast), encrypted share (p2p)       |
//! | 5     | new     | mod/prm proofs (p2p)                             |
//! | 6     | new     | Schnorr proof for the new share                  |
//! | 7     | new     | hash of the new public key material              |

use super::messages::{Auxiliary, Dealing, Handover, ReshareContent};
use super::RESHARE;
use crate::backend::Backend;
use crate::config::{Config, Public, PublicConfig};
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
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use zeroize::Zeroize;

const FINAL_ROUND: RoundNumber = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Committee {
    Old,
    New,
}

/// Committee whose members send the messages consumed in each round
const SENDERS: [Option<Committee>; FINAL_ROUND as usize + 1] = [
    None,
    None,
    Some(Committee::New),
    Some(Committee::New),
    Some(Committee::Old),
    Some(Committee::New),
    Some(Committee::New),
    Some(Committee::New),
];

/// Parties taking part in a resharing run.
#[derive(Clone, Debug)]
pub struct ReshareParams {
    pub session_id: SessionId,
    pub self_id: PartyId,
    /// Current holders handing over the key, at least threshold + 1 of them
    pub old_party_ids: Vec<PartyId>,
    pub new_party_ids: Vec<PartyId>,
    pub new_threshold: usize,
}

/// State accumulated by one party over the resharing rounds.
pub struct Reshare<C: Curve, B: Backend<C>> {
    helper: Helper,
    backend: B,
    round: RoundNumber,
    old: BTreeSet<PartyId>,
    new: BTreeSet<PartyId>,
    new_threshold: usize,

    /// Public values this party hands over, only for old members
    handover: Option<Handover<C>>,
    /// Lagrange-scaled share handed over by an old member
    pub(super) contribution: C::Scalar,

    elgamal: C::Scalar,
    paillier: Option<B::DecryptionKey>,
    schnorr: Option<schnorr::Randomness<C>>,
    decommitment: Decommitment,
    commitments: BTreeMap<PartyId, Hash>,
    auxiliary: BTreeMap<PartyId, Auxiliary<C, B>>,
    rid: [u8; 32],

    dealings: BTreeMap<PartyId, Dealing<C>>,
    shares: BTreeMap<PartyId, C::Scalar>,

    secret: C::Scalar,
    public_key: C::Point,
    chain_key: [u8; 32],
    public_shares: BTreeMap<PartyId, C::Point>,
    confirmation: Hash,
}

impl<C: Curve, B: Backend<C>> Reshare<C, B> {
    /// First round of a resharing run. Old committee members pass their
    /// current `config`; parties only joining pass `None`.
    pub fn new(
        backend: B,
        config: Option<&Config<C, B>>,
        params: &ReshareParams,
        pool: Pool,
    ) -> Result<Self> {
        let old: BTreeSet<PartyId> = params.old_party_ids.iter().copied().collect();
        let new: BTreeSet<PartyId> = params.new_party_ids.iter().copied().collect();
        if old.len() != params.old_party_ids.len() || new.len() != params.new_party_ids.len() {
            return Err(Error::InvalidConfig("Committee contains duplicates".into()));
        }
        if old.is_empty() {
            return Err(Error::InvalidConfig("Old committee is empty".into()));
        }
        if params.new_threshold >= new.len() {
            return Err(Error::InvalidConfig(format!(
                "Threshold {} must be below the new committee size {}",
                params.new_threshold,
                new.len()
            )));
        }

        let self_id = params.self_id;
        let mut handover = None;
        let mut contribution = C::Scalar::ZERO;
        match (old.contains(&self_id), config) {
            (true, Some(config)) => {
                config.validate()?;
                if config.id != self_id {
                    return Err(Error::InvalidPartyId(self_id));
                }
                let (share, contributions) = config.signing_shares(&params.old_party_ids)?;
                contribution = share;
                handover = Some(Handover {
                    public_key: Point(config.public_key()),
                    chain_key: config.chain_key,
                    contributions: contributions
                        .into_iter()
                        .map(|(id, point)| (id, Point(point)))
                        .collect(),
                });
            }
            (true, None) => {
                return Err(Error::InvalidConfig(
                    "Old committee member without key material".into(),
                ))
            }
            (false, Some(_)) => {
                return Err(Error::InvalidConfig(
                    "Key material given to a party outside the old committee".into(),
                ))
            }
            (false, None) => {}
        }

        let session = SessionParams {
            session_id: params.session_id,
            self_id,
            party_ids: old.union(&new).copied().collect(),
            threshold: params.new_threshold,
        };
        let mut helper = Helper::new(RESHARE, C::NAME, FINAL_ROUND, &session, pool)?;
        helper.update_hash("old committee", &ids_to_bytes(&old));
        helper.update_hash("new committee", &ids_to_bytes(&new));

        Ok(Self {
            helper,
            backend,
            round: 1,
            old,
            new,
            new_threshold: params.new_threshold,
            handover,
            contribution,
            elgamal: C::Scalar::ZERO,
            paillier: None,
            schnorr: None,
            decommitment: [0u8; 32],
            commitments: BTreeMap::new(),
            auxiliary: BTreeMap::new(),
            rid: [0u8; 32],
            dealings: BTreeMap::new(),
            shares: BTreeMap::new(),
            secret: C::Scalar::ZERO,
            public_key: C::Point::identity(),
            chain_key: [0u8; 32],
            public_shares: BTreeMap::new(),
            confirmation: [0u8; 32],
        })
    }

    fn self_id(&self) -> PartyId {
        self.helper.self_id()
    }

    fn is_new(&self) -> bool {
        self.new.contains(&self.self_id())
    }

    fn committee(&self, committee: Committee) -> &BTreeSet<PartyId> {
        match committee {
            Committee::Old => &self.old,
            Committee::New => &self.new,
        }
    }

    fn senders(&self) -> Vec<PartyId> {
        let self_id = self.self_id();
        match SENDERS.get(usize::from(self.round)).copied().flatten() {
            Some(committee) => self
                .committee(committee)
                .iter()
                .copied()
                .filter(|id| *id != self_id)
                .collect(),
            None => Vec::new(),
        }
    }

    fn auxiliary_of(&self, id: &PartyId) -> Result<&Auxiliary<C, B>> {
        self.auxiliary
            .get(id)
            .ok_or_else(|| Error::missing("auxiliary parameters"))
    }

    fn paillier(&self) -> Result<&B::DecryptionKey> {
        self.paillier
            .as_ref()
            .ok_or_else(|| Error::missing("paillier key"))
    }

    /// New members: fresh auxiliary keys, committed to.
    fn finalize_round1(&mut self, outbox: &mut Outbox<ReshareContent<C, B>>) -> Result<()> {
        if !self.is_new() {
            return Ok(());
        }

        let mut rid = [0u8; 32];
        OsRng.fill_bytes(&mut rid);
        self.elgamal = C::Scalar::random(&mut OsRng);
        let paillier = self.backend.generate_key(&mut OsRng)?;
        let randomness = schnorr::Randomness::<C>::new(&mut OsRng);

        let auxiliary = Auxiliary {
            rid,
            schnorr: *randomness.commitment(),
            elgamal: Point(C::Point::generator() * self.elgamal),
            paillier: self.backend.encryption_key(&paillier),
            pedersen: self.backend.pedersen(&paillier),
        };
        let (hash, decommitment) = self.helper.commit(&mut OsRng, &types::encode(&auxiliary)?);

        self.paillier = Some(paillier);
        self.schnorr = Some(randomness);
        self.decommitment = decommitment;
        self.commitments.insert(self.self_id(), hash);
        self.auxiliary.insert(self.self_id(), auxiliary);

        outbox.broadcast(ReshareContent::Commitment { hash });
        Ok(())
    }

    fn finalize_round2(&mut self, outbox: &mut Outbox<ReshareContent<C, B>>) -> Result<()> {
        if !self.is_new() {
            return Ok(());
        }
        outbox.broadcast(ReshareContent::Opening {
            auxiliary: Box::new(self.auxiliary_of(&self.self_id())?.clone()),
            decommitment: self.decommitment,
        });
        Ok(())
    }

    /// Everyone fixes the new RID; old members deal their scaled share.
    fn finalize_round3(&mut self, outbox: &mut Outbox<ReshareContent<C, B>>) -> Result<()> {
        let mut rid = [0u8; 32];
        for auxiliary in self.auxiliary.values() {
            for (acc, byte) in rid.iter_mut().zip(auxiliary.rid) {
                *acc ^= byte;
            }
        }
        self.rid = rid;
        self.helper.update_hash("rid", &rid);

        let Some(handover) = self.handover.clone() else {
            return Ok(());
        };
        let self_id = self.self_id();
        let poly = Polynomial::<C>::random(&mut OsRng, self.new_threshold, self.contribution);
        let dealing = Dealing {
            vss: poly.commit(),
            handover,
        };

        let recipients: Vec<PartyId> = self
            .new
            .iter()
            .copied()
            .filter(|id| *id != self_id)
            .collect();
        let encrypted = {
            let this = &*self;
            let poly = &poly;
            this.helper.pool().map(recipients, |id| {
                let key = &this.auxiliary_of(&id)?.paillier;
                let (share, _) = this.backend.encrypt(key, &poly.share(&id), &mut OsRng);
                Ok((id, share))
            })?
        };

        outbox.broadcast(ReshareContent::Dealing {
            dealing: Box::new(dealing.clone()),
        });
        for (id, share) in encrypted {
            outbox.send(id, ReshareContent::Share { share });
        }

        if self.is_new() {
            self.shares.insert(self_id, poly.share(&self_id));
        }
        self.dealings.insert(self_id, dealing);
        Ok(())
    }

    /// Combine the dealings into the new key material.
    fn finalize_round4(&mut self, outbox: &mut Outbox<ReshareContent<C, B>>) -> Result<()> {
        let self_id = self.self_id();
        let reference = match &self.handover {
            Some(own) => own.clone(),
            None => self.agreed_handover()?,
        };
        self.public_key = reference.public_key.0;
        self.chain_key = reference.chain_key;

        let vss = Exponent::sum(self.dealings.values().map(|dealing| &dealing.vss))?;
        if vss.constant() != self.public_key {
            return Err(Error::VerificationFailed(
                "Dealings do not add up to the public key".into(),
            ));
        }
        self.public_shares = self.new.iter().map(|id| (*id, vss.share(id))).collect();

        let public = self.public_config()?;
        self.confirmation = *blake3::hash(&types::encode(&public)?).as_bytes();

        if !self.is_new() {
            return Ok(());
        }

        self.secret = self
            .shares
            .values()
            .fold(C::Scalar::ZERO, |acc, share| acc + share);
        let own_public = self
            .public_shares
            .get(&self_id)
            .ok_or(Error::InvalidPartyId(self_id))?;
        if C::Point::generator() * self.secret != *own_public {
            return Err(Error::Internal(
                "Summed share does not match the public share".into(),
            ));
        }

        let paillier = self.paillier()?;
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
        for id in self.new.iter().filter(|id| **id != self_id) {
            outbox.send(
                *id,
                ReshareContent::AuxProof {
                    mod_proof: mod_proof.clone(),
                    prm_proof: prm_proof.clone(),
                },
            );
        }
        Ok(())
    }

    fn finalize_round5(&mut self, outbox: &mut Outbox<ReshareContent<C, B>>) -> Result<()> {
        if !self.is_new() {
            return Ok(());
        }
        let self_id = self.self_id();
        let randomness = self
            .schnorr
            .take()
            .ok_or_else(|| Error::missing("schnorr randomness"))?;
        let own_public = self
            .public_shares
            .get(&self_id)
            .ok_or(Error::InvalidPartyId(self_id))?;
        let proof = schnorr::prove(
            randomness,
            &mut self.helper.transcript(b"sch", &self_id),
            schnorr::Statement { public: own_public },
            schnorr::Witness { x: &self.secret },
        );
        outbox.broadcast(ReshareContent::Proof { proof });
        Ok(())
    }

    fn finalize_round6(&mut self, outbox: &mut Outbox<ReshareContent<C, B>>) -> Result<()> {
        if self.is_new() {
            outbox.broadcast(ReshareContent::Confirm {
                hash: self.confirmation,
            });
        }
        Ok(())
    }

    fn public_config(&self) -> Result<PublicConfig<C, B>> {
        let mut public = BTreeMap::new();
        for id in &self.new {
            let auxiliary = self.auxiliary_of(id)?;
            let ecdsa = self
                .public_shares
                .get(id)
                .ok_or(Error::InvalidPartyId(*id))?;
            public.insert(
                *id,
                Public {
                    ecdsa: Point(*ecdsa),
                    elgamal: auxiliary.elgamal,
                    paillier: auxiliary.paillier.clone(),
                    pedersen: auxiliary.pedersen.clone(),
                },
            );
        }
        Ok(PublicConfig {
            threshold: self.new_threshold,
            public_key: Point(self.public_key),
            rid: self.rid,
            chain_key: self.chain_key,
            public,
        })
    }

    fn output(mut self) -> Result<Option<Config<C, B>>> {
        if !self.is_new() {
            debug!(party = %self.self_id(), "Left the committee");
            return Ok(None);
        }

        let public = self.public_config()?;
        let paillier = self
            .paillier
            .take()
            .ok_or_else(|| Error::missing("paillier key"))?;
        let config = Config::new(
            self.self_id(),
            self.new_threshold,
            self.public_key,
            self.secret,
            self.elgamal,
            paillier,
            self.rid,
            self.chain_key,
            public.public,
        );
        debug!(party = %config.id, "Reshared key material ready");
        Ok(Some(config))
    }

    fn store_opening(
        &mut self,
        from: PartyId,
        auxiliary: Auxiliary<C, B>,
        decommitment: Decommitment,
    ) -> Result<()> {
        let hash = self
            .commitments
            .get(&from)
            .ok_or_else(|| Error::missing("commitment"))?;
        if !self
            .helper
            .verify_commitment(&from, &types::encode(&auxiliary)?, hash, &decommitment)
        {
            return Err(Error::VerificationFailed("Opening does not match commitment".into()));
        }
        if auxiliary.elgamal.is_identity() || auxiliary.schnorr.a.is_identity() {
            return Err(Error::VerificationFailed("Identity point in opening".into()));
        }
        self.backend.validate_encryption_key(&auxiliary.paillier)?;
        self.backend.validate_pedersen(&auxiliary.pedersen)?;
        self.auxiliary.insert(from, auxiliary);
        Ok(())
    }

    /// Check a dealing against the committee's public values and the
    /// sender's scaled public share. Old members hold the handover
    /// themselves and compare against it.
    fn store_dealing(&mut self, from: PartyId, dealing: Dealing<C>) -> Result<()> {
        let handover = &dealing.handover;
        if let Some(own) = &self.handover {
            if own != handover {
                return Err(Error::VerificationFailed(
                    "Dealing disagrees on the public key material".into(),
                ));
            }
        }
        if !handover.contributions.keys().eq(self.old.iter()) {
            return Err(Error::VerificationFailed(
                "Dealing does not cover the old committee".into(),
            ));
        }
        let sum = handover
            .contributions
            .values()
            .fold(C::Point::identity(), |acc, point| acc + point.0);
        if handover.public_key.is_identity() || sum != handover.public_key.0 {
            return Err(Error::VerificationFailed(
                "Scaled public shares do not add up to the public key".into(),
            ));
        }

        dealing.vss.validate(self.new_threshold, false)?;
        let contribution = handover
            .contributions
            .get(&from)
            .ok_or(Error::InvalidPartyId(from))?;
        if dealing.vss.constant() != contribution.0 {
            return Err(Error::VerificationFailed(
                "Dealt polynomial does not hide the sender's share".into(),
            ));
        }
        self.dealings.insert(from, dealing);
        Ok(())
    }

    /// Handover backed by a strict majority of the old committee, for
    /// members that only join. Dealers outside that majority are blamed;
    /// without a majority nobody can be.
    fn agreed_handover(&self) -> Result<Handover<C>> {
        let majority = self.dealings.values().map(|d| &d.handover).find(|candidate| {
            let backers = self
                .dealings
                .values()
                .filter(|d| d.handover == **candidate)
                .count();
            2 * backers > self.old.len()
        });
        let Some(majority) = majority else {
            return Err(Error::VerificationFailed(
                "Old committee disagrees on the handed-over key material".into(),
            ));
        };

        let dissenters: Vec<PartyId> = self
            .dealings
            .iter()
            .filter(|(_, dealing)| dealing.handover != *majority)
            .map(|(id, _)| *id)
            .collect();
        if !dissenters.is_empty() {
            debug!(party = %self.self_id(), culprits = ?dissenters, "Handover dissent");
            return Err(Error::Aborted {
                culprits: dissenters,
                reason: "Dealing disagrees on the public key material".into(),
            });
        }
        Ok(majority.clone())
    }
}

fn ids_to_bytes(ids: &BTreeSet<PartyId>) -> Vec<u8> {
    ids.iter().flat_map(|id| id.to_bytes()).collect()
}

impl<C: Curve, B: Backend<C>> Round for Reshare<C, B> {
    type Content = ReshareContent<C, B>;
    type Output = Option<Config<C, B>>;

    fn number(&self) -> RoundNumber {
        self.round
    }

    fn helper(&self) -> &Helper {
        &self.helper
    }

    fn broadcast_kind(&self) -> Option<BroadcastKind> {
        match self.round {
            2 | 4 => Some(BroadcastKind::Reliable),
            3 | 6 | 7 => Some(BroadcastKind::Normal),
            _ => None,
        }
    }

    fn expects_p2p(&self) -> bool {
        matches!(self.round, 4 | 5) && self.is_new()
    }

    fn broadcast_senders(&self) -> Vec<PartyId> {
        self.senders()
    }

    fn p2p_senders(&self) -> Vec<PartyId> {
        self.senders()
    }

    fn verify_message(&self, from: &PartyId, content: &Self::Content) -> Result<()> {
        match content {
            ReshareContent::Share { share } => {
                let own = self.auxiliary_of(&self.self_id())?;
                self.backend.validate_ciphertext(&own.paillier, share)
            }
            ReshareContent::AuxProof {
                mod_proof,
                prm_proof,
            } => {
                let peer = self.auxiliary_of(from)?;
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
            _ => Err(Error::UnexpectedContent { round: self.round }),
        }
    }

    fn store_message(&mut self, from: PartyId, content: Self::Content) -> Result<()> {
        match content {
            ReshareContent::Share { share } => {
                let value = self.backend.decrypt(self.paillier()?, &share)?;
                let dealing = self
                    .dealings
                    .get(&from)
                    .ok_or_else(|| Error::missing("dealing"))?;
                if C::Point::generator() * value != dealing.vss.share(&self.self_id()) {
                    return Err(Error::VerificationFailed(
                        "Share does not match the dealt polynomial".into(),
                    ));
                }
                self.shares.insert(from, value);
                Ok(())
            }
            ReshareContent::AuxProof { .. } => Ok(()),
            _ => Err(Error::UnexpectedContent { round: self.round }),
        }
    }

    fn store_broadcast_message(&mut self, from: PartyId, content: Self::Content) -> Result<()> {
        match (self.round, content) {
            (2, ReshareContent::Commitment { hash }) => {
                self.commitments.insert(from, hash);
                Ok(())
            }
            (
                3,
                ReshareContent::Opening {
                    auxiliary,
                    decommitment,
                },
            ) => self.store_opening(from, *auxiliary, decommitment),
            (4, ReshareContent::Dealing { dealing }) => self.store_dealing(from, *dealing),
            (6, ReshareContent::Proof { proof }) => {
                let public = self
                    .public_shares
                    .get(&from)
                    .ok_or(Error::InvalidPartyId(from))?;
                let commitment = self.auxiliary_of(&from)?.schnorr;
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
            (7, ReshareContent::Confirm { hash }) => {
                if hash != self.confirmation {
                    return Err(Error::VerificationFailed(
                        "Peer ended with different key material".into(),
                    ));
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
            5 => self.finalize_round5(outbox)?,
            6 => self.finalize_round6(outbox)?,
            FINAL_ROUND => return Ok(Transition::Output(self.output()?)),
            round => return Err(Error::Internal(format!("No resharing round {round}"))),
        }
        self.round += 1;
        Ok(Transition::Next(self))
    }
}

impl<C: Curve, B: Backend<C>> Drop for Reshare<C, B> {
    fn drop(&mut self) {
        self.contribution.zeroize();
        self.elgamal.zeroize();
        self.secret.zeroize();
        for share in self.shares.values_mut() {
            share.zeroize();
        }
    }
}
