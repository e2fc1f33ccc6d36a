//! Presign round chain
//!
//! | round | broadcast            | p2p          | finalize                              |
//! |-------|----------------------|--------------|---------------------------------------|
//! | 1     |                      |              | sample `k`, `γ`; encrypt              |
//! | 2     | `K`, `G`, ElGamal(k) | enc-elg      | MtA for `δ` and `χ`                   |
//! | 3     | MtA ciphertexts      | aff-p, aff-g | `Γᵢ`, ElGamal(χᵢ)                     |
//! | 4     | `Γᵢ`                 | log*         | `Δᵢ = kᵢ·Γ`                           |
//! | 5     | `Δᵢ`                 | log*         | reveal `δᵢ`                           |
//! | 6     | `δᵢ`                 |              | check `δ·G = Δ`, else abort1          |
//! | 7     | `Sᵢ` / abort1        |              | check `ΣS = X`, else abort2; sign     |
//! | 8     | `σᵢ` / abort2        |              | signature or culprits                 |

use super::messages::{MtaCiphertexts, Opened, PresignContent, Reveal};
use super::presignature::{PreSignature, PresignOutput};
use super::PRESIGN;
use crate::backend::{
    AffGStatement, AffPStatement, AffWitness, Backend, DecStatement, EncElgStatement,
    EncElgWitness, LogStarStatement, LogStarWitness,
};
use crate::config::Config;
use crate::curve::{Curve, Point, Scalar};
use crate::elgamal::ElGamalCiphertext;
use crate::helper::{Helper, SessionParams};
use crate::pool::Pool;
use crate::round::{Outbox, Round, Transition};
use crate::sign::combine;
use crate::types::{BroadcastKind, PartyId, RoundNumber, SessionId};
use crate::zk::elog;
use crate::{Error, Result};
use elliptic_curve::{ff::Field, group::Group};
use merlin::Transcript;
use rand::rngs::OsRng;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};
use zeroize::Zeroize;

const FINAL_ROUND: RoundNumber = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Running,
    /// `δ·G ≠ Δ`: every signer reveals its `δ` computation
    Abort1,
    /// `ΣSⱼ ≠ X`: every signer reveals its `χ` computation
    Abort2,
    /// Presignature done, combining signature shares
    Sign,
}

/// Which of the two MtA products a value belongs to
#[derive(Clone, Copy, Debug)]
enum Product {
    Delta,
    Chi,
}

impl Product {
    fn d<C: Curve, B: Backend<C>>(self, mta: &MtaCiphertexts<C, B>) -> &B::Ciphertext {
        match self {
            Product::Delta => &mta.delta_d,
            Product::Chi => &mta.chi_d,
        }
    }

    fn f<C: Curve, B: Backend<C>>(self, mta: &MtaCiphertexts<C, B>) -> &B::Ciphertext {
        match self {
            Product::Delta => &mta.delta_f,
            Product::Chi => &mta.chi_f,
        }
    }

    fn alpha_label(self) -> &'static [u8] {
        match self {
            Product::Delta => b"delta alpha",
            Product::Chi => b"chi alpha",
        }
    }

    fn beta_label(self) -> &'static [u8] {
        match self {
            Product::Delta => b"delta beta",
            Product::Chi => b"chi beta",
        }
    }
}

/// Result of the MtA work towards one peer
struct MtaOutput<C: Curve, B: Backend<C>> {
    peer: PartyId,
    ciphertexts: MtaCiphertexts<C, B>,
    delta_proof: B::AffPProof,
    chi_proof: B::AffGProof,
    delta_beta: C::Scalar,
    chi_beta: C::Scalar,
}

/// State accumulated by one signer over the presign rounds.
pub struct Presign<C: Curve, B: Backend<C>> {
    helper: Helper,
    backend: B,
    round: RoundNumber,
    phase: Phase,
    message: Option<C::Scalar>,

    public_key: C::Point,
    /// `λᵢ·xᵢ` over the signer set
    secret: C::Scalar,
    /// `λⱼ·Xⱼ` over the signer set
    public_shares: BTreeMap<PartyId, C::Point>,
    paillier: B::DecryptionKey,
    keys: BTreeMap<PartyId, B::EncryptionKey>,
    pedersen: BTreeMap<PartyId, B::PedersenParams>,
    elgamal_keys: BTreeMap<PartyId, C::Point>,

    k: C::Scalar,
    gamma: C::Scalar,
    k_nonce: Option<B::Nonce>,
    gamma_nonce: Option<B::Nonce>,
    k_elgamal_nonce: C::Scalar,
    chi_elgamal_nonce: C::Scalar,

    k_ciphertexts: BTreeMap<PartyId, B::Ciphertext>,
    gamma_ciphertexts: BTreeMap<PartyId, B::Ciphertext>,
    k_elgamal: BTreeMap<PartyId, ElGamalCiphertext<C>>,

    /// MtA ciphertexts by sender, then recipient
    mta: BTreeMap<PartyId, BTreeMap<PartyId, MtaCiphertexts<C, B>>>,
    delta_betas: BTreeMap<PartyId, C::Scalar>,
    chi_betas: BTreeMap<PartyId, C::Scalar>,
    delta_alphas: BTreeMap<PartyId, C::Scalar>,
    chi_alphas: BTreeMap<PartyId, C::Scalar>,
    /// Running `δᵢ` and `χᵢ`, complete once every MtA is absorbed
    delta: C::Scalar,
    chi: C::Scalar,

    big_gammas: BTreeMap<PartyId, C::Point>,
    chi_elgamal: BTreeMap<PartyId, ElGamalCiphertext<C>>,
    big_gamma: C::Point,
    big_deltas: BTreeMap<PartyId, C::Point>,
    deltas: BTreeMap<PartyId, C::Scalar>,
    delta_total: C::Scalar,

    big_r: C::Point,
    r_shares: BTreeMap<PartyId, Point<C>>,
    s_shares: BTreeMap<PartyId, Point<C>>,

    reveals: BTreeMap<PartyId, Reveal<C, B>>,
    presignature: Option<PreSignature<C>>,
    sigmas: BTreeMap<PartyId, C::Scalar>,
}

impl<C: Curve, B: Backend<C>> Presign<C, B> {
    /// First round of a presign run among `signers`.
    ///
    /// With a `prehash`, the session signs it right after the presignature is
    /// ready and outputs the signature instead.
    pub fn new(
        backend: B,
        config: &Config<C, B>,
        signers: &[PartyId],
        prehash: Option<&[u8]>,
        session_id: SessionId,
        pool: Pool,
    ) -> Result<Self> {
        let message = match prehash {
            Some(prehash) => Some(C::prehash_to_scalar(prehash).ok_or_else(|| {
                Error::InvalidConfig("Message digest has the wrong length".into())
            })?),
            None => None,
        };

        let params = SessionParams {
            session_id,
            self_id: config.id,
            party_ids: signers.to_vec(),
            threshold: config.threshold,
        };
        let mut helper = Helper::new(PRESIGN, C::NAME, FINAL_ROUND, &params, pool)?;
        let (secret, public_shares) = config.signing_shares(helper.party_ids())?;
        helper.update_hash("rid", &config.rid);
        helper.update_hash("public key", &C::point_to_bytes(&config.public_key()));

        let mut keys = BTreeMap::new();
        let mut pedersen = BTreeMap::new();
        let mut elgamal_keys = BTreeMap::new();
        for id in helper.party_ids() {
            let public = config.public_share(id).ok_or(Error::InvalidPartyId(*id))?;
            keys.insert(*id, public.paillier.clone());
            pedersen.insert(*id, public.pedersen.clone());
            elgamal_keys.insert(*id, public.elgamal.0);
        }

        Ok(Self {
            helper,
            backend,
            round: 1,
            phase: Phase::Running,
            message,
            public_key: config.public_key(),
            secret,
            public_shares,
            paillier: config.paillier().clone(),
            keys,
            pedersen,
            elgamal_keys,
            k: C::Scalar::ZERO,
            gamma: C::Scalar::ZERO,
            k_nonce: None,
            gamma_nonce: None,
            k_elgamal_nonce: C::Scalar::ZERO,
            chi_elgamal_nonce: C::Scalar::ZERO,
            k_ciphertexts: BTreeMap::new(),
            gamma_ciphertexts: BTreeMap::new(),
            k_elgamal: BTreeMap::new(),
            mta: BTreeMap::new(),
            delta_betas: BTreeMap::new(),
            chi_betas: BTreeMap::new(),
            delta_alphas: BTreeMap::new(),
            chi_alphas: BTreeMap::new(),
            delta: C::Scalar::ZERO,
            chi: C::Scalar::ZERO,
            big_gammas: BTreeMap::new(),
            chi_elgamal: BTreeMap::new(),
            big_gamma: C::Point::identity(),
            big_deltas: BTreeMap::new(),
            deltas: BTreeMap::new(),
            delta_total: C::Scalar::ZERO,
            big_r: C::Point::identity(),
            r_shares: BTreeMap::new(),
            s_shares: BTreeMap::new(),
            reveals: BTreeMap::new(),
            presignature: None,
            sigmas: BTreeMap::new(),
        })
    }

    fn self_id(&self) -> PartyId {
        self.helper.self_id()
    }

    fn key(&self, id: &PartyId) -> Result<&B::EncryptionKey> {
        self.keys.get(id).ok_or(Error::InvalidPartyId(*id))
    }

    fn pedersen(&self, id: &PartyId) -> Result<&B::PedersenParams> {
        self.pedersen.get(id).ok_or(Error::InvalidPartyId(*id))
    }

    fn elgamal_key(&self, id: &PartyId) -> Result<&C::Point> {
        self.elgamal_keys.get(id).ok_or(Error::InvalidPartyId(*id))
    }

    fn k_nonce(&self) -> Result<&B::Nonce> {
        self.k_nonce.as_ref().ok_or_else(|| Error::missing("k nonce"))
    }

    fn gamma_nonce(&self) -> Result<&B::Nonce> {
        self.gamma_nonce
            .as_ref()
            .ok_or_else(|| Error::missing("gamma nonce"))
    }

    fn get<'a, T>(map: &'a BTreeMap<PartyId, T>, id: &PartyId, what: &str) -> Result<&'a T> {
        map.get(id).ok_or_else(|| Error::missing(what))
    }

    fn mta_for(&self, from: &PartyId, to: &PartyId) -> Result<&MtaCiphertexts<C, B>> {
        self.mta
            .get(from)
            .and_then(|sent| sent.get(to))
            .ok_or_else(|| Error::missing("MtA ciphertexts"))
    }

    fn dec_transcript(&self, prover: &PartyId, peer: &PartyId, label: &'static [u8]) -> Transcript {
        let mut transcript = self.helper.transcript(b"dec", prover);
        transcript.append_message(b"peer", &peer.to_bytes());
        transcript.append_message(b"value", label);
        transcript
    }

    /// Sample the nonce shares and publish them encrypted.
    fn finalize_round1(&mut self, outbox: &mut Outbox<PresignContent<C, B>>) -> Result<()> {
        let self_id = self.self_id();
        let own_key = self.key(&self_id)?.clone();
        let elgamal_key = *self.elgamal_key(&self_id)?;

        self.k = C::Scalar::random(&mut OsRng);
        self.gamma = C::Scalar::random(&mut OsRng);
        let (k_ciphertext, k_nonce) = self.backend.encrypt(&own_key, &self.k, &mut OsRng);
        let (gamma_ciphertext, gamma_nonce) =
            self.backend.encrypt(&own_key, &self.gamma, &mut OsRng);
        let (elgamal, elgamal_nonce) =
            ElGamalCiphertext::<C>::encrypt(&elgamal_key, &self.k, &mut OsRng);

        let proofs = self.helper.pool().map(self.helper.other_party_ids(), |id| {
            let statement = EncElgStatement::<C, B> {
                prover: &own_key,
                verifier: self.pedersen(&id)?,
                ciphertext: &k_ciphertext,
                elgamal: &elgamal,
                elgamal_key: &elgamal_key,
            };
            let witness = EncElgWitness::<C, B> {
                plaintext: &self.k,
                nonce: &k_nonce,
                elgamal_nonce: &elgamal_nonce,
            };
            let proof = self.backend.prove_enc_elg(
                &statement,
                &witness,
                &mut self.helper.transcript(b"enc-elg", &self_id),
                &mut OsRng,
            );
            Ok((id, proof))
        })?;

        outbox.broadcast(PresignContent::Encryption {
            k: k_ciphertext.clone(),
            gamma: gamma_ciphertext.clone(),
            elgamal,
        });
        for (id, proof) in proofs {
            outbox.send(id, PresignContent::EncryptionProof { proof });
        }

        self.k_ciphertexts.insert(self_id, k_ciphertext);
        self.gamma_ciphertexts.insert(self_id, gamma_ciphertext);
        self.k_elgamal.insert(self_id, elgamal);
        self.k_nonce = Some(k_nonce);
        self.gamma_nonce = Some(gamma_nonce);
        self.k_elgamal_nonce = elgamal_nonce;
        Ok(())
    }

    fn mta_towards(&self, peer: PartyId) -> Result<MtaOutput<C, B>> {
        let self_id = self.self_id();
        let own_key = self.key(&self_id)?;
        let peer_key = self.key(&peer)?;
        let verifier = self.pedersen(&peer)?;
        let peer_k = Self::get(&self.k_ciphertexts, &peer, "peer K")?;
        let own_gamma = Self::get(&self.gamma_ciphertexts, &self_id, "own G")?;
        let own_public = Self::get(&self.public_shares, &self_id, "own public share")?;

        let delta_beta = C::Scalar::random(&mut OsRng);
        let (delta_f, delta_f_nonce) = self.backend.encrypt(own_key, &delta_beta, &mut OsRng);
        let (delta_e, delta_e_nonce) = self.backend.encrypt(peer_key, &-delta_beta, &mut OsRng);
        let delta_d = self.backend.affine(peer_key, peer_k, &self.gamma, &delta_e)?;
        let delta_proof = self.backend.prove_aff_p(
            &AffPStatement {
                verifier,
                receiver: peer_key,
                prover: own_key,
                ciphertext: peer_k,
                d: &delta_d,
                f: &delta_f,
                multiplier: own_gamma,
            },
            &AffWitness {
                multiplier: &self.gamma,
                multiplier_nonce: Some(self.gamma_nonce()?),
                beta: &delta_beta,
                d_nonce: &delta_e_nonce,
                f_nonce: &delta_f_nonce,
            },
            &mut self.helper.transcript(b"aff-p", &self_id),
            &mut OsRng,
        );

        let chi_beta = C::Scalar::random(&mut OsRng);
        let (chi_f, chi_f_nonce) = self.backend.encrypt(own_key, &chi_beta, &mut OsRng);
        let (chi_e, chi_e_nonce) = self.backend.encrypt(peer_key, &-chi_beta, &mut OsRng);
        let chi_d = self.backend.affine(peer_key, peer_k, &self.secret, &chi_e)?;
        let chi_proof = self.backend.prove_aff_g(
            &AffGStatement {
                verifier,
                receiver: peer_key,
                prover: own_key,
                ciphertext: peer_k,
                d: &chi_d,
                f: &chi_f,
                multiplier: own_public,
            },
            &AffWitness {
                multiplier: &self.secret,
                multiplier_nonce: None,
                beta: &chi_beta,
                d_nonce: &chi_e_nonce,
                f_nonce: &chi_f_nonce,
            },
            &mut self.helper.transcript(b"aff-g", &self_id),
            &mut OsRng,
        );

        Ok(MtaOutput {
            peer,
            ciphertexts: MtaCiphertexts {
                delta_d,
                delta_f,
                chi_d,
                chi_f,
            },
            delta_proof,
            chi_proof,
            delta_beta,
            chi_beta,
        })
    }

    /// Run both MtA instances with every peer.
    fn finalize_round2(&mut self, outbox: &mut Outbox<PresignContent<C, B>>) -> Result<()> {
        let outputs = {
            let this = &*self;
            this.helper
                .pool()
                .map(this.helper.other_party_ids(), |peer| this.mta_towards(peer))?
        };

        self.delta = self.k * self.gamma;
        self.chi = self.k * self.secret;
        let mut sent = BTreeMap::new();
        for output in outputs {
            self.delta += output.delta_beta;
            self.chi += output.chi_beta;
            self.delta_betas.insert(output.peer, output.delta_beta);
            self.chi_betas.insert(output.peer, output.chi_beta);
            outbox.send(
                output.peer,
                PresignContent::MtaProof {
                    delta: output.delta_proof,
                    chi: output.chi_proof,
                },
            );
            sent.insert(output.peer, output.ciphertexts);
        }

        outbox.broadcast(PresignContent::Mta { mta: sent.clone() });
        self.mta.insert(self.self_id(), sent);
        Ok(())
    }

    /// Publish `Γᵢ` with a proof it matches `Gᵢ`, and mask the final `χᵢ`.
    fn finalize_round3(&mut self, outbox: &mut Outbox<PresignContent<C, B>>) -> Result<()> {
        let self_id = self.self_id();
        let big_gamma = C::Point::generator() * self.gamma;
        let (chi_elgamal, chi_nonce) =
            ElGamalCiphertext::<C>::encrypt(self.elgamal_key(&self_id)?, &self.chi, &mut OsRng);

        let proofs = {
            let this = &*self;
            let own_key = this.key(&self_id)?;
            let own_gamma = Self::get(&this.gamma_ciphertexts, &self_id, "own G")?;
            let gamma_nonce = this.gamma_nonce()?;
            let generator = C::Point::generator();
            this.helper.pool().map(this.helper.other_party_ids(), |id| {
                let proof = this.backend.prove_log_star(
                    &LogStarStatement {
                        prover: own_key,
                        verifier: this.pedersen(&id)?,
                        ciphertext: own_gamma,
                        point: &big_gamma,
                        base: &generator,
                    },
                    &LogStarWitness {
                        plaintext: &this.gamma,
                        nonce: gamma_nonce,
                    },
                    &mut this.helper.transcript(b"log-gamma", &self_id),
                    &mut OsRng,
                );
                Ok((id, proof))
            })?
        };

        outbox.broadcast(PresignContent::BigGammaShare {
            big_gamma: Point(big_gamma),
            chi: chi_elgamal,
        });
        for (id, proof) in proofs {
            outbox.send(id, PresignContent::GammaProof { proof });
        }

        self.big_gammas.insert(self_id, big_gamma);
        self.chi_elgamal.insert(self_id, chi_elgamal);
        self.chi_elgamal_nonce = chi_nonce;
        Ok(())
    }

    /// `Γ = ΣΓⱼ`; publish `Δᵢ = kᵢ·Γ` with a proof it matches `Kᵢ`.
    fn finalize_round4(&mut self, outbox: &mut Outbox<PresignContent<C, B>>) -> Result<()> {
        let self_id = self.self_id();
        self.big_gamma = self
            .big_gammas
            .values()
            .fold(C::Point::identity(), |acc, point| acc + point);
        let big_delta = self.big_gamma * self.k;

        let proofs = {
            let this = &*self;
            let own_key = this.key(&self_id)?;
            let own_k = Self::get(&this.k_ciphertexts, &self_id, "own K")?;
            let k_nonce = this.k_nonce()?;
            this.helper.pool().map(this.helper.other_party_ids(), |id| {
                let proof = this.backend.prove_log_star(
                    &LogStarStatement {
                        prover: own_key,
                        verifier: this.pedersen(&id)?,
                        ciphertext: own_k,
                        point: &big_delta,
                        base: &this.big_gamma,
                    },
                    &LogStarWitness {
                        plaintext: &this.k,
                        nonce: k_nonce,
                    },
                    &mut this.helper.transcript(b"log-delta", &self_id),
                    &mut OsRng,
                );
                Ok((id, proof))
            })?
        };

        outbox.broadcast(PresignContent::BigDeltaShare {
            big_delta: Point(big_delta),
        });
        for (id, proof) in proofs {
            outbox.send(id, PresignContent::DeltaProof { proof });
        }
        self.big_deltas.insert(self_id, big_delta);
        Ok(())
    }

    fn finalize_round5(&mut self, outbox: &mut Outbox<PresignContent<C, B>>) -> Result<()> {
        self.deltas.insert(self.self_id(), self.delta);
        outbox.broadcast(PresignContent::DeltaShare {
            delta: Scalar(self.delta),
        });
        Ok(())
    }

    /// Check `δ·G = Δ`; derive `R` and publish `Sᵢ = χᵢ·R`, or start abort1.
    fn finalize_round6(&mut self, outbox: &mut Outbox<PresignContent<C, B>>) -> Result<()> {
        let self_id = self.self_id();
        self.delta_total = self
            .deltas
            .values()
            .fold(C::Scalar::ZERO, |acc, delta| acc + delta);
        let big_delta = self
            .big_deltas
            .values()
            .fold(C::Point::identity(), |acc, point| acc + point);

        let delta_inv = Option::<C::Scalar>::from(self.delta_total.invert());
        let delta_inv = match delta_inv {
            Some(inv) if C::Point::generator() * self.delta_total == big_delta => inv,
            _ => {
                warn!(party = %self_id, "Delta check failed, revealing MtA values");
                self.phase = Phase::Abort1;
                let reveal = self.reveal(Product::Delta)?;
                outbox.broadcast(PresignContent::Abort1 {
                    reveal: Box::new(reveal.clone()),
                });
                self.reveals.insert(self_id, reveal);
                return Ok(());
            }
        };

        self.big_r = self.big_gamma * delta_inv;
        self.r_shares = self
            .big_deltas
            .iter()
            .map(|(id, point)| (*id, Point(*point * delta_inv)))
            .collect();

        let s = self.big_r * self.chi;
        let chi_elgamal = Self::get(&self.chi_elgamal, &self_id, "own chi mask")?;
        let proof = elog::prove::<C>(
            &mut OsRng,
            &mut self.helper.transcript(b"elog", &self_id),
            elog::Statement {
                l: &chi_elgamal.l.0,
                m: &chi_elgamal.m.0,
                x: &s,
                key: self.elgamal_key(&self_id)?,
                base: &self.big_r,
            },
            elog::Witness {
                y: &self.chi,
                lambda: &self.chi_elgamal_nonce,
            },
        );

        outbox.broadcast(PresignContent::SShare {
            s: Point(s),
            proof,
        });
        self.s_shares.insert(self_id, Point(s));
        Ok(())
    }

    /// Check `ΣSⱼ = X`; output the presignature or the first signature
    /// share, or start abort2.
    fn finalize_round7(
        mut self,
        outbox: &mut Outbox<PresignContent<C, B>>,
    ) -> Result<Transition<Self>> {
        let self_id = self.self_id();
        let sum = self
            .s_shares
            .values()
            .fold(C::Point::identity(), |acc, s| acc + s.0);

        if sum != self.public_key {
            warn!(party = %self_id, "S check failed, revealing MtA values");
            self.phase = Phase::Abort2;
            let reveal = self.reveal(Product::Chi)?;
            outbox.broadcast(PresignContent::Abort2 {
                reveal: Box::new(reveal.clone()),
            });
            self.reveals.insert(self_id, reveal);
            self.round = 8;
            return Ok(Transition::Next(self));
        }

        let mut hasher = blake3::Hasher::new();
        hasher.update(b"presignature");
        hasher.update(self.helper.hash());
        hasher.update(&C::point_to_bytes(&self.big_r));
        let presignature = PreSignature {
            id: *hasher.finalize().as_bytes(),
            owner: self_id,
            big_r: Point(self.big_r),
            r_shares: std::mem::take(&mut self.r_shares),
            s_shares: std::mem::take(&mut self.s_shares),
            k: Scalar(self.k),
            chi: Scalar(self.chi),
        };
        debug!(party = %self_id, id = %hex::encode(presignature.id()), "Presignature ready");

        match self.message {
            None => Ok(Transition::Output(PresignOutput::PreSignature(presignature))),
            Some(message) => {
                let sigma = presignature.sigma(&message);
                self.sigmas.insert(self_id, sigma);
                outbox.broadcast(PresignContent::Sigma {
                    sigma: Scalar(sigma),
                });
                self.presignature = Some(presignature);
                self.phase = Phase::Sign;
                self.round = 8;
                Ok(Transition::Next(self))
            }
        }
    }

    fn finalize_sign(&self) -> Result<PresignOutput<C>> {
        let presignature = self
            .presignature
            .as_ref()
            .ok_or_else(|| Error::missing("presignature"))?;
        let message = self.message.ok_or_else(|| Error::missing("message"))?;
        let signature = combine(
            &self.public_key,
            &presignature.big_r(),
            &presignature.r_shares,
            &presignature.s_shares,
            &message,
            &self.sigmas,
        )?;
        Ok(PresignOutput::Signature(signature))
    }

    /// Open this party's side of every MtA for `product`.
    fn reveal(&self, product: Product) -> Result<Reveal<C, B>> {
        let self_id = self.self_id();
        let own_key = self.key(&self_id)?;
        let (alphas, betas) = match product {
            Product::Delta => (&self.delta_alphas, &self.delta_betas),
            Product::Chi => (&self.chi_alphas, &self.chi_betas),
        };

        let mut opened_alphas = BTreeMap::new();
        let mut opened_betas = BTreeMap::new();
        for peer in self.helper.other_party_ids() {
            let alpha = Self::get(alphas, &peer, "alpha")?;
            let proof = self.backend.prove_dec(
                &DecStatement {
                    key: own_key,
                    ciphertext: product.d(self.mta_for(&peer, &self_id)?),
                    plaintext: alpha,
                },
                &self.paillier,
                &mut self.dec_transcript(&self_id, &peer, product.alpha_label()),
                &mut OsRng,
            );
            opened_alphas.insert(
                peer,
                Opened {
                    value: Scalar(*alpha),
                    proof,
                },
            );

            let beta = Self::get(betas, &peer, "beta")?;
            let proof = self.backend.prove_dec(
                &DecStatement {
                    key: own_key,
                    ciphertext: product.f(self.mta_for(&self_id, &peer)?),
                    plaintext: beta,
                },
                &self.paillier,
                &mut self.dec_transcript(&self_id, &peer, product.beta_label()),
                &mut OsRng,
            );
            opened_betas.insert(
                peer,
                Opened {
                    value: Scalar(*beta),
                    proof,
                },
            );
        }

        Ok(Reveal {
            k: Scalar(self.k),
            k_nonce: self.k_nonce()?.clone(),
            gamma: Scalar(self.gamma),
            gamma_nonce: self.gamma_nonce()?.clone(),
            alphas: opened_alphas,
            betas: opened_betas,
        })
    }

    /// Check the parts of `from`'s reveal that do not depend on the product,
    /// and return its MtA contribution `Σα + Σβ`.
    fn check_reveal(
        &self,
        from: &PartyId,
        reveal: &Reveal<C, B>,
        product: Product,
    ) -> Result<C::Scalar> {
        let key = self.key(from)?;
        let k_ciphertext = Self::get(&self.k_ciphertexts, from, "K")?;
        let gamma_ciphertext = Self::get(&self.gamma_ciphertexts, from, "G")?;
        if self.backend.encrypt_with_nonce(key, &reveal.k.0, &reveal.k_nonce) != *k_ciphertext {
            return Err(Error::VerificationFailed("Revealed k does not open K".into()));
        }
        if self
            .backend
            .encrypt_with_nonce(key, &reveal.gamma.0, &reveal.gamma_nonce)
            != *gamma_ciphertext
        {
            return Err(Error::VerificationFailed("Revealed gamma does not open G".into()));
        }
        if C::Point::generator() * reveal.gamma.0 != *Self::get(&self.big_gammas, from, "Γ")? {
            return Err(Error::VerificationFailed("Revealed gamma does not match Γ".into()));
        }

        let peers: Vec<PartyId> = self
            .helper
            .party_ids()
            .iter()
            .copied()
            .filter(|id| id != from)
            .collect();
        if !reveal.alphas.keys().copied().eq(peers.iter().copied())
            || !reveal.betas.keys().copied().eq(peers.iter().copied())
        {
            return Err(Error::VerificationFailed("Reveal does not cover every peer".into()));
        }

        let mut total = C::Scalar::ZERO;
        for peer in &peers {
            let alpha = &reveal.alphas[peer];
            if !self.backend.verify_dec(
                &DecStatement {
                    key,
                    ciphertext: product.d(self.mta_for(peer, from)?),
                    plaintext: &alpha.value.0,
                },
                &alpha.proof,
                &mut self.dec_transcript(from, peer, product.alpha_label()),
            ) {
                return Err(Error::VerificationFailed("Invalid alpha decryption proof".into()));
            }

            let beta = &reveal.betas[peer];
            if !self.backend.verify_dec(
                &DecStatement {
                    key,
                    ciphertext: product.f(self.mta_for(from, peer)?),
                    plaintext: &beta.value.0,
                },
                &beta.proof,
                &mut self.dec_transcript(from, peer, product.beta_label()),
            ) {
                return Err(Error::VerificationFailed("Invalid beta decryption proof".into()));
            }
            total += alpha.value.0 + beta.value.0;
        }
        Ok(total)
    }

    /// `δⱼ = kⱼγⱼ + Σα + Σβ` and `Δⱼ = kⱼ·Γ` for the revealed values.
    fn check_delta(&self, from: &PartyId, reveal: &Reveal<C, B>) -> Result<()> {
        let mta = self.check_reveal(from, reveal, Product::Delta)?;
        if *Self::get(&self.deltas, from, "δ")? != reveal.k.0 * reveal.gamma.0 + mta {
            return Err(Error::VerificationFailed("Inconsistent δ share".into()));
        }
        if *Self::get(&self.big_deltas, from, "Δ")? != self.big_gamma * reveal.k.0 {
            return Err(Error::VerificationFailed("Inconsistent Δ share".into()));
        }
        Ok(())
    }

    /// `Sⱼ = kⱼ·(γ/δ)·Xⱼ + (Σα + Σβ)·R`, where `γ` is the revealed total.
    fn check_chi(&self, from: &PartyId, reveal: &Reveal<C, B>, scale: &C::Scalar) -> Result<()> {
        let mta = self.check_reveal(from, reveal, Product::Chi)?;
        let public = Self::get(&self.public_shares, from, "public share")?;
        let expected = *public * (reveal.k.0 * scale) + self.big_r * mta;
        if Self::get(&self.s_shares, from, "S")?.0 != expected {
            return Err(Error::VerificationFailed("Inconsistent S share".into()));
        }
        Ok(())
    }

    /// Parties whose reveal fails `check`, own reveal included.
    fn rejected(
        &self,
        check: impl Fn(&PartyId, &Reveal<C, B>) -> Result<()>,
    ) -> BTreeSet<PartyId> {
        let mut culprits = BTreeSet::new();
        for id in self.helper.party_ids() {
            let outcome = match self.reveals.get(id) {
                Some(reveal) => check(id, reveal),
                None => Err(Error::missing("reveal")),
            };
            if let Err(err) = outcome {
                debug!(party = %self.self_id(), culprit = %id, error = %err, "Reveal rejected");
                culprits.insert(*id);
            }
        }
        culprits
    }

    fn blame(culprits: BTreeSet<PartyId>) -> Error {
        if culprits.is_empty() {
            return Error::VerificationFailed("Abort without an identifiable culprit".into());
        }
        Error::Aborted {
            culprits: culprits.into_iter().collect(),
            reason: "Inconsistent presign contribution".into(),
        }
    }

    fn finalize_abort1(&self) -> Error {
        Self::blame(self.rejected(|id, reveal| self.check_delta(id, reveal)))
    }

    /// The expected `Sⱼ` depend on the sum of every revealed `γⱼ`, so all
    /// reveals must open correctly before any `Sⱼ` is recomputed.
    fn finalize_abort2(&self) -> Error {
        let liars = self.rejected(|id, reveal| {
            self.check_reveal(id, reveal, Product::Chi).map(|_| ())
        });
        if !liars.is_empty() {
            return Self::blame(liars);
        }

        let gamma = self
            .reveals
            .values()
            .fold(C::Scalar::ZERO, |acc, reveal| acc + reveal.gamma.0);
        let scale = match Option::<C::Scalar>::from(self.delta_total.invert()) {
            Some(inv) => gamma * inv,
            None => return Error::Internal("δ is not invertible after round 6".into()),
        };
        Self::blame(self.rejected(|id, reveal| self.check_chi(id, reveal, &scale)))
    }

    fn store_reveal(&mut self, from: PartyId, reveal: Reveal<C, B>) {
        self.reveals.insert(from, reveal);
    }
}

impl<C: Curve, B: Backend<C>> Round for Presign<C, B> {
    type Content = PresignContent<C, B>;
    type Output = PresignOutput<C>;

    fn number(&self) -> RoundNumber {
        self.round
    }

    fn helper(&self) -> &Helper {
        &self.helper
    }

    fn broadcast_kind(&self) -> Option<BroadcastKind> {
        match self.round {
            2 => Some(BroadcastKind::Reliable),
            3..=FINAL_ROUND => Some(BroadcastKind::Normal),
            _ => None,
        }
    }

    fn expects_p2p(&self) -> bool {
        (2..=5).contains(&self.round)
    }

    fn verify_message(&self, from: &PartyId, content: &Self::Content) -> Result<()> {
        let self_id = self.self_id();
        let valid = match content {
            PresignContent::EncryptionProof { proof } => self.backend.verify_enc_elg(
                &EncElgStatement {
                    prover: self.key(from)?,
                    verifier: self.pedersen(&self_id)?,
                    ciphertext: Self::get(&self.k_ciphertexts, from, "K")?,
                    elgamal: Self::get(&self.k_elgamal, from, "k mask")?,
                    elgamal_key: self.elgamal_key(from)?,
                },
                proof,
                &mut self.helper.transcript(b"enc-elg", from),
            ),
            PresignContent::MtaProof { delta, chi } => {
                let mta = self.mta_for(from, &self_id)?;
                let receiver = self.key(&self_id)?;
                let prover = self.key(from)?;
                let verifier = self.pedersen(&self_id)?;
                let own_k = Self::get(&self.k_ciphertexts, &self_id, "own K")?;

                self.backend.verify_aff_p(
                    &AffPStatement {
                        verifier,
                        receiver,
                        prover,
                        ciphertext: own_k,
                        d: &mta.delta_d,
                        f: &mta.delta_f,
                        multiplier: Self::get(&self.gamma_ciphertexts, from, "G")?,
                    },
                    delta,
                    &mut self.helper.transcript(b"aff-p", from),
                ) && self.backend.verify_aff_g(
                    &AffGStatement {
                        verifier,
                        receiver,
                        prover,
                        ciphertext: own_k,
                        d: &mta.chi_d,
                        f: &mta.chi_f,
                        multiplier: Self::get(&self.public_shares, from, "public share")?,
                    },
                    chi,
                    &mut self.helper.transcript(b"aff-g", from),
                )
            }
            PresignContent::GammaProof { proof } => self.backend.verify_log_star(
                &LogStarStatement {
                    prover: self.key(from)?,
                    verifier: self.pedersen(&self_id)?,
                    ciphertext: Self::get(&self.gamma_ciphertexts, from, "G")?,
                    point: Self::get(&self.big_gammas, from, "Γ")?,
                    base: &C::Point::generator(),
                },
                proof,
                &mut self.helper.transcript(b"log-gamma", from),
            ),
            PresignContent::DeltaProof { proof } => self.backend.verify_log_star(
                &LogStarStatement {
                    prover: self.key(from)?,
                    verifier: self.pedersen(&self_id)?,
                    ciphertext: Self::get(&self.k_ciphertexts, from, "K")?,
                    point: Self::get(&self.big_deltas, from, "Δ")?,
                    base: &self.big_gamma,
                },
                proof,
                &mut self.helper.transcript(b"log-delta", from),
            ),
            _ => return Err(Error::UnexpectedContent { round: self.round }),
        };

        if !valid {
            return Err(Error::VerificationFailed(format!(
                "Invalid proof in round {}",
                self.round
            )));
        }
        Ok(())
    }

    fn store_message(&mut self, from: PartyId, content: Self::Content) -> Result<()> {
        match content {
            PresignContent::MtaProof { .. } => {
                let mta = self.mta_for(&from, &self.self_id())?;
                let delta_alpha = self.backend.decrypt(&self.paillier, &mta.delta_d)?;
                let chi_alpha = self.backend.decrypt(&self.paillier, &mta.chi_d)?;
                self.delta += delta_alpha;
                self.chi += chi_alpha;
                self.delta_alphas.insert(from, delta_alpha);
                self.chi_alphas.insert(from, chi_alpha);
                Ok(())
            }
            PresignContent::EncryptionProof { .. }
            | PresignContent::GammaProof { .. }
            | PresignContent::DeltaProof { .. } => Ok(()),
            _ => Err(Error::UnexpectedContent { round: self.round }),
        }
    }

    fn store_broadcast_message(&mut self, from: PartyId, content: Self::Content) -> Result<()> {
        match (self.round, self.phase, content) {
            (
                2,
                _,
                PresignContent::Encryption {
                    k,
                    gamma,
                    elgamal,
                },
            ) => {
                let key = self.key(&from)?;
                self.backend.validate_ciphertext(key, &k)?;
                self.backend.validate_ciphertext(key, &gamma)?;
                if !elgamal.is_valid() {
                    return Err(Error::VerificationFailed("Degenerate ElGamal ciphertext".into()));
                }
                self.k_ciphertexts.insert(from, k);
                self.gamma_ciphertexts.insert(from, gamma);
                self.k_elgamal.insert(from, elgamal);
            }
            (3, _, PresignContent::Mta { mta }) => {
                let peers = self.helper.party_ids().iter().filter(|id| **id != from);
                if !mta.keys().eq(peers) {
                    return Err(Error::VerificationFailed(
                        "MtA ciphertexts do not cover every peer".into(),
                    ));
                }
                let sender_key = self.key(&from)?;
                for (to, ciphertexts) in &mta {
                    let receiver_key = self.key(to)?;
                    self.backend.validate_ciphertext(receiver_key, &ciphertexts.delta_d)?;
                    self.backend.validate_ciphertext(receiver_key, &ciphertexts.chi_d)?;
                    self.backend.validate_ciphertext(sender_key, &ciphertexts.delta_f)?;
                    self.backend.validate_ciphertext(sender_key, &ciphertexts.chi_f)?;
                }
                self.mta.insert(from, mta);
            }
            (4, _, PresignContent::BigGammaShare { big_gamma, chi }) => {
                if big_gamma.is_identity() || !chi.is_valid() {
                    return Err(Error::VerificationFailed("Degenerate Γ share".into()));
                }
                self.big_gammas.insert(from, big_gamma.0);
                self.chi_elgamal.insert(from, chi);
            }
            (5, _, PresignContent::BigDeltaShare { big_delta }) => {
                self.big_deltas.insert(from, big_delta.0);
            }
            (6, _, PresignContent::DeltaShare { delta }) => {
                self.deltas.insert(from, delta.0);
            }
            (7, Phase::Running, PresignContent::SShare { s, proof }) => {
                let chi = Self::get(&self.chi_elgamal, &from, "chi mask")?;
                if !elog::verify::<C>(
                    &mut self.helper.transcript(b"elog", &from),
                    elog::Statement {
                        l: &chi.l.0,
                        m: &chi.m.0,
                        x: &s.0,
                        key: self.elgamal_key(&from)?,
                        base: &self.big_r,
                    },
                    &proof,
                ) {
                    return Err(Error::VerificationFailed("Invalid S share proof".into()));
                }
                self.s_shares.insert(from, s);
            }
            (7, Phase::Abort1, PresignContent::Abort1 { reveal })
            | (8, Phase::Abort2, PresignContent::Abort2 { reveal }) => {
                self.store_reveal(from, *reveal);
            }
            (8, Phase::Sign, PresignContent::Sigma { sigma }) => {
                self.sigmas.insert(from, sigma.0);
            }
            _ => return Err(Error::UnexpectedContent { round: self.round }),
        }
        Ok(())
    }

    fn finalize(mut self, outbox: &mut Outbox<Self::Content>) -> Result<Transition<Self>> {
        match (self.round, self.phase) {
            (1, _) => self.finalize_round1(outbox)?,
            (2, _) => self.finalize_round2(outbox)?,
            (3, _) => self.finalize_round3(outbox)?,
            (4, _) => self.finalize_round4(outbox)?,
            (5, _) => self.finalize_round5(outbox)?,
            (6, _) => self.finalize_round6(outbox)?,
            (7, Phase::Running) => return self.finalize_round7(outbox),
            (7, Phase::Abort1) => return Err(self.finalize_abort1()),
            (8, Phase::Abort2) => return Err(self.finalize_abort2()),
            (8, Phase::Sign) => return Ok(Transition::Output(self.finalize_sign()?)),
            (round, phase) => {
                return Err(Error::Internal(format!(
                    "No presign round {round} in phase {phase:?}"
                )))
            }
        }
        self.round += 1;
        Ok(Transition::Next(self))
    }
}

impl<C: Curve, B: Backend<C>> Drop for Presign<C, B> {
    fn drop(&mut self) {
        self.secret.zeroize();
        self.k.zeroize();
        self.gamma.zeroize();
        self.delta.zeroize();
        self.chi.zeroize();
        self.k_elgamal_nonce.zeroize();
        self.chi_elgamal_nonce.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::transparent::Transparent;
    use crate::testing::{self, Network};
    use k256::Secp256k1;
    use sha2::{Digest, Sha256};

    type TestPresign = Presign<Secp256k1, Transparent>;

    fn rounds(n: u32, threshold: usize, prehash: Option<&[u8]>) -> Vec<TestPresign> {
        let ids: Vec<u32> = (1..=n).collect();
        let configs = testing::keygen(&ids, threshold);
        let signers: Vec<PartyId> = configs.iter().map(|c| c.id).collect();
        configs
            .iter()
            .map(|config| {
                Presign::new(Transparent, config, &signers, prehash, [5u8; 32], Pool::inline())
                    .unwrap()
            })
            .collect()
    }

    fn assert_sole_culprit<T>(results: &BTreeMap<PartyId, Result<T>>, culprit: u32) {
        let culprit = PartyId::new(culprit);
        for (id, result) in results {
            let err = match result {
                Ok(_) => panic!("party {id} finished despite the fault"),
                Err(err) => err,
            };
            assert_eq!(err.culprits(), vec![culprit], "party {id}: {err}");
        }
    }

    #[test]
    fn test_presign_then_sign() {
        let ids = [1, 2, 3, 4];
        let configs = testing::keygen(&ids, 2);
        let signers = vec![PartyId::new(1), PartyId::new(3), PartyId::new(4)];
        let rounds = configs
            .iter()
            .filter(|config| signers.contains(&config.id))
            .map(|config| {
                Presign::new(Transparent, config, &signers, None, [6u8; 32], Pool::inline())
                    .unwrap()
            })
            .collect();
        let presignatures = testing::run(rounds);

        let big_r: Vec<_> = presignatures
            .values()
            .map(|output| match output {
                PresignOutput::PreSignature(presignature) => presignature.big_r(),
                PresignOutput::Signature(_) => panic!("no message was given"),
            })
            .collect();
        assert!(big_r.windows(2).all(|pair| pair[0] == pair[1]));

        let prehash = Sha256::digest(b"hello");
        let sign_rounds = presignatures
            .into_iter()
            .map(|(id, output)| {
                let config = configs.iter().find(|config| config.id == id).unwrap();
                let presignature = output.into_presignature().unwrap();
                crate::sign::Sign::new(config, presignature, &prehash, [7u8; 32], Pool::inline())
                    .unwrap()
            })
            .collect();
        let signatures = testing::run(sign_rounds);

        let message = Secp256k1::prehash_to_scalar(&prehash).unwrap();
        for signature in signatures.values() {
            assert!(signature.verify(&configs[0].public_key(), &message));
            assert_eq!(signature, &signatures[&PartyId::new(1)]);
        }
    }

    #[test]
    fn test_embedded_message_outputs_signature() {
        let prehash = Sha256::digest(b"embedded");
        let configs = testing::keygen(&[1, 2, 3], 1);
        let signers = vec![PartyId::new(2), PartyId::new(3)];
        let rounds = configs[1..]
            .iter()
            .map(|config| {
                Presign::new(
                    Transparent,
                    config,
                    &signers,
                    Some(prehash.as_slice()),
                    [8u8; 32],
                    Pool::inline(),
                )
                .unwrap()
            })
            .collect();
        let outputs = testing::run(rounds);

        let message = Secp256k1::prehash_to_scalar(&prehash).unwrap();
        let public_key = configs[0].public_key();
        for output in outputs.into_values() {
            let signature = output.into_signature().unwrap();
            assert!(signature.verify(&public_key, &message));
            assert!(signature.to_ecdsa().is_ok());
        }
    }

    #[test]
    fn test_presignature_survives_serialization() {
        let outputs = testing::run(rounds(2, 1, None));
        for output in outputs.into_values() {
            let presignature = output.into_presignature().unwrap();
            let json = serde_json::to_string(&presignature).unwrap();
            let restored: PreSignature<Secp256k1> = serde_json::from_str(&json).unwrap();
            assert_eq!(restored.id(), presignature.id());
            assert_eq!(restored.big_r(), presignature.big_r());
            restored.validate().unwrap();
        }
    }

    #[test]
    fn test_tampered_big_gamma_blames_sender() {
        let results = Network::new(rounds(3, 1, None))
            .tamper(|msg, _| {
                if msg.round != 4 || msg.from != PartyId::new(2) || !msg.broadcast {
                    return msg.clone();
                }
                testing::rewrite(msg, |content: &mut PresignContent<Secp256k1, Transparent>| {
                    if let PresignContent::BigGammaShare { big_gamma, .. } = content {
                        big_gamma.0 += k256::ProjectivePoint::GENERATOR;
                    }
                })
            })
            .run();

        for id in [1, 3] {
            let err = results[&PartyId::new(id)].as_ref().unwrap_err();
            assert_eq!(err.culprits(), vec![PartyId::new(2)]);
        }
    }

    #[test]
    fn test_wrong_delta_share_triggers_abort1() {
        let results = Network::new(rounds(3, 1, None))
            .mutate(2, 5, |presign: &mut TestPresign| presign.delta += k256::Scalar::ONE)
            .run();
        assert_sole_culprit(&results, 2);
    }

    #[test]
    fn test_wrong_chi_share_triggers_abort2() {
        let results = Network::new(rounds(3, 2, None))
            .mutate(3, 3, |presign: &mut TestPresign| presign.chi += k256::Scalar::ONE)
            .run();
        assert_sole_culprit(&results, 3);
    }

    #[test]
    fn test_wrong_sigma_blames_signer() {
        let prehash = Sha256::digest(b"blame");
        let results = Network::new(rounds(3, 1, Some(prehash.as_slice())))
            .tamper(|msg, _| {
                if msg.round != 8 || msg.from != PartyId::new(1) {
                    return msg.clone();
                }
                testing::rewrite(msg, |content: &mut PresignContent<Secp256k1, Transparent>| {
                    if let PresignContent::Sigma { sigma } = content {
                        *sigma = Scalar(sigma.0 + k256::Scalar::ONE);
                    }
                })
            })
            .run();

        assert!(results[&PartyId::new(1)].is_ok());
        for id in [2, 3] {
            let err = results[&PartyId::new(id)].as_ref().unwrap_err();
            assert_eq!(err.culprits(), vec![PartyId::new(1)], "party {id}");
        }
    }

    #[test]
    fn test_lying_gamma_in_abort2_spares_honest_parties() {
        let results = Network::new(rounds(3, 1, None))
            .mutate(3, 3, |presign: &mut TestPresign| presign.chi += k256::Scalar::ONE)
            .mutate(2, 7, |presign: &mut TestPresign| presign.gamma += k256::Scalar::ONE)
            .run();
        assert_sole_culprit(&results, 2);
    }

    #[test]
    fn test_lying_reveal_is_blamed_too() {
        let results = Network::new(rounds(3, 1, None))
            .mutate(2, 5, |presign: &mut TestPresign| presign.delta += k256::Scalar::ONE)
            .mutate(3, 6, |presign: &mut TestPresign| presign.gamma += k256::Scalar::ONE)
            .run();

        for result in results.values() {
            assert_eq!(
                result.as_ref().unwrap_err().culprits(),
                vec![PartyId::new(2), PartyId::new(3)]
            );
        }
    }

    #[test]
    fn test_full_quorum_signs_and_blames_flipped_gamma() {
        let prehash = Sha256::digest(b"hello");
        let configs = testing::keygen(&[1, 2, 3, 4], 3);
        let signers: Vec<PartyId> = configs.iter().map(|c| c.id).collect();
        let rounds = || -> Vec<TestPresign> {
            configs
                .iter()
                .map(|config| {
                    Presign::new(
                        Transparent,
                        config,
                        &signers,
                        Some(prehash.as_slice()),
                        [7u8; 32],
                        Pool::inline(),
                    )
                    .unwrap()
                })
                .collect()
        };

        let message = Secp256k1::prehash_to_scalar(&prehash).unwrap();
        for output in testing::run(rounds()).into_values() {
            let signature = output.into_signature().unwrap();
            assert!(signature.verify(&configs[0].public_key(), &message));
        }

        let results = Network::new(rounds())
            .tamper(|msg, _| {
                if msg.round != 4 || !msg.broadcast || msg.from != PartyId::new(4) {
                    return msg.clone();
                }
                // Flips the parity bit of the compressed encoding
                testing::rewrite(msg, |content: &mut PresignContent<Secp256k1, Transparent>| {
                    if let PresignContent::BigGammaShare { big_gamma, .. } = content {
                        big_gamma.0 = -big_gamma.0;
                    }
                })
            })
            .run();
        for id in [1, 2, 3] {
            let err = results[&PartyId::new(id)].as_ref().unwrap_err();
            assert_eq!(err.culprits(), vec![PartyId::new(4)], "party {id}");
        }
    }
}
