//! Presign message types

use crate::backend::Backend;
use crate::curve::{Curve, Point, Scalar};
use crate::elgamal::ElGamalCiphertext;
use crate::round::Content;
use crate::types::{PartyId, RoundNumber};
use crate::zk::elog;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The two MtA instances one party runs towards one peer
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct MtaCiphertexts<C: Curve, B: Backend<C>> {
    /// `γᵢ ⊙ Kⱼ ⊕ Encⱼ(−β)` and `Encᵢ(β)`
    pub delta_d: B::Ciphertext,
    pub delta_f: B::Ciphertext,
    /// `xᵢ ⊙ Kⱼ ⊕ Encⱼ(−β̂)` and `Encᵢ(β̂)`
    pub chi_d: B::Ciphertext,
    pub chi_f: B::Ciphertext,
}

/// A revealed plaintext with its proof of correct decryption
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Opened<C: Curve, B: Backend<C>> {
    pub value: Scalar<C>,
    pub proof: B::DecProof,
}

/// Everything a party discloses once the presignature is abandoned, enough
/// for anyone to recompute what its share should have been.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Reveal<C: Curve, B: Backend<C>> {
    pub k: Scalar<C>,
    pub k_nonce: B::Nonce,
    pub gamma: Scalar<C>,
    pub gamma_nonce: B::Nonce,
    /// Decryptions of the MtA ciphertexts each peer sent this party
    pub alphas: BTreeMap<PartyId, Opened<C, B>>,
    /// Decryptions of this party's own `F` ciphertexts towards each peer
    pub betas: BTreeMap<PartyId, Opened<C, B>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum PresignContent<C: Curve, B: Backend<C>> {
    /// Round 2 broadcast: `Kᵢ = Enc(kᵢ)`, `Gᵢ = Enc(γᵢ)` and the ElGamal mask of `kᵢ`
    Encryption {
        k: B::Ciphertext,
        gamma: B::Ciphertext,
        elgamal: ElGamalCiphertext<C>,
    },
    /// Round 2 p2p: `Kᵢ` and its ElGamal mask hide the same value
    EncryptionProof { proof: B::EncElgProof },
    /// Round 3 broadcast: MtA ciphertexts for every peer
    Mta {
        mta: BTreeMap<PartyId, MtaCiphertexts<C, B>>,
    },
    /// Round 3 p2p: affine proofs for the recipient's MtA ciphertexts
    MtaProof {
        delta: B::AffPProof,
        chi: B::AffGProof,
    },
    /// Round 4 broadcast: `Γᵢ = γᵢ·G` and the ElGamal mask of `χᵢ`
    BigGammaShare {
        big_gamma: Point<C>,
        chi: ElGamalCiphertext<C>,
    },
    /// Round 4 p2p: `Γᵢ` matches `Gᵢ`
    GammaProof { proof: B::LogStarProof },
    /// Round 5 broadcast: `Δᵢ = kᵢ·Γ`
    BigDeltaShare { big_delta: Point<C> },
    /// Round 5 p2p: `Δᵢ` matches `Kᵢ`
    DeltaProof { proof: B::LogStarProof },
    /// Round 6 broadcast: additive share of `δ = k·γ`
    DeltaShare { delta: Scalar<C> },
    /// Round 7 broadcast: `Sᵢ = χᵢ·R` with a proof against the masked `χᵢ`
    SShare { s: Point<C>, proof: elog::Proof<C> },
    /// Round 7 broadcast after a `δ` mismatch
    Abort1 { reveal: Box<Reveal<C, B>> },
    /// Round 8 broadcast: signature share for the embedded message
    Sigma { sigma: Scalar<C> },
    /// Round 8 broadcast after an `S` mismatch
    Abort2 { reveal: Box<Reveal<C, B>> },
}

impl<C: Curve, B: Backend<C>> Content for PresignContent<C, B> {
    fn round(&self) -> RoundNumber {
        match self {
            PresignContent::Encryption { .. } | PresignContent::EncryptionProof { .. } => 2,
            PresignContent::Mta { .. } | PresignContent::MtaProof { .. } => 3,
            PresignContent::BigGammaShare { .. } | PresignContent::GammaProof { .. } => 4,
            PresignContent::BigDeltaShare { .. } | PresignContent::DeltaProof { .. } => 5,
            PresignContent::DeltaShare { .. } => 6,
            PresignContent::SShare { .. } | PresignContent::Abort1 { .. } => 7,
            PresignContent::Sigma { .. } | PresignContent::Abort2 { .. } => 8,
        }
    }

    fn is_broadcast(&self) -> bool {
        !matches!(
            self,
            PresignContent::EncryptionProof { .. }
                | PresignContent::MtaProof { .. }
                | PresignContent::GammaProof { .. }
                | PresignContent::DeltaProof { .. }
        )
    }
}
