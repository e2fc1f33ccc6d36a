//! Resharing message types

use crate::backend::Backend;
use crate::curve::{Curve, Point};
use crate::helper::Decommitment;
use crate::math::Exponent;
use crate::round::Content;
use crate::types::{Hash, PartyId, RoundNumber};
use crate::zk::schnorr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Auxiliary material a new committee member commits to in round 1
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Auxiliary<C: Curve, B: Backend<C>> {
    /// Contribution to the new random ID
    pub rid: [u8; 32],
    /// First message of the Schnorr proof for the new share
    pub schnorr: schnorr::Commitment<C>,
    pub elgamal: Point<C>,
    pub paillier: B::EncryptionKey,
    pub pedersen: B::PedersenParams,
}

/// Public values the whole old committee must agree on
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Handover<C: Curve> {
    pub public_key: Point<C>,
    pub chain_key: [u8; 32],
    /// Lagrange-scaled public share of every old member
    pub contributions: BTreeMap<PartyId, Point<C>>,
}

/// What an old committee member deals to the new committee
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Dealing<C: Curve> {
    /// Commitment to a polynomial of the new degree whose constant is the
    /// sender's Lagrange-scaled share
    pub vss: Exponent<C>,
    pub handover: Handover<C>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum ReshareContent<C: Curve, B: Backend<C>> {
    /// Round 2 broadcast (new committee): commitment to [`Auxiliary`]
    Commitment { hash: Hash },
    /// Round 3 broadcast (new committee)
    Opening {
        auxiliary: Box<Auxiliary<C, B>>,
        decommitment: Decommitment,
    },
    /// Round 4 broadcast (old committee)
    Dealing { dealing: Box<Dealing<C>> },
    /// Round 4 p2p (old to new): share encrypted under the recipient's new key
    Share { share: B::Ciphertext },
    /// Round 5 p2p (new committee): proofs for the new auxiliary parameters
    AuxProof {
        mod_proof: B::ModProof,
        prm_proof: B::PrmProof,
    },
    /// Round 6 broadcast (new committee): knowledge of the new share
    Proof { proof: schnorr::Proof<C> },
    /// Round 7 broadcast (new committee): hash of the resulting public key
    /// material
    Confirm { hash: Hash },
}

impl<C: Curve, B: Backend<C>> Content for ReshareContent<C, B> {
    fn round(&self) -> RoundNumber {
        match self {
            ReshareContent::Commitment { .. } => 2,
            ReshareContent::Opening { .. } => 3,
            ReshareContent::Dealing { .. } | ReshareContent::Share { .. } => 4,
            ReshareContent::AuxProof { .. } => 5,
            ReshareContent::Proof { .. } => 6,
            ReshareContent::Confirm { .. } => 7,
        }
    }

    fn is_broadcast(&self) -> bool {
        !matches!(
            self,
            ReshareContent::Share { .. } | ReshareContent::AuxProof { .. }
        )
    }
}
