//! Key generation message types

use crate::backend::Backend;
use crate::curve::{Curve, Point};
use crate::helper::Decommitment;
use crate::math::Exponent;
use crate::round::Content;
use crate::types::{Hash, RoundNumber};
use crate::zk::schnorr;
use serde::{Deserialize, Serialize};

/// Everything a party commits to in round 1 and reveals in round 3
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Committed<C: Curve, B: Backend<C>> {
    /// Contribution to the shared random ID
    pub rid: [u8; 32],
    /// Contribution to the chain key (zero when refreshing)
    pub chain_key: [u8; 32],
    /// Feldman commitment to the sharing polynomial
    pub vss: Exponent<C>,
    /// First message of the final Schnorr proof
    pub schnorr: schnorr::Commitment<C>,
    pub elgamal: Point<C>,
    pub paillier: B::EncryptionKey,
    pub pedersen: B::PedersenParams,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum KeygenContent<C: Curve, B: Backend<C>> {
    /// Round 2 broadcast: hash commitment to [`Committed`]
    Commitment { hash: Hash },
    /// Round 3 broadcast: the committed values and their decommitment
    Opening {
        committed: Box<Committed<C, B>>,
        decommitment: Decommitment,
    },
    /// Round 4 p2p: auxiliary parameter proofs and the encrypted share
    Share {
        mod_proof: B::ModProof,
        prm_proof: B::PrmProof,
        share: B::Ciphertext,
    },
    /// Round 5 broadcast: knowledge of the new secret share
    Proof { proof: schnorr::Proof<C> },
}

impl<C: Curve, B: Backend<C>> Content for KeygenContent<C, B> {
    fn round(&self) -> RoundNumber {
        match self {
            KeygenContent::Commitment { .. } => 2,
            KeygenContent::Opening { .. } => 3,
            KeygenContent::Share { .. } => 4,
            KeygenContent::Proof { .. } => 5,
        }
    }

    fn is_broadcast(&self) -> bool {
        !matches!(self, KeygenContent::Share { .. })
    }
}
