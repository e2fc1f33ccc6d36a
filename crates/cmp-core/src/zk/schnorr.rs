//! Proof of knowledge of a discrete logarithm, with the first message
//! committed ahead of time.
//!
//! Key generation commits to `A = α·G` in its first round and only reveals
//! the response `z = α + e·x` once the shares are fixed, so the proof cannot
//! depend on other parties' public shares.

use super::{append_point, challenge};
use crate::curve::{Curve, Point, Scalar};
use elliptic_curve::{ff::Field, group::Group};
use merlin::Transcript;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

const STATEMENT_LABEL: &[u8] = b"schnorr statement";
const COMMITMENT_LABEL: &[u8] = b"schnorr commitment";
const CHALLENGE_LABEL: &[u8] = b"schnorr challenge";

/// `public = x·G`
#[derive(Clone, Copy)]
pub struct Statement<'a, C: Curve> {
    pub public: &'a C::Point,
}

#[derive(Clone, Copy)]
pub struct Witness<'a, C: Curve> {
    pub x: &'a C::Scalar,
}

/// Public first message `A = α·G`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Commitment<C: Curve> {
    pub a: Point<C>,
}

/// Secret nonce behind a [`Commitment`]; consumed by [`prove`].
pub struct Randomness<C: Curve> {
    alpha: C::Scalar,
    commitment: Commitment<C>,
}

impl<C: Curve> Randomness<C> {
    pub fn new(rng: &mut impl CryptoRngCore) -> Self {
        let alpha = C::Scalar::random(&mut *rng);
        Self {
            alpha,
            commitment: Commitment {
                a: Point(C::Point::generator() * alpha),
            },
        }
    }

    pub fn commitment(&self) -> &Commitment<C> {
        &self.commitment
    }
}

impl<C: Curve> Drop for Randomness<C> {
    fn drop(&mut self) {
        self.alpha.zeroize();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Proof<C: Curve> {
    z: Scalar<C>,
}

fn challenge_for<C: Curve>(
    transcript: &mut Transcript,
    statement: &Statement<'_, C>,
    commitment: &Commitment<C>,
) -> C::Scalar {
    append_point::<C>(transcript, STATEMENT_LABEL, statement.public);
    append_point::<C>(transcript, COMMITMENT_LABEL, &commitment.a.0);
    challenge::<C>(transcript, CHALLENGE_LABEL)
}

pub fn prove<C: Curve>(
    randomness: Randomness<C>,
    transcript: &mut Transcript,
    statement: Statement<'_, C>,
    witness: Witness<'_, C>,
) -> Proof<C> {
    let e = challenge_for(transcript, &statement, &randomness.commitment);
    Proof {
        z: Scalar(randomness.alpha + e * witness.x),
    }
}

#[must_use]
pub fn verify<C: Curve>(
    transcript: &mut Transcript,
    statement: Statement<'_, C>,
    commitment: &Commitment<C>,
    proof: &Proof<C>,
) -> bool {
    if commitment.a.is_identity() {
        return false;
    }
    let e = challenge_for(transcript, &statement, commitment);
    C::Point::generator() * proof.z.0 == commitment.a.0 + *statement.public * e
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::{ProjectivePoint, Secp256k1};
    use rand::rngs::OsRng;

    #[test]
    fn test_valid_proof_verifies() {
        let x = k256::Scalar::random(&mut OsRng);
        let public = ProjectivePoint::GENERATOR * x;
        let randomness = Randomness::<Secp256k1>::new(&mut OsRng);
        let commitment = *randomness.commitment();

        let proof = prove(
            randomness,
            &mut Transcript::new(b"test"),
            Statement { public: &public },
            Witness { x: &x },
        );
        assert!(verify(
            &mut Transcript::new(b"test"),
            Statement { public: &public },
            &commitment,
            &proof
        ));
        assert!(!verify(
            &mut Transcript::new(b"other"),
            Statement { public: &public },
            &commitment,
            &proof
        ));

        let wrong = ProjectivePoint::GENERATOR * (x + k256::Scalar::ONE);
        assert!(!verify(
            &mut Transcript::new(b"test"),
            Statement { public: &wrong },
            &commitment,
            &proof
        ));
    }
}
