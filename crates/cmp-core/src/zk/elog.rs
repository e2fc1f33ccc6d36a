//! Knowledge of an ElGamal opening whose plaintext also links two points:
//! `L = λ·G`, `M = y·G + λ·Y` and `X = y·H`.
//!
//! Presigning uses it to show that the published `S_i = χ_i·R` matches the
//! ElGamal encryption of `χ_i` sent two rounds earlier.

use super::{append_point, challenge};
use crate::curve::{Curve, Point, Scalar};
use elliptic_curve::{ff::Field, group::Group};
use merlin::Transcript;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};

const STATEMENT_LABEL: &[u8] = b"elog statement";
const COMMITMENT_LABEL: &[u8] = b"elog commitment";
const CHALLENGE_LABEL: &[u8] = b"elog challenge";

#[derive(Clone, Copy)]
pub struct Statement<'a, C: Curve> {
    pub l: &'a C::Point,
    pub m: &'a C::Point,
    pub x: &'a C::Point,
    /// ElGamal key `Y`
    pub key: &'a C::Point,
    /// Base `H` of `X`
    pub base: &'a C::Point,
}

impl<C: Curve> Statement<'_, C> {
    fn absorb(&self, transcript: &mut Transcript) {
        for point in [self.l, self.m, self.x, self.key, self.base] {
            append_point::<C>(transcript, STATEMENT_LABEL, point);
        }
    }
}

#[derive(Clone, Copy)]
pub struct Witness<'a, C: Curve> {
    pub y: &'a C::Scalar,
    pub lambda: &'a C::Scalar,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Proof<C: Curve> {
    a: Point<C>,
    n: Point<C>,
    b: Point<C>,
    z: Scalar<C>,
    u: Scalar<C>,
}

impl<C: Curve> Proof<C> {
    fn absorb(&self, transcript: &mut Transcript) {
        for point in [&self.a, &self.n, &self.b] {
            append_point::<C>(transcript, COMMITMENT_LABEL, &point.0);
        }
    }
}

pub fn prove<C: Curve>(
    rng: &mut impl CryptoRngCore,
    transcript: &mut Transcript,
    statement: Statement<'_, C>,
    witness: Witness<'_, C>,
) -> Proof<C> {
    statement.absorb(transcript);

    let alpha = C::Scalar::random(&mut *rng);
    let m = C::Scalar::random(&mut *rng);
    let mut proof = Proof {
        a: Point(C::Point::generator() * alpha),
        n: Point(C::Point::generator() * m + *statement.key * alpha),
        b: Point(*statement.base * m),
        z: Scalar(C::Scalar::ZERO),
        u: Scalar(C::Scalar::ZERO),
    };
    proof.absorb(transcript);
    let e = challenge::<C>(transcript, CHALLENGE_LABEL);

    proof.z = Scalar(alpha + e * witness.lambda);
    proof.u = Scalar(m + e * witness.y);
    proof
}

#[must_use]
pub fn verify<C: Curve>(
    transcript: &mut Transcript,
    statement: Statement<'_, C>,
    proof: &Proof<C>,
) -> bool {
    statement.absorb(transcript);
    proof.absorb(transcript);
    let e = challenge::<C>(transcript, CHALLENGE_LABEL);

    let g = C::Point::generator();
    let (z, u) = (proof.z.0, proof.u.0);

    g * z == proof.a.0 + *statement.l * e
        && g * u + *statement.key * z == proof.n.0 + *statement.m * e
        && *statement.base * u == proof.b.0 + *statement.x * e
}
