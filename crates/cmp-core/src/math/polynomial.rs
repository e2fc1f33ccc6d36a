//! Polynomials over the scalar field and their commitments

use crate::curve::{Curve, Point};
use crate::types::PartyId;
use crate::{Error, Result};
use elliptic_curve::{ff::Field, group::Group};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Secret polynomial `f(X) = a_0 + a_1 X + ... + a_t X^t`
#[derive(Clone)]
pub struct Polynomial<C: Curve> {
    coefficients: Vec<C::Scalar>,
}

impl<C: Curve> Polynomial<C> {
    /// Random polynomial of the given degree with a fixed constant term.
    pub fn random(rng: &mut impl CryptoRngCore, degree: usize, constant: C::Scalar) -> Self {
        let mut coefficients = Vec::with_capacity(degree + 1);
        coefficients.push(constant);
        for _ in 0..degree {
            coefficients.push(C::Scalar::random(&mut *rng));
        }
        Self { coefficients }
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }

    pub fn constant(&self) -> C::Scalar {
        self.coefficients[0]
    }

    /// Evaluate at `x` using Horner's rule
    pub fn evaluate(&self, x: &C::Scalar) -> C::Scalar {
        self.coefficients
            .iter()
            .rev()
            .fold(C::Scalar::ZERO, |acc, coef| acc * x + coef)
    }

    /// Share for `party`, i.e. `f(party)`
    pub fn share(&self, party: &PartyId) -> C::Scalar {
        self.evaluate(&party.scalar::<C>())
    }

    /// Commit to every coefficient: `F(X) = f(X)·G`
    pub fn commit(&self) -> Exponent<C> {
        Exponent {
            coefficients: self
                .coefficients
                .iter()
                .map(|a| Point(C::Point::generator() * a))
                .collect(),
        }
    }
}

impl<C: Curve> Drop for Polynomial<C> {
    fn drop(&mut self) {
        for coef in self.coefficients.iter_mut() {
            coef.zeroize();
        }
    }
}

/// Polynomial "in the exponent", letting a receiver check its share
/// `f(j)` against `F(j) = f(j)·G` without learning anything else.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Exponent<C: Curve> {
    coefficients: Vec<Point<C>>,
}

impl<C: Curve> Exponent<C> {
    /// Sum of several committed polynomials; all must share one degree.
    pub fn sum<'a>(polys: impl IntoIterator<Item = &'a Exponent<C>>) -> Result<Self> {
        let mut iter = polys.into_iter();
        let mut acc = iter
            .next()
            .cloned()
            .ok_or_else(|| Error::Internal("Sum of zero polynomials".into()))?;
        for poly in iter {
            if poly.coefficients.len() != acc.coefficients.len() {
                return Err(Error::VerificationFailed(
                    "Polynomial degree mismatch".into(),
                ));
            }
            for (a, b) in acc.coefficients.iter_mut().zip(&poly.coefficients) {
                a.0 += b.0;
            }
        }
        Ok(acc)
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    /// `F(0) = f(0)·G`
    pub fn constant(&self) -> C::Point {
        self.coefficients
            .first()
            .map(|p| p.0)
            .unwrap_or_else(C::Point::identity)
    }

    pub fn evaluate(&self, x: &C::Scalar) -> C::Point {
        self.coefficients
            .iter()
            .rev()
            .fold(C::Point::identity(), |acc, coef| acc * x + coef.0)
    }

    /// Public share of `party`, i.e. `F(party)`
    pub fn share(&self, party: &PartyId) -> C::Point {
        self.evaluate(&party.scalar::<C>())
    }

    /// Check a degree bound and that no coefficient is the identity, which
    /// would silently lower the degree.
    pub fn validate(&self, degree: usize, zero_constant: bool) -> Result<()> {
        if self.coefficients.len() != degree + 1 {
            return Err(Error::VerificationFailed(format!(
                "Expected polynomial of degree {degree}, got {}",
                self.degree()
            )));
        }
        for (i, coef) in self.coefficients.iter().enumerate() {
            let expect_identity = i == 0 && zero_constant;
            if coef.is_identity() != expect_identity {
                return Err(Error::VerificationFailed(format!(
                    "Unexpected coefficient {i} in committed polynomial"
                )));
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.coefficients.iter().flat_map(|c| c.to_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::lagrange;
    use elliptic_curve::ff::Field;
    use k256::{ProjectivePoint, Scalar, Secp256k1};
    use rand::{rngs::OsRng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_evaluate() {
        // f(X) = 3 + 2X + X^2, f(2) = 11
        let poly = Polynomial::<Secp256k1> {
            coefficients: vec![Scalar::from(3u64), Scalar::from(2u64), Scalar::from(1u64)],
        };
        assert_eq!(poly.evaluate(&Scalar::from(2u64)), Scalar::from(11u64));
        assert_eq!(poly.share(&PartyId::new(2)), Scalar::from(11u64));
    }

    #[test]
    fn test_commitment_matches_shares() {
        let secret = Scalar::from(42u64);
        let poly = Polynomial::<Secp256k1>::random(&mut OsRng, 3, secret);
        let commitment = poly.commit();

        assert_eq!(poly.degree(), 3);
        assert_eq!(commitment.constant(), ProjectivePoint::GENERATOR * secret);
        for id in 1..6 {
            let party = PartyId::new(id);
            assert_eq!(
                commitment.share(&party),
                ProjectivePoint::GENERATOR * poly.share(&party)
            );
        }
        commitment.validate(3, false).unwrap();
        assert!(commitment.validate(2, false).is_err());
        assert!(commitment.validate(3, true).is_err());
    }

    #[test]
    fn test_sum() {
        let a = Polynomial::<Secp256k1>::random(&mut OsRng, 2, Scalar::from(1u64));
        let b = Polynomial::<Secp256k1>::random(&mut OsRng, 2, Scalar::from(2u64));
        let sum = Exponent::sum([&a.commit(), &b.commit()]).unwrap();
        let x = Scalar::from(9u64);
        assert_eq!(
            sum.evaluate(&x),
            ProjectivePoint::GENERATOR * (a.evaluate(&x) + b.evaluate(&x))
        );

        let c = Polynomial::<Secp256k1>::random(&mut OsRng, 1, Scalar::from(2u64));
        assert!(Exponent::sum([&a.commit(), &c.commit()]).is_err());
    }

    #[test]
    fn test_any_quorum_interpolates_constant() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let secret = Scalar::random(&mut rng);
        let poly = Polynomial::<Secp256k1>::random(&mut rng, 2, secret);

        for quorum in [[1u32, 2, 3], [2, 4, 5], [1, 3, 5]] {
            let ids: Vec<PartyId> = quorum.iter().copied().map(PartyId::new).collect();
            let coefficients = lagrange::<Secp256k1>(&ids).unwrap();
            let value: Scalar = ids.iter().map(|id| coefficients[id] * poly.share(id)).sum();
            assert_eq!(value, secret);
        }
    }
}
