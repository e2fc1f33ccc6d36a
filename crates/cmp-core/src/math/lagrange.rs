//! Lagrange coefficients at zero

use crate::curve::Curve;
use crate::types::PartyId;
use crate::{Error, Result};
use elliptic_curve::ff::Field;
use std::collections::{BTreeMap, BTreeSet};

fn check_domain(domain: &[PartyId]) -> Result<()> {
    if domain.is_empty() {
        return Err(Error::InvalidConfig("Empty interpolation domain".into()));
    }
    let unique: BTreeSet<_> = domain.iter().collect();
    if unique.len() != domain.len() {
        return Err(Error::InvalidConfig(
            "Duplicate id in interpolation domain".into(),
        ));
    }
    if domain.iter().any(|id| id.as_u32() == 0) {
        return Err(Error::InvalidPartyId(PartyId::new(0)));
    }
    Ok(())
}

/// Lagrange coefficients at zero for every party in `domain`.
///
/// `λ_j = ∏_i x_i / (x_j · ∏_{i≠j} (x_i − x_j))`: one pass for the shared
/// numerator, then one denominator pass per party.
pub fn lagrange<C: Curve>(domain: &[PartyId]) -> Result<BTreeMap<PartyId, C::Scalar>> {
    check_domain(domain)?;

    let xs: Vec<C::Scalar> = domain.iter().map(|id| id.scalar::<C>()).collect();
    let numerator = xs.iter().fold(C::Scalar::ONE, |acc, x| acc * x);

    domain
        .iter()
        .zip(&xs)
        .map(|(id, x_j)| {
            let denominator = xs
                .iter()
                .filter(|x_i| *x_i != x_j)
                .fold(*x_j, |acc, x_i| acc * (*x_i - x_j));
            let inverse = Option::<C::Scalar>::from(denominator.invert())
                .ok_or_else(|| Error::Crypto("Degenerate interpolation domain".into()))?;
            Ok((*id, numerator * inverse))
        })
        .collect()
}

/// Lagrange coefficient of a single party.
pub fn lagrange_coefficient<C: Curve>(domain: &[PartyId], party: &PartyId) -> Result<C::Scalar> {
    lagrange::<C>(domain)?
        .remove(party)
        .ok_or(Error::InvalidPartyId(*party))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Polynomial;
    use k256::{Scalar, Secp256k1};
    use rand::rngs::OsRng;

    fn ids(raw: &[u32]) -> Vec<PartyId> {
        raw.iter().copied().map(PartyId::new).collect()
    }

    #[test]
    fn test_interpolates_secret() {
        let secret = Scalar::from(1234u64);
        let poly = Polynomial::<Secp256k1>::random(&mut OsRng, 2, secret);

        for domain in [ids(&[1, 2, 3]), ids(&[2, 5, 9]), ids(&[1, 3, 4, 7])] {
            let coefficients = lagrange::<Secp256k1>(&domain).unwrap();
            let recovered = domain
                .iter()
                .map(|id| coefficients[id] * poly.share(id))
                .fold(Scalar::ZERO, |acc, x| acc + x);
            assert_eq!(recovered, secret);
        }
    }

    #[test]
    fn test_single_party() {
        let coefficient = lagrange_coefficient::<Secp256k1>(&ids(&[4]), &PartyId::new(4)).unwrap();
        assert_eq!(coefficient, Scalar::ONE);
    }

    #[test]
    fn test_rejects_bad_domains() {
        assert!(lagrange::<Secp256k1>(&[]).is_err());
        assert!(lagrange::<Secp256k1>(&ids(&[1, 2, 2])).is_err());
        assert!(lagrange::<Secp256k1>(&ids(&[0, 1])).is_err());
        assert!(lagrange_coefficient::<Secp256k1>(&ids(&[1, 2]), &PartyId::new(3)).is_err());
    }
}
