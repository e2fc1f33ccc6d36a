//! ElGamal encryption "in the exponent"
//!
//! `Enc_Y(x; a) = (a·G, x·G + a·Y)`. Only `x·G` is recoverable, which is all
//! the presign blame checks need.

use crate::curve::{Curve, Point};
use elliptic_curve::{ff::Field, group::Group};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ElGamalCiphertext<C: Curve> {
    pub l: Point<C>,
    pub m: Point<C>,
}

impl<C: Curve> ElGamalCiphertext<C> {
    /// Encrypt `x` under `key` with fresh randomness, returning the nonce.
    pub fn encrypt(
        key: &C::Point,
        x: &C::Scalar,
        rng: &mut impl CryptoRngCore,
    ) -> (Self, C::Scalar) {
        let nonce = C::Scalar::random(&mut *rng);
        (Self::encrypt_with_nonce(key, x, &nonce), nonce)
    }

    pub fn encrypt_with_nonce(key: &C::Point, x: &C::Scalar, nonce: &C::Scalar) -> Self {
        Self {
            l: Point(C::Point::generator() * nonce),
            m: Point(C::Point::generator() * x + *key * nonce),
        }
    }

    /// `x·G`, given the nonce
    pub fn open(&self, key: &C::Point, nonce: &C::Scalar) -> Option<C::Point> {
        if self.l.0 != C::Point::generator() * nonce {
            return None;
        }
        Some(self.m.0 - *key * nonce)
    }

    /// `x·G`, given the secret key
    pub fn decrypt(&self, secret: &C::Scalar) -> C::Point {
        self.m.0 - self.l.0 * secret
    }

    /// Reject ciphertexts with a trivial randomness component.
    pub fn is_valid(&self) -> bool {
        !self.l.is_identity()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.l.to_bytes();
        bytes.extend(self.m.to_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::{ProjectivePoint, Scalar, Secp256k1};
    use rand::rngs::OsRng;

    #[test]
    fn test_open_and_decrypt() {
        let secret = Scalar::random(&mut OsRng);
        let key = ProjectivePoint::GENERATOR * secret;
        let x = Scalar::from(99u64);

        let (ct, nonce) = ElGamalCiphertext::<Secp256k1>::encrypt(&key, &x, &mut OsRng);
        assert!(ct.is_valid());
        assert_eq!(ct.decrypt(&secret), ProjectivePoint::GENERATOR * x);
        assert_eq!(ct.open(&key, &nonce), Some(ProjectivePoint::GENERATOR * x));
        assert_eq!(ct.open(&key, &(nonce + Scalar::ONE)), None);
    }
}
