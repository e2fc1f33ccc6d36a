//! Group abstraction the protocols are generic over

use elliptic_curve::{ff::PrimeField, group::Group};
use k256::{
    elliptic_curve::{
        bigint::U256,
        ops::Reduce,
        point::AffineCoordinates,
        scalar::IsHigh,
        sec1::{FromEncodedPoint, ToEncodedPoint},
    },
    AffinePoint, EncodedPoint, ProjectivePoint, Secp256k1,
};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use zeroize::Zeroize;

/// A prime-order group suitable for threshold ECDSA.
pub trait Curve: Clone + Copy + Debug + Default + Eq + Send + Sync + 'static {
    /// Name mixed into every transcript
    const NAME: &'static str;

    /// Scalar field element
    type Scalar: PrimeField + Zeroize;

    /// Group element
    type Point: Group<Scalar = Self::Scalar>;

    /// Canonical (compressed) encoding of a point.
    fn point_to_bytes(point: &Self::Point) -> Vec<u8>;

    /// Decode a point, rejecting anything that is not a canonical encoding.
    fn point_from_bytes(bytes: &[u8]) -> Option<Self::Point>;

    /// Hash an arbitrary message to a scalar.
    fn hash_to_scalar(msg: &[u8]) -> Self::Scalar;

    /// Reduce a message digest to a scalar the way ECDSA does.
    fn prehash_to_scalar(prehash: &[u8]) -> Option<Self::Scalar>;

    /// x-coordinate of a point reduced into the scalar field.
    fn x_coordinate(point: &Self::Point) -> Self::Scalar;

    /// Whether `scalar` lies in the upper half of the field.
    fn is_high(scalar: &Self::Scalar) -> bool;

    fn scalar_to_bytes(scalar: &Self::Scalar) -> Vec<u8> {
        scalar.to_repr().as_ref().to_vec()
    }

    /// Decode a canonical scalar encoding.
    fn scalar_from_bytes(bytes: &[u8]) -> Option<Self::Scalar> {
        let mut repr = <Self::Scalar as PrimeField>::Repr::default();
        if repr.as_ref().len() != bytes.len() {
            return None;
        }
        repr.as_mut().copy_from_slice(bytes);
        Option::from(Self::Scalar::from_repr(repr))
    }
}

impl Curve for Secp256k1 {
    const NAME: &'static str = "secp256k1";

    type Scalar = k256::Scalar;
    type Point = ProjectivePoint;

    fn point_to_bytes(point: &Self::Point) -> Vec<u8> {
        point.to_affine().to_encoded_point(true).as_bytes().to_vec()
    }

    fn point_from_bytes(bytes: &[u8]) -> Option<Self::Point> {
        let encoded = EncodedPoint::from_bytes(bytes).ok()?;
        if encoded.is_compressed() || encoded.is_identity() {
            Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
                .map(ProjectivePoint::from)
        } else {
            None
        }
    }

    fn hash_to_scalar(msg: &[u8]) -> Self::Scalar {
        let digest = Sha256::digest(msg);
        <k256::Scalar as Reduce<U256>>::reduce_bytes(&digest)
    }

    fn prehash_to_scalar(prehash: &[u8]) -> Option<Self::Scalar> {
        let bytes: [u8; 32] = prehash.try_into().ok()?;
        Some(<k256::Scalar as Reduce<U256>>::reduce_bytes(&bytes.into()))
    }

    fn x_coordinate(point: &Self::Point) -> Self::Scalar {
        <k256::Scalar as Reduce<U256>>::reduce_bytes(&point.to_affine().x())
    }

    fn is_high(scalar: &Self::Scalar) -> bool {
        bool::from(scalar.is_high())
    }
}

/// Serializable wrapper around a group element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Point<C: Curve>(pub C::Point);

impl<C: Curve> Point<C> {
    pub fn generator() -> Self {
        Self(C::Point::generator())
    }

    pub fn identity() -> Self {
        Self(C::Point::identity())
    }

    pub fn is_identity(&self) -> bool {
        bool::from(self.0.is_identity())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        C::point_to_bytes(&self.0)
    }
}

impl<C: Curve> Serialize for Point<C> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&C::point_to_bytes(&self.0))
    }
}

impl<'de, C: Curve> Deserialize<'de> for Point<C> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        C::point_from_bytes(&bytes)
            .map(Point)
            .ok_or_else(|| D::Error::custom("Invalid point encoding"))
    }
}

/// Serializable wrapper around a scalar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scalar<C: Curve>(pub C::Scalar);

impl<C: Curve> Scalar<C> {
    pub fn to_bytes(&self) -> Vec<u8> {
        C::scalar_to_bytes(&self.0)
    }
}

impl<C: Curve> Zeroize for Scalar<C> {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl<C: Curve> Serialize for Scalar<C> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&C::scalar_to_bytes(&self.0))
    }
}

impl<'de, C: Curve> Deserialize<'de> for Scalar<C> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        C::scalar_from_bytes(&bytes)
            .map(Scalar)
            .ok_or_else(|| D::Error::custom("Invalid scalar encoding"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elliptic_curve::Field;
    use rand::rngs::OsRng;

    #[test]
    fn test_point_encoding() {
        let x = k256::Scalar::random(&mut OsRng);
        let point = ProjectivePoint::GENERATOR * x;
        let bytes = Secp256k1::point_to_bytes(&point);
        assert_eq!(bytes.len(), 33);
        assert_eq!(Secp256k1::point_from_bytes(&bytes), Some(point));

        let identity = Secp256k1::point_to_bytes(&ProjectivePoint::IDENTITY);
        assert_eq!(
            Secp256k1::point_from_bytes(&identity),
            Some(ProjectivePoint::IDENTITY)
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Secp256k1::point_from_bytes(&[0x02; 5]).is_none());
        assert!(Secp256k1::scalar_from_bytes(&[0xff; 32]).is_none());
        assert!(Secp256k1::scalar_from_bytes(&[1; 31]).is_none());
        assert!(Secp256k1::prehash_to_scalar(&[1; 31]).is_none());
    }

    #[test]
    fn test_wrapper_json() {
        let point = Point::<Secp256k1>::generator();
        let json = serde_json::to_string(&point).unwrap();
        let back: Point<Secp256k1> = serde_json::from_str(&json).unwrap();
        assert_eq!(point, back);
    }
}
