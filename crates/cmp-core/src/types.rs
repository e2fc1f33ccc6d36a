//! Core types shared by every protocol

use crate::curve::{Curve, Scalar};
use crate::{Error, Result};
use elliptic_curve::{ff::Field, group::Group};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a session
pub type SessionId = [u8; 32];

/// Round number within a protocol run; 0 is reserved for abort signals
pub type RoundNumber = u16;

/// 32-byte digest used for commitments and broadcast verification
pub type Hash = [u8; 32];

/// Identifier of a party in the MPC network.
///
/// The id doubles as the x-coordinate at which the party's Shamir share is
/// evaluated, so 0 is never a valid id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(u32);

impl PartyId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Field element this party's share is evaluated at
    pub fn scalar<C: Curve>(&self) -> C::Scalar {
        C::Scalar::from(u64::from(self.0))
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PartyId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u32>()
            .map(PartyId)
            .map_err(|e| Error::InvalidConfig(format!("Invalid party id {s:?}: {e}")))
    }
}

/// How strongly peers must agree on a broadcast's value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastKind {
    /// Disagreement would be unsafe (commitments to randomness)
    Reliable,
    /// Plain fan-out is sufficient
    Normal,
}

/// A message on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Session this message belongs to
    pub session_id: SessionId,
    /// Protocol identifier, e.g. `cmp/presign`
    pub protocol: String,
    /// Sender
    pub from: PartyId,
    /// Recipient, `None` for broadcasts
    pub to: Option<PartyId>,
    /// Round that consumes this message; 0 signals an abort
    pub round: RoundNumber,
    /// Encoded round content
    pub content: Vec<u8>,
    /// Whether the content must be identical for all recipients
    pub broadcast: bool,
    /// Hash of the previous round's broadcasts as seen by the sender
    pub broadcast_verification: Option<Hash>,
}

impl Message {
    /// Whether `id` should receive this message
    pub fn is_for(&self, id: &PartyId) -> bool {
        match &self.to {
            None => self.from != *id,
            Some(to) => to == id,
        }
    }

    /// Whether this is a round-0 abort signal
    pub fn is_abort(&self) -> bool {
        self.round == 0
    }

    /// Encode for the wire
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    /// Decode from untrusted bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }
}

/// Binary encoding used for message contents
pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(value, bincode::config::standard())?)
}

/// Decode untrusted bytes, rejecting trailing garbage
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    if read != bytes.len() {
        return Err(Error::Deserialization(format!(
            "{} trailing bytes",
            bytes.len() - read
        )));
    }
    Ok(value)
}

/// ECDSA signature (r, s) in low-s form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Signature<C: Curve> {
    /// x-coordinate of the nonce point
    pub r: Scalar<C>,
    /// Signature scalar
    pub s: Scalar<C>,
}

impl<C: Curve> Signature<C> {
    /// Build a signature, normalizing `s` to the lower half of the field
    pub fn new(r: C::Scalar, s: C::Scalar) -> Self {
        let s = if C::is_high(&s) { -s } else { s };
        Self {
            r: Scalar(r),
            s: Scalar(s),
        }
    }

    /// Verify against a public key and a reduced message digest
    pub fn verify(&self, public_key: &C::Point, message: &C::Scalar) -> bool {
        let (r, s) = (self.r.0, self.s.0);
        if bool::from(r.is_zero()) || bool::from(s.is_zero()) {
            return false;
        }
        let s_inv = match Option::<C::Scalar>::from(s.invert()) {
            Some(inv) => inv,
            None => return false,
        };
        let point = C::Point::generator() * (*message * s_inv) + *public_key * (r * s_inv);
        if bool::from(point.is_identity()) {
            return false;
        }
        C::x_coordinate(&point) == r
    }

    /// Convert to bytes (r || s)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.r.to_bytes();
        bytes.extend_from_slice(&self.s.to_bytes());
        bytes
    }
}

impl Signature<k256::Secp256k1> {
    /// Convert into the `k256` ECDSA signature type
    pub fn to_ecdsa(&self) -> Result<k256::ecdsa::Signature> {
        k256::ecdsa::Signature::from_scalars(self.r.0, self.s.0)
            .map_err(|e| Error::Crypto(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::Secp256k1;

    #[test]
    fn test_party_id_parse() {
        let id: PartyId = "7".parse().unwrap();
        assert_eq!(id, PartyId::new(7));
        assert!("x".parse::<PartyId>().is_err());
    }

    #[test]
    fn test_message_encoding() {
        let msg = Message {
            session_id: [7u8; 32],
            protocol: "cmp/keygen".into(),
            from: PartyId::new(1),
            to: Some(PartyId::new(2)),
            round: 3,
            content: vec![1, 2, 3],
            broadcast: false,
            broadcast_verification: Some([9u8; 32]),
        };

        let bytes = msg.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);

        assert!(Message::decode(&bytes[..bytes.len() - 1]).is_err());
        let mut extended = bytes.clone();
        extended.push(0);
        assert!(Message::decode(&extended).is_err());
    }

    #[test]
    fn test_message_routing() {
        let mut msg = Message {
            session_id: [0u8; 32],
            protocol: "cmp/sign".into(),
            from: PartyId::new(1),
            to: None,
            round: 2,
            content: Vec::new(),
            broadcast: true,
            broadcast_verification: None,
        };
        assert!(msg.is_for(&PartyId::new(2)));
        assert!(!msg.is_for(&PartyId::new(1)));

        msg.to = Some(PartyId::new(3));
        assert!(!msg.is_for(&PartyId::new(2)));
        assert!(msg.is_for(&PartyId::new(3)));
    }

    #[test]
    fn test_signature_low_s() {
        let r = k256::Scalar::from(5u64);
        let s = -k256::Scalar::from(7u64);
        let sig = Signature::<Secp256k1>::new(r, s);
        assert_eq!(sig.s.0, k256::Scalar::from(7u64));
    }
}
