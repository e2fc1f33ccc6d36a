//! Sigma protocols over the signing curve, made non-interactive with merlin
//!
//! Each proof module exposes a borrowed `Statement`, a `Witness`, a `Proof`
//! and free `prove`/`verify` functions. The transcript passed in must already
//! be bound to the session (see [`crate::helper::Helper::transcript`]).

pub mod elog;
pub mod schnorr;

use crate::curve::Curve;
use merlin::Transcript;

pub(crate) fn append_point<C: Curve>(
    transcript: &mut Transcript,
    label: &'static [u8],
    point: &C::Point,
) {
    transcript.append_message(label, &C::point_to_bytes(point));
}

pub(crate) fn challenge<C: Curve>(transcript: &mut Transcript, label: &'static [u8]) -> C::Scalar {
    let mut bytes = [0u8; 64];
    transcript.challenge_bytes(label, &mut bytes);
    C::hash_to_scalar(&bytes)
}
