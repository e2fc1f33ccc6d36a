use crate::curve::{Curve, Point, Scalar};
use crate::types::{Hash, PartyId, Signature};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::Zeroize;

/// Message-independent part of one ECDSA signature.
///
/// Holds this party's shares of the nonce `k` and of `χ = k·x`. Signing two
/// messages with the same presignature leaks the key, so the type is not
/// `Clone` and signing consumes it.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct PreSignature<C: Curve> {
    pub(crate) id: Hash,
    pub(crate) owner: PartyId,
    /// `R = k⁻¹·G`
    pub(crate) big_r: Point<C>,
    /// `R̄ⱼ = kⱼ·R` for every signer
    pub(crate) r_shares: BTreeMap<PartyId, Point<C>>,
    /// `Sⱼ = χⱼ·R` for every signer
    pub(crate) s_shares: BTreeMap<PartyId, Point<C>>,
    pub(crate) k: Scalar<C>,
    pub(crate) chi: Scalar<C>,
}

impl<C: Curve> PreSignature<C> {
    /// Identifier shared by every signer's part of this presignature
    pub fn id(&self) -> &Hash {
        &self.id
    }

    pub fn owner(&self) -> PartyId {
        self.owner
    }

    /// The nonce point `R`
    pub fn big_r(&self) -> C::Point {
        self.big_r.0
    }

    /// `r`, the x-coordinate of `R`
    pub fn r(&self) -> C::Scalar {
        C::x_coordinate(&self.big_r.0)
    }

    /// Parties that must take part in signing
    pub fn signers(&self) -> Vec<PartyId> {
        self.r_shares.keys().copied().collect()
    }

    /// This party's share `σᵢ = kᵢ·m + r·χᵢ`
    pub(crate) fn sigma(&self, message: &C::Scalar) -> C::Scalar {
        self.k.0 * message + self.r() * self.chi.0
    }

    /// Structural checks: consistent signer sets, non-trivial `R` and
    /// matching own shares.
    pub fn validate(&self) -> Result<()> {
        if self.big_r.is_identity() {
            return Err(Error::VerificationFailed("Presignature nonce is the identity".into()));
        }
        if self.r_shares.len() != self.s_shares.len()
            || !self.r_shares.keys().eq(self.s_shares.keys())
        {
            return Err(Error::VerificationFailed("Presignature share sets differ".into()));
        }
        let own_r = self
            .r_shares
            .get(&self.owner)
            .ok_or(Error::InvalidPartyId(self.owner))?;
        let own_s = self
            .s_shares
            .get(&self.owner)
            .ok_or(Error::InvalidPartyId(self.owner))?;
        if self.big_r.0 * self.k.0 != own_r.0 || self.big_r.0 * self.chi.0 != own_s.0 {
            return Err(Error::VerificationFailed(
                "Presignature shares do not match the nonce".into(),
            ));
        }
        Ok(())
    }
}

impl<C: Curve> std::fmt::Debug for PreSignature<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreSignature")
            .field("id", &hex::encode(self.id))
            .field("owner", &self.owner)
            .field("big_r", &self.big_r)
            .field("signers", &self.signers())
            .finish_non_exhaustive()
    }
}

impl<C: Curve> Drop for PreSignature<C> {
    fn drop(&mut self) {
        self.k.0.zeroize();
        self.chi.0.zeroize();
    }
}

/// Terminal value of a presign session
#[derive(Debug)]
pub enum PresignOutput<C: Curve> {
    PreSignature(PreSignature<C>),
    /// Produced directly when a message was supplied up front
    Signature(Signature<C>),
}

impl<C: Curve> PresignOutput<C> {
    pub fn into_presignature(self) -> Result<PreSignature<C>> {
        match self {
            PresignOutput::PreSignature(presignature) => Ok(presignature),
            PresignOutput::Signature(_) => {
                Err(Error::Internal("Session produced a signature".into()))
            }
        }
    }

    pub fn into_signature(self) -> Result<Signature<C>> {
        match self {
            PresignOutput::Signature(signature) => Ok(signature),
            PresignOutput::PreSignature(_) => {
                Err(Error::Internal("Session produced a presignature".into()))
            }
        }
    }
}

