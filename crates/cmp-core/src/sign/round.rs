use super::messages::SignContent;
use super::{combine, SIGN};
use crate::backend::Backend;
use crate::config::Config;
use crate::curve::{Curve, Scalar};
use crate::helper::{Helper, SessionParams};
use crate::pool::Pool;
use crate::presign::PreSignature;
use crate::round::{Outbox, Round, Transition};
use crate::types::{BroadcastKind, PartyId, RoundNumber, SessionId, Signature};
use crate::{Error, Result};
use elliptic_curve::group::Group;
use std::collections::BTreeMap;

const FINAL_ROUND: RoundNumber = 2;

/// Online signing with a presignature: one broadcast of `σᵢ`, then combine.
pub struct Sign<C: Curve> {
    helper: Helper,
    round: RoundNumber,
    public_key: C::Point,
    presignature: PreSignature<C>,
    message: C::Scalar,
    sigmas: BTreeMap<PartyId, C::Scalar>,
}

impl<C: Curve> Sign<C> {
    /// Sign the 32-byte digest `prehash`, consuming `presignature`.
    pub fn new<B: Backend<C>>(
        config: &Config<C, B>,
        presignature: PreSignature<C>,
        prehash: &[u8],
        session_id: SessionId,
        pool: Pool,
    ) -> Result<Self> {
        presignature.validate()?;
        if presignature.owner() != config.id {
            return Err(Error::InvalidConfig(format!(
                "Presignature belongs to party {}",
                presignature.owner()
            )));
        }
        let signers = presignature.signers();
        if !config.can_sign(&signers) {
            return Err(Error::ThresholdNotMet {
                required: config.threshold + 1,
                actual: signers.len(),
            });
        }
        let public_key = presignature
            .s_shares
            .values()
            .fold(C::Point::identity(), |acc, s| acc + s.0);
        if public_key != config.public_key() {
            return Err(Error::InvalidConfig(
                "Presignature was made for a different key".into(),
            ));
        }
        let message = C::prehash_to_scalar(prehash)
            .ok_or_else(|| Error::InvalidConfig("Message digest has the wrong length".into()))?;

        let params = SessionParams {
            session_id,
            self_id: config.id,
            party_ids: signers,
            threshold: config.threshold,
        };
        let mut helper = Helper::new(SIGN, C::NAME, FINAL_ROUND, &params, pool)?;
        helper.update_hash("presignature", presignature.id());

        Ok(Self {
            helper,
            round: 1,
            public_key,
            presignature,
            message,
            sigmas: BTreeMap::new(),
        })
    }

    fn output(&self) -> Result<Signature<C>> {
        combine(
            &self.public_key,
            &self.presignature.big_r(),
            &self.presignature.r_shares,
            &self.presignature.s_shares,
            &self.message,
            &self.sigmas,
        )
    }
}

impl<C: Curve> Round for Sign<C> {
    type Content = SignContent<C>;
    type Output = Signature<C>;

    fn number(&self) -> RoundNumber {
        self.round
    }

    fn helper(&self) -> &Helper {
        &self.helper
    }

    fn broadcast_kind(&self) -> Option<BroadcastKind> {
        (self.round == 2).then_some(BroadcastKind::Normal)
    }

    fn expects_p2p(&self) -> bool {
        false
    }

    fn verify_message(&self, _from: &PartyId, _content: &Self::Content) -> Result<()> {
        Err(Error::UnexpectedContent { round: self.round })
    }

    fn store_message(&mut self, _from: PartyId, _content: Self::Content) -> Result<()> {
        Err(Error::UnexpectedContent { round: self.round })
    }

    fn store_broadcast_message(&mut self, from: PartyId, content: Self::Content) -> Result<()> {
        let SignContent::Sigma { sigma } = content;
        self.sigmas.insert(from, sigma.0);
        Ok(())
    }

    fn finalize(mut self, outbox: &mut Outbox<Self::Content>) -> Result<Transition<Self>> {
        match self.round {
            1 => {
                let sigma = self.presignature.sigma(&self.message);
                self.sigmas.insert(self.helper.self_id(), sigma);
                outbox.broadcast(SignContent::Sigma {
                    sigma: Scalar(sigma),
                });
                self.round = 2;
                Ok(Transition::Next(self))
            }
            FINAL_ROUND => Ok(Transition::Output(self.output()?)),
            round => Err(Error::Internal(format!("No signing round {round}"))),
        }
    }
}
