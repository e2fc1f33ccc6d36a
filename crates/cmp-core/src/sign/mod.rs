//! Online signing
//!
//! Every signer broadcasts `σᵢ = kᵢ·m + r·χᵢ`; the sum is an ECDSA signature
//! under the group key. A sum that does not verify is traced back to the
//! signers whose share breaks `σⱼ·R = m·R̄ⱼ + r·Sⱼ`.

mod messages;
mod round;

pub use messages::SignContent;
pub use round::Sign;

use crate::backend::Backend;
use crate::config::Config;
use crate::curve::{Curve, Point};
use crate::mpc::{execute, Relay};
use crate::pool::Pool;
use crate::presign::PreSignature;
use crate::types::{PartyId, Signature};
use crate::{Error, Result, SessionId};
use elliptic_curve::ff::Field;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Protocol name of online signing
pub const SIGN: &str = "cmp/sign";

/// Sum signature shares and check the result, naming the signers whose
/// share is inconsistent with their presignature pieces on failure.
pub(crate) fn combine<C: Curve>(
    public_key: &C::Point,
    big_r: &C::Point,
    r_shares: &BTreeMap<PartyId, Point<C>>,
    s_shares: &BTreeMap<PartyId, Point<C>>,
    message: &C::Scalar,
    sigmas: &BTreeMap<PartyId, C::Scalar>,
) -> Result<Signature<C>> {
    let r = C::x_coordinate(big_r);
    let s = sigmas.values().fold(C::Scalar::ZERO, |acc, sigma| acc + sigma);
    let signature = Signature::new(r, s);
    if signature.verify(public_key, message) {
        return Ok(signature);
    }

    let culprits: Vec<PartyId> = sigmas
        .iter()
        .filter(|(id, sigma)| match (r_shares.get(*id), s_shares.get(*id)) {
            (Some(r_share), Some(s_share)) => {
                *big_r * **sigma != r_share.0 * message + s_share.0 * r
            }
            _ => true,
        })
        .map(|(id, _)| *id)
        .collect();

    if culprits.is_empty() {
        return Err(Error::VerificationFailed(
            "Combined signature does not verify".into(),
        ));
    }
    warn!(culprits = ?culprits, "Inconsistent signature shares");
    Err(Error::Aborted {
        culprits,
        reason: "Signature share inconsistent with presignature".into(),
    })
}

/// Sign `prehash` over `relay` with a presignature, consuming it.
#[instrument(skip_all, fields(party = %config.id))]
pub async fn run_sign<C, B, T>(
    config: &Config<C, B>,
    presignature: PreSignature<C>,
    prehash: &[u8],
    session_id: SessionId,
    relay: Arc<T>,
    pool: Pool,
) -> Result<Signature<C>>
where
    C: Curve,
    B: Backend<C>,
    T: Relay + ?Sized + 'static,
{
    info!(presignature = %hex::encode(presignature.id()), "Starting signing");
    let round = Sign::new(config, presignature, prehash, session_id, pool)?;
    let signature = execute(round, relay).await?;
    info!("Signing complete");
    Ok(signature)
}
