//! Signing message types

use crate::curve::{Curve, Scalar};
use crate::round::Content;
use crate::types::RoundNumber;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum SignContent<C: Curve> {
    /// Round 2 broadcast: `σᵢ = kᵢ·m + r·χᵢ`
    Sigma { sigma: Scalar<C> },
}

impl<C: Curve> Content for SignContent<C> {
    fn round(&self) -> RoundNumber {
        2
    }

    fn is_broadcast(&self) -> bool {
        true
    }
}
