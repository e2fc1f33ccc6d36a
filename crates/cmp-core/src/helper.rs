//! Per-party session context shared by every round of one protocol run

use crate::pool::Pool;
use crate::types::{Hash, PartyId, RoundNumber, SessionId};
use crate::{Error, Result};
use merlin::Transcript;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Randomness opening a hash commitment
pub type Decommitment = [u8; 32];

/// Immutable description of a protocol run, plus the running transcript hash.
///
/// The hash only ever moves forward: [`Helper::update_hash`] absorbs new data
/// and every proof produced afterwards is bound to the new value.
#[derive(Clone, Debug)]
pub struct Helper {
    protocol: &'static str,
    session_id: SessionId,
    self_id: PartyId,
    party_ids: Vec<PartyId>,
    threshold: usize,
    final_round: RoundNumber,
    curve: &'static str,
    hash: Hash,
    pool: Pool,
}

/// Construction parameters for a [`Helper`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionParams {
    pub session_id: SessionId,
    pub self_id: PartyId,
    pub party_ids: Vec<PartyId>,
    pub threshold: usize,
}

impl Helper {
    /// Validate the party set and build the initial transcript hash.
    pub fn new(
        protocol: &'static str,
        curve: &'static str,
        final_round: RoundNumber,
        params: &SessionParams,
        pool: Pool,
    ) -> Result<Self> {
        let mut party_ids = params.party_ids.clone();
        party_ids.sort();
        party_ids.dedup();

        if party_ids.is_empty() {
            return Err(Error::InvalidConfig("Party set is empty".into()));
        }
        if party_ids.len() != params.party_ids.len() {
            return Err(Error::InvalidConfig("Party set contains duplicates".into()));
        }
        if party_ids[0].as_u32() == 0 {
            return Err(Error::InvalidPartyId(party_ids[0]));
        }
        if !party_ids.contains(&params.self_id) {
            return Err(Error::InvalidPartyId(params.self_id));
        }
        if params.threshold >= party_ids.len() {
            return Err(Error::InvalidConfig(format!(
                "Threshold {} must be below the number of parties {}",
                params.threshold,
                party_ids.len()
            )));
        }

        let mut hasher = blake3::Hasher::new();
        hasher.update(protocol.as_bytes());
        hasher.update(curve.as_bytes());
        hasher.update(&params.session_id);
        hasher.update(&(params.threshold as u64).to_be_bytes());
        for id in &party_ids {
            hasher.update(&id.to_bytes());
        }

        Ok(Self {
            protocol,
            session_id: params.session_id,
            self_id: params.self_id,
            party_ids,
            threshold: params.threshold,
            final_round,
            curve,
            hash: *hasher.finalize().as_bytes(),
            pool,
        })
    }

    pub fn protocol(&self) -> &'static str {
        self.protocol
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn self_id(&self) -> PartyId {
        self.self_id
    }

    /// All parties, sorted
    pub fn party_ids(&self) -> &[PartyId] {
        &self.party_ids
    }

    /// All parties except this one
    pub fn other_party_ids(&self) -> Vec<PartyId> {
        self.party_ids
            .iter()
            .copied()
            .filter(|id| *id != self.self_id)
            .collect()
    }

    pub fn n(&self) -> usize {
        self.party_ids.len()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn final_round(&self) -> RoundNumber {
        self.final_round
    }

    pub fn contains(&self, id: &PartyId) -> bool {
        self.party_ids.binary_search(id).is_ok()
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    /// Absorb `data` into the running transcript hash.
    pub fn update_hash(&mut self, label: &str, data: &[u8]) {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.hash);
        hasher.update(label.as_bytes());
        hasher.update(&(data.len() as u64).to_be_bytes());
        hasher.update(data);
        self.hash = *hasher.finalize().as_bytes();
    }

    /// Fiat-Shamir transcript bound to this session, its current hash and the prover.
    pub fn transcript(&self, label: &'static [u8], prover: &PartyId) -> Transcript {
        let mut transcript = Transcript::new(label);
        transcript.append_message(b"protocol", self.protocol.as_bytes());
        transcript.append_message(b"curve", self.curve.as_bytes());
        transcript.append_message(b"session", &self.session_id);
        transcript.append_message(b"hash", &self.hash);
        transcript.append_message(b"prover", &prover.to_bytes());
        transcript
    }

    /// Hash commitment to `data` on behalf of `party`.
    pub fn commit(&self, rng: &mut impl CryptoRngCore, data: &[u8]) -> (Hash, Decommitment) {
        let mut decommitment = [0u8; 32];
        rng.fill_bytes(&mut decommitment);
        let commitment = self.commitment_hash(&self.self_id, data, &decommitment);
        (commitment, decommitment)
    }

    /// Check that `party` committed to `data` with `commitment`.
    pub fn verify_commitment(
        &self,
        party: &PartyId,
        data: &[u8],
        commitment: &Hash,
        decommitment: &Decommitment,
    ) -> bool {
        let expected = self.commitment_hash(party, data, decommitment);
        bool::from(expected.ct_eq(commitment))
    }

    fn commitment_hash(&self, party: &PartyId, data: &[u8], decommitment: &Decommitment) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"commitment");
        hasher.update(&self.hash);
        hasher.update(&party.to_bytes());
        hasher.update(decommitment);
        hasher.update(data);
        *hasher.finalize().as_bytes()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::rngs::OsRng;

    pub(crate) fn params(self_id: u32, ids: &[u32], threshold: usize) -> SessionParams {
        SessionParams {
            session_id: [1u8; 32],
            self_id: PartyId::new(self_id),
            party_ids: ids.iter().copied().map(PartyId::new).collect(),
            threshold,
        }
    }

    #[test]
    fn test_validation() {
        let pool = Pool::inline();
        assert!(Helper::new("test", "c", 3, &params(1, &[1, 2, 3], 1), pool.clone()).is_ok());
        assert!(Helper::new("test", "c", 3, &params(1, &[], 0), pool.clone()).is_err());
        assert!(Helper::new("test", "c", 3, &params(1, &[1, 2, 2], 1), pool.clone()).is_err());
        assert!(Helper::new("test", "c", 3, &params(4, &[1, 2, 3], 1), pool.clone()).is_err());
        assert!(Helper::new("test", "c", 3, &params(1, &[1, 2, 3], 3), pool.clone()).is_err());
        assert!(Helper::new("test", "c", 3, &params(0, &[0, 1], 1), pool).is_err());
    }

    #[test]
    fn test_same_view_same_hash() {
        let pool = Pool::inline();
        let a = Helper::new("test", "c", 3, &params(1, &[3, 1, 2], 1), pool.clone()).unwrap();
        let b = Helper::new("test", "c", 3, &params(2, &[1, 2, 3], 1), pool).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.other_party_ids(), vec![PartyId::new(2), PartyId::new(3)]);

        let mut a2 = a.clone();
        a2.update_hash("rid", b"abc");
        assert_ne!(a.hash(), a2.hash());
    }

    #[test]
    fn test_commitment() {
        let helper =
            Helper::new("test", "c", 3, &params(1, &[1, 2], 1), Pool::inline()).unwrap();
        let (commitment, decommitment) = helper.commit(&mut OsRng, b"data");
        assert!(helper.verify_commitment(&PartyId::new(1), b"data", &commitment, &decommitment));
        assert!(!helper.verify_commitment(&PartyId::new(2), b"data", &commitment, &decommitment));
        assert!(!helper.verify_commitment(&PartyId::new(1), b"date", &commitment, &decommitment));
    }
}
