//! Backend that re-checks every relation in the clear.
//!
//! Ciphertexts carry their plaintext and proofs carry whatever witness piece
//! the verifier needs to recompute the relation. There is no privacy at all;
//! it exists so the round chains, the driver and the blame logic can be
//! exercised end to end without a Paillier implementation. Proofs are still
//! bound to the transcript, so a proof replayed in another session or for
//! another prover is rejected.

use super::{
    AffGStatement, AffPStatement, AffWitness, Backend, DecStatement, EncElgStatement,
    EncElgWitness, LogStarStatement, LogStarWitness,
};
use crate::curve::{Curve, Scalar};
use crate::elgamal::ElGamalCiphertext;
use crate::{Error, Result};
use elliptic_curve::{ff::Field, group::Group};
use merlin::Transcript;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Transparent;

/// Public key: an opaque identifier ciphertexts are tagged with
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyId(pub [u8; 32]);

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey(KeyId);

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PedersenId(pub [u8; 32]);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Ciphertext<C: Curve> {
    pub key: KeyId,
    pub plaintext: Scalar<C>,
    pub nonce: Scalar<C>,
}

/// Transcript binding carried by every proof
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag([u8; 32]);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct EncElgProof<C: Curve> {
    elgamal_nonce: Scalar<C>,
    tag: Tag,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct AffGProof<C: Curve> {
    multiplier: Scalar<C>,
    tag: Tag,
}

fn tag(transcript: &mut Transcript, label: &'static [u8]) -> Tag {
    let mut bytes = [0u8; 32];
    transcript.challenge_bytes(label, &mut bytes);
    Tag(bytes)
}

fn same_key<C: Curve>(key: &KeyId, ciphertexts: &[&Ciphertext<C>]) -> bool {
    ciphertexts.iter().all(|ct| ct.key == *key)
}

/// `d = x·k − f` on plaintexts
fn affine_holds<C: Curve>(
    x: &C::Scalar,
    k: &Ciphertext<C>,
    d: &Ciphertext<C>,
    f: &Ciphertext<C>,
) -> bool {
    d.plaintext.0 == *x * k.plaintext.0 - f.plaintext.0
}

impl<C: Curve> Backend<C> for Transparent {
    type EncryptionKey = KeyId;
    type DecryptionKey = SecretKey;
    type PedersenParams = PedersenId;
    type Ciphertext = Ciphertext<C>;
    type Nonce = Scalar<C>;

    type ModProof = Tag;
    type PrmProof = Tag;
    type EncElgProof = EncElgProof<C>;
    type AffGProof = AffGProof<C>;
    type AffPProof = Tag;
    type LogStarProof = Tag;
    type DecProof = Tag;

    fn generate_key(&self, rng: &mut impl CryptoRngCore) -> Result<SecretKey> {
        let mut id = [0u8; 32];
        rng.fill_bytes(&mut id);
        Ok(SecretKey(KeyId(id)))
    }

    fn encryption_key(&self, key: &SecretKey) -> KeyId {
        key.0
    }

    fn pedersen(&self, key: &SecretKey) -> PedersenId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"pedersen");
        hasher.update(&key.0 .0);
        PedersenId(*hasher.finalize().as_bytes())
    }

    fn validate_encryption_key(&self, key: &KeyId) -> Result<()> {
        if key.0 == [0u8; 32] {
            return Err(Error::VerificationFailed("Degenerate encryption key".into()));
        }
        Ok(())
    }

    fn validate_pedersen(&self, params: &PedersenId) -> Result<()> {
        if params.0 == [0u8; 32] {
            return Err(Error::VerificationFailed("Degenerate Pedersen parameters".into()));
        }
        Ok(())
    }

    fn validate_ciphertext(&self, key: &KeyId, ciphertext: &Ciphertext<C>) -> Result<()> {
        if ciphertext.key != *key {
            return Err(Error::VerificationFailed(
                "Ciphertext is not under the expected key".into(),
            ));
        }
        Ok(())
    }

    fn encrypt(
        &self,
        key: &KeyId,
        plaintext: &C::Scalar,
        rng: &mut impl CryptoRngCore,
    ) -> (Ciphertext<C>, Scalar<C>) {
        let nonce = Scalar(C::Scalar::random(&mut *rng));
        (<Self as Backend<C>>::encrypt_with_nonce(self, key, plaintext, &nonce), nonce)
    }

    fn encrypt_with_nonce(
        &self,
        key: &KeyId,
        plaintext: &C::Scalar,
        nonce: &Scalar<C>,
    ) -> Ciphertext<C> {
        Ciphertext {
            key: *key,
            plaintext: Scalar(*plaintext),
            nonce: *nonce,
        }
    }

    fn decrypt(&self, key: &SecretKey, ciphertext: &Ciphertext<C>) -> Result<C::Scalar> {
        if ciphertext.key != key.0 {
            return Err(Error::Crypto("Ciphertext is under a different key".into()));
        }
        Ok(ciphertext.plaintext.0)
    }

    fn affine(
        &self,
        key: &KeyId,
        ciphertext: &Ciphertext<C>,
        multiplier: &C::Scalar,
        addend: &Ciphertext<C>,
    ) -> Result<Ciphertext<C>> {
        if !same_key(key, &[ciphertext, addend]) {
            return Err(Error::Crypto("Mixed keys in homomorphic operation".into()));
        }
        Ok(Ciphertext {
            key: *key,
            plaintext: Scalar(*multiplier * ciphertext.plaintext.0 + addend.plaintext.0),
            nonce: Scalar(*multiplier * ciphertext.nonce.0 + addend.nonce.0),
        })
    }

    fn prove_mod(
        &self,
        _key: &SecretKey,
        transcript: &mut Transcript,
        _rng: &mut impl CryptoRngCore,
    ) -> Tag {
        tag(transcript, b"mod")
    }

    fn verify_mod(&self, key: &KeyId, proof: &Tag, transcript: &mut Transcript) -> bool {
        <Self as Backend<C>>::validate_encryption_key(self, key).is_ok()
            && tag(transcript, b"mod") == *proof
    }

    fn prove_prm(
        &self,
        _key: &SecretKey,
        transcript: &mut Transcript,
        _rng: &mut impl CryptoRngCore,
    ) -> Tag {
        tag(transcript, b"prm")
    }

    fn verify_prm(&self, params: &PedersenId, proof: &Tag, transcript: &mut Transcript) -> bool {
        <Self as Backend<C>>::validate_pedersen(self, params).is_ok()
            && tag(transcript, b"prm") == *proof
    }

    fn prove_enc_elg(
        &self,
        _statement: &EncElgStatement<'_, C, Self>,
        witness: &EncElgWitness<'_, C, Self>,
        transcript: &mut Transcript,
        _rng: &mut impl CryptoRngCore,
    ) -> EncElgProof<C> {
        EncElgProof {
            elgamal_nonce: Scalar(*witness.elgamal_nonce),
            tag: tag(transcript, b"enc-elg"),
        }
    }

    fn verify_enc_elg(
        &self,
        statement: &EncElgStatement<'_, C, Self>,
        proof: &EncElgProof<C>,
        transcript: &mut Transcript,
    ) -> bool {
        let expected = ElGamalCiphertext::<C>::encrypt_with_nonce(
            statement.elgamal_key,
            &statement.ciphertext.plaintext.0,
            &proof.elgamal_nonce.0,
        );
        statement.ciphertext.key == *statement.prover
            && statement.elgamal.is_valid()
            && *statement.elgamal == expected
            && tag(transcript, b"enc-elg") == proof.tag
    }

    fn prove_aff_g(
        &self,
        _statement: &AffGStatement<'_, C, Self>,
        witness: &AffWitness<'_, C, Self>,
        transcript: &mut Transcript,
        _rng: &mut impl CryptoRngCore,
    ) -> AffGProof<C> {
        AffGProof {
            multiplier: Scalar(*witness.multiplier),
            tag: tag(transcript, b"aff-g"),
        }
    }

    fn verify_aff_g(
        &self,
        statement: &AffGStatement<'_, C, Self>,
        proof: &AffGProof<C>,
        transcript: &mut Transcript,
    ) -> bool {
        let x = proof.multiplier.0;
        same_key(statement.receiver, &[statement.ciphertext, statement.d])
            && statement.f.key == *statement.prover
            && C::Point::generator() * x == *statement.multiplier
            && affine_holds(&x, statement.ciphertext, statement.d, statement.f)
            && tag(transcript, b"aff-g") == proof.tag
    }

    fn prove_aff_p(
        &self,
        _statement: &AffPStatement<'_, C, Self>,
        _witness: &AffWitness<'_, C, Self>,
        transcript: &mut Transcript,
        _rng: &mut impl CryptoRngCore,
    ) -> Tag {
        tag(transcript, b"aff-p")
    }

    fn verify_aff_p(
        &self,
        statement: &AffPStatement<'_, C, Self>,
        proof: &Tag,
        transcript: &mut Transcript,
    ) -> bool {
        let x = statement.multiplier.plaintext.0;
        same_key(statement.receiver, &[statement.ciphertext, statement.d])
            && same_key(statement.prover, &[statement.f, statement.multiplier])
            && affine_holds(&x, statement.ciphertext, statement.d, statement.f)
            && tag(transcript, b"aff-p") == *proof
    }

    fn prove_log_star(
        &self,
        _statement: &LogStarStatement<'_, C, Self>,
        _witness: &LogStarWitness<'_, C, Self>,
        transcript: &mut Transcript,
        _rng: &mut impl CryptoRngCore,
    ) -> Tag {
        tag(transcript, b"log*")
    }

    fn verify_log_star(
        &self,
        statement: &LogStarStatement<'_, C, Self>,
        proof: &Tag,
        transcript: &mut Transcript,
    ) -> bool {
        statement.ciphertext.key == *statement.prover
            && *statement.base * statement.ciphertext.plaintext.0 == *statement.point
            && tag(transcript, b"log*") == *proof
    }

    fn prove_dec(
        &self,
        _statement: &DecStatement<'_, C, Self>,
        _key: &SecretKey,
        transcript: &mut Transcript,
        _rng: &mut impl CryptoRngCore,
    ) -> Tag {
        tag(transcript, b"dec")
    }

    fn verify_dec(
        &self,
        statement: &DecStatement<'_, C, Self>,
        proof: &Tag,
        transcript: &mut Transcript,
    ) -> bool {
        statement.ciphertext.key == *statement.key
            && statement.ciphertext.plaintext.0 == *statement.plaintext
            && tag(transcript, b"dec") == *proof
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::Secp256k1;
    use rand::rngs::OsRng;

    type Ct = Ciphertext<Secp256k1>;

    fn key_pair() -> (SecretKey, KeyId) {
        let sk = <Transparent as Backend<Secp256k1>>::generate_key(&Transparent, &mut OsRng)
            .unwrap();
        let pk = <Transparent as Backend<Secp256k1>>::encryption_key(&Transparent, &sk);
        (sk, pk)
    }

    fn encrypt(pk: &KeyId, m: &k256::Scalar) -> Ct {
        <Transparent as Backend<Secp256k1>>::encrypt(&Transparent, pk, m, &mut OsRng).0
    }

    fn decrypt(sk: &SecretKey, ct: &Ct) -> Result<k256::Scalar> {
        <Transparent as Backend<Secp256k1>>::decrypt(&Transparent, sk, ct)
    }

    #[test]
    fn test_affine_and_decrypt() {
        let (sk, pk) = key_pair();

        let ct = encrypt(&pk, &k256::Scalar::from(6u64));
        let neg_beta = encrypt(&pk, &-k256::Scalar::from(4u64));
        let d = <Transparent as Backend<Secp256k1>>::affine(
            &Transparent,
            &pk,
            &ct,
            &k256::Scalar::from(7u64),
            &neg_beta,
        )
        .unwrap();
        assert_eq!(decrypt(&sk, &d).unwrap(), k256::Scalar::from(38u64));

        let (other, _) = key_pair();
        assert!(decrypt(&other, &d).is_err());
    }

    #[test]
    fn test_proofs_bound_to_transcript() {
        let (sk, pk) = key_pair();

        let proof = <Transparent as Backend<Secp256k1>>::prove_mod(
            &Transparent,
            &sk,
            &mut Transcript::new(b"a"),
            &mut OsRng,
        );
        let verify = |label: &'static [u8]| {
            <Transparent as Backend<Secp256k1>>::verify_mod(
                &Transparent,
                &pk,
                &proof,
                &mut Transcript::new(label),
            )
        };
        assert!(verify(b"a"));
        assert!(!verify(b"b"));
    }

    #[test]
    fn test_dec_proof_checks_plaintext() {
        let (sk, pk) = key_pair();
        let m = k256::Scalar::from(11u64);
        let ct = encrypt(&pk, &m);

        let statement = DecStatement::<Secp256k1, Transparent> {
            key: &pk,
            ciphertext: &ct,
            plaintext: &m,
        };
        let proof = <Transparent as Backend<Secp256k1>>::prove_dec(
            &Transparent,
            &statement,
            &sk,
            &mut Transcript::new(b"t"),
            &mut OsRng,
        );
        let verify = |statement: &DecStatement<'_, Secp256k1, Transparent>| {
            <Transparent as Backend<Secp256k1>>::verify_dec(
                &Transparent,
                statement,
                &proof,
                &mut Transcript::new(b"t"),
            )
        };
        assert!(verify(&statement));

        let wrong = m + k256::Scalar::ONE;
        let statement = DecStatement::<Secp256k1, Transparent> {
            key: &pk,
            ciphertext: &ct,
            plaintext: &wrong,
        };
        assert!(!verify(&statement));
    }
}
