//! Zero-knowledge / homomorphic-encryption collaborator
//!
//! The round chains never touch Paillier or Pedersen arithmetic directly.
//! They assemble public statements, hand them to a [`Backend`] together with
//! a transcript bound to the running session hash, and act on the boolean
//! verdict. Every proof system follows the same shape:
//!
//! - `prove_*(statement, witness, transcript, rng) -> proof`
//! - `verify_*(statement, proof, transcript) -> bool`
//!
//! Plaintexts are scalars of the signing curve: a backend working over a larger
//! ring reduces modulo the group order on decryption.

#[cfg(any(test, feature = "transparent"))]
pub mod transparent;

use crate::curve::Curve;
use crate::elgamal::ElGamalCiphertext;
use crate::Result;
use merlin::Transcript;
use rand_core::CryptoRngCore;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// Values that cross the wire or live in key material.
pub trait Encodable: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Encodable for T where
    T: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// `K = Enc(k; ρ)` and `Z = ElGamal_Y(k; a)` hide the same value.
pub struct EncElgStatement<'a, C: Curve, B: Backend<C>> {
    /// Key `K` is encrypted under (the prover's)
    pub prover: &'a B::EncryptionKey,
    /// Pedersen parameters of the verifier
    pub verifier: &'a B::PedersenParams,
    pub ciphertext: &'a B::Ciphertext,
    pub elgamal: &'a ElGamalCiphertext<C>,
    pub elgamal_key: &'a C::Point,
}

pub struct EncElgWitness<'a, C: Curve, B: Backend<C>> {
    pub plaintext: &'a C::Scalar,
    pub nonce: &'a B::Nonce,
    pub elgamal_nonce: &'a C::Scalar,
}

/// `D = x ⊙ K ⊕ Enc_receiver(−β)` and `F = Enc_prover(β)`, with `x`
/// committed as the point `X = x·G`.
pub struct AffGStatement<'a, C: Curve, B: Backend<C>> {
    pub verifier: &'a B::PedersenParams,
    /// Key of the party that owns `K` and decrypts `D`
    pub receiver: &'a B::EncryptionKey,
    /// Key of the prover, under which `F` is encrypted
    pub prover: &'a B::EncryptionKey,
    pub ciphertext: &'a B::Ciphertext,
    pub d: &'a B::Ciphertext,
    pub f: &'a B::Ciphertext,
    pub multiplier: &'a C::Point,
}

/// Same relation as [`AffGStatement`], with `x` committed as the
/// ciphertext `X = Enc_prover(x)`.
pub struct AffPStatement<'a, C: Curve, B: Backend<C>> {
    pub verifier: &'a B::PedersenParams,
    pub receiver: &'a B::EncryptionKey,
    pub prover: &'a B::EncryptionKey,
    pub ciphertext: &'a B::Ciphertext,
    pub d: &'a B::Ciphertext,
    pub f: &'a B::Ciphertext,
    pub multiplier: &'a B::Ciphertext,
}

pub struct AffWitness<'a, C: Curve, B: Backend<C>> {
    pub multiplier: &'a C::Scalar,
    /// Nonce of the multiplier's ciphertext (affine-p only)
    pub multiplier_nonce: Option<&'a B::Nonce>,
    pub beta: &'a C::Scalar,
    pub d_nonce: &'a B::Nonce,
    pub f_nonce: &'a B::Nonce,
}

/// `C = Enc(x; ρ)` and `X = x·B` for a public base `B`.
pub struct LogStarStatement<'a, C: Curve, B: Backend<C>> {
    pub prover: &'a B::EncryptionKey,
    pub verifier: &'a B::PedersenParams,
    pub ciphertext: &'a B::Ciphertext,
    pub point: &'a C::Point,
    pub base: &'a C::Point,
}

pub struct LogStarWitness<'a, C: Curve, B: Backend<C>> {
    pub plaintext: &'a C::Scalar,
    pub nonce: &'a B::Nonce,
}

/// `ciphertext` decrypts to `plaintext` under `key`.
pub struct DecStatement<'a, C: Curve, B: Backend<C>> {
    pub key: &'a B::EncryptionKey,
    pub ciphertext: &'a B::Ciphertext,
    pub plaintext: &'a C::Scalar,
}

/// Homomorphic encryption, auxiliary parameters and the proof systems the
/// round chains rely on.
pub trait Backend<C: Curve>: Clone + Debug + Send + Sync + 'static {
    /// Paillier-style public key
    type EncryptionKey: Encodable + PartialEq;
    /// Matching secret key; also the trapdoor of the Pedersen parameters
    type DecryptionKey: Encodable;
    /// Ring-Pedersen commitment parameters
    type PedersenParams: Encodable + PartialEq;
    type Ciphertext: Encodable + PartialEq;
    /// Encryption randomness; revealing it opens a ciphertext
    type Nonce: Encodable;

    type ModProof: Encodable;
    type PrmProof: Encodable;
    type EncElgProof: Encodable;
    type AffGProof: Encodable;
    type AffPProof: Encodable;
    type LogStarProof: Encodable;
    type DecProof: Encodable;

    /// Sample a fresh key pair (and Pedersen trapdoor)
    fn generate_key(&self, rng: &mut impl CryptoRngCore) -> Result<Self::DecryptionKey>;
    fn encryption_key(&self, key: &Self::DecryptionKey) -> Self::EncryptionKey;
    fn pedersen(&self, key: &Self::DecryptionKey) -> Self::PedersenParams;

    fn validate_encryption_key(&self, key: &Self::EncryptionKey) -> Result<()>;
    fn validate_pedersen(&self, params: &Self::PedersenParams) -> Result<()>;
    fn validate_ciphertext(&self, key: &Self::EncryptionKey, ciphertext: &Self::Ciphertext)
        -> Result<()>;

    fn encrypt(
        &self,
        key: &Self::EncryptionKey,
        plaintext: &C::Scalar,
        rng: &mut impl CryptoRngCore,
    ) -> (Self::Ciphertext, Self::Nonce);

    fn encrypt_with_nonce(
        &self,
        key: &Self::EncryptionKey,
        plaintext: &C::Scalar,
        nonce: &Self::Nonce,
    ) -> Self::Ciphertext;

    fn decrypt(&self, key: &Self::DecryptionKey, ciphertext: &Self::Ciphertext)
        -> Result<C::Scalar>;

    /// `multiplier ⊙ ciphertext ⊕ addend`
    fn affine(
        &self,
        key: &Self::EncryptionKey,
        ciphertext: &Self::Ciphertext,
        multiplier: &C::Scalar,
        addend: &Self::Ciphertext,
    ) -> Result<Self::Ciphertext>;

    fn prove_mod(
        &self,
        key: &Self::DecryptionKey,
        transcript: &mut Transcript,
        rng: &mut impl CryptoRngCore,
    ) -> Self::ModProof;
    fn verify_mod(
        &self,
        key: &Self::EncryptionKey,
        proof: &Self::ModProof,
        transcript: &mut Transcript,
    ) -> bool;

    fn prove_prm(
        &self,
        key: &Self::DecryptionKey,
        transcript: &mut Transcript,
        rng: &mut impl CryptoRngCore,
    ) -> Self::PrmProof;
    fn verify_prm(
        &self,
        params: &Self::PedersenParams,
        proof: &Self::PrmProof,
        transcript: &mut Transcript,
    ) -> bool;

    fn prove_enc_elg(
        &self,
        statement: &EncElgStatement<'_, C, Self>,
        witness: &EncElgWitness<'_, C, Self>,
        transcript: &mut Transcript,
        rng: &mut impl CryptoRngCore,
    ) -> Self::EncElgProof;
    fn verify_enc_elg(
        &self,
        statement: &EncElgStatement<'_, C, Self>,
        proof: &Self::EncElgProof,
        transcript: &mut Transcript,
    ) -> bool;

    fn prove_aff_g(
        &self,
        statement: &AffGStatement<'_, C, Self>,
        witness: &AffWitness<'_, C, Self>,
        transcript: &mut Transcript,
        rng: &mut impl CryptoRngCore,
    ) -> Self::AffGProof;
    fn verify_aff_g(
        &self,
        statement: &AffGStatement<'_, C, Self>,
        proof: &Self::AffGProof,
        transcript: &mut Transcript,
    ) -> bool;

    fn prove_aff_p(
        &self,
        statement: &AffPStatement<'_, C, Self>,
        witness: &AffWitness<'_, C, Self>,
        transcript: &mut Transcript,
        rng: &mut impl CryptoRngCore,
    ) -> Self::AffPProof;
    fn verify_aff_p(
        &self,
        statement: &AffPStatement<'_, C, Self>,
        proof: &Self::AffPProof,
        transcript: &mut Transcript,
    ) -> bool;

    fn prove_log_star(
        &self,
        statement: &LogStarStatement<'_, C, Self>,
        witness: &LogStarWitness<'_, C, Self>,
        transcript: &mut Transcript,
        rng: &mut impl CryptoRngCore,
    ) -> Self::LogStarProof;
    fn verify_log_star(
        &self,
        statement: &LogStarStatement<'_, C, Self>,
        proof: &Self::LogStarProof,
        transcript: &mut Transcript,
    ) -> bool;

    /// Proof of correct decryption (an n-th root for Paillier)
    fn prove_dec(
        &self,
        statement: &DecStatement<'_, C, Self>,
        key: &Self::DecryptionKey,
        transcript: &mut Transcript,
        rng: &mut impl CryptoRngCore,
    ) -> Self::DecProof;
    fn verify_dec(
        &self,
        statement: &DecStatement<'_, C, Self>,
        proof: &Self::DecProof,
        transcript: &mut Transcript,
    ) -> bool;
}
