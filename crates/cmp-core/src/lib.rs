//! # CMP Core
//!
//! Round-based engine for threshold ECDSA in the style of Canetti, Gennaro,
//! Goldfeder, Makriyannis and Peled, with identifiable abort.
//!
//! This crate provides:
//! - Distributed key generation, key refresh and resharing
//! - Presigning, with an optional embedded message
//! - One-round online signing from a presignature
//! - A session driver ([`MultiHandler`]) that checks broadcast consistency
//!   and names misbehaving parties when a session aborts
//!
//! The crate is generic over the curve ([`curve::Curve`]) and over the
//! Paillier / zero-knowledge collaborator ([`backend::Backend`]).
//!
//! ## Example
//!
//! ```rust,ignore
//! use cmp_core::{keygen, presign, sign};
//!
//! let config = keygen::run_keygen(backend, &params, relay.clone(), pool.clone()).await?;
//! let presignature = presign::run_presign(backend, &config, &signers, None, sid, relay.clone(), pool.clone())
//!     .await?
//!     .into_presignature()?;
//! let signature = sign::run_sign(&config, presignature, &digest, sid2, relay, pool).await?;
//! ```

pub mod backend;
pub mod config;
pub mod curve;
pub mod elgamal;
pub mod error;
pub mod handler;
pub mod helper;
pub mod keygen;
pub mod math;
pub mod mpc;
pub mod pool;
pub mod presign;
pub mod reshare;
pub mod round;
pub mod sign;
pub mod types;
pub mod zk;

#[cfg(test)]
mod testing;

pub use config::{Config, Public, PublicConfig};
pub use error::{Error, Result};
pub use handler::MultiHandler;
pub use helper::{Helper, SessionParams};
pub use pool::Pool;
pub use presign::{PreSignature, PresignOutput};
pub use reshare::ReshareParams;
pub use types::{BroadcastKind, Message, PartyId, RoundNumber, SessionId, Signature};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
