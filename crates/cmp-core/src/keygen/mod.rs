//! Distributed key generation and key refresh
//!
//! Both run the same five rounds. Refresh re-shares zero: the group key, the
//! chain key and the party set stay the same while every secret share and
//! auxiliary key is replaced.

mod messages;
mod round;

pub use messages::{Committed, KeygenContent};
pub use round::Keygen;

use crate::backend::Backend;
use crate::config::Config;
use crate::curve::Curve;
use crate::helper::SessionParams;
use crate::mpc::{execute, Relay};
use crate::pool::Pool;
use crate::{Result, SessionId};
use std::sync::Arc;
use tracing::{info, instrument};

/// Protocol name of key generation
pub const KEYGEN: &str = "cmp/keygen";
/// Protocol name of key refresh
pub const REFRESH: &str = "cmp/refresh";

/// Run distributed key generation over `relay`.
#[instrument(skip(backend, relay, pool), fields(party = %params.self_id))]
pub async fn run_keygen<C, B, T>(
    backend: B,
    params: &SessionParams,
    relay: Arc<T>,
    pool: Pool,
) -> Result<Config<C, B>>
where
    C: Curve,
    B: Backend<C>,
    T: Relay + ?Sized + 'static,
{
    info!(
        parties = params.party_ids.len(),
        threshold = params.threshold,
        "Starting key generation"
    );
    let config = execute(Keygen::new(backend, params, pool)?, relay).await?;
    info!("Key generation complete");
    Ok(config)
}

/// Refresh `config` over `relay`.
#[instrument(skip_all, fields(party = %config.id))]
pub async fn run_refresh<C, B, T>(
    backend: B,
    config: &Config<C, B>,
    session_id: SessionId,
    relay: Arc<T>,
    pool: Pool,
) -> Result<Config<C, B>>
where
    C: Curve,
    B: Backend<C>,
    T: Relay + ?Sized + 'static,
{
    info!("Starting key refresh");
    let refreshed = execute(Keygen::refresh(backend, config, session_id, pool)?, relay).await?;
    info!("Key refresh complete");
    Ok(refreshed)
}
