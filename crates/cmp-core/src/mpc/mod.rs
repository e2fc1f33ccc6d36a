//! Transport seam and the async session runner

use crate::handler::MultiHandler;
use crate::round::Round;
use crate::{Error, Message, PartyId, Result, SessionId};
use std::sync::Arc;
use tracing::{debug, warn};

pub use ::async_trait::async_trait;

/// Message relay trait for MPC communication
#[async_trait]
pub trait Relay: Send + Sync {
    /// Deliver a message to every other party of its session
    async fn broadcast(&self, message: &Message) -> Result<()>;

    /// Deliver a message to a single party
    async fn send_direct(&self, to: &PartyId, message: &Message) -> Result<()>;

    /// Wait for the next message addressed to `party` in `session_id`,
    /// broadcasts included.
    async fn receive(&self, session_id: &SessionId, party: &PartyId) -> Result<Message>;
}

/// In-memory relay for testing
pub mod memory;

pub use memory::MemoryRelay;

/// Run a protocol from `round` to its output over `relay`.
///
/// Outbound messages are forwarded by a background task while inbound ones
/// are fed to the session on the blocking pool, since finalizing a round
/// can be expensive. A relay failure stops the session and notifies peers.
pub async fn execute<R, T>(round: R, relay: Arc<T>) -> Result<R::Output>
where
    R: Round,
    T: Relay + ?Sized + 'static,
{
    let (handler, mut outbound) = MultiHandler::new(round)?;
    let handler = Arc::new(handler);
    let session_id = *handler.session_id();
    let self_id = handler.self_id();

    let mut sender = {
        let relay = relay.clone();
        tokio::spawn(async move {
            while let Some(msg) = outbound.recv().await {
                match msg.to {
                    Some(to) => relay.send_direct(&to, &msg).await?,
                    None => relay.broadcast(&msg).await?,
                }
            }
            Ok::<(), Error>(())
        })
    };

    let mut sent = None;
    let mut done = handler.subscribe();
    while !handler.is_done() {
        tokio::select! {
            _ = done.changed() => {}
            result = &mut sender, if sent.is_none() => {
                let result = result.map_err(|e| Error::Internal(e.to_string())).and_then(|r| r);
                if let Err(err) = &result {
                    warn!(party = %self_id, error = %err, "Relay failed to deliver, stopping session");
                    handler.stop();
                }
                sent = Some(result);
            }
            received = relay.receive(&session_id, &self_id) => {
                let msg = match received {
                    Ok(msg) => msg,
                    Err(err) => {
                        warn!(party = %self_id, error = %err, "Relay failed, stopping session");
                        handler.stop();
                        break;
                    }
                };
                debug!(party = %self_id, from = %msg.from, round = msg.round, "Received message");
                let handler = handler.clone();
                tokio::task::spawn_blocking(move || handler.accept(msg))
                    .await
                    .map_err(|e| Error::Internal(e.to_string()))?;
            }
        }
    }

    match sent {
        Some(result) => result?,
        None => sender.await.map_err(|e| Error::Internal(e.to_string()))??,
    }

    handler
        .take_result()
        .unwrap_or_else(|| Err(Error::Internal("Session ended without a result".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::transparent::Transparent;
    use crate::helper::tests::params;
    use crate::keygen::Keygen;
    use crate::pool::Pool;
    use std::time::Duration;

    /// Accepts nothing outbound and never delivers anything.
    struct DeadRelay;

    #[async_trait]
    impl Relay for DeadRelay {
        async fn broadcast(&self, _message: &Message) -> Result<()> {
            Err(Error::Relay("connection reset".into()))
        }

        async fn send_direct(&self, _to: &PartyId, _message: &Message) -> Result<()> {
            Err(Error::Relay("connection reset".into()))
        }

        async fn receive(&self, _session_id: &SessionId, _party: &PartyId) -> Result<Message> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_send_failure_ends_session() {
        let round = Keygen::<k256::Secp256k1, Transparent>::new(
            Transparent,
            &params(1, &[1, 2], 1),
            Pool::inline(),
        )
        .unwrap();

        let session = execute(round, Arc::new(DeadRelay));
        let result = tokio::time::timeout(Duration::from_secs(10), session)
            .await
            .expect("session hung after the relay failed");
        assert!(matches!(result, Err(Error::Relay(_))));
    }
}
