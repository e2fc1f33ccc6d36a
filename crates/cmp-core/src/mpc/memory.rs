//! In-memory relay implementation for testing

use super::{async_trait, Relay};
use crate::{Message, PartyId, Result, SessionId};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;

/// In-memory message relay for local testing
pub struct MemoryRelay {
    /// Broadcast log per session
    broadcasts: Arc<DashMap<SessionId, Vec<Message>>>,
    /// Read position of every party in its session's broadcast log
    cursors: Arc<DashMap<(SessionId, PartyId), usize>>,
    /// Direct messages: (session_id, to) -> queue
    directs: Arc<DashMap<(SessionId, PartyId), VecDeque<Message>>>,
    /// Notification channel
    notify: broadcast::Sender<()>,
}

impl MemoryRelay {
    /// Create a new in-memory relay
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(100);
        Self {
            broadcasts: Arc::new(DashMap::new()),
            cursors: Arc::new(DashMap::new()),
            directs: Arc::new(DashMap::new()),
            notify,
        }
    }

    fn next_direct(&self, session_id: &SessionId, party: &PartyId) -> Option<Message> {
        self.directs
            .get_mut(&(*session_id, *party))
            .and_then(|mut queue| queue.pop_front())
    }

    fn next_broadcast(&self, session_id: &SessionId, party: &PartyId) -> Option<Message> {
        let key = (*session_id, *party);
        let cursor = self.cursors.get(&key).map(|c| *c).unwrap_or(0);

        let (position, msg) = {
            let log = self.broadcasts.get(session_id)?;
            let skipped = log
                .iter()
                .skip(cursor)
                .position(|msg| msg.from != *party);
            match skipped {
                Some(offset) => (cursor + offset + 1, Some(log[cursor + offset].clone())),
                None => (log.len(), None),
            }
        };

        self.cursors.insert(key, position);
        msg
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn broadcast(&self, message: &Message) -> Result<()> {
        self.broadcasts
            .entry(message.session_id)
            .or_default()
            .push(message.clone());

        let _ = self.notify.send(());
        Ok(())
    }

    async fn send_direct(&self, to: &PartyId, message: &Message) -> Result<()> {
        self.directs
            .entry((message.session_id, *to))
            .or_default()
            .push_back(message.clone());

        let _ = self.notify.send(());
        Ok(())
    }

    async fn receive(&self, session_id: &SessionId, party: &PartyId) -> Result<Message> {
        let mut rx = self.notify.subscribe();

        loop {
            if let Some(msg) = self.next_direct(session_id, party) {
                return Ok(msg);
            }
            if let Some(msg) = self.next_broadcast(session_id, party) {
                return Ok(msg);
            }

            // Wait for notification with timeout
            tokio::select! {
                _ = rx.recv() => continue,
                _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(from: u32, to: Option<u32>, round: u16) -> Message {
        Message {
            session_id: [0u8; 32],
            protocol: "test".into(),
            from: PartyId::new(from),
            to: to.map(PartyId::new),
            round,
            content: vec![round as u8],
            broadcast: to.is_none(),
            broadcast_verification: None,
        }
    }

    #[tokio::test]
    async fn test_broadcast() {
        let relay = MemoryRelay::new();
        let session_id = [0u8; 32];

        relay.broadcast(&message(1, None, 2)).await.unwrap();
        relay.broadcast(&message(2, None, 2)).await.unwrap();

        // Own broadcasts are skipped
        let first = relay.receive(&session_id, &PartyId::new(1)).await.unwrap();
        assert_eq!(first.from, PartyId::new(2));

        let second = relay.receive(&session_id, &PartyId::new(3)).await.unwrap();
        let third = relay.receive(&session_id, &PartyId::new(3)).await.unwrap();
        assert_eq!(second.from, PartyId::new(1));
        assert_eq!(third.from, PartyId::new(2));
    }

    #[tokio::test]
    async fn test_direct() {
        let relay = MemoryRelay::new();
        let session_id = [0u8; 32];

        relay
            .send_direct(&PartyId::new(2), &message(1, Some(2), 3))
            .await
            .unwrap();

        let msg = relay.receive(&session_id, &PartyId::new(2)).await.unwrap();
        assert_eq!(msg.to, Some(PartyId::new(2)));
        assert_eq!(msg.content, vec![3]);
    }

    #[tokio::test]
    async fn test_receive_waits_for_late_message() {
        let relay = Arc::new(MemoryRelay::new());
        let session_id = [7u8; 32];

        let waiting = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.receive(&session_id, &PartyId::new(2)).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut msg = message(1, None, 2);
        msg.session_id = session_id;
        relay.broadcast(&msg).await.unwrap();

        let received = waiting.await.unwrap().unwrap();
        assert_eq!(received.from, PartyId::new(1));
    }
}
