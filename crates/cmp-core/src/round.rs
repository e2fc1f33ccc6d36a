//! Contract between the session driver and a protocol's round chain
//!
//! A protocol is one accumulator value that moves through numbered rounds.
//! The driver feeds it verified messages for the current round and, once the
//! round is complete, hands it to [`Round::finalize`], which writes outbound
//! messages and returns the same protocol in its next round or the output.

use crate::helper::Helper;
use crate::types::{BroadcastKind, PartyId, RoundNumber};
use crate::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// Typed message content of one protocol, one variant per round and kind.
pub trait Content: Serialize + DeserializeOwned + Debug + Send + 'static {
    /// Round that consumes this content
    fn round(&self) -> RoundNumber;

    /// Whether this content is sent as a broadcast
    fn is_broadcast(&self) -> bool;
}

/// One outbound message produced by a finalize step
#[derive(Debug)]
pub struct Outgoing<M> {
    /// `None` for a broadcast
    pub to: Option<PartyId>,
    pub content: M,
}

/// Collects the messages a finalize step emits.
#[derive(Debug)]
pub struct Outbox<M> {
    messages: Vec<Outgoing<M>>,
}

impl<M> Outbox<M> {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    pub fn broadcast(&mut self, content: M) {
        self.messages.push(Outgoing { to: None, content });
    }

    pub fn send(&mut self, to: PartyId, content: M) {
        self.messages.push(Outgoing {
            to: Some(to),
            content,
        });
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Outgoing<M>> {
        self.messages
    }
}

impl<M> Default for Outbox<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a finalize step
pub enum Transition<R: Round> {
    Next(R),
    Output(R::Output),
}

impl<R: Round> Debug for Transition<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transition::Next(round) => write!(f, "Next({})", round.number()),
            Transition::Output(_) => f.write_str("Output"),
        }
    }
}

/// A protocol positioned at one of its rounds.
pub trait Round: Send + Sized + 'static {
    type Content: Content;
    type Output: Send + 'static;

    /// Round currently waiting for messages
    fn number(&self) -> RoundNumber;

    fn helper(&self) -> &Helper;

    /// Kind of broadcast expected from every broadcast sender, `None` when the
    /// round expects no broadcast.
    fn broadcast_kind(&self) -> Option<BroadcastKind>;

    /// Whether a point-to-point message is expected from every p2p sender.
    fn expects_p2p(&self) -> bool;

    /// Peers whose broadcast this round waits for.
    fn broadcast_senders(&self) -> Vec<PartyId> {
        self.helper().other_party_ids()
    }

    /// Peers whose point-to-point message this round waits for.
    fn p2p_senders(&self) -> Vec<PartyId> {
        self.helper().other_party_ids()
    }

    /// Validate a point-to-point message against already stored state.
    fn verify_message(&self, from: &PartyId, content: &Self::Content) -> Result<()>;

    /// Absorb a verified point-to-point message.
    fn store_message(&mut self, from: PartyId, content: Self::Content) -> Result<()>;

    /// Validate and absorb a broadcast message.
    fn store_broadcast_message(&mut self, from: PartyId, content: Self::Content) -> Result<()>;

    /// Run this round's computation once every expected message is stored.
    fn finalize(self, outbox: &mut Outbox<Self::Content>) -> Result<Transition<Self>>;
}
