//! Synchronous in-process network for protocol tests

use crate::backend::transparent::Transparent;
use crate::config::Config;
use crate::handler::MultiHandler;
use crate::helper::tests::params;
use crate::keygen::Keygen;
use crate::pool::Pool;
use crate::round::{Content, Round};
use crate::types::{self, Message, PartyId, RoundNumber};
use crate::{Error, Result};
use k256::Secp256k1;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

pub(crate) type TestConfig = Config<Secp256k1, Transparent>;

type Mutation<R> = (PartyId, RoundNumber, Box<dyn FnOnce(&mut R)>);
type Tamper = Box<dyn Fn(&Message, PartyId) -> Message>;

/// Runs every party's handler in one thread, delivering messages in waves:
/// everything sent so far is delivered before anything sent in reaction.
pub(crate) struct Network<R: Round> {
    handlers: Vec<MultiHandler<R>>,
    receivers: Vec<mpsc::UnboundedReceiver<Message>>,
    mutations: Vec<Mutation<R>>,
    tamper: Option<Tamper>,
}

impl<R: Round> Network<R> {
    pub(crate) fn new(rounds: Vec<R>) -> Self {
        let mut handlers = Vec::new();
        let mut receivers = Vec::new();
        for round in rounds {
            let (handler, rx) = MultiHandler::new(round).unwrap();
            handlers.push(handler);
            receivers.push(rx);
        }
        Self {
            handlers,
            receivers,
            mutations: Vec::new(),
            tamper: None,
        }
    }

    /// Edit `party`'s state once it waits in `round`, before that round is
    /// finalized.
    pub(crate) fn mutate(
        mut self,
        party: u32,
        round: RoundNumber,
        f: impl FnOnce(&mut R) + 'static,
    ) -> Self {
        self.mutations
            .push((PartyId::new(party), round, Box::new(f)));
        self
    }

    /// Rewrite messages in flight, per recipient.
    pub(crate) fn tamper(mut self, f: impl Fn(&Message, PartyId) -> Message + 'static) -> Self {
        self.tamper = Some(Box::new(f));
        self
    }

    fn apply_mutations(&mut self) {
        let mut pending = Vec::new();
        for (party, round, f) in self.mutations.drain(..) {
            let handler = self.handlers.iter().find(|h| h.self_id() == party);
            match handler {
                Some(handler) if handler.current_round() == Some(round) => handler.with_round(f),
                _ => pending.push((party, round, f)),
            }
        }
        self.mutations = pending;
    }

    fn drain(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        for rx in self.receivers.iter_mut() {
            while let Ok(msg) = rx.try_recv() {
                out.push(msg);
            }
        }
        out
    }

    /// Deliver until quiet and collect every party's result.
    pub(crate) fn run(mut self) -> BTreeMap<PartyId, Result<R::Output>> {
        loop {
            self.apply_mutations();
            let pending = self.drain();
            if pending.is_empty() {
                break;
            }
            for msg in &pending {
                for handler in &self.handlers {
                    if msg.is_for(&handler.self_id()) {
                        let msg = match &self.tamper {
                            Some(tamper) => tamper(msg, handler.self_id()),
                            None => msg.clone(),
                        };
                        handler.accept(msg);
                    }
                }
            }
        }

        self.handlers
            .iter()
            .map(|handler| {
                let result = handler
                    .take_result()
                    .unwrap_or_else(|| Err(Error::Internal("Session did not finish".into())));
                (handler.self_id(), result)
            })
            .collect()
    }
}

/// Run to completion and unwrap every output.
pub(crate) fn run<R: Round>(rounds: Vec<R>) -> BTreeMap<PartyId, R::Output> {
    Network::new(rounds)
        .run()
        .into_iter()
        .map(|(id, result)| (id, result.unwrap()))
        .collect()
}

/// Fresh key material for `ids` via the key generation protocol.
pub(crate) fn keygen(ids: &[u32], threshold: usize) -> Vec<TestConfig> {
    let rounds = ids
        .iter()
        .map(|id| {
            Keygen::new(Transparent, &params(*id, ids, threshold), Pool::inline()).unwrap()
        })
        .collect();
    run(rounds).into_values().collect()
}

/// Flip one bit of a message's content.
pub(crate) fn flip_bit(msg: &Message) -> Message {
    let mut msg = msg.clone();
    if let Some(byte) = msg.content.last_mut() {
        *byte ^= 1;
    }
    msg
}

/// Decode a message's content, edit it and encode it again.
pub(crate) fn rewrite<M: Content>(msg: &Message, edit: impl FnOnce(&mut M)) -> Message {
    let mut content: M = types::decode(&msg.content).unwrap();
    edit(&mut content);
    let mut msg = msg.clone();
    msg.content = types::encode(&content).unwrap();
    msg
}

/// All culprits named by the parties that aborted.
pub(crate) fn culprits<T>(results: &BTreeMap<PartyId, Result<T>>) -> Vec<Vec<PartyId>> {
    results
        .values()
        .filter_map(|result| result.as_ref().err())
        .map(|err| err.culprits())
        .collect()
}
