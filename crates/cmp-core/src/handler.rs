//! Session driver
//!
//! [`MultiHandler`] owns one protocol run. It admits inbound messages,
//! buffers those that arrive early, feeds the current round in a safe order
//! (a sender's broadcast before its point-to-point message), checks that all
//! peers saw the same broadcasts of the previous round, and advances the
//! round chain until it produces an output or aborts.

use crate::round::{Content, Outbox, Round, Transition};
use crate::types::{self, BroadcastKind, Hash, Message, PartyId, RoundNumber, SessionId};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

#[derive(Default)]
struct RoundBuffer {
    broadcasts: BTreeMap<PartyId, Message>,
    p2p: BTreeMap<PartyId, Message>,
    stored_broadcasts: BTreeSet<PartyId>,
    stored_p2p: BTreeSet<PartyId>,
}

impl RoundBuffer {
    fn messages(&self) -> impl Iterator<Item = &Message> {
        self.broadcasts.values().chain(self.p2p.values())
    }
}

struct State<R: Round> {
    round: Option<R>,
    buffers: BTreeMap<RoundNumber, RoundBuffer>,
    /// Own broadcast content, keyed by the round that consumes it
    own_broadcasts: BTreeMap<RoundNumber, Vec<u8>>,
    /// Echo hash of every completed round, `None` if it had no broadcast
    echo: BTreeMap<RoundNumber, Option<Hash>>,
    result: Option<Result<R::Output>>,
    finished: bool,
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

/// Drives a round chain from its first round to a terminal result.
pub struct MultiHandler<R: Round> {
    session_id: SessionId,
    protocol: &'static str,
    self_id: PartyId,
    party_ids: Vec<PartyId>,
    final_round: RoundNumber,
    state: Mutex<State<R>>,
    done: watch::Sender<bool>,
}

impl<R: Round> MultiHandler<R> {
    /// Start a session at `round`.
    ///
    /// Rounds that expect no messages are finalized immediately, so the
    /// returned receiver already holds the first outbound messages.
    pub fn new(round: R) -> Result<(Self, mpsc::UnboundedReceiver<Message>)> {
        let helper = round.helper();
        let session_id = *helper.session_id();
        let protocol = helper.protocol();
        let self_id = helper.self_id();
        let party_ids = helper.party_ids().to_vec();
        let final_round = helper.final_round();

        let (tx, rx) = mpsc::unbounded_channel();
        let (done, _) = watch::channel(false);

        let handler = Self {
            session_id,
            protocol,
            self_id,
            party_ids,
            final_round,
            state: Mutex::new(State {
                round: Some(round),
                buffers: BTreeMap::new(),
                own_broadcasts: BTreeMap::new(),
                echo: BTreeMap::new(),
                result: None,
                finished: false,
                outbound: Some(tx),
            }),
            done,
        };

        info!(
            protocol = handler.protocol,
            party = %handler.self_id,
            parties = handler.party_ids.len(),
            "Starting session"
        );

        {
            let mut state = handler.lock();
            handler.advance(&mut state)?;
        }

        Ok((handler, rx))
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn self_id(&self) -> PartyId {
        self.self_id
    }

    /// Round currently waiting for messages, `None` once finished
    pub fn current_round(&self) -> Option<RoundNumber> {
        self.lock().round.as_ref().map(|round| round.number())
    }

    /// Whether `msg` belongs to this session and could still be used.
    pub fn can_accept(&self, msg: &Message) -> bool {
        if msg.session_id != self.session_id || msg.protocol != self.protocol {
            return false;
        }
        if msg.from == self.self_id || self.party_ids.binary_search(&msg.from).is_err() {
            return false;
        }
        if let Some(to) = msg.to {
            if to != self.self_id {
                return false;
            }
        }
        if msg.broadcast != msg.to.is_none() {
            return false;
        }
        if msg.is_abort() {
            return true;
        }
        if msg.round > self.final_round {
            return false;
        }

        match &self.lock().round {
            Some(round) => msg.round >= round.number(),
            None => false,
        }
    }

    /// Hand an inbound message to the session.
    ///
    /// Inadmissible, stale and duplicate messages are dropped. Errors are not
    /// returned: they end the session and surface through [`Self::take_result`].
    pub fn accept(&self, msg: Message) {
        if !self.can_accept(&msg) {
            debug!(
                party = %self.self_id,
                from = %msg.from,
                round = msg.round,
                "Dropping inadmissible message"
            );
            return;
        }

        let mut state = self.lock();
        if state.finished {
            return;
        }

        if msg.is_abort() {
            self.finish(&mut state, Err(Error::RemoteAbort { from: msg.from }));
            return;
        }

        let current = match &state.round {
            Some(round) => round.number(),
            None => return,
        };
        if msg.round < current {
            debug!(
                party = %self.self_id,
                from = %msg.from,
                round = msg.round,
                "Dropping stale message"
            );
            return;
        }

        let buffer = state.buffers.entry(msg.round).or_default();
        let slot = if msg.broadcast {
            &mut buffer.broadcasts
        } else {
            &mut buffer.p2p
        };
        if slot.contains_key(&msg.from) {
            debug!(
                party = %self.self_id,
                from = %msg.from,
                round = msg.round,
                "Dropping duplicate message"
            );
            return;
        }
        slot.insert(msg.from, msg);

        if let Err(err) = self.advance(&mut state) {
            self.finish(&mut state, Err(err));
        }
    }

    /// Abort the session locally and tell the peers with a round-0 message.
    pub fn stop(&self) {
        let mut state = self.lock();
        if state.finished {
            return;
        }

        let msg = Message {
            session_id: self.session_id,
            protocol: self.protocol.to_string(),
            from: self.self_id,
            to: None,
            round: 0,
            content: Vec::new(),
            broadcast: true,
            broadcast_verification: None,
        };
        if let Some(tx) = &state.outbound {
            let _ = tx.send(msg);
        }
        self.finish(&mut state, Err(Error::Stopped));
    }

    pub fn is_done(&self) -> bool {
        self.lock().finished
    }

    /// Move the terminal result out. Later calls return `None`.
    pub fn take_result(&self) -> Option<Result<R::Output>> {
        self.lock().result.take()
    }

    /// Watch channel that flips to `true` when the session finishes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.done.subscribe()
    }

    /// Wait until the session has finished.
    pub async fn wait(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    #[cfg(test)]
    pub(crate) fn with_round(&self, f: impl FnOnce(&mut R)) {
        if let Some(round) = self.lock().round.as_mut() {
            f(round);
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<R>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Process buffered messages and finalize rounds for as long as the
    /// current round is complete.
    fn advance(&self, state: &mut State<R>) -> Result<()> {
        loop {
            let State {
                round,
                buffers,
                echo,
                ..
            } = &mut *state;
            let Some(current) = round.as_mut() else {
                return Ok(());
            };
            let number = current.number();
            let kind = current.broadcast_kind();
            let expected = number
                .checked_sub(1)
                .and_then(|previous| echo.get(&previous).copied())
                .flatten();
            let buffer = buffers.entry(number).or_default();

            Self::absorb(current, buffer, expected)?;
            if !Self::is_complete(current, buffer) {
                return Ok(());
            }

            let buffer = state.buffers.remove(&number).unwrap_or_default();
            let own = state.own_broadcasts.remove(&number);
            let hash = self.echo_hash(number, kind, &buffer, own.as_deref());

            let round = state
                .round
                .take()
                .ok_or_else(|| Error::Internal("Round missing while advancing".into()))?;
            let mut outbox = Outbox::new();
            let transition = self.finalize(round, &mut outbox)?;

            state.echo.insert(number, hash);
            self.dispatch(state, number, hash, outbox)?;

            match transition {
                Transition::Next(next) => {
                    if next.number() != number + 1 {
                        return Err(Error::Internal(format!(
                            "Round {number} advanced to round {}",
                            next.number()
                        )));
                    }
                    debug!(party = %self.self_id, round = next.number(), "Advanced to next round");
                    state.round = Some(next);
                }
                Transition::Output(output) => {
                    self.finish(state, Ok(output));
                    return Ok(());
                }
            }
        }
    }

    /// Feed every buffered message of the current round that can be
    /// processed. Messages from parties that are not expected to send this
    /// kind of message in this round are discarded.
    ///
    /// Every message must carry the echo hash of the previous round as
    /// computed locally, otherwise the sender saw different broadcasts.
    fn absorb(round: &mut R, buffer: &mut RoundBuffer, expected: Option<Hash>) -> Result<()> {
        let number = round.number();
        let broadcast_senders = match round.broadcast_kind() {
            Some(_) => round.broadcast_senders(),
            None => Vec::new(),
        };
        let p2p_senders = if round.expects_p2p() {
            round.p2p_senders()
        } else {
            Vec::new()
        };

        buffer
            .broadcasts
            .retain(|from, _| broadcast_senders.contains(from));
        buffer.p2p.retain(|from, _| p2p_senders.contains(from));

        if buffer
            .messages()
            .any(|msg| msg.broadcast_verification != expected)
        {
            return Err(Error::BroadcastMismatch {
                round: number.saturating_sub(1),
            });
        }

        for (from, msg) in &buffer.broadcasts {
            if buffer.stored_broadcasts.contains(from) {
                continue;
            }
            let content = Self::decode(number, msg).map_err(|e| e.blame(*from))?;
            round
                .store_broadcast_message(*from, content)
                .map_err(|e| e.blame(*from))?;
            buffer.stored_broadcasts.insert(*from);
        }

        for (from, msg) in &buffer.p2p {
            if buffer.stored_p2p.contains(from) {
                continue;
            }
            // The p2p part may be checked against the sender's broadcast
            if broadcast_senders.contains(from) && !buffer.stored_broadcasts.contains(from) {
                continue;
            }
            let content = Self::decode(number, msg).map_err(|e| e.blame(*from))?;
            round
                .verify_message(from, &content)
                .map_err(|e| e.blame(*from))?;
            round
                .store_message(*from, content)
                .map_err(|e| e.blame(*from))?;
            buffer.stored_p2p.insert(*from);
        }

        Ok(())
    }

    fn is_complete(round: &R, buffer: &RoundBuffer) -> bool {
        let broadcasts_done = round.broadcast_kind().is_none()
            || round
                .broadcast_senders()
                .iter()
                .all(|id| buffer.stored_broadcasts.contains(id));
        let p2p_done = !round.expects_p2p()
            || round
                .p2p_senders()
                .iter()
                .all(|id| buffer.stored_p2p.contains(id));
        broadcasts_done && p2p_done
    }

    fn decode(number: RoundNumber, msg: &Message) -> Result<R::Content> {
        let content: R::Content = types::decode(&msg.content)?;
        if content.round() != number || content.is_broadcast() != msg.broadcast {
            return Err(Error::UnexpectedContent { round: number });
        }
        Ok(content)
    }

    /// Hash of all broadcasts of a round, own included, sorted by sender.
    fn echo_hash(
        &self,
        number: RoundNumber,
        kind: Option<BroadcastKind>,
        buffer: &RoundBuffer,
        own: Option<&[u8]>,
    ) -> Option<Hash> {
        let kind = kind?;

        let mut entries: BTreeMap<PartyId, &[u8]> = buffer
            .broadcasts
            .iter()
            .map(|(id, msg)| (*id, msg.content.as_slice()))
            .collect();
        if let Some(own) = own {
            entries.insert(self.self_id, own);
        }

        let mut hasher = blake3::Hasher::new();
        hasher.update(b"echo");
        hasher.update(self.protocol.as_bytes());
        hasher.update(&self.session_id);
        hasher.update(&number.to_be_bytes());
        hasher.update(match kind {
            BroadcastKind::Reliable => b"reliable",
            BroadcastKind::Normal => b"normal",
        });
        for (id, content) in entries {
            hasher.update(&id.to_bytes());
            hasher.update(&(content.len() as u64).to_be_bytes());
            hasher.update(content);
        }
        Some(*hasher.finalize().as_bytes())
    }

    #[instrument(
        skip_all,
        fields(protocol = self.protocol, party = %self.self_id, round = round.number())
    )]
    fn finalize(&self, round: R, outbox: &mut Outbox<R::Content>) -> Result<Transition<R>> {
        let transition = round.finalize(outbox)?;
        debug!(messages = outbox.len(), "Round finalized");
        Ok(transition)
    }

    /// Wrap the finalize output into wire messages for round `number + 1`.
    fn dispatch(
        &self,
        state: &mut State<R>,
        number: RoundNumber,
        echo: Option<Hash>,
        outbox: Outbox<R::Content>,
    ) -> Result<()> {
        let next = number + 1;
        for outgoing in outbox.into_messages() {
            let broadcast = outgoing.to.is_none();
            if outgoing.content.round() != next || outgoing.content.is_broadcast() != broadcast {
                return Err(Error::Internal(format!(
                    "Round {number} emitted content for round {}",
                    outgoing.content.round()
                )));
            }

            let content = types::encode(&outgoing.content)?;
            if broadcast && state.own_broadcasts.insert(next, content.clone()).is_some() {
                return Err(Error::Internal(format!(
                    "Round {number} emitted more than one broadcast"
                )));
            }

            let msg = Message {
                session_id: self.session_id,
                protocol: self.protocol.to_string(),
                from: self.self_id,
                to: outgoing.to,
                round: next,
                content,
                broadcast,
                broadcast_verification: echo,
            };
            if let Some(tx) = &state.outbound {
                if tx.send(msg).is_err() {
                    debug!(party = %self.self_id, "Outbound channel closed");
                }
            }
        }
        Ok(())
    }

    fn finish(&self, state: &mut State<R>, result: Result<R::Output>) {
        match &result {
            Ok(_) => info!(protocol = self.protocol, party = %self.self_id, "Session finished"),
            Err(err) => warn!(
                protocol = self.protocol,
                party = %self.self_id,
                culprits = ?err.culprits(),
                error = %err,
                "Session aborted"
            ),
        }

        state.round = None;
        state.buffers.clear();
        state.own_broadcasts.clear();
        state.outbound = None;
        state.result = Some(result);
        state.finished = true;
        self.done.send_replace(true);
    }
}

impl<R: Round> std::fmt::Debug for MultiHandler<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiHandler")
            .field("protocol", &self.protocol)
            .field("party", &self.self_id)
            .field("round", &self.current_round())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::{tests::params, Helper};
    use crate::pool::Pool;
    use serde::{Deserialize, Serialize};

    /// Every party broadcasts a value, then sends each peer the sum it saw.
    struct Sum {
        helper: Helper,
        round: RoundNumber,
        value: u64,
        received: BTreeMap<PartyId, u64>,
        echoed: BTreeMap<PartyId, u64>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    enum SumContent {
        Value(u64),
        Total(u64),
    }

    impl Content for SumContent {
        fn round(&self) -> RoundNumber {
            match self {
                SumContent::Value(_) => 2,
                SumContent::Total(_) => 3,
            }
        }

        fn is_broadcast(&self) -> bool {
            matches!(self, SumContent::Value(_))
        }
    }

    impl Sum {
        fn new(id: u32, ids: &[u32]) -> Self {
            let helper = Helper::new("test/sum", "none", 3, &params(id, ids, 1), Pool::inline())
                .unwrap();
            Self {
                helper,
                round: 1,
                value: u64::from(id) * 10,
                received: BTreeMap::new(),
                echoed: BTreeMap::new(),
            }
        }

        fn total(&self) -> u64 {
            self.value + self.received.values().sum::<u64>()
        }
    }

    impl Round for Sum {
        type Content = SumContent;
        type Output = u64;

        fn number(&self) -> RoundNumber {
            self.round
        }

        fn helper(&self) -> &Helper {
            &self.helper
        }

        fn broadcast_kind(&self) -> Option<BroadcastKind> {
            (self.round == 2).then_some(BroadcastKind::Normal)
        }

        fn expects_p2p(&self) -> bool {
            self.round == 3
        }

        fn verify_message(&self, _from: &PartyId, content: &SumContent) -> Result<()> {
            match content {
                SumContent::Total(total) if *total == self.total() => Ok(()),
                _ => Err(Error::VerificationFailed("wrong total".into())),
            }
        }

        fn store_message(&mut self, from: PartyId, content: SumContent) -> Result<()> {
            if let SumContent::Total(total) = content {
                self.echoed.insert(from, total);
            }
            Ok(())
        }

        fn store_broadcast_message(&mut self, from: PartyId, content: SumContent) -> Result<()> {
            match content {
                SumContent::Value(value) => {
                    self.received.insert(from, value);
                    Ok(())
                }
                _ => Err(Error::UnexpectedContent { round: 2 }),
            }
        }

        fn finalize(mut self, outbox: &mut Outbox<SumContent>) -> Result<Transition<Self>> {
            match self.round {
                1 => outbox.broadcast(SumContent::Value(self.value)),
                2 => {
                    for id in self.helper.other_party_ids() {
                        outbox.send(id, SumContent::Total(self.total()));
                    }
                }
                _ => return Ok(Transition::Output(self.total())),
            }
            self.round += 1;
            Ok(Transition::Next(self))
        }
    }

    type Handler = MultiHandler<Sum>;

    struct Net {
        handlers: Vec<Handler>,
        receivers: Vec<mpsc::UnboundedReceiver<Message>>,
    }

    impl Net {
        fn new(ids: &[u32]) -> Self {
            let mut handlers = Vec::new();
            let mut receivers = Vec::new();
            for id in ids {
                let (handler, rx) = MultiHandler::new(Sum::new(*id, ids)).unwrap();
                handlers.push(handler);
                receivers.push(rx);
            }
            Self {
                handlers,
                receivers,
            }
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

        /// Deliver until quiet; `edit` may rewrite a message per recipient.
        fn run(&mut self, reverse: bool, edit: impl Fn(&Message, PartyId) -> Message) {
            loop {
                let mut pending = self.drain();
                if pending.is_empty() {
                    return;
                }
                if reverse {
                    pending.reverse();
                }
                for msg in &pending {
                    for handler in &self.handlers {
                        if msg.is_for(&handler.self_id()) {
                            handler.accept(edit(msg, handler.self_id()));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_out_of_order_delivery() {
        let mut net = Net::new(&[1, 2, 3]);
        net.run(true, |msg, _| msg.clone());

        for handler in &net.handlers {
            assert_eq!(handler.take_result().unwrap().unwrap(), 60);
            assert!(handler.take_result().is_none());
        }
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let mut net = Net::new(&[1, 2]);
        let queue = net.drain();
        for msg in queue.iter().chain(queue.iter()) {
            for handler in &net.handlers {
                if msg.is_for(&handler.self_id()) {
                    handler.accept(msg.clone());
                }
            }
        }
        assert!(net.handlers.iter().all(|h| h.current_round() == Some(3)));

        net.run(false, |msg, _| msg.clone());
        for handler in &net.handlers {
            assert_eq!(handler.take_result().unwrap().unwrap(), 30);
        }
    }

    #[test]
    fn test_admission() {
        let mut net = Net::new(&[1, 2, 3]);
        let queue = net.drain();
        let handlers = &net.handlers;
        let original = queue
            .iter()
            .find(|msg| msg.from == PartyId::new(1))
            .unwrap()
            .clone();
        assert!(handlers[1].can_accept(&original));
        assert!(!handlers[0].can_accept(&original));

        let mut msg = original.clone();
        msg.session_id = [9u8; 32];
        assert!(!handlers[1].can_accept(&msg));

        let mut msg = original.clone();
        msg.from = PartyId::new(7);
        assert!(!handlers[1].can_accept(&msg));

        let mut msg = original.clone();
        msg.round = 4;
        assert!(!handlers[1].can_accept(&msg));

        let mut msg = original;
        msg.to = Some(PartyId::new(3));
        assert!(!handlers[1].can_accept(&msg));
    }

    #[test]
    fn test_wrong_content_blames_sender() {
        let mut net = Net::new(&[1, 2, 3]);
        net.run(false, |msg, _| {
            let mut msg = msg.clone();
            if msg.from == PartyId::new(2) && msg.round == 2 {
                msg.content = vec![0xff; 3];
            }
            msg
        });

        for handler in [&net.handlers[0], &net.handlers[2]] {
            let err = handler.take_result().unwrap().unwrap_err();
            assert_eq!(err.culprits(), vec![PartyId::new(2)]);
        }
    }

    #[test]
    fn test_echo_mismatch() {
        let mut net = Net::new(&[1, 2, 3]);

        // Party 1 shows party 3 a different value than it shows party 2
        net.run(false, |msg, to| {
            let mut msg = msg.clone();
            if msg.from == PartyId::new(1) && msg.round == 2 && to == PartyId::new(3) {
                msg.content = types::encode(&SumContent::Value(99)).unwrap();
            }
            msg
        });

        for handler in &net.handlers[1..] {
            let err = handler.take_result().unwrap().unwrap_err();
            assert!(matches!(err, Error::BroadcastMismatch { round: 2 }));
            assert!(err.culprits().is_empty());
        }
    }

    #[test]
    fn test_remote_abort_and_stop() {
        let net = Net::new(&[1, 2]);
        let abort = Message {
            session_id: [1u8; 32],
            protocol: "test/sum".into(),
            from: PartyId::new(1),
            to: None,
            round: 0,
            content: Vec::new(),
            broadcast: true,
            broadcast_verification: None,
        };
        net.handlers[1].accept(abort);
        let err = net.handlers[1].take_result().unwrap().unwrap_err();
        assert!(matches!(err, Error::RemoteAbort { .. }));
        assert_eq!(err.culprits(), vec![PartyId::new(1)]);

        net.handlers[0].stop();
        assert!(matches!(
            net.handlers[0].take_result(),
            Some(Err(Error::Stopped))
        ));
        assert!(net.handlers[0].is_done());
    }
}
