//! The Acceptor role.

use conclave_saga::{
    CorrelatedBy, CorrelationId, Inbound, Outbox, Saga, TransitionTable, Uri,
};
use tracing::trace;

use crate::Decree;
use crate::ballot::{AcceptorId, Ballot};
use crate::messages::{Accept, Accepted, Nack, Prepare, Promise, ProtocolMessage};

/// Lifecycle of one acceptor instance.
///
/// `SteadyState` is terminal for normal operation, but a later
/// higher-ballot `Prepare` re-enters `Prepared` through the same handler,
/// preserving the accepted pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcceptorPhase {
    Initial,
    Prepared,
    SteadyState,
}

#[derive(Debug, Clone)]
pub enum AcceptorEvent<T> {
    Prepare(Prepare),
    Accept(Accept<T>),
}

impl<T> CorrelatedBy for AcceptorEvent<T> {
    fn correlation_id(&self) -> CorrelationId {
        match self {
            AcceptorEvent::Prepare(m) => m.correlation_id,
            AcceptorEvent::Accept(m) => m.correlation_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcceptorEventKind {
    Prepare,
    Accept,
}

/// Paxos Phase 1/2 responder for one consensus instance.
///
/// Holds the durable ballot/value record. Instances persist for the life
/// of the consensus instance: late `Prepare`/`Accept` traffic must still
/// be answered correctly, so the repository never retires them.
pub struct Acceptor<T> {
    correlation_id: CorrelationId,
    acceptor_id: AcceptorId,
    phase: AcceptorPhase,
    promised: Option<Ballot>,
    accepted: Option<(Ballot, T)>,
}

impl<T: Decree> Acceptor<T> {
    #[must_use]
    pub fn new(correlation_id: CorrelationId, acceptor_id: AcceptorId) -> Self {
        Self {
            correlation_id,
            acceptor_id,
            phase: AcceptorPhase::Initial,
            promised: None,
            accepted: None,
        }
    }

    #[must_use]
    pub fn acceptor_id(&self) -> AcceptorId {
        self.acceptor_id
    }

    /// Highest ballot promised so far, the watermark below which every
    /// `Prepare` and `Accept` is Nacked.
    #[must_use]
    pub fn promised(&self) -> Option<Ballot> {
        self.promised
    }

    #[must_use]
    pub fn accepted(&self) -> Option<&(Ballot, T)> {
        self.accepted.as_ref()
    }

    fn below_watermark(&self, ballot: Ballot) -> Option<Ballot> {
        self.promised.filter(|promised| ballot < *promised)
    }

    fn nack(&self, outbox: &mut Outbox<ProtocolMessage<T>>, to: Uri, ballot_id: i64, promised: Ballot) {
        outbox.send(
            to,
            ProtocolMessage::Nack(Nack {
                ballot_id,
                correlation_id: self.correlation_id,
                highest_promised_ballot: promised.id,
            }),
        );
    }

    fn on_prepare(&mut self, inbound: Inbound<AcceptorEvent<T>>, outbox: &mut Outbox<ProtocolMessage<T>>) {
        let AcceptorEvent::Prepare(prepare) = inbound.message else {
            return;
        };
        let ballot = Ballot::new(prepare.ballot_id, prepare.leader_id);

        if let Some(promised) = self.below_watermark(ballot) {
            trace!(?ballot, ?promised, "stale prepare, nacking");
            self.nack(outbox, inbound.response_address, prepare.ballot_id, promised);
            return;
        }

        // Equal ballots re-promise; duplicate Prepares are harmless.
        self.promised = Some(ballot);
        self.phase = AcceptorPhase::Prepared;

        let (accepted_ballot, accepted_value) = match &self.accepted {
            Some((ballot, value)) => (Some(ballot.id), Some(value.clone())),
            None => (None, None),
        };
        trace!(?ballot, ?accepted_ballot, "promised");
        outbox.send(
            inbound.response_address,
            ProtocolMessage::Promise(Promise {
                ballot_id: prepare.ballot_id,
                correlation_id: self.correlation_id,
                accepted_ballot,
                accepted_value,
            }),
        );
    }

    fn on_accept(&mut self, inbound: Inbound<AcceptorEvent<T>>, outbox: &mut Outbox<ProtocolMessage<T>>) {
        let AcceptorEvent::Accept(accept) = inbound.message else {
            return;
        };
        let ballot = Ballot::new(accept.ballot_id, accept.leader_id);

        if let Some(promised) = self.below_watermark(ballot) {
            trace!(?ballot, ?promised, "stale accept, nacking");
            self.nack(outbox, inbound.response_address, accept.ballot_id, promised);
            return;
        }

        // An accept with no prior prepare counts as an implicit promise for
        // its ballot.
        self.promised = Some(ballot);
        self.accepted = Some((ballot, accept.value.clone()));
        self.phase = AcceptorPhase::SteadyState;

        trace!(?ballot, "accepted");
        outbox.publish(ProtocolMessage::Accepted(Accepted {
            acceptor_id: self.acceptor_id,
            ballot_id: accept.ballot_id,
            correlation_id: self.correlation_id,
            value: accept.value,
        }));
    }
}

impl<T: Decree> Saga for Acceptor<T> {
    type State = AcceptorPhase;
    type Event = AcceptorEvent<T>;
    type Kind = AcceptorEventKind;
    type Command = ProtocolMessage<T>;

    fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    fn state(&self) -> AcceptorPhase {
        self.phase
    }

    fn kind(event: &AcceptorEvent<T>) -> AcceptorEventKind {
        match event {
            AcceptorEvent::Prepare(_) => AcceptorEventKind::Prepare,
            AcceptorEvent::Accept(_) => AcceptorEventKind::Accept,
        }
    }

    fn initiating(_kind: AcceptorEventKind) -> bool {
        // Either phase may be the first message this node sees for an
        // instance.
        true
    }

    fn transitions() -> TransitionTable<Self> {
        use AcceptorEventKind as Event;
        use AcceptorPhase as State;

        TransitionTable::builder()
            .on(State::Initial, Event::Prepare, Self::on_prepare)
            .on(State::Prepared, Event::Prepare, Self::on_prepare)
            .on(State::SteadyState, Event::Prepare, Self::on_prepare)
            .on(State::Initial, Event::Accept, Self::on_accept)
            .on(State::Prepared, Event::Accept, Self::on_accept)
            .on(State::SteadyState, Event::Accept, Self::on_accept)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use conclave_saga::{SendIntent, Uri};
    use uuid::Uuid;

    use super::*;
    use crate::ballot::LeaderId;

    fn leader(n: u128) -> LeaderId {
        LeaderId::from_uuid(Uuid::from_u128(n))
    }

    fn reply_to() -> Uri {
        Uri::from("loopback://localhost/leader")
    }

    struct Fixture {
        table: TransitionTable<Acceptor<String>>,
        acceptor: Acceptor<String>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                table: Acceptor::transitions(),
                acceptor: Acceptor::new(CorrelationId::new(), AcceptorId::new()),
            }
        }

        fn prepare(&mut self, ballot_id: i64, leader_id: LeaderId) -> Vec<SendIntent<ProtocolMessage<String>>> {
            let prepare = Prepare {
                ballot_id,
                correlation_id: self.acceptor.correlation_id,
                leader_id,
            };
            self.table
                .raise(
                    &mut self.acceptor,
                    Inbound::new(AcceptorEvent::Prepare(prepare), reply_to()),
                )
                .unwrap()
                .into_intents()
        }

        fn accept(&mut self, ballot_id: i64, leader_id: LeaderId, value: &str) -> Vec<SendIntent<ProtocolMessage<String>>> {
            let accept = Accept {
                ballot_id,
                correlation_id: self.acceptor.correlation_id,
                leader_id,
                value: value.to_owned(),
            };
            self.table
                .raise(
                    &mut self.acceptor,
                    Inbound::new(AcceptorEvent::Accept(accept), reply_to()),
                )
                .unwrap()
                .into_intents()
        }
    }

    fn single_message(intents: Vec<SendIntent<ProtocolMessage<String>>>) -> ProtocolMessage<String> {
        let mut intents = intents.into_iter();
        let message = match intents.next().expect("one effect") {
            SendIntent::Direct { message, .. } | SendIntent::Publish { message } => message,
        };
        assert!(intents.next().is_none(), "exactly one effect");
        message
    }

    fn expect_promise(message: ProtocolMessage<String>) -> Promise<String> {
        match message {
            ProtocolMessage::Promise(promise) => promise,
            other => panic!("expected promise, got {other:?}"),
        }
    }

    fn expect_nack(message: ProtocolMessage<String>) -> Nack {
        match message {
            ProtocolMessage::Nack(nack) => nack,
            other => panic!("expected nack, got {other:?}"),
        }
    }

    fn expect_accepted(message: ProtocolMessage<String>) -> Accepted<String> {
        match message {
            ProtocolMessage::Accepted(accepted) => accepted,
            other => panic!("expected accepted, got {other:?}"),
        }
    }

    #[test]
    fn prepare_then_accept_reaches_steady_state() {
        let mut fx = Fixture::new();

        let promise = expect_promise(single_message(fx.prepare(1, leader(1))));
        assert_eq!(fx.acceptor.state(), AcceptorPhase::Prepared);
        assert_eq!(promise.ballot_id, 1);
        assert_eq!(promise.accepted_ballot, None);
        assert_eq!(promise.accepted_value, None);

        let accepted = expect_accepted(single_message(fx.accept(1, leader(1), "chris")));
        assert_eq!(fx.acceptor.state(), AcceptorPhase::SteadyState);
        assert_eq!(accepted.ballot_id, 1);
        assert_eq!(accepted.value, "chris");
        assert_eq!(accepted.acceptor_id, fx.acceptor.acceptor_id());
    }

    #[test]
    fn stale_prepare_is_nacked_and_state_unchanged() {
        let mut fx = Fixture::new();
        fx.prepare(5, leader(1));

        let nack = expect_nack(single_message(fx.prepare(3, leader(2))));
        assert_eq!(nack.ballot_id, 3);
        assert_eq!(nack.highest_promised_ballot, 5);
        assert_eq!(fx.acceptor.promised(), Some(Ballot::new(5, leader(1))));
    }

    #[test]
    fn stale_accept_is_nacked() {
        let mut fx = Fixture::new();
        fx.prepare(5, leader(1));

        let reply = single_message(fx.accept(3, leader(2), "stale"));

        assert!(matches!(reply, ProtocolMessage::Nack(_)));
        assert_eq!(fx.acceptor.accepted(), None);
        assert_eq!(fx.acceptor.state(), AcceptorPhase::Prepared);
    }

    #[test]
    fn equal_ballot_prepare_repromises() {
        let mut fx = Fixture::new();
        fx.prepare(4, leader(1));

        let reply = single_message(fx.prepare(4, leader(1)));

        assert!(matches!(reply, ProtocolMessage::Promise(_)));
        assert_eq!(fx.acceptor.promised(), Some(Ballot::new(4, leader(1))));
    }

    #[test]
    fn promise_watermark_is_monotonic_under_reordering() {
        // b1 < b2 delivered in either order leaves the watermark at b2.
        for (first, second) in [(1, 2), (2, 1)] {
            let mut fx = Fixture::new();
            fx.prepare(first, leader(1));
            fx.prepare(second, leader(1));
            assert_eq!(fx.acceptor.promised(), Some(Ballot::new(2, leader(1))));
        }
    }

    #[test]
    fn promise_carries_previously_accepted_value() {
        let mut fx = Fixture::new();
        fx.prepare(5, leader(1));
        fx.accept(5, leader(1), "vera");

        let promise = expect_promise(single_message(fx.prepare(8, leader(2))));
        assert_eq!(promise.accepted_ballot, Some(5));
        assert_eq!(promise.accepted_value.as_deref(), Some("vera"));
        // Re-entered Prepared, accepted pair preserved.
        assert_eq!(fx.acceptor.state(), AcceptorPhase::Prepared);
        assert_eq!(
            fx.acceptor.accepted(),
            Some(&(Ballot::new(5, leader(1)), "vera".to_owned()))
        );
    }

    #[test]
    fn accepted_pair_follows_a_higher_ballot_accept() {
        let mut fx = Fixture::new();
        fx.prepare(5, leader(1));
        fx.accept(5, leader(1), "old");
        fx.prepare(8, leader(2));

        let promise = expect_promise(single_message(fx.prepare(9, leader(1))));
        assert_eq!(promise.accepted_ballot, Some(5));

        fx.accept(9, leader(1), "new");
        let promise = expect_promise(single_message(fx.prepare(10, leader(2))));
        assert_eq!(promise.accepted_ballot, Some(9));
        assert_eq!(promise.accepted_value.as_deref(), Some("new"));
    }

    #[test]
    fn accept_without_prepare_is_an_implicit_promise() {
        let mut fx = Fixture::new();

        let broadcast = single_message(fx.accept(2, leader(1), "direct"));

        assert!(matches!(broadcast, ProtocolMessage::Accepted(_)));
        assert_eq!(fx.acceptor.state(), AcceptorPhase::SteadyState);
        assert_eq!(fx.acceptor.promised(), Some(Ballot::new(2, leader(1))));

        // The implicit promise still fences lower ballots.
        let reply = single_message(fx.accept(1, leader(2), "late"));
        assert!(matches!(reply, ProtocolMessage::Nack(_)));
        assert_eq!(
            fx.acceptor.accepted(),
            Some(&(Ballot::new(2, leader(1)), "direct".to_owned()))
        );
    }

    #[test]
    fn ballot_number_ties_break_by_leader_id() {
        let mut fx = Fixture::new();
        fx.prepare(5, leader(2));

        // Same number, lower leader id: below the watermark.
        let reply = single_message(fx.prepare(5, leader(1)));
        assert!(matches!(reply, ProtocolMessage::Nack(_)));

        // Same number, higher leader id: supersedes.
        let reply = single_message(fx.prepare(5, leader(3)));
        assert!(matches!(reply, ProtocolMessage::Promise(_)));
        assert_eq!(fx.acceptor.promised(), Some(Ballot::new(5, leader(3))));
    }
}
