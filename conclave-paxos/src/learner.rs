//! The Learner role.

use std::collections::HashMap;

use conclave_saga::{CorrelatedBy, CorrelationId, Inbound, Outbox, Saga, TransitionTable};
use tracing::{debug, trace};

use crate::Decree;
use crate::ballot::AcceptorId;
use crate::messages::{Accepted, ProtocolMessage, ValueDecided};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LearnerPhase {
    Listening,
    Decided,
}

#[derive(Debug, Clone)]
pub enum LearnerEvent<T> {
    Accepted(Accepted<T>),
}

impl<T> CorrelatedBy for LearnerEvent<T> {
    fn correlation_id(&self) -> CorrelationId {
        let LearnerEvent::Accepted(m) = self;
        m.correlation_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LearnerEventKind {
    Accepted,
}

/// Aggregates `Accepted` notifications for one consensus instance and
/// decides once a quorum of distinct acceptors report the same ballot and
/// value.
///
/// The decision is set exactly once and never changes; later `Accepted`s
/// are still recorded for diagnostics. A learner that never reaches quorum
/// stays pending; timeout and retry with a fresh ballot are the
/// proposer's policy. Instances may be garbage-collected a grace window
/// after deciding.
pub struct Learner<T> {
    correlation_id: CorrelationId,
    quorum: usize,
    votes: HashMap<AcceptorId, (i64, T)>,
    decided: Option<T>,
    phase: LearnerPhase,
}

impl<T: Decree> Learner<T> {
    /// # Panics
    ///
    /// Panics on a zero quorum; a learner that decides on nothing is a
    /// configuration bug.
    #[must_use]
    pub fn new(correlation_id: CorrelationId, quorum: usize) -> Self {
        assert!(quorum >= 1, "quorum must be at least one acceptor");
        Self {
            correlation_id,
            quorum,
            votes: HashMap::new(),
            decided: None,
            phase: LearnerPhase::Listening,
        }
    }

    #[must_use]
    pub fn decided(&self) -> Option<&T> {
        self.decided.as_ref()
    }

    /// Last `(ballot, value)` seen per acceptor.
    #[must_use]
    pub fn votes(&self) -> &HashMap<AcceptorId, (i64, T)> {
        &self.votes
    }

    fn on_accepted(&mut self, inbound: Inbound<LearnerEvent<T>>, outbox: &mut Outbox<ProtocolMessage<T>>) {
        let LearnerEvent::Accepted(accepted) = inbound.message;

        // Last write wins per acceptor: a later Accepted reflects a ballot
        // that acceptor actually moved on to.
        self.votes.insert(
            accepted.acceptor_id,
            (accepted.ballot_id, accepted.value.clone()),
        );

        if self.decided.is_some() {
            trace!(ballot = accepted.ballot_id, "already decided, vote recorded");
            return;
        }

        let matching = self
            .votes
            .values()
            .filter(|(ballot, value)| *ballot == accepted.ballot_id && *value == accepted.value)
            .count();
        trace!(
            ballot = accepted.ballot_id,
            matching,
            quorum = self.quorum,
            "tallying accepted"
        );

        if matching >= self.quorum {
            debug!(ballot = accepted.ballot_id, "value decided");
            self.decided = Some(accepted.value.clone());
            self.phase = LearnerPhase::Decided;
            outbox.publish(ProtocolMessage::ValueDecided(ValueDecided {
                correlation_id: self.correlation_id,
                value: accepted.value,
            }));
        }
    }
}

impl<T: Decree> Saga for Learner<T> {
    type State = LearnerPhase;
    type Event = LearnerEvent<T>;
    type Kind = LearnerEventKind;
    type Command = ProtocolMessage<T>;

    fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    fn state(&self) -> LearnerPhase {
        self.phase
    }

    fn kind(event: &LearnerEvent<T>) -> LearnerEventKind {
        let LearnerEvent::Accepted(_) = event;
        LearnerEventKind::Accepted
    }

    fn initiating(_kind: LearnerEventKind) -> bool {
        true
    }

    fn transitions() -> TransitionTable<Self> {
        TransitionTable::builder()
            .on(LearnerPhase::Listening, LearnerEventKind::Accepted, Self::on_accepted)
            .on(LearnerPhase::Decided, LearnerEventKind::Accepted, Self::on_accepted)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use conclave_saga::SendIntent;
    use uuid::Uuid;

    use super::*;

    fn acceptor(n: u128) -> AcceptorId {
        AcceptorId::from_uuid(Uuid::from_u128(n))
    }

    struct Fixture {
        table: TransitionTable<Learner<String>>,
        learner: Learner<String>,
    }

    impl Fixture {
        fn new(quorum: usize) -> Self {
            Self {
                table: Learner::transitions(),
                learner: Learner::new(CorrelationId::new(), quorum),
            }
        }

        fn accepted(&mut self, from: AcceptorId, ballot_id: i64, value: &str) -> Vec<SendIntent<ProtocolMessage<String>>> {
            let accepted = Accepted {
                acceptor_id: from,
                ballot_id,
                correlation_id: self.learner.correlation_id,
                value: value.to_owned(),
            };
            self.table
                .raise(
                    &mut self.learner,
                    Inbound::new(
                        LearnerEvent::Accepted(accepted),
                        "loopback://localhost/acceptor",
                    ),
                )
                .unwrap()
                .into_intents()
        }
    }

    #[test]
    fn quorum_of_matching_votes_decides() {
        let mut fx = Fixture::new(2);

        assert!(fx.accepted(acceptor(1), 1, "x").is_empty());
        assert_eq!(fx.learner.decided(), None);

        let effects = fx.accepted(acceptor(2), 1, "x");
        assert_eq!(fx.learner.decided().map(String::as_str), Some("x"));
        assert_eq!(fx.learner.state(), LearnerPhase::Decided);
        assert!(matches!(
            effects.as_slice(),
            [SendIntent::Publish {
                message: ProtocolMessage::ValueDecided(_)
            }]
        ));
    }

    #[test]
    fn later_conflicting_vote_never_changes_the_decision() {
        let mut fx = Fixture::new(2);
        fx.accepted(acceptor(1), 1, "x");
        fx.accepted(acceptor(2), 1, "x");

        let effects = fx.accepted(acceptor(3), 1, "y");

        assert_eq!(fx.learner.decided().map(String::as_str), Some("x"));
        assert!(effects.is_empty(), "decision is published exactly once");
        // Still recorded for diagnostics.
        assert_eq!(fx.learner.votes()[&acceptor(3)], (1, "y".to_owned()));
    }

    #[test]
    fn redelivered_accepted_is_idempotent() {
        let mut fx = Fixture::new(2);
        fx.accepted(acceptor(1), 1, "x");
        fx.accepted(acceptor(2), 1, "x");

        let effects = fx.accepted(acceptor(2), 1, "x");

        assert_eq!(fx.learner.decided().map(String::as_str), Some("x"));
        assert!(effects.is_empty());
    }

    #[test]
    fn duplicate_votes_from_one_acceptor_do_not_fake_a_quorum() {
        let mut fx = Fixture::new(2);

        fx.accepted(acceptor(1), 1, "x");
        fx.accepted(acceptor(1), 1, "x");

        assert_eq!(fx.learner.decided(), None);
    }

    #[test]
    fn split_ballots_never_assemble_a_quorum() {
        let mut fx = Fixture::new(2);

        fx.accepted(acceptor(1), 1, "x");
        fx.accepted(acceptor(2), 2, "x");
        fx.accepted(acceptor(3), 3, "y");

        assert_eq!(fx.learner.decided(), None);
        assert_eq!(fx.learner.state(), LearnerPhase::Listening);
    }

    #[test]
    fn later_vote_from_the_same_acceptor_supersedes() {
        let mut fx = Fixture::new(2);

        fx.accepted(acceptor(1), 1, "x");
        // Acceptor 1 moved on to ballot 2; its ballot-1 vote no longer
        // counts.
        fx.accepted(acceptor(1), 2, "y");
        fx.accepted(acceptor(2), 1, "x");

        assert_eq!(fx.learner.decided(), None);

        fx.accepted(acceptor(2), 2, "y");
        assert_eq!(fx.learner.decided().map(String::as_str), Some("y"));
    }

    #[test]
    fn quorum_of_one_decides_immediately() {
        let mut fx = Fixture::new(1);

        fx.accepted(acceptor(1), 1, "solo");

        assert_eq!(fx.learner.decided().map(String::as_str), Some("solo"));
    }
}
