//! Protocol message contracts.
//!
//! Field sets only; wire encoding is the transport's concern. Every
//! message names its consensus instance via the correlation id.

use conclave_saga::{CorrelatedBy, CorrelationId};
use serde::{Deserialize, Serialize};

use crate::ballot::{AcceptorId, LeaderId};

/// Phase 1a: a leader asks the acceptors to promise a ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prepare {
    pub ballot_id: i64,
    pub correlation_id: CorrelationId,
    pub leader_id: LeaderId,
}

/// Phase 1b: the acceptor will never accept a lower ballot again.
///
/// Carries any previously accepted pair so a new leader recovering a prior
/// decision reproposes the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promise<T> {
    pub ballot_id: i64,
    pub correlation_id: CorrelationId,
    pub accepted_ballot: Option<i64>,
    pub accepted_value: Option<T>,
}

/// Rejection of a ballot below the acceptor's promise watermark.
///
/// Protocol-expected, not an error; the leader retries with a ballot above
/// `highest_promised_ballot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nack {
    pub ballot_id: i64,
    pub correlation_id: CorrelationId,
    pub highest_promised_ballot: i64,
}

/// Phase 2a: a leader asks the acceptors to accept a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accept<T> {
    pub ballot_id: i64,
    pub correlation_id: CorrelationId,
    pub leader_id: LeaderId,
    pub value: T,
}

/// Phase 2b: one acceptor accepted, broadcast to the learners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accepted<T> {
    pub acceptor_id: AcceptorId,
    pub ballot_id: i64,
    pub correlation_id: CorrelationId,
    pub value: T,
}

/// A quorum agreed; published for downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueDecided<T> {
    pub correlation_id: CorrelationId,
    pub value: T,
}

/// Every message a consensus role puts on the control bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProtocolMessage<T> {
    Prepare(Prepare),
    Promise(Promise<T>),
    Nack(Nack),
    Accept(Accept<T>),
    Accepted(Accepted<T>),
    ValueDecided(ValueDecided<T>),
}

impl CorrelatedBy for Prepare {
    fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

impl<T> CorrelatedBy for Promise<T> {
    fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

impl CorrelatedBy for Nack {
    fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

impl<T> CorrelatedBy for Accept<T> {
    fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

impl<T> CorrelatedBy for Accepted<T> {
    fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

impl<T> CorrelatedBy for ValueDecided<T> {
    fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

impl<T> CorrelatedBy for ProtocolMessage<T> {
    fn correlation_id(&self) -> CorrelationId {
        match self {
            ProtocolMessage::Prepare(m) => m.correlation_id,
            ProtocolMessage::Promise(m) => m.correlation_id,
            ProtocolMessage::Nack(m) => m.correlation_id,
            ProtocolMessage::Accept(m) => m.correlation_id,
            ProtocolMessage::Accepted(m) => m.correlation_id,
            ProtocolMessage::ValueDecided(m) => m.correlation_id,
        }
    }
}
