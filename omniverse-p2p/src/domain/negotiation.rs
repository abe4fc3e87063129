//! Handshake state machine for one (local, remote) pair.
//!
//! [`step`] is pure: given the current ledger status and an event it returns
//! the next status plus the side effect the caller has to perform. Glare
//! (both sides offering at once) is settled by comparing peer ids: the
//! lexically lower id is the designated initiator and keeps its own offer,
//! the higher id abandons its attempt and answers.

use crate::domain::offer::OfferStatus;
use omniverse_core::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationEvent {
    /// Local side asked to connect
    Initiate,
    /// Local offer was produced and sent
    OfferSent,
    /// Remote offer arrived through the relay
    OfferReceived,
    /// Local answer was produced and sent
    AnswerSent,
    /// Remote answer arrived through the relay
    AnswerReceived,
    /// Transport reported it is open
    Connected,
    /// Transport failed or was closed
    Failed,
}

/// Side effect requested by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationAction {
    /// Nothing beyond recording the status
    None,
    /// Allocate an initiator transport and send our offer
    SendOffer,
    /// Destroy the open connection, then send a fresh offer
    ResetAndOffer,
    /// Allocate a responder transport and answer the remote offer
    SendAnswer,
    /// Destroy the current connection or attempt, then answer the remote offer
    ResetAndAnswer,
    /// Feed the remote answer into the existing transport
    ApplyAnswer,
    /// Drop the incoming signal, we keep our own attempt
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Status to record, `None` keeps the ledger unchanged
    pub next: Option<OfferStatus>,
    pub action: NegotiationAction,
}

impl Step {
    fn to(next: OfferStatus, action: NegotiationAction) -> Self {
        Self {
            next: Some(next),
            action,
        }
    }

    fn ignore() -> Self {
        Self {
            next: None,
            action: NegotiationAction::Ignore,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    #[error("Peer connection already initiated")]
    AlreadyInitiated,

    #[error("Unexpected {event:?} while handshake is {status}")]
    UnexpectedEvent {
        status: String,
        event: NegotiationEvent,
    },
}

impl NegotiationError {
    fn unexpected(status: Option<OfferStatus>, event: NegotiationEvent) -> Self {
        NegotiationError::UnexpectedEvent {
            status: status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "absent".to_string()),
            event,
        }
    }
}

/// Whether `local` is the designated initiator towards `remote`
pub fn should_originate(local: &PeerId, remote: &PeerId) -> bool {
    local < remote
}

pub fn step(
    current: Option<OfferStatus>,
    event: NegotiationEvent,
    local: &PeerId,
    remote: &PeerId,
) -> Result<Step, NegotiationError> {
    use NegotiationAction as A;
    use OfferStatus as S;

    match (event, current) {
        (NegotiationEvent::Initiate, None | Some(S::Closed)) => {
            Ok(Step::to(S::Pending, A::SendOffer))
        }
        (NegotiationEvent::Initiate, Some(S::Open)) => Ok(Step::to(S::Pending, A::ResetAndOffer)),
        (NegotiationEvent::Initiate, Some(_)) => Err(NegotiationError::AlreadyInitiated),

        (NegotiationEvent::OfferSent, Some(S::Pending)) => Ok(Step::to(S::Offered, A::None)),

        (NegotiationEvent::OfferReceived, None | Some(S::Closed)) => {
            Ok(Step::to(S::OfferReceived, A::SendAnswer))
        }
        (NegotiationEvent::OfferReceived, Some(S::Open)) => {
            Ok(Step::to(S::OfferReceived, A::ResetAndAnswer))
        }
        (NegotiationEvent::OfferReceived, Some(status)) if status.is_local_attempt() => {
            if should_originate(local, remote) {
                Ok(Step::ignore())
            } else {
                Ok(Step::to(S::OfferReceived, A::ResetAndAnswer))
            }
        }
        // The remote restarted the handshake it had already offered
        (NegotiationEvent::OfferReceived, Some(S::OfferReceived | S::Answered)) => {
            Ok(Step::to(S::OfferReceived, A::ResetAndAnswer))
        }

        (NegotiationEvent::AnswerSent, Some(S::OfferReceived)) => {
            Ok(Step::to(S::Answered, A::None))
        }

        (NegotiationEvent::AnswerReceived, Some(S::Offered)) => {
            Ok(Step::to(S::AnswerReceived, A::ApplyAnswer))
        }

        (NegotiationEvent::Connected, Some(status)) if status.is_in_flight() => {
            Ok(Step::to(S::Open, A::None))
        }
        (NegotiationEvent::Connected, Some(S::Open)) => Ok(Step::to(S::Open, A::None)),

        (NegotiationEvent::Failed, _) => Ok(Step::to(S::Closed, A::None)),

        (event, status) => Err(NegotiationError::unexpected(status, event)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (PeerId, PeerId) {
        (PeerId::from("aaaa"), PeerId::from("bbbb"))
    }

    #[test]
    fn test_should_originate_is_lexical() {
        let (low, high) = ids();
        assert!(should_originate(&low, &high));
        assert!(!should_originate(&high, &low));
        assert!(!should_originate(&low, &low));
    }

    #[test]
    fn test_initiator_happy_path() {
        let (local, remote) = ids();
        let s = step(None, NegotiationEvent::Initiate, &local, &remote).unwrap();
        assert_eq!(s, Step::to(OfferStatus::Pending, NegotiationAction::SendOffer));

        let s = step(s.next, NegotiationEvent::OfferSent, &local, &remote).unwrap();
        assert_eq!(s.next, Some(OfferStatus::Offered));

        let s = step(s.next, NegotiationEvent::AnswerReceived, &local, &remote).unwrap();
        assert_eq!(
            s,
            Step::to(OfferStatus::AnswerReceived, NegotiationAction::ApplyAnswer)
        );

        let s = step(s.next, NegotiationEvent::Connected, &local, &remote).unwrap();
        assert_eq!(s.next, Some(OfferStatus::Open));
    }

    #[test]
    fn test_responder_happy_path() {
        let (local, remote) = ids();
        let s = step(None, NegotiationEvent::OfferReceived, &local, &remote).unwrap();
        assert_eq!(
            s,
            Step::to(OfferStatus::OfferReceived, NegotiationAction::SendAnswer)
        );

        let s = step(s.next, NegotiationEvent::AnswerSent, &local, &remote).unwrap();
        assert_eq!(s.next, Some(OfferStatus::Answered));

        let s = step(s.next, NegotiationEvent::Connected, &local, &remote).unwrap();
        assert_eq!(s.next, Some(OfferStatus::Open));
    }

    #[test]
    fn test_glare_lower_id_keeps_its_offer() {
        let (low, high) = ids();
        for status in [OfferStatus::Pending, OfferStatus::Offered] {
            let s = step(Some(status), NegotiationEvent::OfferReceived, &low, &high).unwrap();
            assert_eq!(s.action, NegotiationAction::Ignore);
            assert_eq!(s.next, None);
        }
    }

    #[test]
    fn test_glare_higher_id_yields_and_answers() {
        let (low, high) = ids();
        for status in [OfferStatus::Pending, OfferStatus::Offered] {
            let s = step(Some(status), NegotiationEvent::OfferReceived, &high, &low).unwrap();
            assert_eq!(
                s,
                Step::to(OfferStatus::OfferReceived, NegotiationAction::ResetAndAnswer)
            );
        }
    }

    #[test]
    fn test_offer_on_open_connection_resets() {
        let (local, remote) = ids();
        let s = step(
            Some(OfferStatus::Open),
            NegotiationEvent::OfferReceived,
            &local,
            &remote,
        )
        .unwrap();
        assert_eq!(s.action, NegotiationAction::ResetAndAnswer);
        assert_eq!(s.next, Some(OfferStatus::OfferReceived));
    }

    #[test]
    fn test_initiate_while_in_flight_is_rejected() {
        let (local, remote) = ids();
        for status in [
            OfferStatus::Pending,
            OfferStatus::Offered,
            OfferStatus::OfferReceived,
            OfferStatus::Answered,
            OfferStatus::AnswerReceived,
        ] {
            assert_eq!(
                step(Some(status), NegotiationEvent::Initiate, &local, &remote),
                Err(NegotiationError::AlreadyInitiated)
            );
        }
    }

    #[test]
    fn test_initiate_on_open_connection_tears_down() {
        let (local, remote) = ids();
        let s = step(
            Some(OfferStatus::Open),
            NegotiationEvent::Initiate,
            &local,
            &remote,
        )
        .unwrap();
        assert_eq!(
            s,
            Step::to(OfferStatus::Pending, NegotiationAction::ResetAndOffer)
        );
    }

    #[test]
    fn test_answer_requires_offered() {
        let (local, remote) = ids();
        for status in [
            None,
            Some(OfferStatus::Pending),
            Some(OfferStatus::Answered),
            Some(OfferStatus::Open),
        ] {
            assert!(matches!(
                step(status, NegotiationEvent::AnswerReceived, &local, &remote),
                Err(NegotiationError::UnexpectedEvent { .. })
            ));
        }
    }

    #[test]
    fn test_failure_closes_from_anywhere() {
        let (local, remote) = ids();
        for status in [None, Some(OfferStatus::Offered), Some(OfferStatus::Open)] {
            let s = step(status, NegotiationEvent::Failed, &local, &remote).unwrap();
            assert_eq!(s.next, Some(OfferStatus::Closed));
        }
    }

    #[test]
    fn test_glare_resolution_is_symmetric() {
        let (a, b) = ids();
        let at_a = step(Some(OfferStatus::Offered), NegotiationEvent::OfferReceived, &a, &b)
            .unwrap();
        let at_b = step(Some(OfferStatus::Offered), NegotiationEvent::OfferReceived, &b, &a)
            .unwrap();
        // exactly one side yields
        assert_ne!(
            at_a.action == NegotiationAction::Ignore,
            at_b.action == NegotiationAction::Ignore
        );
    }
}
