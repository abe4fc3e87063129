use crate::domain::negotiation::{self, NegotiationError, NegotiationEvent, Step};
use omniverse_core::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Progress of a single handshake with one remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    /// We decided to connect and are producing our offer
    Pending,
    /// Our offer went out through the relay
    Offered,
    /// A remote offer arrived and we are producing the answer
    OfferReceived,
    /// Our answer went out through the relay
    Answered,
    /// The remote answer arrived and was fed to the transport
    AnswerReceived,
    /// Transport is open
    Open,
    /// Handshake failed or the connection was closed
    Closed,
}

impl OfferStatus {
    /// Whether a handshake is still being negotiated
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            OfferStatus::Pending
                | OfferStatus::Offered
                | OfferStatus::OfferReceived
                | OfferStatus::Answered
                | OfferStatus::AnswerReceived
        )
    }

    /// Whether the local side originated this handshake
    pub fn is_local_attempt(&self) -> bool {
        matches!(
            self,
            OfferStatus::Pending | OfferStatus::Offered | OfferStatus::AnswerReceived
        )
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OfferStatus::Pending => "pending",
            OfferStatus::Offered => "offered",
            OfferStatus::OfferReceived => "offer_received",
            OfferStatus::Answered => "answered",
            OfferStatus::AnswerReceived => "answer_received",
            OfferStatus::Open => "open",
            OfferStatus::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOffer {
    pub remote_uid: PeerId,
    pub status: OfferStatus,
}

/// In-flight and settled handshakes keyed by remote peer id.
///
/// Every mutation goes through [`OfferLedger::apply`], which runs the
/// negotiation state machine and only records the next status when the
/// transition is legal.
#[derive(Debug, Clone, Default)]
pub struct OfferLedger {
    local: PeerId,
    offers: HashMap<PeerId, OfferStatus>,
}

impl OfferLedger {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            offers: HashMap::new(),
        }
    }

    pub fn local(&self) -> &PeerId {
        &self.local
    }

    pub fn status(&self, remote: &PeerId) -> Option<OfferStatus> {
        self.offers.get(remote).copied()
    }

    pub fn is_in_flight(&self, remote: &PeerId) -> bool {
        self.status(remote)
            .map(|status| status.is_in_flight())
            .unwrap_or(false)
    }

    /// Run `event` against the entry for `remote` and store the outcome
    pub fn apply(
        &mut self,
        remote: &PeerId,
        event: NegotiationEvent,
    ) -> Result<Step, NegotiationError> {
        let current = self.status(remote);
        let step = negotiation::step(current, event, &self.local, remote)?;
        if let Some(next) = step.next {
            self.offers.insert(remote.clone(), next);
        }
        Ok(step)
    }

    pub fn forget(&mut self, remote: &PeerId) -> Option<OfferStatus> {
        self.offers.remove(remote)
    }

    /// Drop every handshake that has not reached `open`, returning the peers
    pub fn drain_in_flight(&mut self) -> Vec<PeerId> {
        let stale: Vec<PeerId> = self
            .offers
            .iter()
            .filter(|(_, status)| status.is_in_flight())
            .map(|(peer, _)| peer.clone())
            .collect();
        for peer in &stale {
            self.offers.remove(peer);
        }
        stale
    }

    pub fn snapshot(&self) -> Vec<ConnectionOffer> {
        let mut offers: Vec<ConnectionOffer> = self
            .offers
            .iter()
            .map(|(remote_uid, status)| ConnectionOffer {
                remote_uid: remote_uid.clone(),
                status: *status,
            })
            .collect();
        offers.sort_by(|a, b| a.remote_uid.cmp(&b.remote_uid));
        offers
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::negotiation::NegotiationAction;

    fn ledger() -> OfferLedger {
        OfferLedger::new(PeerId::from("b-local"))
    }

    #[test]
    fn test_initiate_records_pending() {
        let mut ledger = ledger();
        let remote = PeerId::from("c-remote");

        let step = ledger.apply(&remote, NegotiationEvent::Initiate).unwrap();
        assert_eq!(step.action, NegotiationAction::SendOffer);
        assert_eq!(ledger.status(&remote), Some(OfferStatus::Pending));
        assert!(ledger.is_in_flight(&remote));
    }

    #[test]
    fn test_duplicate_initiate_leaves_entry_untouched() {
        let mut ledger = ledger();
        let remote = PeerId::from("c-remote");

        ledger.apply(&remote, NegotiationEvent::Initiate).unwrap();
        ledger.apply(&remote, NegotiationEvent::OfferSent).unwrap();

        let result = ledger.apply(&remote, NegotiationEvent::Initiate);
        assert!(matches!(result, Err(NegotiationError::AlreadyInitiated)));
        assert_eq!(ledger.status(&remote), Some(OfferStatus::Offered));
    }

    #[test]
    fn test_drain_in_flight_keeps_open_entries() {
        let mut ledger = ledger();
        let open = PeerId::from("open");
        let pending = PeerId::from("pending");

        ledger.apply(&open, NegotiationEvent::OfferReceived).unwrap();
        ledger.apply(&open, NegotiationEvent::AnswerSent).unwrap();
        ledger.apply(&open, NegotiationEvent::Connected).unwrap();
        ledger.apply(&pending, NegotiationEvent::Initiate).unwrap();

        let drained = ledger.drain_in_flight();
        assert_eq!(drained, vec![pending.clone()]);
        assert_eq!(ledger.status(&open), Some(OfferStatus::Open));
        assert_eq!(ledger.status(&pending), None);
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let mut ledger = ledger();
        ledger
            .apply(&PeerId::from("z"), NegotiationEvent::Initiate)
            .unwrap();
        ledger
            .apply(&PeerId::from("c"), NegotiationEvent::OfferReceived)
            .unwrap();

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].remote_uid, PeerId::from("c"));
        assert_eq!(snapshot[0].status, OfferStatus::OfferReceived);
        assert_eq!(snapshot[1].status, OfferStatus::Pending);
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(OfferStatus::OfferReceived.to_string(), "offer_received");
        assert_eq!(
            serde_json::to_string(&OfferStatus::AnswerReceived).unwrap(),
            "\"answer_received\""
        );
    }
}
