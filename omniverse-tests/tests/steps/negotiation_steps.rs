use cucumber::{given, then, when};
use omniverse_p2p::domain::{NegotiationAction, NegotiationEvent, OfferStatus};
use omniverse_p2p::PeerId;
use omniverse_tests::OmniverseWorld;

fn status_named(name: &str) -> Option<OfferStatus> {
    match name {
        "absent" => None,
        "pending" => Some(OfferStatus::Pending),
        "offered" => Some(OfferStatus::Offered),
        "offer_received" => Some(OfferStatus::OfferReceived),
        "answered" => Some(OfferStatus::Answered),
        "answer_received" => Some(OfferStatus::AnswerReceived),
        "open" => Some(OfferStatus::Open),
        "closed" => Some(OfferStatus::Closed),
        other => panic!("Unknown offer status '{}'", other),
    }
}

fn action_named(name: &str) -> NegotiationAction {
    match name {
        "none" => NegotiationAction::None,
        "send_offer" => NegotiationAction::SendOffer,
        "reset_and_offer" => NegotiationAction::ResetAndOffer,
        "send_answer" => NegotiationAction::SendAnswer,
        "reset_and_answer" => NegotiationAction::ResetAndAnswer,
        "apply_answer" => NegotiationAction::ApplyAnswer,
        "ignore" => NegotiationAction::Ignore,
        other => panic!("Unknown negotiation action '{}'", other),
    }
}

fn apply(world: &mut OmniverseWorld, local: &str, remote: &str, event: NegotiationEvent) {
    let result = world.ledger(local).apply(&PeerId::from(remote), event);
    match result {
        Ok(step) => {
            world.last_action = Some(step.action);
            world.last_error = None;
        }
        Err(e) => {
            world.last_action = None;
            world.last_error = Some(e.to_string());
        }
    }
}

// ===== Given Steps =====

#[given(expr = "{string} has offered to {string}")]
async fn has_offered(world: &mut OmniverseWorld, local: String, remote: String) {
    apply(world, &local, &remote, NegotiationEvent::Initiate);
    apply(world, &local, &remote, NegotiationEvent::OfferSent);
    assert_eq!(
        world.ledger(&local).status(&PeerId::from(remote)),
        Some(OfferStatus::Offered)
    );
}

#[given(expr = "{string} is connected to {string}")]
async fn has_connected(world: &mut OmniverseWorld, local: String, remote: String) {
    apply(world, &local, &remote, NegotiationEvent::Initiate);
    apply(world, &local, &remote, NegotiationEvent::OfferSent);
    apply(world, &local, &remote, NegotiationEvent::AnswerReceived);
    apply(world, &local, &remote, NegotiationEvent::Connected);
}

// ===== When Steps =====

#[when(expr = "an offer from {string} arrives at {string}")]
async fn offer_arrives(world: &mut OmniverseWorld, remote: String, local: String) {
    apply(world, &local, &remote, NegotiationEvent::OfferReceived);
}

#[when(expr = "{string} initiates a connection to {string}")]
async fn initiates(world: &mut OmniverseWorld, local: String, remote: String) {
    apply(world, &local, &remote, NegotiationEvent::Initiate);
}

// ===== Then Steps =====

#[then(expr = "the requested action is {string}")]
async fn requested_action(world: &mut OmniverseWorld, action: String) {
    assert_eq!(world.last_action, Some(action_named(&action)));
}

#[then(expr = "the ledger of {string} shows {string} as {string}")]
async fn ledger_shows(world: &mut OmniverseWorld, local: String, remote: String, status: String) {
    assert_eq!(
        world.ledger(&local).status(&PeerId::from(remote)),
        status_named(&status)
    );
}

#[then(expr = "the attempt fails with {string}")]
async fn attempt_fails(world: &mut OmniverseWorld, message: String) {
    assert_eq!(world.last_error.as_deref(), Some(message.as_str()));
}
