use cucumber::{given, then, when};
use omniverse_p2p::{OmniverseConfig, PeerId};
use omniverse_tests::{eventually, OmniverseWorld};
use serde_json::json;

// ===== Given Steps =====

#[given(expr = "peer {string} in plane {string}")]
async fn peer_in_plane(world: &mut OmniverseWorld, name: String, plane: String) {
    world
        .join(&name, OmniverseConfig::default().with_plane(plane))
        .await;
}

#[given(expr = "manual peer {string} in plane {string}")]
async fn manual_peer_in_plane(world: &mut OmniverseWorld, name: String, plane: String) {
    world
        .join(
            &name,
            OmniverseConfig::default()
                .with_plane(plane)
                .with_auto_peer(false),
        )
        .await;
}

// ===== When Steps =====

#[when(expr = "{string} shouts {string} in plane {string}")]
async fn shouts(world: &mut OmniverseWorld, name: String, text: String, plane: String) {
    let reached = world
        .session(&name)
        .plane(plane.as_str())
        .broadcast("shout", json!(text));
    assert!(reached > 0, "'{}' has nobody to shout at", name);
}

#[when(expr = "{string} connects to {string}")]
async fn connects(world: &mut OmniverseWorld, name: String, remote: String) {
    let session = world.session(&name).clone();
    if let Err(e) = session.connect_to_peer(&PeerId::from(remote)).await {
        world.last_error = Some(e.to_string());
    }
}

#[when(expr = "{string} leaves plane {string}")]
async fn leaves(world: &mut OmniverseWorld, name: String, plane: String) {
    world
        .session(&name)
        .leave_plane(plane)
        .expect("leave_plane succeeds");
}

#[when(expr = "{string} goes offline")]
async fn goes_offline(world: &mut OmniverseWorld, name: String) {
    world.session(&name).deconstruct();
}

// ===== Then Steps =====

#[then(expr = "{string} knows {string}")]
async fn knows(world: &mut OmniverseWorld, name: String, remote: String) {
    let session = world.session(&name).clone();
    let remote = PeerId::from(remote);
    eventually("the peer is registered", || {
        session.registry().contains(&remote)
    })
    .await;
}

#[then(expr = "{string} does not know {string}")]
async fn does_not_know(world: &mut OmniverseWorld, name: String, remote: String) {
    let session = world.session(&name).clone();
    let remote = PeerId::from(remote);
    eventually("the peer is forgotten", || {
        !session.registry().contains(&remote)
    })
    .await;
}

#[then(expr = "{string} is connected to {string}")]
async fn is_connected(world: &mut OmniverseWorld, name: String, remote: String) {
    let session = world.session(&name).clone();
    let remote = PeerId::from(remote);
    eventually("the connection is open", || {
        session
            .registry()
            .get(&remote)
            .map_or(false, |peer| peer.is_ready())
    })
    .await;
}

#[then(expr = "{string} hears {string} from {string}")]
async fn hears(world: &mut OmniverseWorld, name: String, text: String, from: String) {
    let heard = world.heard.clone();
    let expected = (name, from, json!(text));
    eventually("the message arrives", || {
        heard.lock().unwrap().contains(&expected)
    })
    .await;
}

#[then(expr = "the relay holds {int} sockets")]
async fn relay_holds(world: &mut OmniverseWorld, count: usize) {
    use omniverse::server::ConnectionRepository;
    let relay = world.relay.clone();
    let mut sockets = usize::MAX;
    for _ in 0..100 {
        sockets = relay.storage().get_all_connections().await.unwrap().len();
        if sockets == count {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(sockets, count);
}
