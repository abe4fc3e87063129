use cucumber::{given, then, when};
use omniverse_p2p::{PeerHandle, PeerId, PeerRegistry};
use omniverse_tests::OmniverseWorld;

// ===== Given Steps =====

#[given("an empty peer registry")]
async fn empty_registry(world: &mut OmniverseWorld) {
    world.registry = PeerRegistry::new();
}

// ===== When Steps =====

#[when(expr = "{int} peers are registered in plane {string}")]
async fn register_many(world: &mut OmniverseWorld, count: usize, plane: String) {
    let scoped = world.registry.plane(plane.as_str());
    for i in 0..count {
        let id = PeerId::from(format!("{}-{}", plane, i));
        assert!(scoped.register(&id).unwrap());
    }
}

#[when(expr = "peer {string} is registered in plane {string}")]
async fn register_one(world: &mut OmniverseWorld, peer: String, plane: String) {
    if let Err(e) = world.registry.plane(plane.as_str()).register(&PeerId::from(peer)) {
        world.last_error = Some(e.to_string());
    }
}

#[when(expr = "peer {string} is registered without a plane")]
async fn register_unscoped(world: &mut OmniverseWorld, peer: String) {
    match world.registry.unscoped().register(&PeerId::from(peer)) {
        Ok(_) => world.last_error = None,
        Err(e) => world.last_error = Some(e.to_string()),
    }
}

#[when(expr = "peer {string} is removed from plane {string}")]
async fn remove_from_plane(world: &mut OmniverseWorld, peer: String, plane: String) {
    world
        .registry
        .plane(plane.as_str())
        .remove_by_uid(&PeerId::from(peer));
}

// ===== Then Steps =====

#[then(expr = "the unscoped registry holds {int} peers")]
async fn unscoped_holds(world: &mut OmniverseWorld, count: usize) {
    assert_eq!(world.registry.unscoped().all().len(), count);
}

#[then(expr = "plane {string} holds {int} peers")]
async fn plane_holds(world: &mut OmniverseWorld, plane: String, count: usize) {
    assert_eq!(world.registry.plane(plane.as_str()).all().len(), count);
}

fn listed(peers: &[PeerHandle]) -> Vec<String> {
    peers.iter().map(|peer| peer.uid().to_string()).collect()
}

fn expected(list: &str) -> Vec<String> {
    list.split(',').map(|id| id.trim().to_string()).collect()
}

#[then(expr = "plane {string} lists {string}")]
async fn plane_lists(world: &mut OmniverseWorld, plane: String, peers: String) {
    let all = world.registry.plane(plane.as_str()).all();
    assert_eq!(listed(&all), expected(&peers));
}

#[then(expr = "the unscoped registry lists {string}")]
async fn unscoped_lists(world: &mut OmniverseWorld, peers: String) {
    let all = world.registry.unscoped().all();
    assert_eq!(listed(&all), expected(&peers));
}

#[then(expr = "the registry rejects the write with {string}")]
async fn rejected_with(world: &mut OmniverseWorld, message: String) {
    let error = world.last_error.as_deref().expect("write was accepted");
    assert!(
        error.contains(&message),
        "expected '{}' in '{}'",
        message,
        error
    );
}

#[then(expr = "peer {string} is known")]
async fn peer_known(world: &mut OmniverseWorld, peer: String) {
    assert!(world.registry.unscoped().contains(&PeerId::from(peer)));
}

#[then(expr = "peer {string} is unknown")]
async fn peer_unknown(world: &mut OmniverseWorld, peer: String) {
    assert!(!world.registry.unscoped().contains(&PeerId::from(peer)));
}
