use cucumber::{then, when};
use omniverse_core::Packet;
use omniverse_tests::OmniverseWorld;

#[when(expr = "the frame {string} is decoded")]
async fn decode_frame(world: &mut OmniverseWorld, frame: String) {
    world.decoded = Some(Packet::decode(&frame).map_err(|e| e.to_string()));
}

#[then(expr = "a {string} packet is produced")]
async fn packet_produced(world: &mut OmniverseWorld, kind: String) {
    match world.decoded.as_ref().expect("nothing decoded") {
        Ok(packet) => assert_eq!(packet.kind().as_str(), kind),
        Err(e) => panic!("decode failed: {}", e),
    }
}

#[then(expr = "decoding fails with {string}")]
async fn decoding_fails(world: &mut OmniverseWorld, message: String) {
    match world.decoded.as_ref().expect("nothing decoded") {
        Ok(packet) => panic!("decoded {:?}", packet),
        Err(e) => assert!(e.contains(&message), "expected '{}' in '{}'", message, e),
    }
}
