//! WebRTC data-channel transport.
//!
//! Signals are complete (non-trickle) session descriptions: ICE gathering is
//! awaited before the offer or answer is emitted, so one relay round trip is
//! enough to open the channel.

use crate::infrastructure::error::{P2PError, Result};
use crate::infrastructure::transport::{
    Transport, TransportEvent, TransportFactory, TransportHandle, TransportOptions, TransportRole,
};
use async_trait::async_trait;
use omniverse_core::PeerId;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

const DATA_CHANNEL_LABEL: &str = "omniverse";
const GATHERING_TIMEOUT: Duration = Duration::from_secs(10);

/// Creates [`WebRtcTransport`]s using the configured STUN/TURN servers
#[derive(Debug, Clone)]
pub struct WebRtcTransportFactory {
    ice_servers: Vec<String>,
}

impl Default for WebRtcTransportFactory {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }

    async fn peer_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(transport_error)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media).map_err(transport_error)?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self
                .ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        Ok(Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(transport_error)?,
        ))
    }
}

fn transport_error(e: webrtc::Error) -> P2PError {
    P2PError::Transport(e.to_string())
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        local: &PeerId,
        remote: &PeerId,
        options: TransportOptions,
    ) -> Result<TransportHandle> {
        if options.trickle {
            warn!("Trickle ICE is not supported, sending complete descriptions");
        }

        let pc = self.peer_connection().await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let transport = Arc::new(WebRtcTransport {
            pc: pc.clone(),
            role: options.role,
            channel: Arc::new(Mutex::new(None)),
            open: Arc::new(AtomicBool::new(false)),
            destroyed: AtomicBool::new(false),
            events: events_tx.clone(),
            outbound: outbound_tx,
        });

        let label = format!("{}→{}", local.short(), remote.short());
        watch_connection_state(&pc, events_tx.clone(), label.clone());
        spawn_writer(transport.channel.clone(), outbound_rx, label.clone());

        match options.role {
            TransportRole::Initiator => {
                let dc = pc
                    .create_data_channel(DATA_CHANNEL_LABEL, None)
                    .await
                    .map_err(transport_error)?;
                transport.bind_channel(dc);

                let pc = pc.clone();
                tokio::spawn(async move {
                    match create_description(&pc, DescriptionKind::Offer).await {
                        Ok(offer) => {
                            let _ = events_tx.send(TransportEvent::Signal(offer));
                        }
                        Err(e) => {
                            let _ = events_tx.send(TransportEvent::Error(e.to_string()));
                        }
                    }
                });
            }
            TransportRole::Responder => {
                let holder = Arc::downgrade(&transport);
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    if let Some(transport) = holder.upgrade() {
                        transport.bind_channel(dc);
                    }
                    Box::pin(async {})
                }));
            }
        }

        info!("📡 WebRTC transport {} ready ({:?})", label, options.role);
        let transport: Arc<dyn Transport> = transport;
        Ok((transport, events_rx))
    }
}

#[derive(Debug, Clone, Copy)]
enum DescriptionKind {
    Offer,
    Answer,
}

async fn create_description(pc: &RTCPeerConnection, kind: DescriptionKind) -> Result<Value> {
    let description = match kind {
        DescriptionKind::Offer => pc.create_offer(None).await,
        DescriptionKind::Answer => pc.create_answer(None).await,
    }
    .map_err(transport_error)?;

    let mut gathering_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(description)
        .await
        .map_err(transport_error)?;
    let _ = tokio::time::timeout(GATHERING_TIMEOUT, gathering_complete.recv()).await;

    let local = pc
        .local_description()
        .await
        .ok_or_else(|| P2PError::SignalFailed("no local description after gathering".into()))?;

    Ok(json!({
        "type": local.sdp_type.to_string().to_lowercase(),
        "sdp": local.sdp,
    }))
}

fn watch_connection_state(
    pc: &RTCPeerConnection,
    events: UnboundedSender<TransportEvent>,
    label: String,
) {
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        debug!("WebRTC {} state: {}", label, state);
        match state {
            RTCPeerConnectionState::Failed => {
                let _ = events.send(TransportEvent::Error("peer connection failed".to_string()));
            }
            RTCPeerConnectionState::Closed | RTCPeerConnectionState::Disconnected => {
                let _ = events.send(TransportEvent::Closed);
            }
            _ => {}
        }
        Box::pin(async {})
    }));
}

/// Drains queued frames in order once the data channel exists
fn spawn_writer(
    channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    mut outbound: UnboundedReceiver<String>,
    label: String,
) {
    tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let dc = channel.lock().ok().and_then(|guard| guard.clone());
            match dc {
                Some(dc) => {
                    if let Err(e) = dc.send_text(frame).await {
                        warn!("WebRTC {} send failed: {}", label, e);
                    }
                }
                None => warn!("WebRTC {} dropped frame, no data channel", label),
            }
        }
    });
}

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    role: TransportRole,
    channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    open: Arc<AtomicBool>,
    destroyed: AtomicBool,
    events: UnboundedSender<TransportEvent>,
    outbound: UnboundedSender<String>,
}

impl WebRtcTransport {
    fn bind_channel(&self, dc: Arc<RTCDataChannel>) {
        let open = self.open.clone();
        let events = self.events.clone();
        dc.on_open(Box::new(move || {
            open.store(true, Ordering::SeqCst);
            let _ = events.send(TransportEvent::Connected);
            Box::pin(async {})
        }));

        let events = self.events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let frame = String::from_utf8_lossy(&msg.data).to_string();
            let _ = events.send(TransportEvent::Data(frame));
            Box::pin(async {})
        }));

        let open = self.open.clone();
        let events = self.events.clone();
        dc.on_close(Box::new(move || {
            open.store(false, Ordering::SeqCst);
            let _ = events.send(TransportEvent::Closed);
            Box::pin(async {})
        }));

        if let Ok(mut guard) = self.channel.lock() {
            *guard = Some(dc);
        }
    }
}

impl Transport for WebRtcTransport {
    fn signal(&self, remote: Value) -> Result<()> {
        let kind = remote
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| P2PError::SignalFailed("signal without type".to_string()))?
            .to_string();
        let sdp = remote
            .get("sdp")
            .and_then(Value::as_str)
            .ok_or_else(|| P2PError::SignalFailed("signal without sdp".to_string()))?
            .to_string();

        let description = match (kind.as_str(), self.role) {
            ("offer", TransportRole::Responder) => RTCSessionDescription::offer(sdp),
            ("answer", TransportRole::Initiator) => RTCSessionDescription::answer(sdp),
            (kind, role) => {
                return Err(P2PError::SignalFailed(format!(
                    "{} is not valid for a {:?}",
                    kind, role
                )))
            }
        }
        .map_err(transport_error)?;

        let pc = self.pc.clone();
        let events = self.events.clone();
        let role = self.role;
        tokio::spawn(async move {
            let result = async {
                pc.set_remote_description(description)
                    .await
                    .map_err(transport_error)?;
                if role == TransportRole::Responder {
                    let answer = create_description(&pc, DescriptionKind::Answer).await?;
                    let _ = events.send(TransportEvent::Signal(answer));
                }
                Ok::<(), P2PError>(())
            }
            .await;

            if let Err(e) = result {
                let _ = events.send(TransportEvent::Error(e.to_string()));
            }
        });
        Ok(())
    }

    fn send(&self, frame: &str) -> Result<()> {
        if !self.is_writable() {
            return Err(P2PError::SendFailed("data channel not open".to_string()));
        }
        self.outbound
            .send(frame.to_string())
            .map_err(|_| P2PError::ChannelClosed)
    }

    fn is_writable(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.destroyed.load(Ordering::SeqCst)
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.open.store(false, Ordering::SeqCst);
        let pc = self.pc.clone();
        tokio::spawn(async move {
            if let Err(e) = pc.close().await {
                warn!("Failed to close peer connection: {}", e);
            }
        });
    }
}
