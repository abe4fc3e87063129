use clap::{Parser, Subcommand};
use omniverse_cli::commands::{HELP, SHOUT_SCOPE};
use omniverse_cli::{CliError, InputCommand, LogConfig, Result};
use omniverse_p2p::application::DEFAULT_RELAY_URL;
use omniverse_p2p::{
    FileIdentityStore, IdentityStore, Omniverse, OmniverseConfig, OmniverseEvent,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "omniverse-cli")]
#[command(version, about = "Omniverse CLI - join planes and talk to peers")]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Write a Chrome trace (needs the chrome-trace feature)
    #[arg(long, global = true)]
    chrome_trace: bool,

    /// Identity file (defaults to the user data directory)
    #[arg(long, global = true, env = "OMNIVERSE_IDENTITY")]
    identity: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enter a plane and chat with its peers
    Join {
        /// Relay WebSocket URL
        #[arg(short = 'r', long, env = "OMNIVERSE_RELAY", default_value = DEFAULT_RELAY_URL)]
        relay: String,

        /// Plane to enter (the shared default plane if omitted)
        #[arg(short = 'p', long)]
        plane: Option<String>,

        /// Only connect when asked with /connect
        #[arg(long)]
        manual: bool,

        /// STUN/TURN urls for direct connections
        #[arg(long = "ice-server")]
        ice_servers: Vec<String>,
    },

    /// Heartbeat the relay once
    Ping {
        /// Relay WebSocket URL
        #[arg(short = 'r', long, env = "OMNIVERSE_RELAY", default_value = DEFAULT_RELAY_URL)]
        relay: String,

        /// Memo echoed by the relay
        #[arg(short = 'm', long, default_value = "lub")]
        memo: String,
    },

    /// Print the local peer id, creating an identity if none exists
    Whoami,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::dev()
    } else {
        LogConfig::default()
    };
    if cli.json_logs {
        log_config = log_config.with_json();
    }
    if cli.chrome_trace {
        log_config = log_config.with_chrome_trace();
    }
    log_config.init()?;

    let identity = identity_store(cli.identity)?;

    match cli.command {
        Commands::Join {
            relay,
            plane,
            manual,
            ice_servers,
        } => {
            let mut config = OmniverseConfig::new(relay).with_auto_peer(!manual);
            if let Some(plane) = plane {
                config = config.with_plane(plane);
            }
            let session = build_session(config, identity, ice_servers)?;
            join(session).await?;
        }
        Commands::Ping { relay, memo } => {
            let config = OmniverseConfig::new(relay).with_auto_peer(false);
            let session = build_session(config, identity, Vec::new())?;
            session.boot().await?;
            let ack = session.ping_relay(&memo).await?;
            info!("💓 {} → {}", memo, ack);
            session.deconstruct();
        }
        Commands::Whoami => {
            let local = identity.load_or_create().await?;
            println!("{}", local.peer_id);
        }
    }

    Ok(())
}

fn identity_store(path: Option<PathBuf>) -> Result<Arc<FileIdentityStore>> {
    let path = path
        .or_else(FileIdentityStore::default_path)
        .ok_or_else(|| {
            CliError::InvalidConfig("no data directory, pass --identity".to_string())
        })?;
    Ok(Arc::new(FileIdentityStore::new(path)))
}

fn build_session(
    config: OmniverseConfig,
    identity: Arc<FileIdentityStore>,
    ice_servers: Vec<String>,
) -> Result<Omniverse> {
    let builder = Omniverse::builder(config).with_identity_store(identity);

    #[cfg(feature = "webrtc")]
    let builder = {
        use omniverse_p2p::infrastructure::WebRtcTransportFactory;
        if ice_servers.is_empty() {
            builder.with_transports(Arc::new(WebRtcTransportFactory::default()))
        } else {
            builder.with_transports(Arc::new(WebRtcTransportFactory::new(ice_servers)))
        }
    };
    #[cfg(not(feature = "webrtc"))]
    if !ice_servers.is_empty() {
        warn!("Ignoring ICE servers, built without WebRTC");
    }

    Ok(builder.build()?)
}

async fn join(session: Omniverse) -> Result<()> {
    let mut events = session.subscribe();
    let local = session.boot().await?;

    info!("✓ Joined plane '{}' as {}", session.current_plane(), local);
    info!("Type a message to shout, /help for commands, Ctrl+C to exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match InputCommand::parse(&line) {
                    Ok(Some(InputCommand::Quit)) => break,
                    Ok(Some(command)) => run_command(&session, command).await,
                    Ok(None) => {}
                    Err(e) => warn!("{}", e),
                }
            }
            event = events.recv() => match event {
                Ok(event) => show_event(&event),
                Err(RecvError::Lagged(missed)) => warn!("Missed {} events", missed),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    session.deconstruct();
    Ok(())
}

async fn run_command(session: &Omniverse, command: InputCommand) {
    match command {
        InputCommand::Shout(text) => {
            let reached = session
                .plane(session.current_plane())
                .broadcast(SHOUT_SCOPE, json!(text));
            if reached == 0 {
                warn!("Nobody is connected yet");
            }
        }
        InputCommand::Peers => {
            for peer in session.registry().all() {
                info!("  {} {:?}", peer.uid(), peer.status());
            }
        }
        InputCommand::Offers => {
            for offer in session.connection_offers() {
                info!("  {} {:?}", offer.remote_uid, offer.status);
            }
        }
        InputCommand::Connect(peer) => match session.connect_to_peer(&peer).await {
            Ok(_) => info!("🟢 Connected to {}", peer),
            Err(e) => warn!("Failed to connect to {}: {}", peer, e),
        },
        InputCommand::Call {
            peer,
            method,
            payload,
        } => match session.registry().get(&peer) {
            Some(handle) => {
                let response = handle.send_call(&method, payload).await;
                info!("📞 {}.{} → {:?}", peer, method, response);
            }
            None => warn!("Unknown peer {}", peer),
        },
        InputCommand::Enter(plane) => {
            if let Err(e) = session.enter_plane(plane) {
                warn!("{}", e);
            }
        }
        InputCommand::Leave(plane) => {
            if let Err(e) = session.leave_plane(plane) {
                warn!("{}", e);
            }
        }
        InputCommand::Ping(memo) => match session.ping_relay(&memo).await {
            Ok(ack) => info!("💓 {} → {}", memo, ack),
            Err(e) => warn!("{}", e),
        },
        InputCommand::Help => info!("\n{}", HELP),
        InputCommand::Quit => {}
    }
}

fn show_event(event: &OmniverseEvent) {
    match event {
        OmniverseEvent::PeerJoin { peer, plane } => info!("👋 {} joined {}", peer, plane),
        OmniverseEvent::PeerLeave { peer, .. } => info!("🚪 {} left", peer),
        OmniverseEvent::PeerConnected { peer } => info!("🟢 Connected to {}", peer),
        OmniverseEvent::PeerDisconnected { peer } => info!("🔴 Lost {}", peer),
        OmniverseEvent::PeerMessage {
            peer,
            scope,
            payload,
        } => match payload.as_str() {
            Some(text) if scope == SHOUT_SCOPE => info!("💬 {}: {}", peer.short(), text),
            _ => info!("📨 {} [{}] {}", peer.short(), scope, payload),
        },
        OmniverseEvent::RelayConnected => info!("Relay connected"),
        OmniverseEvent::RelayDisconnected => warn!("Relay lost, reconnecting..."),
        OmniverseEvent::RelayReconnected => info!("Relay reconnected"),
    }
}
