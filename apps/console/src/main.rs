use std::{sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use huddle_config::{load as load_config, AppConfig};
use huddle_invitations::{BusEvent, Connection, DeclineTarget, RemoteUser, SessionHandle};
use huddle_runtime::{
    local_chat::LocalChatApi, loopback::LoopbackHub, presence::StaticPresence, telemetry,
    InvitationServices,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;
use tracing::{info, warn};

const OUTCOME_TIMEOUT: Duration = Duration::from_secs(10);
const SESSION_BIND_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "huddle")]
#[command(about = "Huddle chat invitations (demo by default)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as JSON
    Config,
    /// Run alice and bob in-process and let alice invite bob
    Demo(DemoArgs),
}

#[derive(Args, Default)]
struct DemoArgs {
    /// Bob declines instead of accepting
    #[arg(long)]
    decline: bool,
    /// Bob is unavailable and declines automatically
    #[arg(long)]
    busy: bool,
    /// Create chats through the configured HTTP chat API
    #[arg(long)]
    http: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Demo(DemoArgs::default())) {
        Commands::Config => print_config(),
        Commands::Demo(args) => run_demo(args).await,
    }
}

fn print_config() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    let rendered =
        serde_json::to_string_pretty(&config).context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

async fn run_demo(args: DemoArgs) -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    telemetry::init_tracing(&config.telemetry).context("failed to initialise tracing")?;

    info!(decline = args.decline, busy = args.busy, http = args.http, "starting invitation demo");

    let hub = LoopbackHub::new();
    let alice_user = RemoteUser::new("alice", Connection::new("conn-alice"));
    let bob_user = RemoteUser::new("bob", Connection::new("conn-bob"));

    let alice = start_peer(
        &config,
        &hub,
        &alice_user,
        StaticPresence::new(true).with_user(bob_user.clone()),
        args.http,
    )
    .await?;
    let bob = start_peer(
        &config,
        &hub,
        &bob_user,
        StaticPresence::new(!args.busy).with_user(alice_user.clone()),
        args.http,
    )
    .await?;

    log_events("alice", &alice);
    log_events("bob", &bob);
    respond_as_invitee(&bob, args.decline);
    let mut outcome = alice.dispatcher.subscribe();

    alice
        .coordinator
        .invite_remote_user(bob_user)
        .context("alice could not send the invitation")?;

    tokio::select! {
        result = timeout(OUTCOME_TIMEOUT, wait_for_outcome(&mut outcome)) => {
            match result {
                Ok(Some(event)) => info!(outcome = event.event_type_name(), "demo finished"),
                Ok(None) => warn!("alice's dispatcher closed before an outcome"),
                Err(_) => warn!(timeout = ?OUTCOME_TIMEOUT, "no outcome for alice's invitation"),
            }
        }
        _ = huddle_runtime::shutdown_signal() => {}
    }

    alice.shutdown().await?;
    bob.shutdown().await?;
    Ok(())
}

async fn start_peer(
    config: &AppConfig,
    hub: &LoopbackHub,
    user: &RemoteUser,
    presence: StaticPresence,
    http: bool,
) -> anyhow::Result<InvitationServices> {
    let services = if http {
        InvitationServices::initialise(config)?
    } else {
        InvitationServices::with_chat_api(config, Arc::new(LocalChatApi::new()))
    };

    presence.spawn(services.dispatcher.clone());

    let session = hub.connect(user.connection.connection_id.clone());
    let handle: SessionHandle = session.clone();
    services
        .dispatcher
        .trigger(BusEvent::PresenceSessionReady(handle));
    if !session.wait_for_listener(SESSION_BIND_TIMEOUT).await {
        anyhow::bail!("{} never bound its signaling session", user.name);
    }
    info!(user = %user.name, connection_id = %user.connection.connection_id, "peer online");

    Ok(services)
}

fn log_events(name: &'static str, services: &InvitationServices) {
    let mut events = services.dispatcher.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(invitation) = event.invitation() {
                        info!(
                            peer = name,
                            event = event.event_type_name(),
                            invitation_id = %invitation.id(),
                            counterparty = %invitation.counterparty().name,
                            session_id = invitation.session_id().unwrap_or("-"),
                            "invitation event"
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(peer = name, skipped, "event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn respond_as_invitee(services: &InvitationServices, decline: bool) {
    let mut events = services.dispatcher.subscribe();
    let coordinator = services.coordinator.clone();
    tokio::spawn(async move {
        loop {
            let invitation = match events.recv().await {
                Ok(BusEvent::InvitationReceived(invitation)) => invitation,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };

            let result = if decline {
                coordinator.decline_invitation(DeclineTarget::Invitation(invitation.id()))
            } else {
                coordinator.accept_invitation(invitation.id())
            };
            if let Err(error) = result {
                warn!(%error, "bob could not answer the invitation");
                break;
            }
        }
    });
}

async fn wait_for_outcome(
    events: &mut tokio::sync::broadcast::Receiver<BusEvent>,
) -> Option<BusEvent> {
    loop {
        match events.recv().await {
            Ok(event @ (BusEvent::InvitationAccepted(_) | BusEvent::InvitationDeclined(_))) => {
                return Some(event)
            }
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return None,
        }
    }
}
