use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use huddle_config::{AppConfig, TelemetryConfig};
use huddle_invitations::{BusEvent, Connection, DeclineTarget, Invitation, RemoteUser, SessionHandle};
use huddle_runtime::{
    local_chat::LocalChatApi,
    loopback::{LoopbackHub, LoopbackSession},
    presence::StaticPresence,
    InvitationServices,
};
use tokio::{
    sync::broadcast,
    time::{sleep, timeout},
};

const WAIT: Duration = Duration::from_secs(2);

fn build_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.dispatcher.reply_timeout_ms = 500;
    config
}

fn user(name: &str) -> RemoteUser {
    RemoteUser::new(name, Connection::new(format!("conn-{name}")))
}

struct TestPeer {
    services: InvitationServices,
    session: Arc<LoopbackSession>,
    events: broadcast::Receiver<BusEvent>,
}

impl TestPeer {
    async fn join(hub: &LoopbackHub, name: &str, presence: StaticPresence) -> Result<Self> {
        let services =
            InvitationServices::with_chat_api(&build_config(), Arc::new(LocalChatApi::new()));
        let events = services.dispatcher.subscribe();
        presence.spawn(services.dispatcher.clone());

        let session = hub.connect(format!("conn-{name}"));
        let handle: SessionHandle = session.clone();
        services
            .dispatcher
            .trigger(BusEvent::PresenceSessionReady(handle));

        if !session.wait_for_listener(WAIT).await {
            anyhow::bail!("coordinator never subscribed to its session");
        }

        Ok(Self {
            services,
            session,
            events,
        })
    }

    async fn next_event(&mut self) -> Result<BusEvent> {
        timeout(WAIT, async {
            loop {
                let event = self.events.recv().await?;
                if event.invitation().is_some() {
                    return Ok::<_, anyhow::Error>(event);
                }
            }
        })
        .await
        .context("timed out waiting for an invitation event")?
    }

    async fn pending(&self) -> Result<Vec<Invitation>> {
        Ok(self.services.coordinator.pending().await?)
    }
}

async fn pair(bob_available: bool) -> Result<(TestPeer, TestPeer)> {
    let hub = LoopbackHub::new();
    let alice = TestPeer::join(&hub, "alice", StaticPresence::new(true).with_user(user("bob"))).await?;
    let bob = TestPeer::join(
        &hub,
        "bob",
        StaticPresence::new(bob_available).with_user(user("alice")),
    )
    .await?;
    Ok((alice, bob))
}

#[tokio::test(flavor = "multi_thread")]
async fn invitation_accepted_end_to_end() -> Result<()> {
    let (mut alice, mut bob) = pair(true).await?;

    alice.services.coordinator.invite_remote_user(user("bob"))?;

    let sent = match alice.next_event().await? {
        BusEvent::InvitationSent(invitation) => invitation,
        other => anyhow::bail!("expected InvitationSent, got {other:?}"),
    };
    let received = match bob.next_event().await? {
        BusEvent::InvitationReceived(invitation) => invitation,
        other => anyhow::bail!("expected InvitationReceived, got {other:?}"),
    };
    assert_eq!(received.inviter(), Some(&user("alice")));
    assert_eq!(received.session_id(), sent.session_id());
    assert_eq!(received.api_key(), sent.api_key());
    assert!(received.token().is_none(), "tokens never travel");

    bob.services.coordinator.accept_invitation(received.id())?;

    assert!(matches!(
        bob.next_event().await?,
        BusEvent::InvitationAccepted(_)
    ));
    match alice.next_event().await? {
        BusEvent::InvitationAccepted(invitation) => assert_eq!(invitation.id(), sent.id()),
        other => anyhow::bail!("expected InvitationAccepted, got {other:?}"),
    }

    assert!(alice.pending().await?.is_empty());
    assert!(bob.pending().await?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn invitation_declined_end_to_end() -> Result<()> {
    let (mut alice, mut bob) = pair(true).await?;

    alice.services.coordinator.invite_remote_user(user("bob"))?;
    alice.next_event().await?;
    let received = match bob.next_event().await? {
        BusEvent::InvitationReceived(invitation) => invitation,
        other => anyhow::bail!("expected InvitationReceived, got {other:?}"),
    };

    bob.services
        .coordinator
        .decline_invitation(DeclineTarget::Invitation(received.id()))?;

    assert!(matches!(
        alice.next_event().await?,
        BusEvent::InvitationDeclined(_)
    ));
    assert!(alice.pending().await?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn busy_invitee_declines_automatically() -> Result<()> {
    let (mut alice, bob) = pair(false).await?;

    alice.services.coordinator.invite_remote_user(user("bob"))?;
    alice.next_event().await?;

    assert!(matches!(
        alice.next_event().await?,
        BusEvent::InvitationDeclined(_)
    ));
    assert!(bob.pending().await?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_invitation_disappears_on_both_sides() -> Result<()> {
    let (mut alice, mut bob) = pair(true).await?;

    alice.services.coordinator.invite_remote_user(user("bob"))?;
    let sent = match alice.next_event().await? {
        BusEvent::InvitationSent(invitation) => invitation,
        other => anyhow::bail!("expected InvitationSent, got {other:?}"),
    };
    bob.next_event().await?;

    alice.services.coordinator.cancel_invitation(sent.id())?;
    assert!(matches!(
        alice.next_event().await?,
        BusEvent::InvitationCancelled(_)
    ));

    timeout(WAIT, async {
        loop {
            if bob.pending().await?.is_empty() {
                return Ok::<_, anyhow::Error>(());
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .context("bob still lists the cancelled invitation")??;
    assert!(bob.session.listener_count() > 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn initialise_builds_http_backed_services() -> Result<()> {
    let services = InvitationServices::initialise(&AppConfig::default())
        .context("failed to initialise invitation services")?;

    assert!(services.coordinator.pending().await?.is_empty());
    services.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_the_coordinator() -> Result<()> {
    let services =
        InvitationServices::with_chat_api(&build_config(), Arc::new(LocalChatApi::new()));
    let handle = services.coordinator.clone();

    services.shutdown().await?;

    assert!(handle.invite_remote_user(user("bob")).is_err());
    Ok(())
}

#[test]
fn telemetry_init_tracing_sets_global_subscriber() {
    huddle_runtime::telemetry::init_tracing(&TelemetryConfig::default())
        .expect("first initialisation should succeed");

    let second = huddle_runtime::telemetry::init_tracing(&TelemetryConfig::default());
    assert!(
        second.is_err(),
        "initialising telemetry twice should fail with global subscriber already set"
    );
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(not(unix), ignore = "requires Unix signal handling")]
async fn shutdown_signal_completes_on_ctrl_c_notification() -> Result<()> {
    let shutdown_task = tokio::spawn(async { huddle_runtime::shutdown_signal().await });

    sleep(Duration::from_millis(50)).await;
    #[cfg(unix)]
    unsafe {
        libc::raise(libc::SIGINT);
    }

    timeout(Duration::from_secs(2), shutdown_task).await??;
    Ok(())
}
