use std::sync::Arc;

use anyhow::{Context, Result};
use huddle_config::AppConfig;
use huddle_invitations::{ChatApi, CoordinatorHandle, Dispatcher, HttpChatApi, InvitationCoordinator};
use tokio::task::JoinHandle;
use tracing::info;

pub mod local_chat;
pub mod loopback;
pub mod presence;

pub mod telemetry {
    use anyhow::Result;
    use huddle_config::TelemetryConfig;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    /// Install the global subscriber. `RUST_LOG` wins over the configured filter.
    pub fn init_tracing(config: &TelemetryConfig) -> Result<()> {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// Dispatcher plus a running coordinator for one local user
pub struct InvitationServices {
    pub dispatcher: Dispatcher,
    pub coordinator: CoordinatorHandle,
    task: JoinHandle<()>,
}

impl InvitationServices {
    /// Wire services against the HTTP chat API. Must run inside a tokio runtime.
    pub fn initialise(config: &AppConfig) -> Result<Self> {
        let chat_api = HttpChatApi::new(&config.chat_api).context("failed to build chat api client")?;
        info!(base_url = %config.chat_api.base_url, "chat api client ready");

        Ok(Self::with_chat_api(config, Arc::new(chat_api)))
    }

    pub fn with_chat_api(config: &AppConfig, chat_api: Arc<dyn ChatApi>) -> Self {
        let dispatcher = Dispatcher::new(&config.dispatcher);
        let (coordinator, task) = InvitationCoordinator::new(dispatcher.clone(), chat_api).spawn();

        info!(
            channel_capacity = config.dispatcher.channel_capacity,
            reply_timeout_ms = config.dispatcher.reply_timeout_ms,
            "invitation coordinator started"
        );

        Self {
            dispatcher,
            coordinator,
            task,
        }
    }

    /// Stop the coordinator and wait for its task to finish
    pub async fn shutdown(self) -> Result<()> {
        // Already stopped is fine; the join below still reports panics.
        let _ = self.coordinator.shutdown();
        self.task.await.context("coordinator task failed")?;
        info!("invitation coordinator stopped");
        Ok(())
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
