//! # Huddle Invitations Crate
//!
//! This crate coordinates one-to-one chat invitations between users who share
//! a signaling session. Each peer keeps its own set of pending invitations;
//! the [`InvitationCoordinator`] keeps the two sets converging while local
//! actions and remote signals race each other.
//!
//! ## Architecture
//!
//! - **Entities**: the [`Invitation`] and its wire payload
//! - **Services**: the coordinator and the chat API client
//! - **Dispatcher**: typed event bus with request/response queries
//! - **Session**: the signaling transport seam
//! - **Types**: identity handles, signals, bus events and errors
//!
//! ## Usage
//!
//! ```rust,ignore
//! use huddle_invitations::{Dispatcher, HttpChatApi, InvitationCoordinator};
//!
//! let dispatcher = Dispatcher::new(&config.dispatcher);
//! let chat_api = Arc::new(HttpChatApi::new(&config.chat_api)?);
//! let (coordinator, _task) = InvitationCoordinator::new(dispatcher.clone(), chat_api).spawn();
//!
//! dispatcher.trigger(BusEvent::PresenceSessionReady(session));
//! coordinator.invite_remote_user(bob)?;
//! ```

pub mod dispatcher;
pub mod entities;
pub mod services;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use dispatcher::{Dispatcher, QueryKind, ResponderRegistration};
pub use entities::{ChatCredentials, ChatInfo, Direction, Invitation, SignalPayload};
pub use services::{ChatApi, CoordinatorHandle, DeclineTarget, HttpChatApi, InvitationCoordinator};
pub use session::{SessionHandle, SignalingSession};
pub use types::{
    BusEvent, Connection, InvitationError, InvitationId, InvitationResult, OutboundSignal,
    RemoteUser, RequestId, SignalEvent, SignalKind,
};
