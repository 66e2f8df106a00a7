//! Services that drive invitations through their lifecycle.
//!
//! The coordinator owns the pending set and talks to the outside world
//! through the chat API, the dispatcher and the signaling session.

pub mod chat_api;
pub mod coordinator;

pub use chat_api::{ChatApi, HttpChatApi};
pub use coordinator::{CoordinatorHandle, DeclineTarget, InvitationCoordinator};
