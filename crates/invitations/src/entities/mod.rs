//! Domain entities for the invitation system.

pub mod invitation;

pub use invitation::{ChatCredentials, ChatInfo, Direction, Invitation, SignalPayload};
